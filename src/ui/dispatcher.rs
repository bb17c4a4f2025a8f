//! Routes UI commands to the core.

use crate::provider::types::ChainParams;
use crate::relay::TransactionRelay;
use crate::session::ConnectionManager;
use crate::ui::{Command, Notification, Notifier};

/// Turns [`Command`]s into core operations and their outcomes into notifications.
///
/// Every command returns immediately; slow operations run in their own task.
#[derive(Clone)]
pub struct Dispatcher {
    manager: ConnectionManager,
    relay: TransactionRelay,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(manager: ConnectionManager, relay: TransactionRelay, notifier: Notifier) -> Self {
        Self {
            manager,
            relay,
            notifier,
        }
    }

    pub fn dispatch(&self, command: Command) {
        match command {
            Command::Connect { backend } => {
                let manager = self.manager.clone();
                tokio::spawn(async move {
                    // Failures reach the UI as connection_status and wallet_error from the manager.
                    if let Err(e) = manager.connect(backend).await {
                        tracing::debug!(error = %e, "Connect command failed");
                    }
                });
            }
            Command::Disconnect => {
                let manager = self.manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.disconnect().await {
                        tracing::error!(error = %e, "Disconnect command failed");
                    }
                });
            }
            Command::SubmitTransaction(request) => self.relay.submit(request),
            Command::RefreshBalance { address } => {
                let manager = self.manager.clone();
                let notifier = self.notifier.clone();
                tokio::spawn(async move {
                    let notification = match manager.refresh_balance(address).await {
                        Ok(balance) => Notification::BalanceResult {
                            address,
                            balance_wei: Some(balance.to_string()),
                            error: None,
                        },
                        Err(e) => {
                            tracing::warn!(address = %address, error = %e, "Balance refresh failed");
                            Notification::BalanceResult {
                                address,
                                balance_wei: None,
                                error: Some(e.kind()),
                            }
                        }
                    };
                    notifier.publish(notification);
                });
            }
            Command::AddChain { params } => self.add_chain(params),
        }
    }

    fn add_chain(&self, params: ChainParams) {
        let manager = self.manager.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let chain_id = params.chain_id.clone();
            let error = match manager.add_chain(params).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(chain_id = %chain_id, error = %e, "Chain addition failed");
                    Some(e.kind())
                }
            };
            notifier.publish(Notification::ChainResult { chain_id, error });
        });
    }
}
