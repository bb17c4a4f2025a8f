//! UI boundary over a real WebSocket.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use wallet_sentry::Shutdown;

mod common;
use common::*;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(h: &Harness, shutdown: &Shutdown) -> (SocketAddr, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = h.sentry.ui_server();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));
    (addr, handle)
}

async fn open(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut Client, message: Value) {
    client.send(Message::Text(message.to_string().into())).await.unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// Skip messages until one of the given `type` arrives.
async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let message = next_json(client).await;
        if message["type"] == kind {
            return message;
        }
    }
}

#[tokio::test]
async fn test_client_receives_snapshot_then_live_updates() {
    let host = MockHost::pushing(vec![account(1)], 1);
    let h = harness(test_config(), Some(host), None);
    let shutdown = Shutdown::new();
    let (addr, _server) = serve(&h, &shutdown).await;
    let mut client = open(addr).await;

    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "connection_status", "status": "disconnected", "backend": null})
    );

    send(&mut client, json!({"type": "connect"})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "connection_status", "status": "connecting", "backend": "injected"})
    );
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "connection_status", "status": "connected", "backend": "injected"})
    );
    let state = next_of_type(&mut client, "wallet_state").await;
    assert_eq!(state["address"], json!(account(1)));
    assert_eq!(state["chainId"], json!(1));
    assert_eq!(state["balanceWei"], json!(ONE_ETHER_WEI));

    // A late client gets the current state without waiting for a change.
    let mut late = open(addr).await;
    assert_eq!(
        next_json(&mut late).await,
        json!({"type": "connection_status", "status": "connected", "backend": "injected"})
    );
    assert_eq!(next_json(&mut late).await["type"], "wallet_state");
}

#[tokio::test]
async fn test_transaction_round_trip_over_socket() {
    let host = MockHost::pushing(vec![account(1)], 1);
    let h = harness(test_config(), Some(host.clone()), None);
    h.sentry.manager().connect(None).await.unwrap();
    let shutdown = Shutdown::new();
    let (addr, _server) = serve(&h, &shutdown).await;
    let mut client = open(addr).await;

    send(
        &mut client,
        json!({
            "type": "submit_transaction",
            "ref": "tx1",
            "params": {"to": "0x1111111111111111111111111111111111111111", "value": "0x1"},
        }),
    )
    .await;
    let result = next_of_type(&mut client, "transaction_result").await;

    assert_eq!(result["ref"], "tx1");
    assert!(result["txHash"].as_str().unwrap().starts_with("0x"));
    assert_eq!(result["error"], Value::Null);
    assert_eq!(host.calls("eth_sendTransaction"), 1);
}

#[tokio::test]
async fn test_balance_and_chain_commands_reply() {
    let host = MockHost::pushing(vec![account(1)], 1);
    let h = harness(test_config(), Some(host), None);
    h.sentry.manager().connect(None).await.unwrap();
    let shutdown = Shutdown::new();
    let (addr, _server) = serve(&h, &shutdown).await;
    let mut client = open(addr).await;

    send(&mut client, json!({"type": "refresh_balance", "address": account(1)})).await;
    let balance = next_of_type(&mut client, "balance_result").await;
    assert_eq!(balance["balanceWei"], json!(ONE_ETHER_WEI));
    assert_eq!(balance["error"], Value::Null);

    let params = serde_json::to_value(wallet_sentry::provider::ChainParams::xdai()).unwrap();
    send(&mut client, json!({"type": "add_chain", "params": params})).await;
    let chain = next_of_type(&mut client, "chain_result").await;
    assert_eq!(chain["chainId"], "0x64");
    assert_eq!(chain["error"], Value::Null);
}

#[tokio::test]
async fn test_malformed_command_is_answered_only_to_sender() {
    let h = harness(test_config(), Some(MockHost::pushing(vec![account(1)], 1)), None);
    let shutdown = Shutdown::new();
    let (addr, _server) = serve(&h, &shutdown).await;
    let mut sender = open(addr).await;
    let mut bystander = open(addr).await;
    next_json(&mut sender).await;
    next_json(&mut bystander).await;

    sender.send(Message::Text("definitely not json".into())).await.unwrap();
    let reply = next_json(&mut sender).await;
    assert_eq!(reply["type"], "wallet_error");
    assert_eq!(reply["error"], "malformed_request");

    send(&mut sender, json!({"type": "launch_rockets"})).await;
    assert_eq!(next_json(&mut sender).await["error"], "malformed_request");

    let quiet = tokio::time::timeout(Duration::from_millis(150), bystander.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_health_reports_connection() {
    let host = MockHost::pushing(vec![account(1)], 1);
    let h = harness(test_config(), Some(host), None);
    let shutdown = Shutdown::new();
    let (addr, _server) = serve(&h, &shutdown).await;
    let url = format!("http://{addr}/health");

    let before: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(before, json!({"status": "ok", "connection": "disconnected", "backend": null}));

    h.sentry.manager().connect(None).await.unwrap();
    let after: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(after["connection"], "connected");
    assert_eq!(after["backend"], "injected");
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let h = harness(test_config(), Some(MockHost::pushing(vec![account(1)], 1)), None);
    let shutdown = Shutdown::new();
    let (addr, server) = serve(&h, &shutdown).await;
    let mut client = open(addr).await;
    next_json(&mut client).await;
    client.close(None).await.unwrap();

    shutdown.trigger();
    let finished = tokio::time::timeout(Duration::from_secs(5), server).await;

    assert!(matches!(finished, Ok(Ok(Ok(())))));
}
