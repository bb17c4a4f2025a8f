//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote transport lost:
//!     → backoff.rs (bounded schedule of jittered delays)
//!     → adapter.reconnect() per attempt
//!     → give up after the last attempt
//! ```
//!
//! # Design Decisions
//! - Every retry loop is bounded
//! - Jitter spreads reconnects of many clients against one bridge

pub mod backoff;
