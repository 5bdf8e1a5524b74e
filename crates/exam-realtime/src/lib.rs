//! Client engine for a realtime exam monitoring channel.
//!
//! Maintains an authenticated WebSocket connection to the exam timer server,
//! routes inbound messages to registered handlers and built-in reducers, and
//! keeps an idempotent per-exam roster projection that commands and UI
//! surfaces can snapshot at any time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use exam_realtime::{EnvTokenSource, RealtimeClient, RealtimeConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RealtimeConfig::from_env()?;
//! let client = RealtimeClient::new(config, Arc::new(EnvTokenSource::default()));
//! client.open();
//!
//! let mut state = client.watch_state();
//! while state.changed().await.is_ok() {
//!     println!("connection: {}", *state.borrow_and_update());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
mod commands;
pub mod config;
pub mod protocol;
pub mod retry;
pub mod roster;
pub mod router;

pub use client::{ConnectionState, RealtimeClient};
pub use config::{ConfigError, EnvTokenSource, RealtimeConfig, StaticTokenSource, TokenSource};
pub use protocol::{ALL_EXAMS, ClientCommand, ServerEvent, StartTime, TimerSnapshot};
pub use roster::{ExamSession, StudentTimer};
pub use router::{EventHandler, Notification};
