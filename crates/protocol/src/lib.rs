//! The failover protocol.
//!
//! Two coordinators cooperate over a single bidirectional QUIC stream: the
//! client runs on the currently active validator, the server on the
//! passive standby. They exchange one message type in lockstep, transfer
//! the tower file with hash verification, swap identities at a slot
//! boundary, and roll back symmetrically on failure.
//!
//! The two sides share the wire format but deliberately run different
//! state machines ([`server::FailoverServer`] and
//! [`client::FailoverClient`]); the sequencing is asymmetric on purpose
//! and is not unified behind a common driver.

pub mod client;
pub mod command;
pub mod hooks;
pub mod message;
pub mod monitor;
pub mod server;
pub mod session;
pub mod transport;
pub mod wire;

mod error;

pub use client::{ClientConfig, ClientOutcome, FailoverClient};
pub use command::CommandRunner;
pub use error::ProtocolError;
pub use hooks::{Hook, HookEnv, HookSet, PhaseHooks};
pub use message::FailoverMessage;
pub use monitor::CreditSamplesConfig;
pub use server::{Confirm, FailoverServer, ServerConfig, StdinConfirm};
pub use session::SessionStream;
pub use transport::TransportSettings;
