// Protocol core: packets, key agreement, the handshake engine and store traits.
pub use rpcore;

pub mod calls;
pub mod config;
pub mod store;
pub mod terminator;
pub mod transport;
pub mod zrtp;

pub use calls::{CallError, CallEvent, CallEventKind, CallOutcome, CallService, Continuity};
pub use config::{CallConfig, ClientConfig};
