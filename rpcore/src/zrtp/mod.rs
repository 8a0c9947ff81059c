//! ZRTP (RFC 6189) key agreement as used by RedPhone calls.
//!
//! Everything here is synchronous and free of I/O: [`engine::ZrtpEngine`]
//! consumes raw datagrams and yields the packets to send next. The async
//! socket that moves those packets over the network lives in the client crate.

pub mod engine;
pub mod error;
pub mod hash_chain;
pub mod key_agreement;
pub mod master_secret;
pub mod packet;
pub mod retained;
pub mod sas;

pub use engine::{
    CACHE_FOREVER, EngineEvent, HandshakeConfig, HandshakeOutcome, HandshakeState, Role, Step,
    ZrtpEngine,
};
pub use error::{Result, ZrtpError};
pub use hash_chain::HashChain;
pub use key_agreement::KeyAgreementType;
pub use master_secret::{DirectionalKeys, MasterSecret, MediaKeys};
pub use retained::RetainedSecrets;
