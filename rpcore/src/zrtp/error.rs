use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZrtpError {
    /// Bad length, CRC, MAC or hash commitment. Always fatal to the handshake.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("recipient unavailable")]
    RecipientUnavailable,

    #[error("unsupported key agreement: {0}")]
    UnsupportedKeyAgreement(String),

    /// A handshake invariant did not hold, e.g. a missing packet we should have stored.
    #[error("internal handshake error: {0}")]
    Internal(&'static str),
}

impl ZrtpError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidPacket(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ZrtpError>;
