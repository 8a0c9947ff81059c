use rpcore::zrtp::HandshakeConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CallConfig {
    /// Overall budget for one handshake once the first message is seen.
    pub negotiation_timeout: Duration,
    /// How long an initiator waits for the responder's first Hello.
    /// Covers the time the callee spends deciding whether to answer.
    pub hello_timeout: Duration,
    pub retransmit_initial: Duration,
    /// Retransmit interval doubles up to this cap.
    pub retransmit_max: Duration,
    /// Upper bound on a single blocking read, so termination is noticed promptly.
    pub read_timeout: Duration,
    pub handshake: HandshakeConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(15),
            hello_timeout: Duration::from_secs(60),
            retransmit_initial: Duration::from_millis(150),
            retransmit_max: Duration::from_millis(1200),
            read_timeout: Duration::from_millis(50),
            handshake: HandshakeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Our own number in E.164 form; used to complete short peer numbers.
    pub local_number: String,
    /// Where `FileStore` keeps the ZID and retained secrets.
    pub data_dir: Option<PathBuf>,
    pub call: CallConfig,
}

impl ClientConfig {
    pub fn new(local_number: impl Into<String>) -> Self {
        Self {
            local_number: local_number.into(),
            ..Default::default()
        }
    }
}
