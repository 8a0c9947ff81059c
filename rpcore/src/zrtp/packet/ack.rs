use super::{HandshakePacket, MessageType};

const ACK_LENGTH: usize = 12;

/// HelloACK carries no payload and no MAC.
pub fn hello_ack() -> HandshakePacket {
    HandshakePacket::new(MessageType::HelloAck, ACK_LENGTH)
}

pub fn conf2_ack() -> HandshakePacket {
    HandshakePacket::new(MessageType::Conf2Ack, ACK_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acks_are_header_only() {
        let wire = conf2_ack().encode(9, 9);
        assert_eq!(wire.len(), 28);
        let parsed = HandshakePacket::parse(&wire).unwrap();
        assert_eq!(parsed.message_type(), MessageType::Conf2Ack);
        assert_eq!(parsed.message_length(), 12);
        assert_eq!(
            HandshakePacket::parse(&hello_ack().encode(1, 1))
                .unwrap()
                .message_type(),
            MessageType::HelloAck
        );
    }
}
