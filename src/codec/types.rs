use bytes::Bytes;
use num_enum::TryFromPrimitive;
use std::{fmt, io};

/// Largest value the four-byte remaining length field can carry.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Largest string or binary field a two-byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = 65_535;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown packet type {0}")]
    BadPacketType(u8),
    #[error("stream ended before the declared length was read")]
    TruncatedStream,
    #[error("malformed remaining length")]
    MalformedLength,
    #[error("packet body does not match its remaining length")]
    InconsistentRemainder,
    #[error("invalid QoS level {0}")]
    InvalidQoS(u8),
    #[error("unsupported protocol name or level")]
    InvalidProtocol,
    #[error("invalid connect return code {0}")]
    InvalidConnectCode(u8),
    #[error("invalid subscribe return code {0}")]
    InvalidSubscribeReturnCode(u8),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("remaining length {0} exceeds the configured maximum")]
    MaxSizeExceeded(u32),
    #[error("inflated payload exceeds {0} bytes")]
    InflatedSizeExceeded(usize),
    #[error("failed to inflate gzip payload")]
    Decompress(#[source] io::Error),
    #[error(transparent)]
    Io(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("remaining length {0} exceeds 268435455")]
    RemainingLengthTooLarge(usize),
    #[error("field of {0} bytes exceeds 65535")]
    FieldTooLong(usize),
    #[error("failed to gzip payload")]
    Compress(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::TruncatedStream,
            _ => DecodeError::Io(err),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum PacketType {
    Connect = 1,
    ConnectAck = 2,
    Publish = 3,
    PublishAck = 4,
    PublishReceived = 5,
    PublishRelease = 6,
    PublishComplete = 7,
    Subscribe = 8,
    SubscribeAck = 9,
    Unsubscribe = 10,
    UnsubscribeAck = 11,
    PingRequest = 12,
    PingResponse = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::ConnectAck => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::PublishAck => "PUBACK",
            PacketType::PublishReceived => "PUBREC",
            PacketType::PublishRelease => "PUBREL",
            PacketType::PublishComplete => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::SubscribeAck => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::UnsubscribeAck => "UNSUBACK",
            PacketType::PingRequest => "PINGREQ",
            PacketType::PingResponse => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
        }
    }

    /// PUBREL, SUBSCRIBE and UNSUBSCRIBE must be sent with QoS 1 in the
    /// fixed header.
    pub fn requires_qos_one(&self) -> bool {
        matches!(
            self,
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, TryFromPrimitive)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, TryFromPrimitive)]
pub enum Protocol {
    /// MQTT 3.1, protocol name `MQIsdp`
    V31 = 3,
    /// MQTT 3.1.1, protocol name `MQTT`
    #[default]
    V311 = 4,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::V31 => "MQIsdp",
            Protocol::V311 => "MQTT",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, TryFromPrimitive)]
pub enum ConnectCode {
    /// Connection accepted
    #[default]
    Accepted = 0x00,
    /// The Server does not support the level of the MQTT protocol requested by the Client
    UnacceptableProtocol = 0x01,
    /// The Client identifier is correct UTF-8 but not allowed by the Server
    IdentifierRejected = 0x02,
    /// The Network Connection has been made but the MQTT service is unavailable
    ServerUnavailable = 0x03,
    /// The data in the user name or password is malformed
    BadUsernameOrPassword = 0x04,
    /// The Client is not authorized to connect
    NotAuthorized = 0x05,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub fn to_byte(self) -> u8 {
        match self {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => 0x80,
        }
    }
}

impl TryFrom<u8> for SubscribeReturnCode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x80 => Ok(SubscribeReturnCode::Failure),
            _ => QoS::try_from(byte)
                .map(SubscribeReturnCode::Success)
                .map_err(|_| DecodeError::InvalidSubscribeReturnCode(byte)),
        }
    }
}

/// The packet type, flags and remaining length that prefix every packet.
///
/// `remaining_length` is derived from a packet's fields right before it is
/// encoded and is trusted as-is while decoding the body that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub remaining_length: u32,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType) -> Self {
        let qos = if packet_type.requires_qos_one() {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        };

        Self {
            packet_type,
            dup: false,
            qos,
            retain: false,
            remaining_length: 0,
        }
    }

    pub fn first_byte(&self) -> u8 {
        let mut byte = (self.packet_type as u8) << 4;

        if self.dup {
            byte |= 0b0000_1000;
        }

        byte |= ((self.qos as u8) << 1) & 0b0000_0110;

        if self.retain {
            byte |= 0b0000_0001;
        }

        byte
    }
}

impl fmt::Display for FixedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{type: {} qos: {} remaining: {}}}",
            self.packet_type, self.qos as u8, self.remaining_length
        )
    }
}

pub(crate) trait PacketSize {
    fn calc_size(&self) -> usize;
}

impl PacketSize for String {
    fn calc_size(&self) -> usize {
        2 + self.len()
    }
}

impl PacketSize for &str {
    fn calc_size(&self) -> usize {
        2 + self.len()
    }
}

impl PacketSize for Bytes {
    fn calc_size(&self) -> usize {
        2 + self.len()
    }
}

impl<T: PacketSize> PacketSize for Option<T> {
    fn calc_size(&self) -> usize {
        match self {
            Some(p) => p.calc_size(),
            None => 0,
        }
    }
}

impl PacketSize for Vec<String> {
    fn calc_size(&self) -> usize {
        self.iter().map(|x| x.calc_size()).sum()
    }
}

impl PacketSize for Vec<SubscriptionTopic> {
    fn calc_size(&self) -> usize {
        self.iter().map(|x| x.calc_size()).sum()
    }
}

// Payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl PacketSize for LastWill {
    fn calc_size(&self) -> usize {
        self.topic.calc_size() + self.message.calc_size()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTopic {
    pub topic_path: String,
    pub qos: QoS,
}

impl PacketSize for SubscriptionTopic {
    fn calc_size(&self) -> usize {
        self.topic_path.calc_size() + 1
    }
}

// Control Packets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect {
    pub protocol: Protocol,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// The connect flags byte, MSB first:
    /// `user | pass | will retain | will qos (2 bits) | will | clean | reserved`.
    pub fn flags(&self) -> u8 {
        let mut flags: u8 = 0b0000_0000;

        if self.username.is_some() {
            flags |= 0b1000_0000;
        }

        if self.password.is_some() {
            flags |= 0b0100_0000;
        }

        if let Some(will) = &self.will {
            if will.retain {
                flags |= 0b0010_0000;
            }

            flags |= ((will.qos as u8) & 0b0000_0011) << 3;
            flags |= 0b0000_0100;
        }

        if self.clean_session {
            flags |= 0b0000_0010;
        }

        flags
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub code: ConnectCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Only written when `qos` is above [`QoS::AtMostOnce`].
    pub pid: Option<u16>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Puback {
    pub pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pubrec {
    pub pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pubrel {
    pub pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pubcomp {
    pub pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscribe {
    pub pid: u16,
    pub topics: Vec<SubscriptionTopic>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suback {
    pub pid: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unsubscribe {
    pub pid: u16,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unsuback {
    pub pid: u16,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Puback),
    Pubrec(Pubrec),
    Pubrel(Pubrel),
    Pubcomp(Pubcomp),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::ConnectAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::PublishAck,
            Packet::Pubrec(_) => PacketType::PublishReceived,
            Packet::Pubrel(_) => PacketType::PublishRelease,
            Packet::Pubcomp(_) => PacketType::PublishComplete,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::SubscribeAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::UnsubscribeAck,
            Packet::Pingreq => PacketType::PingRequest,
            Packet::Pingresp => PacketType::PingResponse,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Fixed header for this packet with the given remaining length.
    ///
    /// Only PUBLISH carries caller-controlled flags; every other packet gets
    /// the flags the protocol mandates for its type.
    pub fn fixed_header(&self, remaining_length: u32) -> FixedHeader {
        let mut header = FixedHeader::new(self.packet_type());
        header.remaining_length = remaining_length;

        if let Packet::Publish(publish) = self {
            header.dup = publish.dup;
            header.qos = publish.qos;
            header.retain = publish.retain;
        }

        header
    }

    /// Remaining length of the packet as written without payload compression.
    pub fn calculate_size(&self) -> usize {
        self.calc_size()
    }
}

impl PacketSize for Packet {
    fn calc_size(&self) -> usize {
        match self {
            Packet::Connect(p) => {
                let mut size = p.protocol.name().calc_size();

                // Protocol level + connect flags + keep-alive
                size += 1 + 1 + 2;

                size += p.client_id.calc_size();
                size += p.will.calc_size();
                size += p.username.calc_size();
                size += p.password.calc_size();

                size
            }
            Packet::Connack(_p) => {
                // flags + return code
                1 + 1
            }
            Packet::Publish(p) => {
                let mut size = p.topic.calc_size();

                if p.qos != QoS::AtMostOnce {
                    size += 2;
                }

                // This payload does not have a length prefix
                size += p.payload.len();

                size
            }
            Packet::Puback(_) | Packet::Pubrec(_) | Packet::Pubrel(_) | Packet::Pubcomp(_) => 2,
            Packet::Subscribe(p) => 2 + p.topics.calc_size(),
            Packet::Suback(p) => 2 + p.return_codes.len(),
            Packet::Unsubscribe(p) => 2 + p.topics.calc_size(),
            Packet::Unsuback(_) => 2,
            Packet::Pingreq => 0,
            Packet::Pingresp => 0,
            Packet::Disconnect => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_byte_packs_flags() {
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            dup: true,
            qos: QoS::ExactlyOnce,
            retain: true,
            remaining_length: 0,
        };
        assert_eq!(header.first_byte(), 0b0011_1101);
    }

    #[test]
    fn mandated_qos_for_release_and_subscriptions() {
        assert_eq!(Packet::Pubrel(Pubrel { pid: 1 }).fixed_header(2).first_byte(), 0x62);
        assert_eq!(Packet::Subscribe(Subscribe::default()).fixed_header(2).first_byte(), 0x82);
        assert_eq!(Packet::Unsubscribe(Unsubscribe::default()).fixed_header(2).first_byte(), 0xA2);
        assert_eq!(Packet::Puback(Puback { pid: 1 }).fixed_header(2).first_byte(), 0x40);
    }

    #[test]
    fn connect_flags_layout() {
        let connect = Connect {
            protocol: Protocol::V311,
            clean_session: true,
            keep_alive: 0,
            client_id: String::new(),
            will: Some(LastWill {
                topic: "w".into(),
                message: Bytes::from_static(b"bye"),
                qos: QoS::ExactlyOnce,
                retain: true,
            }),
            username: Some("u".into()),
            password: Some(Bytes::from_static(b"p")),
        };
        assert_eq!(connect.flags(), 0b1111_0110);
    }

    #[test]
    fn subscribe_return_codes() {
        assert_eq!(
            SubscribeReturnCode::try_from(1).unwrap(),
            SubscribeReturnCode::Success(QoS::AtLeastOnce)
        );
        assert_eq!(SubscribeReturnCode::try_from(0x80).unwrap(), SubscribeReturnCode::Failure);
        assert!(matches!(
            SubscribeReturnCode::try_from(3),
            Err(DecodeError::InvalidSubscribeReturnCode(3))
        ));
    }

    #[test]
    fn defaults_do_not_catch_unknown_values() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
        assert_eq!(Protocol::default(), Protocol::V311);
        assert_eq!(ConnectCode::default(), ConnectCode::Accepted);

        assert!(QoS::try_from(3).is_err());
        assert!(Protocol::try_from(5).is_err());
        assert!(ConnectCode::try_from(6).is_err());
    }

    #[test]
    fn wrapped_io_error_is_only_a_source() {
        use std::error::Error;

        let err = DecodeError::Decompress(io::Error::new(io::ErrorKind::InvalidData, "bad header"));
        assert_eq!(err.to_string(), "failed to inflate gzip payload");
        assert_eq!(err.source().unwrap().to_string(), "bad header");

        let err = EncodeError::Compress(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(!err.to_string().contains("disk full"));
    }
}
