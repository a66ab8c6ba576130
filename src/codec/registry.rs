//! Mapping from packet type codes to empty packet variants.

use super::types::{
    Connack, Connect, FixedHeader, Packet, PacketType, Puback, Pubcomp, Publish, Pubrec, Pubrel,
    Suback, Subscribe, Unsuback, Unsubscribe,
};

impl FixedHeader {
    /// Header for a raw type code, with the QoS the protocol mandates for
    /// that type. Unknown codes have no header.
    pub fn for_type(type_code: u8) -> Option<Self> {
        PacketType::try_from(type_code).ok().map(FixedHeader::new)
    }
}

impl Packet {
    /// Empty packet of the header's type. PUBLISH keeps the header's flags.
    pub fn from_header(header: &FixedHeader) -> Self {
        match header.packet_type {
            PacketType::Connect => Packet::Connect(Connect::default()),
            PacketType::ConnectAck => Packet::Connack(Connack::default()),
            PacketType::Publish => Packet::Publish(Publish {
                dup: header.dup,
                qos: header.qos,
                retain: header.retain,
                ..Default::default()
            }),
            PacketType::PublishAck => Packet::Puback(Puback::default()),
            PacketType::PublishReceived => Packet::Pubrec(Pubrec::default()),
            PacketType::PublishRelease => Packet::Pubrel(Pubrel::default()),
            PacketType::PublishComplete => Packet::Pubcomp(Pubcomp::default()),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::default()),
            PacketType::SubscribeAck => Packet::Suback(Suback::default()),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::default()),
            PacketType::UnsubscribeAck => Packet::Unsuback(Unsuback::default()),
            PacketType::PingRequest => Packet::Pingreq,
            PacketType::PingResponse => Packet::Pingresp,
            PacketType::Disconnect => Packet::Disconnect,
        }
    }
}

/// Empty packet for a raw type code, `None` when the code is not a packet
/// type.
pub fn new_packet(type_code: u8) -> Option<Packet> {
    FixedHeader::for_type(type_code).map(|header| Packet::from_header(&header))
}
