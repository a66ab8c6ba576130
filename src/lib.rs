//! MQTT 3.1.1 control packet codec.
//!
//! Turns the bytes of a stream into typed [`Packet`]s and back, with
//! optional gzip compression of large PUBLISH payloads.
//!
//! ```
//! use mqcodec::{MqttCodec, Packet, Puback};
//!
//! let codec = MqttCodec::new();
//! let bytes = codec.encode(&Packet::Puback(Puback { pid: 10 })).unwrap();
//! assert_eq!(bytes, [0x40, 0x02, 0x00, 0x0A]);
//!
//! let packet = codec.read_packet(&mut &bytes[..]).unwrap();
//! assert_eq!(packet, Packet::Puback(Puback { pid: 10 }));
//! ```

pub mod codec;

pub use codec::{
    encode, read_packet, CodecConfig, DecodeError, EncodeError, MqttCodec, Packet, PacketReader,
    PacketType, QoS,
};
pub use codec::{
    Connack, Connect, ConnectCode, LastWill, Protocol, Puback, Pubcomp, Publish, Pubrec, Pubrel,
    Suback, Subscribe, SubscribeReturnCode, SubscriptionTopic, Unsuback, Unsubscribe,
};
