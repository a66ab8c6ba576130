use super::{
    compress,
    config::CodecConfig,
    types::{
        Connack, Connect, ConnectCode, DecodeError, FixedHeader, LastWill, Packet, PacketSize,
        PacketType, Protocol, Puback, Pubcomp, Publish, Pubrec, Pubrel, QoS, Suback, Subscribe,
        SubscribeReturnCode, SubscriptionTopic, Unsuback, Unsubscribe,
    },
};
use bytes::Bytes;
use std::io::Read;

fn read_u8<R: Read>(bytes: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    bytes.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn decode_u16<R: Read>(bytes: &mut R) -> Result<u16, DecodeError> {
    let mut buf = [0u8; 2];
    bytes.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read exactly `size` bytes without trusting `size` for the allocation.
fn read_exact_vec<R: Read>(bytes: &mut R, size: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    bytes.by_ref().take(size as u64).read_to_end(&mut buf)?;

    if buf.len() < size {
        return Err(DecodeError::TruncatedStream);
    }

    Ok(buf)
}

pub fn decode_variable_int<R: Read>(bytes: &mut R) -> Result<u32, DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;

    for _ in 0..4 {
        let encoded_byte = read_u8(bytes).map_err(|err| match err {
            DecodeError::TruncatedStream => DecodeError::MalformedLength,
            err => err,
        })?;

        value += ((encoded_byte & 0b0111_1111) as u32) * multiplier;

        multiplier *= 128;

        if encoded_byte & 0b1000_0000 == 0b0000_0000 {
            return Ok(value);
        }
    }

    Err(DecodeError::MalformedLength)
}

pub fn decode_string<R: Read>(bytes: &mut R) -> Result<String, DecodeError> {
    let str_size_bytes = decode_u16(bytes)? as usize;

    String::from_utf8(read_exact_vec(bytes, str_size_bytes)?).map_err(|_| DecodeError::InvalidUtf8)
}

pub fn decode_binary_data<R: Read>(bytes: &mut R) -> Result<Bytes, DecodeError> {
    let data_size_bytes = decode_u16(bytes)? as usize;

    Ok(read_exact_vec(bytes, data_size_bytes)?.into())
}

/// Decode the rest of a fixed header whose first byte has already been read.
///
/// The remaining length is always read first, so an unknown packet type
/// leaves the stream positioned at the start of the body.
pub fn decode_fixed_header<R: Read>(
    first_byte: u8,
    bytes: &mut R,
) -> Result<FixedHeader, DecodeError> {
    let remaining_length = decode_variable_int(bytes)?;

    let type_code = (first_byte & 0b1111_0000) >> 4;
    let packet_type =
        PacketType::try_from(type_code).map_err(|_| DecodeError::BadPacketType(type_code))?;

    let qos_val = (first_byte & 0b0000_0110) >> 1;
    let qos = QoS::try_from(qos_val).map_err(|_| DecodeError::InvalidQoS(qos_val))?;

    Ok(FixedHeader {
        packet_type,
        dup: (first_byte & 0b0000_1000) == 0b0000_1000,
        qos,
        retain: (first_byte & 0b0000_0001) == 0b0000_0001,
        remaining_length,
    })
}

/// Length of the fixed header and the remaining length at the front of
/// `buf`, or `None` while the header is still incomplete.
pub fn peek_fixed_header(buf: &[u8]) -> Result<Option<(usize, u32)>, DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;

    for (i, encoded_byte) in buf.iter().skip(1).take(4).enumerate() {
        value += ((encoded_byte & 0b0111_1111) as u32) * multiplier;

        multiplier *= 128;

        if encoded_byte & 0b1000_0000 == 0b0000_0000 {
            return Ok(Some((i + 2, value)));
        }
    }

    if buf.len() >= 5 {
        return Err(DecodeError::MalformedLength);
    }

    Ok(None)
}

fn decode_connect<R: Read>(bytes: &mut R) -> Result<Packet, DecodeError> {
    let protocol_name = decode_string(bytes)?;
    let protocol_level = read_u8(bytes)?;

    let protocol = Protocol::try_from(protocol_level)
        .ok()
        .filter(|protocol| protocol.name() == protocol_name)
        .ok_or(DecodeError::InvalidProtocol)?;

    let connect_flags = read_u8(bytes)?;
    let keep_alive = decode_u16(bytes)?;

    let clean_session = connect_flags & 0b0000_0010 == 0b0000_0010;
    let has_will = connect_flags & 0b0000_0100 == 0b0000_0100;
    let will_qos_val = (connect_flags & 0b0001_1000) >> 3;
    let will_qos = QoS::try_from(will_qos_val).map_err(|_| DecodeError::InvalidQoS(will_qos_val))?;
    let retain_will = connect_flags & 0b0010_0000 == 0b0010_0000;
    let has_password = connect_flags & 0b0100_0000 == 0b0100_0000;
    let has_user_name = connect_flags & 0b1000_0000 == 0b1000_0000;

    let client_id = decode_string(bytes)?;

    let will = if has_will {
        let topic = decode_string(bytes)?;
        let message = decode_binary_data(bytes)?;

        Some(LastWill {
            topic,
            message,
            qos: will_qos,
            retain: retain_will,
        })
    } else {
        None
    };

    let username = if has_user_name {
        Some(decode_string(bytes)?)
    } else {
        None
    };

    let password = if has_password {
        Some(decode_binary_data(bytes)?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        protocol,
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    }))
}

fn decode_connect_ack<R: Read>(bytes: &mut R) -> Result<Packet, DecodeError> {
    let flags = read_u8(bytes)?;
    let session_present = (flags & 0b0000_0001) == 0b0000_0001;

    let code_byte = read_u8(bytes)?;
    let code =
        ConnectCode::try_from(code_byte).map_err(|_| DecodeError::InvalidConnectCode(code_byte))?;

    Ok(Packet::Connack(Connack {
        session_present,
        code,
    }))
}

fn decode_publish<R: Read>(
    bytes: &mut R,
    header: &FixedHeader,
    config: &CodecConfig,
) -> Result<Packet, DecodeError> {
    let topic = decode_string(bytes)?;

    let pid = match header.qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce | QoS::ExactlyOnce => Some(decode_u16(bytes)?),
    };

    let variable_header_size = topic.calc_size() + if pid.is_some() { 2 } else { 0 };
    let payload_size = (header.remaining_length as usize)
        .checked_sub(variable_header_size)
        .ok_or(DecodeError::InconsistentRemainder)?;

    let mut payload: Bytes = read_exact_vec(bytes, payload_size)?.into();

    if config.decompress_enabled() && compress::is_gzip_topic(&topic) {
        payload = compress::decompress(&payload, config.inflate_limit())?;
        log::debug!(
            "Inflated publish payload on {:?}: {} -> {} bytes",
            topic,
            payload_size,
            payload.len()
        );
    }

    Ok(Packet::Publish(Publish {
        dup: header.dup,
        qos: header.qos,
        retain: header.retain,
        topic,
        pid,
        payload,
    }))
}

fn decode_subscribe<R: Read>(
    bytes: &mut R,
    remaining_packet_length: u32,
) -> Result<Packet, DecodeError> {
    let pid = decode_u16(bytes)?;

    let mut remaining = (remaining_packet_length as usize)
        .checked_sub(2)
        .ok_or(DecodeError::InconsistentRemainder)?;

    let mut topics = vec![];

    while remaining > 0 {
        // Length prefix plus the requested QoS byte
        if remaining < 3 {
            return Err(DecodeError::InconsistentRemainder);
        }

        let topic_path = decode_string(bytes)?;
        let qos_byte = read_u8(bytes)?;
        let qos = QoS::try_from(qos_byte).map_err(|_| DecodeError::InvalidQoS(qos_byte))?;

        let topic = SubscriptionTopic { topic_path, qos };
        remaining = remaining
            .checked_sub(topic.calc_size())
            .ok_or(DecodeError::InconsistentRemainder)?;

        topics.push(topic);
    }

    Ok(Packet::Subscribe(Subscribe { pid, topics }))
}

fn decode_subscribe_ack<R: Read>(
    bytes: &mut R,
    remaining_packet_length: u32,
) -> Result<Packet, DecodeError> {
    let pid = decode_u16(bytes)?;

    let payload_size = (remaining_packet_length as usize)
        .checked_sub(2)
        .ok_or(DecodeError::InconsistentRemainder)?;

    let return_codes = read_exact_vec(bytes, payload_size)?
        .into_iter()
        .map(SubscribeReturnCode::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Packet::Suback(Suback { pid, return_codes }))
}

fn decode_unsubscribe<R: Read>(
    bytes: &mut R,
    remaining_packet_length: u32,
) -> Result<Packet, DecodeError> {
    let pid = decode_u16(bytes)?;

    let mut remaining = (remaining_packet_length as usize)
        .checked_sub(2)
        .ok_or(DecodeError::InconsistentRemainder)?;

    let mut topics = vec![];

    while remaining > 0 {
        if remaining < 2 {
            return Err(DecodeError::InconsistentRemainder);
        }

        let topic = decode_string(bytes)?;
        remaining = remaining
            .checked_sub(topic.calc_size())
            .ok_or(DecodeError::InconsistentRemainder)?;

        topics.push(topic);
    }

    Ok(Packet::Unsubscribe(Unsubscribe { pid, topics }))
}

fn decode_packet<R: Read>(
    header: &FixedHeader,
    bytes: &mut R,
    config: &CodecConfig,
) -> Result<Packet, DecodeError> {
    let remaining_packet_length = header.remaining_length;

    match header.packet_type {
        PacketType::Connect => decode_connect(bytes),
        PacketType::ConnectAck => decode_connect_ack(bytes),
        PacketType::Publish => decode_publish(bytes, header, config),
        PacketType::PublishAck => Ok(Packet::Puback(Puback {
            pid: decode_u16(bytes)?,
        })),
        PacketType::PublishReceived => Ok(Packet::Pubrec(Pubrec {
            pid: decode_u16(bytes)?,
        })),
        PacketType::PublishRelease => Ok(Packet::Pubrel(Pubrel {
            pid: decode_u16(bytes)?,
        })),
        PacketType::PublishComplete => Ok(Packet::Pubcomp(Pubcomp {
            pid: decode_u16(bytes)?,
        })),
        PacketType::Subscribe => decode_subscribe(bytes, remaining_packet_length),
        PacketType::SubscribeAck => decode_subscribe_ack(bytes, remaining_packet_length),
        PacketType::Unsubscribe => decode_unsubscribe(bytes, remaining_packet_length),
        PacketType::UnsubscribeAck => Ok(Packet::Unsuback(Unsuback {
            pid: decode_u16(bytes)?,
        })),
        PacketType::PingRequest => Ok(Packet::Pingreq),
        PacketType::PingResponse => Ok(Packet::Pingresp),
        PacketType::Disconnect => Ok(Packet::Disconnect),
    }
}

/// Decode one packet whose first byte was already taken from `bytes`.
///
/// Exactly `remaining_length` body bytes are consumed: the body is read
/// through a reader capped at that length, and anything the packet leaves
/// unread is an error.
pub fn decode_mqtt<R: Read>(
    first_byte: u8,
    bytes: &mut R,
    config: &CodecConfig,
) -> Result<Packet, DecodeError> {
    let header = decode_fixed_header(first_byte, bytes)?;

    if config.max_size != 0 && header.remaining_length > config.max_size {
        return Err(DecodeError::MaxSizeExceeded(header.remaining_length));
    }

    if header.remaining_length == 0 {
        return Ok(Packet::from_header(&header));
    }

    let mut body = bytes.by_ref().take(header.remaining_length as u64);
    let packet = decode_packet(&header, &mut body, config)?;

    if body.limit() != 0 {
        return Err(DecodeError::InconsistentRemainder);
    }

    Ok(packet)
}

/// Read one whole packet, fixed header included, from `bytes`.
pub fn read_mqtt<R: Read>(bytes: &mut R, config: &CodecConfig) -> Result<Packet, DecodeError> {
    let first_byte = read_u8(bytes)?;
    decode_mqtt(first_byte, bytes, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
        read_mqtt(&mut &bytes[..], &CodecConfig::new())
    }

    #[test_case(&[0x00], 0)]
    #[test_case(&[0x7F], 127)]
    #[test_case(&[0x80, 0x01], 128)]
    #[test_case(&[0xFF, 0x7F], 16_383)]
    #[test_case(&[0x80, 0x80, 0x01], 16_384)]
    #[test_case(&[0xFF, 0xFF, 0x7F], 2_097_151)]
    #[test_case(&[0x80, 0x80, 0x80, 0x01], 2_097_152)]
    #[test_case(&[0xFF, 0xFF, 0xFF, 0x7F], 268_435_455)]
    fn test_decode_variable_int(encoded: &[u8], expected: u32) {
        let mut reader = encoded;
        assert_eq!(decode_variable_int(&mut reader).unwrap(), expected);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_decode_variable_int_crash() {
        let number: u32 = u32::MAX;
        let result = decode_variable_int(&mut &number.to_be_bytes()[..]);

        assert!(matches!(result, Err(DecodeError::MalformedLength)));
    }

    #[test]
    fn test_variable_int_ends_mid_sequence() {
        let result = decode_variable_int(&mut &[0x80, 0x80][..]);
        assert!(matches!(result, Err(DecodeError::MalformedLength)));
    }

    #[test]
    fn test_peek_fixed_header() {
        assert_eq!(peek_fixed_header(&[0x30]).unwrap(), None);
        assert_eq!(peek_fixed_header(&[0x30, 0x80]).unwrap(), None);
        assert_eq!(peek_fixed_header(&[0x30, 0x05]).unwrap(), Some((2, 5)));
        assert_eq!(peek_fixed_header(&[0x30, 0x80, 0x01, 0xAA]).unwrap(), Some((3, 128)));
        assert!(matches!(
            peek_fixed_header(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(DecodeError::MalformedLength)
        ));
    }

    #[test]
    fn test_truncated_string() {
        let result = decode_string(&mut &[0x00, 0x05, b'a', b'b'][..]);
        assert!(matches!(result, Err(DecodeError::TruncatedStream)));
    }

    #[test]
    fn test_invalid_utf8() {
        let result = decode_string(&mut &[0x00, 0x02, 0xC3, 0x28][..]);
        assert!(matches!(result, Err(DecodeError::InvalidUtf8)));
    }

    #[test]
    fn test_invalid_remaining_length() {
        // Discovered from fuzz test
        let result = decode(&[136, 1, 0, 36, 0, 0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_packet_type() {
        let bytes = [0xF0, 0x03, 0xAA, 0xBB, 0xCC];
        let mut reader = &bytes[..];

        let result = read_mqtt(&mut reader, &CodecConfig::new());

        assert!(matches!(result, Err(DecodeError::BadPacketType(15))));
        // The body is left alone
        assert_eq!(reader, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_decode_subscribe() {
        let bytes = [
            0x82, 0x09, 0x00, 0x01, 0x00, 0x04, 0x74, 0x65, 0x73, 0x74, 0x00,
        ];
        let subscribe = Packet::Subscribe(Subscribe {
            pid: 1,
            topics: vec![SubscriptionTopic {
                topic_path: "test".into(),
                qos: QoS::AtMostOnce,
            }],
        });

        assert_eq!(subscribe, decode(&bytes).unwrap());
    }

    #[test]
    fn test_subscribe_extra_byte() {
        // Declares one byte more than the two topics use
        let bytes = [
            0x82, 0x0F, 0x00, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x00, 0x03, b'c', b'/',
            b'd', 0x01, 0x00,
        ];
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InconsistentRemainder)
        ));
    }

    #[test]
    fn test_subscribe_missing_byte() {
        // Declares one byte less than the two topics use
        let bytes = [
            0x82, 0x0D, 0x00, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x00, 0x03, b'c', b'/',
            b'd', 0x01,
        ];
        assert!(matches!(decode(&bytes), Err(DecodeError::TruncatedStream)));
    }

    #[test]
    fn test_subscribe_invalid_qos() {
        let bytes = [0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x03];
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidQoS(3))));
    }

    #[test]
    fn test_unsubscribe_leftover_byte() {
        let bytes = [0xA2, 0x06, 0x00, 0x02, 0x00, 0x01, b'a', 0x00];
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InconsistentRemainder)
        ));
    }

    #[test]
    fn test_unsubscribe_missing_byte() {
        let bytes = [0xA2, 0x05, 0x00, 0x02, 0x00, 0x02, b'a', b'b'];
        assert!(matches!(decode(&bytes), Err(DecodeError::TruncatedStream)));
    }

    #[test]
    fn test_ack_with_trailing_byte() {
        let bytes = [0x40, 0x03, 0x00, 0x01, 0xFF];
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InconsistentRemainder)
        ));
    }

    #[test]
    fn test_publish_shorter_than_packet_id() {
        // remaining length 4 cannot hold the topic and packet id
        let bytes = [0x32, 0x04, 0x00, 0x01, b'a', 0x00, 0x01];
        assert!(matches!(decode(&bytes), Err(DecodeError::TruncatedStream)));
    }

    #[test]
    fn test_publish_qos_three() {
        let bytes = [0x36, 0x03, 0x00, 0x01, b'a'];
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidQoS(3))));
    }

    #[test]
    fn test_empty_body_gives_empty_variant() {
        assert_eq!(decode(&[0x40, 0x00]).unwrap(), Packet::Puback(Puback { pid: 0 }));
        assert_eq!(decode(&[0xC0, 0x00]).unwrap(), Packet::Pingreq);
        assert_eq!(decode(&[0xD0, 0x00]).unwrap(), Packet::Pingresp);
        assert_eq!(decode(&[0xE0, 0x00]).unwrap(), Packet::Disconnect);
    }

    #[test]
    fn test_connect_unknown_protocol() {
        let bytes = [
            0x10, 0x0C, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3C, 0x00, 0x00,
        ];
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidProtocol)));
    }

    #[test]
    fn test_connack_unknown_code() {
        assert!(matches!(
            decode(&[0x20, 0x02, 0x00, 0x06]),
            Err(DecodeError::InvalidConnectCode(6))
        ));
    }

    #[test]
    fn test_suback_codes() {
        let packet = decode(&[0x90, 0x05, 0x00, 0x09, 0x00, 0x02, 0x80]).unwrap();
        assert_eq!(
            packet,
            Packet::Suback(Suback {
                pid: 9,
                return_codes: vec![
                    SubscribeReturnCode::Success(QoS::AtMostOnce),
                    SubscribeReturnCode::Success(QoS::ExactlyOnce),
                    SubscribeReturnCode::Failure,
                ],
            })
        );
    }

    #[test]
    fn test_max_size() {
        let config = CodecConfig::new().max_size(4);
        let bytes = [0x30, 0x05, 0x00, 0x01, b'a', b'h', b'i'];

        let result = read_mqtt(&mut &bytes[..], &config);
        assert!(matches!(result, Err(DecodeError::MaxSizeExceeded(5))));
    }

    #[test]
    fn test_gzip_topic_without_compressed_payload() {
        let bytes = [0x30, 0x09, 0x00, 0x06, b'a', b'/', b'g', b'z', b'i', b'p', b'!'];
        assert!(matches!(decode(&bytes), Err(DecodeError::Decompress(_))));

        let config = CodecConfig::new().compress_threshold(None);
        let packet = read_mqtt(&mut &bytes[..], &config).unwrap();
        assert_eq!(
            packet,
            Packet::Publish(Publish {
                topic: "a/gzip".to_string(),
                payload: Bytes::from_static(b"!"),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_bare_gzip_topic_is_not_inflated() {
        let bytes = [0x30, 0x07, 0x00, 0x04, b'g', b'z', b'i', b'p', b'!'];
        assert_eq!(
            decode(&bytes).unwrap(),
            Packet::Publish(Publish {
                topic: "gzip".to_string(),
                payload: Bytes::from_static(b"!"),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_inflated_payload_respects_max_size() {
        use super::super::{encoder, pool::BufferPool};
        use bytes::{BufMut, BytesMut};

        let compressed = compress::compress(&vec![0u8; 1 << 20], 9, &BufferPool::new(1)).unwrap();
        let topic = "a/gzip";

        let mut bytes = BytesMut::new();
        let header = FixedHeader {
            remaining_length: (topic.calc_size() + compressed.len()) as u32,
            ..FixedHeader::new(PacketType::Publish)
        };
        encoder::encode_fixed_header(&header, &mut bytes).unwrap();
        encoder::encode_string(topic, &mut bytes).unwrap();
        bytes.put_slice(&compressed);

        // The frame itself fits easily
        let config = CodecConfig::new().max_size(64 * 1024);
        assert!(header.remaining_length < config.max_size);

        let result = read_mqtt(&mut &bytes[..], &config);
        assert!(matches!(
            result,
            Err(DecodeError::InflatedSizeExceeded(65_536))
        ));

        let config = CodecConfig::new();
        match read_mqtt(&mut &bytes[..], &config).unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload.len(), 1 << 20),
            packet => panic!("unexpected packet {:?}", packet),
        }
    }
}
