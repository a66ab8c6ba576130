use super::{
    compress,
    config::CodecConfig,
    pool::BufferPool,
    types::{
        Connack, Connect, EncodeError, FixedHeader, Packet, PacketSize, PacketType, Puback,
        Pubcomp, Publish, Pubrec, Pubrel, QoS, Suback, Subscribe, Unsuback, Unsubscribe,
        MAX_FIELD_LEN, MAX_REMAINING_LENGTH,
    },
};
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// PINGRESP never carries anything, so its encoding is a constant.
pub const PINGRESP: [u8; 2] = [0xD0, 0x00];

pub fn variable_int_size(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Write `value` as an MQTT variable byte integer, returning the number of
/// bytes written. Values that would need a fifth byte are rejected.
pub fn encode_variable_int(value: u32, bytes: &mut BytesMut) -> Result<usize, EncodeError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(EncodeError::RemainingLengthTooLarge(value as usize));
    }

    let mut x = value;
    let mut byte_counter = 0;

    loop {
        let mut encoded_byte: u8 = (x % 128) as u8;
        x /= 128;

        if x > 0 {
            encoded_byte |= 128;
        }

        bytes.put_u8(encoded_byte);

        byte_counter += 1;

        if x == 0 {
            break;
        }
    }

    Ok(byte_counter)
}

pub fn encode_string(value: &str, bytes: &mut BytesMut) -> Result<(), EncodeError> {
    encode_binary_data(value.as_bytes(), bytes)
}

pub fn encode_binary_data(value: &[u8], bytes: &mut BytesMut) -> Result<(), EncodeError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(EncodeError::FieldTooLong(value.len()));
    }

    bytes.put_u16(value.len() as u16);
    bytes.put_slice(value);
    Ok(())
}

pub fn encode_fixed_header(header: &FixedHeader, bytes: &mut BytesMut) -> Result<(), EncodeError> {
    bytes.put_u8(header.first_byte());
    encode_variable_int(header.remaining_length, bytes)?;
    Ok(())
}

fn checked_remaining_length(size: usize) -> Result<u32, EncodeError> {
    u32::try_from(size)
        .ok()
        .filter(|len| *len <= MAX_REMAINING_LENGTH)
        .ok_or(EncodeError::RemainingLengthTooLarge(size))
}

fn encode_ack(first_byte: u8, pid: u16) -> [u8; 4] {
    [first_byte, 0x02, (pid >> 8) as u8, pid as u8]
}

/// Encodings that are fixed apart from the packet id and need no scratch
/// buffer.
pub fn encode_constant(packet: &Packet) -> Option<Vec<u8>> {
    let bytes = match packet {
        Packet::Puback(p) => encode_ack(0x40, p.pid).to_vec(),
        Packet::Pubrec(p) => encode_ack(0x50, p.pid).to_vec(),
        Packet::Pubrel(p) => encode_ack(0x62, p.pid).to_vec(),
        Packet::Pubcomp(p) => encode_ack(0x70, p.pid).to_vec(),
        Packet::Unsuback(p) => encode_ack(0xB0, p.pid).to_vec(),
        Packet::Pingresp => PINGRESP.to_vec(),
        _ => return None,
    };

    Some(bytes)
}

fn encode_connect(packet: &Connect, bytes: &mut BytesMut) -> Result<(), EncodeError> {
    encode_string(packet.protocol.name(), bytes)?;
    bytes.put_u8(packet.protocol.level());
    bytes.put_u8(packet.flags());
    bytes.put_u16(packet.keep_alive);

    encode_string(&packet.client_id, bytes)?;

    if let Some(will) = &packet.will {
        encode_string(&will.topic, bytes)?;
        encode_binary_data(&will.message, bytes)?;
    }

    if let Some(username) = &packet.username {
        encode_string(username, bytes)?;
    }

    if let Some(password) = &packet.password {
        encode_binary_data(password, bytes)?;
    }

    Ok(())
}

fn encode_connect_ack(packet: &Connack, bytes: &mut BytesMut) {
    let mut connect_ack_flags: u8 = 0b0000_0000;
    if packet.session_present {
        connect_ack_flags |= 0b0000_0001;
    }

    bytes.put_u8(connect_ack_flags);
    bytes.put_u8(packet.code as u8);
}

/// Topic and payload of a PUBLISH as they go on the wire.
struct PublishBody<'a> {
    topic: Cow<'a, str>,
    payload: Bytes,
}

fn prepare_publish<'a>(
    packet: &'a Publish,
    config: &CodecConfig,
    pool: &BufferPool,
) -> Result<PublishBody<'a>, EncodeError> {
    let gzip_topic = if config.should_compress(packet.payload.len()) {
        compress::gzip_topic(&packet.topic)
    } else {
        None
    };

    let Some(gzip_topic) = gzip_topic else {
        return Ok(PublishBody {
            topic: Cow::Borrowed(&packet.topic),
            payload: packet.payload.clone(),
        });
    };

    let payload = compress::compress(&packet.payload, config.compression_level, pool)?;
    log::debug!(
        "Compressed publish payload on {:?}: {} -> {} bytes",
        packet.topic,
        packet.payload.len(),
        payload.len()
    );

    Ok(PublishBody {
        topic: Cow::Owned(gzip_topic),
        payload,
    })
}

fn encode_publish(
    packet: &Publish,
    config: &CodecConfig,
    pool: &BufferPool,
    bytes: &mut BytesMut,
) -> Result<(), EncodeError> {
    let body = prepare_publish(packet, config, pool)?;

    let topic: &str = &body.topic;
    let mut size = topic.calc_size();
    if packet.qos != QoS::AtMostOnce {
        size += 2;
    }
    // This payload does not have a length prefix
    size += body.payload.len();

    let remaining_length = checked_remaining_length(size)?;
    let header = FixedHeader {
        packet_type: PacketType::Publish,
        dup: packet.dup,
        qos: packet.qos,
        retain: packet.retain,
        remaining_length,
    };

    bytes.reserve(1 + variable_int_size(remaining_length) + size);
    encode_fixed_header(&header, bytes)?;

    encode_string(topic, bytes)?;

    if packet.qos != QoS::AtMostOnce {
        bytes.put_u16(packet.pid.unwrap_or_default());
    }

    bytes.put_slice(&body.payload);
    Ok(())
}

fn encode_subscribe(packet: &Subscribe, bytes: &mut BytesMut) -> Result<(), EncodeError> {
    bytes.put_u16(packet.pid);

    for topic in &packet.topics {
        encode_string(&topic.topic_path, bytes)?;
        bytes.put_u8(topic.qos as u8);
    }

    Ok(())
}

fn encode_subscribe_ack(packet: &Suback, bytes: &mut BytesMut) {
    bytes.put_u16(packet.pid);

    for code in &packet.return_codes {
        bytes.put_u8(code.to_byte());
    }
}

fn encode_unsubscribe(packet: &Unsubscribe, bytes: &mut BytesMut) -> Result<(), EncodeError> {
    bytes.put_u16(packet.pid);

    for topic_filter in &packet.topics {
        encode_string(topic_filter, bytes)?;
    }

    Ok(())
}

/// Append the full encoding of `packet` (fixed header and body) to `bytes`.
pub fn encode_mqtt(
    packet: &Packet,
    config: &CodecConfig,
    pool: &BufferPool,
    bytes: &mut BytesMut,
) -> Result<(), EncodeError> {
    if let Packet::Publish(p) = packet {
        return encode_publish(p, config, pool, bytes);
    }

    if let Some(constant) = encode_constant(packet) {
        bytes.put_slice(&constant);
        return Ok(());
    }

    let size = packet.calculate_size();
    let remaining_length = checked_remaining_length(size)?;
    bytes.reserve(1 + variable_int_size(remaining_length) + size);

    encode_fixed_header(&packet.fixed_header(remaining_length), bytes)?;

    match packet {
        Packet::Connect(p) => encode_connect(p, bytes)?,
        Packet::Connack(p) => encode_connect_ack(p, bytes),
        Packet::Subscribe(p) => encode_subscribe(p, bytes)?,
        Packet::Suback(p) => encode_subscribe_ack(p, bytes),
        Packet::Unsubscribe(p) => encode_unsubscribe(p, bytes)?,
        Packet::Puback(Puback { pid })
        | Packet::Pubrec(Pubrec { pid })
        | Packet::Pubrel(Pubrel { pid })
        | Packet::Pubcomp(Pubcomp { pid })
        | Packet::Unsuback(Unsuback { pid }) => bytes.put_u16(*pid),
        Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => (),
        Packet::Publish(_) => unreachable!("publish is encoded separately"),
    }

    Ok(())
}
