mod compress;
mod config;
mod decoder;
mod encoder;
mod pool;
mod registry;
mod types;


pub use compress::{gzip_topic, is_gzip_topic, DEFAULT_COMPRESS_THRESHOLD};
pub use config::CodecConfig;
pub use decoder::{decode_fixed_header, decode_variable_int};
pub use encoder::{encode_variable_int, variable_int_size, PINGRESP};
pub use pool::{BufferPool, PooledBuf, DEFAULT_POOL_CAPACITY};
pub use registry::new_packet;
pub use types::*;

use bytes::BytesMut;
use std::{
    io::{BufRead, Read},
    sync::{Arc, LazyLock},
};
use tokio_util::codec::{Decoder, Encoder};

/// Encodes and decodes MQTT 3.1.1 control packets.
///
/// Clones share the same scratch buffer pool.
#[derive(Debug, Clone)]
pub struct MqttCodec {
    config: CodecConfig,
    pool: Arc<BufferPool>,
}

impl Default for MqttCodec {
    fn default() -> Self {
        MqttCodec::new()
    }
}

impl MqttCodec {
    pub fn new() -> Self {
        MqttCodec::with_config(CodecConfig::new())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        let pool = Arc::new(BufferPool::new(config.pool_capacity));
        MqttCodec { config, pool }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Encode `packet` into a freshly allocated byte vector.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, EncodeError> {
        if let Some(bytes) = encoder::encode_constant(packet) {
            log::trace!("Encoded {} ({} bytes)", packet.packet_type(), bytes.len());
            return Ok(bytes);
        }

        let mut scratch = self.pool.acquire();
        encoder::encode_mqtt(packet, &self.config, &self.pool, &mut scratch)?;
        log::trace!("Encoded {} ({} bytes)", packet.packet_type(), scratch.len());

        Ok(scratch.to_vec())
    }

    /// Append the encoding of `packet` to `bytes`.
    pub fn encode_to(&self, packet: &Packet, bytes: &mut BytesMut) -> Result<(), EncodeError> {
        let start = bytes.len();
        encoder::encode_mqtt(packet, &self.config, &self.pool, bytes)?;
        log::trace!(
            "Encoded {} ({} bytes)",
            packet.packet_type(),
            bytes.len() - start
        );

        Ok(())
    }

    /// Decode a packet whose first byte has already been read from `reader`.
    pub fn decode<R: Read>(&self, first_byte: u8, reader: &mut R) -> Result<Packet, DecodeError> {
        let packet = decoder::decode_mqtt(first_byte, reader, &self.config)?;
        log::trace!("Decoded {}", packet.packet_type());

        Ok(packet)
    }

    pub fn read_packet<R: Read>(&self, reader: &mut R) -> Result<Packet, DecodeError> {
        let packet = decoder::read_mqtt(reader, &self.config)?;
        log::trace!("Decoded {}", packet.packet_type());

        Ok(packet)
    }

    /// Iterate over the packets of `reader`.
    pub fn packets<R: BufRead>(&self, reader: R) -> PacketReader<R> {
        PacketReader {
            codec: self.clone(),
            reader,
            done: false,
        }
    }
}

impl Decoder for MqttCodec {
    type Error = DecodeError;
    type Item = Packet;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((header_len, remaining_length)) = decoder::peek_fixed_header(buf)? else {
            return Ok(None);
        };

        if self.config.max_size != 0 && remaining_length > self.config.max_size {
            return Err(DecodeError::MaxSizeExceeded(remaining_length));
        }

        let frame_len = header_len + remaining_length as usize;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(frame_len).freeze();
        self.read_packet(&mut &frame[..]).map(Some)
    }
}

impl Encoder<Packet> for MqttCodec {
    type Error = EncodeError;

    fn encode(&mut self, packet: Packet, bytes: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_to(&packet, bytes)
    }
}

/// Iterator over the packets of a byte stream.
///
/// Ends on a clean end of stream between packets. After the first error
/// nothing more is read.
pub struct PacketReader<R> {
    codec: MqttCodec,
    reader: R,
    done: bool,
}

impl<R: BufRead> PacketReader<R> {
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: BufRead> Iterator for PacketReader<R> {
    type Item = Result<Packet, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.fill_buf() {
            Ok([]) => {
                self.done = true;
                return None;
            }
            Ok(_) => (),
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        }

        let result = self.codec.read_packet(&mut self.reader);
        self.done = result.is_err();

        Some(result)
    }
}

/// Codec behind the free functions, so they share one buffer pool.
static DEFAULT_CODEC: LazyLock<MqttCodec> = LazyLock::new(MqttCodec::new);

/// Encode `packet` with the default configuration.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    DEFAULT_CODEC.encode(packet)
}

/// Read one packet from `reader` with the default configuration.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Packet, DecodeError> {
    DEFAULT_CODEC.read_packet(reader)
}
