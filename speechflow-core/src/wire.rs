//! Chunk wire codec (spec.md §4.6): a self-describing binary frame used
//! when a chunk crosses a network edge.
//!
//! Grounded in the corpus's big-endian explicit-length-prefix idiom (seen
//! throughout `coissac-pmomusic`'s transcode/network-facing frame code);
//! implemented here against `byteorder` rather than hand-rolled
//! `to_be_bytes` splicing, since the layout is specified bit-for-bit.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::time::Duration;

use crate::chunk::{Chunk, Finality, Kind, MetaValue};
use crate::error::Error;

const KIND_AUDIO: u8 = 0x01;
const KIND_TEXT: u8 = 0x02;
const FINALITY_PARTIAL: u8 = 0x01;
const FINALITY_FINAL: u8 = 0x02;

/// Encodes `chunk` into the wire frame format. Only `MetaValue::Str` meta
/// entries survive the trip (the frame's key/value layout is UTF-8-only);
/// any other value is dropped and logged.
pub fn encode(chunk: &Chunk) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();

    let kind_byte = match chunk.kind() {
        Kind::Audio => KIND_AUDIO,
        Kind::Text => KIND_TEXT,
    };
    out.write_u8(kind_byte).map_err(io_err)?;

    let finality_byte = match chunk.finality() {
        Finality::Partial => FINALITY_PARTIAL,
        Finality::Final => FINALITY_FINAL,
    };
    out.write_u8(finality_byte).map_err(io_err)?;

    out.write_u64::<BigEndian>(chunk.timestamp_start().as_millis() as u64)
        .map_err(io_err)?;
    out.write_u64::<BigEndian>(chunk.timestamp_end().as_millis() as u64)
        .map_err(io_err)?;

    let mut meta_bytes = Vec::new();
    for (key, value) in chunk.meta() {
        let value_str = match value {
            MetaValue::Str(s) => s,
            other => {
                tracing::debug!(key, ?other, "dropping non-string meta value from wire frame");
                continue;
            }
        };
        let key_bytes = key.as_bytes();
        let value_bytes = value_str.as_bytes();
        meta_bytes
            .write_u16::<BigEndian>(key_bytes.len() as u16)
            .map_err(io_err)?;
        meta_bytes.write_all(key_bytes).map_err(io_err)?;
        meta_bytes
            .write_u32::<BigEndian>(value_bytes.len() as u32)
            .map_err(io_err)?;
        meta_bytes.write_all(value_bytes).map_err(io_err)?;
    }
    out.write_u32::<BigEndian>(meta_bytes.len() as u32)
        .map_err(io_err)?;
    out.write_all(&meta_bytes).map_err(io_err)?;

    let payload: Vec<u8> = match chunk {
        Chunk::Audio(a) => a.payload().to_vec(),
        Chunk::Text(t) => t.payload().as_bytes().to_vec(),
    };
    out.write_u32::<BigEndian>(payload.len() as u32)
        .map_err(io_err)?;
    out.write_all(&payload).map_err(io_err)?;

    Ok(out)
}

/// Decodes a wire frame back into a [`Chunk`], validating lengths and
/// rejecting unknown kind/finality bytes.
pub fn decode(bytes: &[u8]) -> Result<Chunk, Error> {
    let mut cursor = Cursor::new(bytes);

    let kind_byte = cursor.read_u8().map_err(io_err)?;
    let kind = match kind_byte {
        KIND_AUDIO => Kind::Audio,
        KIND_TEXT => Kind::Text,
        other => return Err(Error::Stream(format!("unknown wire kind byte 0x{other:02x}"))),
    };

    let finality_byte = cursor.read_u8().map_err(io_err)?;
    let finality = match finality_byte {
        FINALITY_PARTIAL => Finality::Partial,
        FINALITY_FINAL => Finality::Final,
        other => {
            return Err(Error::Stream(format!(
                "unknown wire finality byte 0x{other:02x}"
            )))
        }
    };

    let start_ms = cursor.read_u64::<BigEndian>().map_err(io_err)?;
    let end_ms = cursor.read_u64::<BigEndian>().map_err(io_err)?;

    let meta_len = cursor.read_u32::<BigEndian>().map_err(io_err)? as u64;
    let meta_start = cursor.position();
    let meta_end = meta_start
        .checked_add(meta_len)
        .ok_or_else(|| Error::Stream("meta length overflow".into()))?;
    if meta_end > bytes.len() as u64 {
        return Err(Error::Stream("meta length exceeds frame".into()));
    }

    let mut meta = crate::chunk::Meta::new();
    while cursor.position() < meta_end {
        let key_len = cursor.read_u16::<BigEndian>().map_err(io_err)? as usize;
        let mut key_buf = vec![0u8; key_len];
        cursor.read_exact(&mut key_buf).map_err(io_err)?;
        let key = String::from_utf8(key_buf).map_err(|e| Error::Stream(e.to_string()))?;

        let value_len = cursor.read_u32::<BigEndian>().map_err(io_err)? as usize;
        let mut value_buf = vec![0u8; value_len];
        cursor.read_exact(&mut value_buf).map_err(io_err)?;
        let value = String::from_utf8(value_buf).map_err(|e| Error::Stream(e.to_string()))?;

        meta.insert(key, MetaValue::Str(value));
    }
    cursor.set_position(meta_end);

    let payload_len = cursor.read_u32::<BigEndian>().map_err(io_err)? as u64;
    let payload_start = cursor.position();
    let payload_end = payload_start
        .checked_add(payload_len)
        .ok_or_else(|| Error::Stream("payload length overflow".into()))?;
    if payload_end > bytes.len() as u64 {
        return Err(Error::Stream("payload length exceeds frame".into()));
    }
    let payload = &bytes[payload_start as usize..payload_end as usize];

    let start = Duration::from_millis(start_ms);
    let end = Duration::from_millis(end_ms);

    let mut chunk = match kind {
        Kind::Audio => Chunk::audio(start, end, payload.to_vec(), finality)?,
        Kind::Text => {
            let text = std::str::from_utf8(payload).map_err(|e| Error::Stream(e.to_string()))?;
            Chunk::text(start, end, text.to_string(), finality)?
        }
    };
    *chunk.meta_mut() = meta;

    Ok(chunk)
}

fn io_err(e: std::io::Error) -> Error {
    Error::Stream(format!("wire io error: {e}"))
}
