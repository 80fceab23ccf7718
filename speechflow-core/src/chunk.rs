//! The Chunk data model (spec.md §3), adapted from the teacher's
//! `Arc`-wrapped, zero-copy-clone `AudioChunk` enum (`audio_chunk.rs`) onto
//! the spec's opaque byte/string payload instead of typed sample arrays.
//!
//! `Chunk` itself is modeled the same way the teacher models its own
//! variant enum: a true tagged `enum` over per-kind structs, not a struct
//! with a discriminant plus independently-nullable fields, so a chunk whose
//! tag and payload disagree is simply not representable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// The kind of payload a chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Audio,
    Text,
}

/// Whether a chunk's content may still change (more data for the same time
/// range may arrive later) or is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finality {
    Partial,
    Final,
}

/// A scalar value stored in a chunk's `meta` map. Closed rather than a
/// dynamic `Any` since the runtime never interprets meta values itself;
/// only `Str` survives the wire codec (spec.md §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Opaque, string-keyed metadata carried alongside a chunk's payload.
pub type Meta = HashMap<String, MetaValue>;

/// The audio-carrying variant of [`Chunk`].
#[derive(Debug, Clone)]
pub struct AudioChunk {
    timestamp_start: Duration,
    timestamp_end: Duration,
    finality: Finality,
    meta: Meta,
    payload: Arc<[u8]>,
}

impl AudioChunk {
    pub fn timestamp_start(&self) -> Duration {
        self.timestamp_start
    }

    pub fn timestamp_end(&self) -> Duration {
        self.timestamp_end
    }

    pub fn finality(&self) -> Finality {
        self.finality
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    pub fn payload(&self) -> &Arc<[u8]> {
        &self.payload
    }
}

/// The text-carrying variant of [`Chunk`].
#[derive(Debug, Clone)]
pub struct TextChunk {
    timestamp_start: Duration,
    timestamp_end: Duration,
    finality: Finality,
    meta: Meta,
    payload: Arc<str>,
}

impl TextChunk {
    pub fn timestamp_start(&self) -> Duration {
        self.timestamp_start
    }

    pub fn timestamp_end(&self) -> Duration {
        self.timestamp_end
    }

    pub fn finality(&self) -> Finality {
        self.finality
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    pub fn payload(&self) -> &Arc<str> {
        &self.payload
    }
}

/// A single unit of streaming data flowing through a graph.
///
/// Cloning a `Chunk` is cheap: the payload is reference-counted and shared,
/// while `meta` is deep-copied so mutating a clone's metadata never affects
/// the original (spec.md §3, §8 independence invariant).
#[derive(Debug, Clone)]
pub enum Chunk {
    Audio(AudioChunk),
    Text(TextChunk),
}

impl Chunk {
    fn validate_range(start: Duration, end: Duration) -> Result<(), Error> {
        if end < start {
            return Err(Error::Configuration(format!(
                "chunk timestampEnd ({:?}) precedes timestampStart ({:?})",
                end, start
            )));
        }
        Ok(())
    }

    /// Builds an audio chunk from raw PCM bytes.
    pub fn audio(
        timestamp_start: Duration,
        timestamp_end: Duration,
        payload: impl Into<Arc<[u8]>>,
        finality: Finality,
    ) -> Result<Self, Error> {
        Self::validate_range(timestamp_start, timestamp_end)?;
        Ok(Chunk::Audio(AudioChunk {
            timestamp_start,
            timestamp_end,
            finality,
            meta: Meta::new(),
            payload: payload.into(),
        }))
    }

    /// Builds a text chunk.
    pub fn text(
        timestamp_start: Duration,
        timestamp_end: Duration,
        payload: impl Into<Arc<str>>,
        finality: Finality,
    ) -> Result<Self, Error> {
        Self::validate_range(timestamp_start, timestamp_end)?;
        Ok(Chunk::Text(TextChunk {
            timestamp_start,
            timestamp_end,
            finality,
            meta: Meta::new(),
            payload: payload.into(),
        }))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Chunk::Audio(_) => Kind::Audio,
            Chunk::Text(_) => Kind::Text,
        }
    }

    pub fn finality(&self) -> Finality {
        match self {
            Chunk::Audio(a) => a.finality(),
            Chunk::Text(t) => t.finality(),
        }
    }

    pub fn timestamp_start(&self) -> Duration {
        match self {
            Chunk::Audio(a) => a.timestamp_start(),
            Chunk::Text(t) => t.timestamp_start(),
        }
    }

    pub fn timestamp_end(&self) -> Duration {
        match self {
            Chunk::Audio(a) => a.timestamp_end(),
            Chunk::Text(t) => t.timestamp_end(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.timestamp_end() - self.timestamp_start()
    }

    /// The raw audio payload, if this is an audio chunk.
    pub fn audio_payload(&self) -> Option<&Arc<[u8]>> {
        match self {
            Chunk::Audio(a) => Some(a.payload()),
            Chunk::Text(_) => None,
        }
    }

    /// The text payload, if this is a text chunk.
    pub fn text_payload(&self) -> Option<&Arc<str>> {
        match self {
            Chunk::Text(t) => Some(t.payload()),
            Chunk::Audio(_) => None,
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Chunk::Audio(a) => a.meta(),
            Chunk::Text(t) => t.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Chunk::Audio(a) => a.meta_mut(),
            Chunk::Text(t) => t.meta_mut(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.meta_mut().insert(key.into(), value);
        self
    }

    /// Returns a chunk with the same payload (shared, not copied) and a deep
    /// copy of `meta`, but a new time range — used by the filler when
    /// trimming or re-slicing a chunk.
    pub fn with_range(&self, timestamp_start: Duration, timestamp_end: Duration) -> Result<Self, Error> {
        Self::validate_range(timestamp_start, timestamp_end)?;
        Ok(match self {
            Chunk::Audio(a) => Chunk::Audio(AudioChunk {
                timestamp_start,
                timestamp_end,
                finality: a.finality,
                meta: a.meta.clone(),
                payload: a.payload.clone(),
            }),
            Chunk::Text(t) => Chunk::Text(TextChunk {
                timestamp_start,
                timestamp_end,
                finality: t.finality,
                meta: t.meta.clone(),
                payload: t.payload.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let err = Chunk::audio(
            Duration::from_millis(10),
            Duration::from_millis(5),
            vec![0u8; 4],
            Finality::Final,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn clone_shares_payload_but_deep_copies_meta() {
        let chunk = Chunk::audio(
            Duration::from_millis(0),
            Duration::from_millis(10),
            vec![1, 2, 3],
            Finality::Final,
        )
        .unwrap()
        .with_meta("source", MetaValue::Str("mic".into()));

        let mut clone = chunk.clone();
        clone.meta_mut().insert("source".into(), MetaValue::Str("other".into()));

        assert_eq!(
            chunk.meta().get("source"),
            Some(&MetaValue::Str("mic".into()))
        );
        assert_eq!(
            Arc::as_ptr(chunk.audio_payload().unwrap()),
            Arc::as_ptr(clone.audio_payload().unwrap())
        );
    }

    #[test]
    fn a_chunk_can_only_ever_be_one_kind() {
        let audio = Chunk::audio(Duration::ZERO, Duration::from_millis(1), vec![0u8], Finality::Final)
            .unwrap();
        assert!(matches!(audio, Chunk::Audio(_)));
        assert!(audio.text_payload().is_none());

        let text = Chunk::text(Duration::ZERO, Duration::from_millis(1), "hi", Finality::Final).unwrap();
        assert!(matches!(text, Chunk::Text(_)));
        assert!(text.audio_payload().is_none());
    }
}
