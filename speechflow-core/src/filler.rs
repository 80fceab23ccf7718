//! Gap reconciliation (spec.md §4.5): reconciles a possibly-gappy,
//! possibly-overlapping audio chunk stream into a strictly monotonic,
//! contiguous, non-overlapping sample timeline.
//!
//! No direct teacher analogue exists for this algorithm; it is implemented
//! directly from the numbered steps in spec.md §4.5, in the byte/frame
//! slicing idiom used throughout the teacher's node implementations
//! (`pmoaudio/src/nodes/*.rs` each compute a `bytesPerFrame`-scaled slice
//! before touching a payload).

use std::time::Duration;

use crate::chunk::{Chunk, Finality, MetaValue};
use crate::error::Error;

pub const SAMPLE_TOLERANCE: f64 = 0.5;
const BYTES_PER_SAMPLE: u64 = 2;

/// Whether an emitted chunk is synthetic silence or real content — kept
/// distinguishable per spec.md §4.5 ("downstream can count them
/// independently") via a meta tag rather than a new `Chunk` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmittedKind {
    Silence,
    Content,
}

pub const META_EMITTED_KIND: &str = "filler.kind";

/// Sample-domain gap reconciler. One instance per audio edge; not `Send`
/// across edges since the cursor is edge-local state.
pub struct Filler {
    sample_rate: u32,
    channels: u16,
    emitted_end_samples: f64,
}

impl Filler {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            emitted_end_samples: 0.0,
        }
    }

    fn bytes_per_frame(&self) -> u64 {
        self.channels as u64 * BYTES_PER_SAMPLE
    }

    fn samples_to_duration(&self, samples: f64) -> Duration {
        Duration::from_secs_f64(samples / self.sample_rate as f64)
    }

    fn duration_to_samples(&self, d: Duration) -> f64 {
        d.as_secs_f64() * self.sample_rate as f64
    }

    pub fn emitted_end_samples(&self) -> f64 {
        self.emitted_end_samples
    }

    /// Processes one incoming chunk, returning zero, one, or two emitted
    /// chunks (a gap-fill silence chunk followed by the trimmed content
    /// chunk, when both apply).
    pub fn process(&mut self, chunk: &Chunk) -> Result<Vec<Chunk>, Error> {
        let start_samp = self.duration_to_samples(chunk.timestamp_start());
        let end_samp = self.duration_to_samples(chunk.timestamp_end());

        // Step 1.
        if end_samp < start_samp {
            return Err(Error::Configuration(format!(
                "filler: endSamp ({end_samp}) precedes startSamp ({start_samp})"
            )));
        }

        let mut emitted = Vec::with_capacity(2);

        // Step 2: gap.
        if start_samp > self.emitted_end_samples + SAMPLE_TOLERANCE {
            let gap_start = self.emitted_end_samples;
            let gap_frames = (start_samp - gap_start).floor().max(0.0) as u64;
            if gap_frames > 0 {
                let gap_end = gap_start + gap_frames as f64;
                let silence = self.build_silence_chunk(gap_start, gap_end, chunk)?;
                emitted.push(silence);
            }
            self.emitted_end_samples = start_samp;
        }

        // Step 3: fully covered.
        if end_samp <= self.emitted_end_samples + SAMPLE_TOLERANCE {
            return Ok(emitted);
        }

        // Step 4: partial overlap at head.
        let trim_head = (self.emitted_end_samples - start_samp).floor().max(0.0) as u64;
        let available_frames = ((end_samp - start_samp) - trim_head as f64).floor().max(0.0) as u64;

        // Step 5: clamp by buffer reality.
        let bytes_per_frame = self.bytes_per_frame();
        let payload = chunk
            .audio_payload()
            .ok_or_else(|| Error::Configuration("filler received a non-audio chunk".into()))?;
        let buf_frames = payload.len() as u64 / bytes_per_frame;

        let start_frame = trim_head.min(buf_frames);
        let end_frame = (start_frame + available_frames).min(buf_frames);

        if end_frame <= start_frame {
            return Ok(emitted);
        }

        // Step 6: slice and emit.
        let byte_start = (start_frame * bytes_per_frame) as usize;
        let byte_end = (end_frame * bytes_per_frame) as usize;
        let sliced: Vec<u8> = payload[byte_start..byte_end].to_vec();

        let out_start_samples = start_samp + start_frame as f64;
        let out_end_samples = out_start_samples + (end_frame - start_frame) as f64;

        let mut out_chunk = Chunk::audio(
            self.samples_to_duration(out_start_samples),
            self.samples_to_duration(out_end_samples),
            sliced,
            chunk.finality(),
        )?;
        *out_chunk.meta_mut() = chunk.meta().clone();
        out_chunk
            .meta_mut()
            .insert(META_EMITTED_KIND.to_string(), MetaValue::Str("content".into()));

        // Step 7: advance cursor.
        self.emitted_end_samples = self.emitted_end_samples.max(out_end_samples);

        emitted.push(out_chunk);
        Ok(emitted)
    }

    fn build_silence_chunk(
        &self,
        gap_start_samples: f64,
        gap_end_samples: f64,
        triggering: &Chunk,
    ) -> Result<Chunk, Error> {
        let frames = (gap_end_samples - gap_start_samples).round() as u64;
        let payload = vec![0u8; (frames * self.bytes_per_frame()) as usize];
        let mut chunk = Chunk::audio(
            self.samples_to_duration(gap_start_samples),
            self.samples_to_duration(gap_end_samples),
            payload,
            Finality::Final,
        )?;
        *chunk.meta_mut() = triggering.meta().clone();
        chunk
            .meta_mut()
            .insert(META_EMITTED_KIND.to_string(), MetaValue::Str("silence".into()));
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48_000;
    const CH: u16 = 1;

    fn chunk_ms(start_ms: u64, end_ms: u64, fill: u8) -> Chunk {
        let frames = ((end_ms - start_ms) as f64 / 1000.0 * SR as f64).round() as u64;
        let payload = vec![fill; (frames * CH as u64 * BYTES_PER_SAMPLE) as usize];
        Chunk::audio(
            Duration::from_millis(start_ms),
            Duration::from_millis(end_ms),
            payload,
            Finality::Final,
        )
        .unwrap()
    }

    fn emitted_kind(c: &Chunk) -> &str {
        match c.meta().get(META_EMITTED_KIND) {
            Some(MetaValue::Str(s)) => s,
            _ => panic!("missing filler.kind meta"),
        }
    }

    #[test]
    fn scenario_1_contiguous_passthrough() {
        let mut filler = Filler::new(SR, CH);
        let chunks = [chunk_ms(0, 100, 1), chunk_ms(100, 200, 1), chunk_ms(200, 300, 1)];

        let mut all_out = Vec::new();
        for c in &chunks {
            all_out.extend(filler.process(c).unwrap());
        }

        assert_eq!(all_out.len(), 3);
        for c in &all_out {
            assert_eq!(emitted_kind(c), "content");
        }
        assert_eq!(all_out[0].timestamp_start(), Duration::from_millis(0));
        assert_eq!(all_out[2].timestamp_end(), Duration::from_millis(300));
    }

    #[test]
    fn scenario_2_gap_insertion() {
        let mut filler = Filler::new(SR, CH);
        let first = chunk_ms(0, 100, 1);
        let second = chunk_ms(250, 350, 1);

        let mut out = filler.process(&first).unwrap();
        out.extend(filler.process(&second).unwrap());

        assert_eq!(out.len(), 3);
        assert_eq!(emitted_kind(&out[0]), "content");
        assert_eq!(emitted_kind(&out[1]), "silence");
        assert_eq!(out[1].timestamp_start(), Duration::from_millis(100));
        assert_eq!(out[1].timestamp_end(), Duration::from_millis(250));
        let expected_silence_bytes = ((250 - 100) as f64 / 1000.0 * SR as f64).round() as usize
            * CH as usize
            * BYTES_PER_SAMPLE as usize;
        assert_eq!(
            out[1].audio_payload().unwrap().len(),
            expected_silence_bytes
        );
        assert!(out[1].audio_payload().unwrap().iter().all(|&b| b == 0));
        assert_eq!(emitted_kind(&out[2]), "content");
    }

    #[test]
    fn scenario_3_head_trim() {
        let mut filler = Filler::new(SR, CH);
        filler.process(&chunk_ms(0, 100, 1)).unwrap();

        let out = filler.process(&chunk_ms(80, 180, 2)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp_start(), Duration::from_millis(100));
        assert_eq!(out[0].timestamp_end(), Duration::from_millis(180));

        let expected_bytes =
            ((180 - 100) as f64 / 1000.0 * SR as f64).round() as usize * CH as usize * BYTES_PER_SAMPLE as usize;
        assert_eq!(out[0].audio_payload().unwrap().len(), expected_bytes);
    }

    #[test]
    fn scenario_4_full_drop() {
        let mut filler = Filler::new(SR, CH);
        filler.process(&chunk_ms(0, 300, 1)).unwrap();

        let out = filler.process(&chunk_ms(100, 200, 2)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn zero_duration_chunk_after_priming_produces_no_content() {
        // Chunk construction already rejects endSamp < startSamp (chunk.rs), so the filler's
        // own step-1 check only ever sees well-formed ranges; a zero-length chunk at the
        // current cursor is the degenerate case that should produce no content chunk.
        let mut filler = Filler::new(SR, CH);
        filler.process(&chunk_ms(0, 100, 1)).unwrap();

        let zero = chunk_ms(100, 100, 1);
        let out = filler.process(&zero).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn cursor_is_non_decreasing_and_output_is_contiguous() {
        let mut filler = Filler::new(SR, CH);
        let inputs = [
            chunk_ms(0, 100, 1),
            chunk_ms(250, 350, 1),
            chunk_ms(340, 400, 1),
            chunk_ms(100, 200, 1),
        ];

        let mut last_cursor = 0.0;
        let mut out = Vec::new();
        for c in &inputs {
            out.extend(filler.process(c).unwrap());
            assert!(filler.emitted_end_samples() >= last_cursor);
            last_cursor = filler.emitted_end_samples();
        }

        for pair in out.windows(2) {
            let gap = (pair[1].timestamp_start().as_secs_f64() - pair[0].timestamp_end().as_secs_f64()).abs();
            let tolerance_secs = SAMPLE_TOLERANCE / SR as f64;
            assert!(gap <= tolerance_secs + 1e-9);
        }
    }

    #[test]
    fn tie_break_first_observed_wins() {
        let mut filler = Filler::new(SR, CH);
        let a = chunk_ms(0, 100, 1);
        let b = chunk_ms(0, 100, 2);

        let out_a = filler.process(&a).unwrap();
        let out_b = filler.process(&b).unwrap();

        assert_eq!(out_a.len(), 1);
        assert!(out_b.is_empty());
    }
}
