//! Stream adapter (spec.md §4.3): a duplex handle between two nodes with
//! configurable backpressure and a transform contract, grounded in the
//! bounded `mpsc` wiring `pmoaudio/src/pipeline.rs`'s `Node<L>` uses between
//! pipeline stages. Also hosts [`NodeStream`], the external wiring handle
//! `Graph::compose` uses to connect one node's output to the next node's
//! input (spec.md §4.2 Design Notes #2, §4.4 Compose), and the byte-mode
//! leaf adapters that turn raw `AsyncRead`/`AsyncWrite` into a chunk stream
//! at the edges of a graph, modeled on `pmocache::download`'s
//! `CacheInput`/`ReaderStream` conversion points.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::chunk::{Chunk, Finality};
use crate::error::Error;

/// The outcome of transforming one input chunk.
pub enum TransformOutcome {
    /// Zero or more chunks to push downstream.
    Push(Vec<Chunk>),
    /// Drop the input chunk without producing output.
    Drop,
    /// End of stream: no more chunks will follow.
    Eof,
}

/// A duplex stream adapter: receives chunks on `input`, applies `transform`,
/// and forwards the result to `output`. Backpressure is just the bounded
/// channel's capacity (the high-watermark, spec.md §4.3); a full output
/// channel makes `push` (and therefore the whole adapter loop) wait.
pub struct StreamAdapter {
    input: mpsc::Receiver<Chunk>,
    output: mpsc::Sender<Chunk>,
}

impl StreamAdapter {
    pub fn new(high_watermark: usize) -> (mpsc::Sender<Chunk>, Self, mpsc::Receiver<Chunk>) {
        let (in_tx, in_rx) = mpsc::channel(high_watermark);
        let (out_tx, out_rx) = mpsc::channel(high_watermark);
        (
            in_tx,
            Self {
                input: in_rx,
                output: out_tx,
            },
            out_rx,
        )
    }

    /// Drives the adapter until `transform` signals EOF, the input closes,
    /// or `transform` fails.
    pub async fn run<F>(mut self, mut transform: F) -> Result<(), Error>
    where
        F: FnMut(Chunk) -> Result<TransformOutcome, Error> + Send,
    {
        while let Some(chunk) = self.input.recv().await {
            match transform(chunk)? {
                TransformOutcome::Push(chunks) => {
                    for chunk in chunks {
                        if self.output.send(chunk).await.is_err() {
                            return Err(Error::Stream("downstream closed".into()));
                        }
                    }
                }
                TransformOutcome::Drop => {}
                TransformOutcome::Eof => break,
            }
        }
        Ok(())
    }
}

/// A node's external wiring handles: the edges `Graph::compose` uses to
/// connect one node's output to the next node's input (spec.md §4.2 Design
/// Notes #2's `stream`/`input`/`output` capability). Each `Option` is taken
/// exactly once, by `compose`, when the edge on that side is wired; a node
/// with no input edge (a source) or no output edge (a sink) simply leaves
/// the corresponding side `None`.
pub struct NodeStream {
    pub input: Option<mpsc::Sender<Chunk>>,
    pub output: Option<mpsc::Receiver<Chunk>>,
}

impl NodeStream {
    /// A node with neither an external input nor output edge.
    pub fn none() -> Self {
        Self {
            input: None,
            output: None,
        }
    }
}

/// Awaits `handle` for up to `grace` before treating the task as
/// unresponsive; on timeout the handle is aborted. Mirrors
/// `PipelineHandle::stop_and_wait`'s cancel-then-await-with-timeout shape.
///
/// Takes the handle through a `&mut Option` rather than by value so it is
/// safe to call more than once on the same stream (spec.md §4.3): the first
/// call takes the handle and awaits it; every call after that finds `None`
/// and is a no-op.
pub async fn destroy_stream(
    handle: &mut Option<JoinHandle<Result<(), Error>>>,
    grace: Duration,
) -> Result<(), Error> {
    let Some(handle) = handle.take() else {
        return Ok(());
    };
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            warn!(error = %join_err, "stream task panicked during destroy");
            Ok(())
        }
        Err(_) => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "stream destroy grace period elapsed, task left running"
            );
            Err(Error::Shutdown)
        }
    }
}

/// Default high-watermark (lockstep: one chunk in flight at a time),
/// per spec.md §4.3.
pub const DEFAULT_HIGH_WATERMARK: usize = 1;

/// Bytes per PCM sample frame unit, matching the 16-bit little-endian
/// layout the rest of the crate assumes (spec.md §3, `nodes::ToneSourceNode`).
const BYTES_PER_SAMPLE: usize = 2;

/// A leaf byte-mode adapter (spec.md §4.3): reads raw PCM bytes from
/// `reader` in `frame_bytes`-sized frames, wraps each frame in an audio
/// [`Chunk`], and pushes it onto `output` until `reader` hits EOF or
/// `output`'s receiver is dropped. The source-side counterpart to a
/// file/network leaf node, modeled on `pmocache::download`'s `CacheInput`.
pub async fn byte_reader_to_chunks<R>(
    mut reader: R,
    output: mpsc::Sender<Chunk>,
    frame_bytes: usize,
    sample_rate: u32,
    channels: u16,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let bytes_per_frame = (channels as usize * BYTES_PER_SAMPLE).max(1);
    let mut elapsed = Duration::ZERO;
    let mut buf = vec![0u8; frame_bytes.max(bytes_per_frame)];

    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| Error::Stream(format!("byte reader failed: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let frames = filled / bytes_per_frame;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate as f64);
        let start = elapsed;
        let end = start + duration;
        elapsed = end;

        let chunk = Chunk::audio(start, end, buf[..filled].to_vec(), Finality::Final)?;
        if output.send(chunk).await.is_err() {
            return Err(Error::Stream("downstream closed".into()));
        }

        if filled < buf.len() {
            break;
        }
    }
    Ok(())
}

/// The inverse leaf byte-mode adapter: writes every audio chunk received on
/// `input` as raw bytes to `writer`, flushing at EOF. Rejects a non-audio
/// chunk rather than silently skipping it.
pub async fn chunks_to_byte_writer<W>(
    mut input: mpsc::Receiver<Chunk>,
    mut writer: W,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = input.recv().await {
        let payload = chunk
            .audio_payload()
            .ok_or_else(|| Error::Stream("byte writer received a non-audio chunk".into()))?;
        writer
            .write_all(payload)
            .await
            .map_err(|e| Error::Stream(format!("byte writer failed: {e}")))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| Error::Stream(format!("byte writer flush failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn audio(n: u64) -> Chunk {
        Chunk::audio(
            StdDuration::from_millis(n),
            StdDuration::from_millis(n + 1),
            vec![0u8; 1],
            crate::chunk::Finality::Final,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn passthrough_adapter_forwards_chunks() {
        let (in_tx, adapter, mut out_rx) = StreamAdapter::new(4);

        let handle = tokio::spawn(adapter.run(|c| Ok(TransformOutcome::Push(vec![c]))));

        in_tx.send(audio(0)).await.unwrap();
        in_tx.send(audio(1)).await.unwrap();
        drop(in_tx);

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.timestamp_start(), StdDuration::from_millis(0));
        assert_eq!(second.timestamp_start(), StdDuration::from_millis(1));

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transform_can_drop_chunks() {
        let (in_tx, adapter, mut out_rx) = StreamAdapter::new(4);
        let handle = tokio::spawn(adapter.run(|_| Ok(TransformOutcome::Drop)));

        in_tx.send(audio(0)).await.unwrap();
        drop(in_tx);

        handle.await.unwrap().unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn transform_eof_stops_the_loop_early() {
        let (in_tx, adapter, mut out_rx) = StreamAdapter::new(4);
        let handle = tokio::spawn(adapter.run(|_| Ok(TransformOutcome::Eof)));

        in_tx.send(audio(0)).await.unwrap();
        in_tx.send(audio(1)).await.unwrap();

        handle.await.unwrap().unwrap();
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn destroy_stream_is_safe_to_call_more_than_once() {
        let handle: JoinHandle<Result<(), Error>> = tokio::spawn(async { Ok(()) });
        let mut slot = Some(handle);

        destroy_stream(&mut slot, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(slot.is_none());

        destroy_stream(&mut slot, Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn destroy_stream_times_out_a_hanging_task() {
        let handle: JoinHandle<Result<(), Error>> =
            tokio::spawn(async { std::future::pending::<()>().await; Ok(()) });
        let mut slot = Some(handle);

        let err = destroy_stream(&mut slot, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Shutdown));
    }

    #[tokio::test]
    async fn byte_reader_to_chunks_frames_and_stamps_audio() {
        let raw: Vec<u8> = (0..16u8).collect();
        let reader = std::io::Cursor::new(raw);
        let (tx, mut rx) = mpsc::channel(8);

        byte_reader_to_chunks(reader, tx, 8, 8, 1).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), crate::chunk::Kind::Audio);
        assert_eq!(first.audio_payload().unwrap().len(), 8);
        assert_eq!(first.timestamp_start(), Duration::ZERO);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.timestamp_start(), first.timestamp_end());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn chunks_to_byte_writer_writes_audio_payloads_in_order() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(audio(0)).await.unwrap();
        tx.send(audio(1)).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        chunks_to_byte_writer(rx, &mut out).await.unwrap();
        assert_eq!(out, vec![0u8, 0u8]);
    }

    #[tokio::test]
    async fn chunks_to_byte_writer_rejects_a_text_chunk() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(
            Chunk::text(Duration::ZERO, Duration::from_millis(1), "hi", Finality::Final).unwrap(),
        )
        .await
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = chunks_to_byte_writer(rx, &mut out).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }
}
