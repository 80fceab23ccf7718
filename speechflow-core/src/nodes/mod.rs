//! Demonstration node implementations used to exercise the graph runtime.
//!
//! None of these carry a cloud SDK or ML dependency: a sine-wave audio
//! source, a text gate that can mute itself, and a chunk-counting sink.
//! Grounded in `pmoaudio/src/nodes/source_node.rs`'s
//! `generate_test_chunk`/`generate_chunks` (tone generation) and
//! `sink_node.rs`'s `SinkStats` (running peak/RMS bookkeeping), reworked
//! against the `Chunk`/`Node` types instead of `AudioChunk`/`AudioNode`.
//!
//! Each node owns its internal channel halves (created together at `new`
//! time) and exposes only the opposite external half through
//! [`crate::stream::NodeStream`], the way `Graph::compose` expects
//! (spec.md §4.4). A node's own `run` loop races its data path against its
//! [`ControlChannel`]'s inbound request queue so a control-plane request
//! never has to wait behind a full data channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunk::{Chunk, Finality, Kind};
use crate::error::Error;
use crate::node::{ControlChannel, ControlChannelHandles, Node, NodeConfig, ParamValue, Request, Response, Status};
use crate::stream::NodeStream;

/// Capacity of each node's internal data channel half.
const DEFAULT_CHANNEL_CAPACITY: usize = 16;
/// Capacity of each node's control-plane channels.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Generates `chunk_count` chunks of a sine wave at `frequency`, `chunk_ms`
/// milliseconds each, then drops its internal sender to close the edge.
pub struct ToneSourceNode {
    name: String,
    sample_rate: u32,
    channels: u16,
    frequency: f64,
    chunk_ms: u64,
    chunk_count: u64,
    status: Status,
    stream: NodeStream,
    internal_output: Option<mpsc::Sender<Chunk>>,
    control: ControlChannel,
    control_handles: Option<ControlChannelHandles>,
    emitted: u64,
}

impl ToneSourceNode {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (control, control_handles) = ControlChannel::new(CONTROL_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            sample_rate: 48_000,
            channels: 1,
            frequency: 440.0,
            chunk_ms: 20,
            chunk_count: 50,
            status: Status::Configured,
            stream: NodeStream {
                input: None,
                output: Some(rx),
            },
            internal_output: Some(tx),
            control,
            control_handles: Some(control_handles),
            emitted: 0,
        }
    }

    pub fn set_chunk_count(&mut self, chunk_count: u64) {
        self.chunk_count = chunk_count;
    }

    /// Takes this node's control-plane handles, for a dashboard or test to
    /// drive requests/responses from outside the graph. Must be called
    /// before the node is boxed into a [`crate::graph::Graph`].
    pub fn take_control_handles(&mut self) -> Option<ControlChannelHandles> {
        self.control_handles.take()
    }
}

#[async_trait]
impl Node for ToneSourceNode {
    fn kind_in(&self) -> Option<Kind> {
        None
    }

    fn kind_out(&self) -> Option<Kind> {
        Some(Kind::Audio)
    }

    async fn configure(
        &mut self,
        params: std::collections::HashMap<String, ParamValue>,
        config: NodeConfig,
    ) -> Result<(), Error> {
        self.sample_rate = config.sample_rate;
        self.channels = config.channels;
        if let Some(ParamValue::Float(freq)) = params.get("frequency") {
            self.frequency = *freq;
        }
        if let Some(ParamValue::Int(chunk_ms)) = params.get("chunk_ms") {
            self.chunk_ms = *chunk_ms as u64;
        }
        if let Some(ParamValue::Int(count)) = params.get("count") {
            self.chunk_count = *count as u64;
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.status = Status::Open;
        Ok(())
    }

    fn stream(&mut self) -> &mut NodeStream {
        &mut self.stream
    }

    /// Runs the generation loop, sending chunks on the internal output
    /// channel until `chunk_count` have been produced, then drops the
    /// sender to close the edge. Polls for a control request once per
    /// generated chunk, between sends.
    async fn run(&mut self) -> Result<(), Error> {
        let output = self
            .internal_output
            .take()
            .ok_or_else(|| Error::Configuration("tone source already ran".into()))?;

        let frames_per_chunk = (self.sample_rate as u64 * self.chunk_ms / 1000) as usize;
        let bytes_per_frame = self.channels as usize * 2;
        let mut elapsed_ms = 0u64;

        for order in 0..self.chunk_count {
            if let Some(request) = self.control.try_recv_request() {
                let response = self.receive_request(request).await?;
                self.control.send_response(response);
            }

            let mut payload = Vec::with_capacity(frames_per_chunk * bytes_per_frame);
            for i in 0..frames_per_chunk {
                let t = (order as usize * frames_per_chunk + i) as f64 / self.sample_rate as f64;
                let sample = (2.0 * std::f64::consts::PI * self.frequency * t).sin();
                let amplitude = (sample * i16::MAX as f64) as i16;
                for _ in 0..self.channels {
                    payload.extend_from_slice(&amplitude.to_le_bytes());
                }
            }

            let start = Duration::from_millis(elapsed_ms);
            elapsed_ms += self.chunk_ms;
            let end = Duration::from_millis(elapsed_ms);

            let chunk = Chunk::audio(start, end, payload, Finality::Final)?;
            if output.send(chunk).await.is_err() {
                break;
            }
            self.emitted += 1;
        }
        Ok(())
    }

    async fn receive_request(&mut self, request: Request) -> Result<Response, Error> {
        match request.method.as_str() {
            "emitted" => Ok(Response {
                payload: serde_json::json!({"emitted": self.emitted}),
            }),
            other => Err(Error::Configuration(format!(
                "tone source does not support '{other}'"
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.status = Status::Closed;
        Ok(())
    }

    fn status(&self) -> Status {
        self.status
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A text-kind node that either forwards every chunk unchanged or mutes
/// (drops) them, toggled by its `muted` param or a `set_muted` control
/// request.
pub struct PassthroughTextNode {
    name: String,
    muted: bool,
    status: Status,
    stream: NodeStream,
    input_rx: Option<mpsc::Receiver<Chunk>>,
    output_tx: Option<mpsc::Sender<Chunk>>,
    control: ControlChannel,
    control_handles: Option<ControlChannelHandles>,
}

impl PassthroughTextNode {
    pub fn new(name: impl Into<String>) -> Self {
        let (in_tx, in_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (control, control_handles) = ControlChannel::new(CONTROL_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            muted: false,
            status: Status::Configured,
            stream: NodeStream {
                input: Some(in_tx),
                output: Some(out_rx),
            },
            input_rx: Some(in_rx),
            output_tx: Some(out_tx),
            control,
            control_handles: Some(control_handles),
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn take_control_handles(&mut self) -> Option<ControlChannelHandles> {
        self.control_handles.take()
    }
}

#[async_trait]
impl Node for PassthroughTextNode {
    fn kind_in(&self) -> Option<Kind> {
        Some(Kind::Text)
    }

    fn kind_out(&self) -> Option<Kind> {
        Some(Kind::Text)
    }

    async fn configure(
        &mut self,
        params: std::collections::HashMap<String, ParamValue>,
        _config: NodeConfig,
    ) -> Result<(), Error> {
        if let Some(ParamValue::Bool(muted)) = params.get("muted") {
            self.muted = *muted;
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.status = Status::Open;
        Ok(())
    }

    fn stream(&mut self) -> &mut NodeStream {
        &mut self.stream
    }

    async fn run(&mut self) -> Result<(), Error> {
        let mut input = self
            .input_rx
            .take()
            .ok_or_else(|| Error::Configuration("passthrough already ran".into()))?;
        let output = self
            .output_tx
            .take()
            .ok_or_else(|| Error::Configuration("passthrough already ran".into()))?;

        loop {
            tokio::select! {
                biased;
                Some(request) = self.control.recv_request() => {
                    let response = self.receive_request(request).await?;
                    self.control.send_response(response);
                }
                chunk = input.recv() => {
                    match chunk {
                        Some(chunk) => {
                            if self.muted {
                                continue;
                            }
                            if output.send(chunk).await.is_err() {
                                return Err(Error::Stream("downstream closed".into()));
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn receive_request(&mut self, request: Request) -> Result<Response, Error> {
        match request.method.as_str() {
            "set_muted" => match request.payload.get("muted").and_then(|v| v.as_bool()) {
                Some(muted) => {
                    self.muted = muted;
                    Ok(Response {
                        payload: serde_json::json!({"muted": self.muted}),
                    })
                }
                None => Err(Error::Configuration(
                    "set_muted requires a boolean 'muted' field".into(),
                )),
            },
            other => Err(Error::Configuration(format!(
                "passthrough does not support '{other}'"
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.status = Status::Closed;
        Ok(())
    }

    fn status(&self) -> Status {
        self.status
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Running statistics over every chunk a [`CountingSinkNode`] consumes.
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    pub chunks_received: u64,
    pub total_bytes: u64,
    pub total_duration: Duration,
}

/// A terminal node that consumes chunks of `kind` without forwarding them,
/// accumulating [`SinkStats`] behind a shared handle so callers can read
/// live (or post-run) stats without `run`'s return value, since `run` now
/// returns `Result<(), Error>` uniformly across every node.
pub struct CountingSinkNode {
    name: String,
    kind: Kind,
    status: Status,
    stream: NodeStream,
    input_rx: Option<mpsc::Receiver<Chunk>>,
    stats: Arc<std::sync::Mutex<SinkStats>>,
    control: ControlChannel,
    control_handles: Option<ControlChannelHandles>,
}

impl CountingSinkNode {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        let (in_tx, in_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (control, control_handles) = ControlChannel::new(CONTROL_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            kind,
            status: Status::Configured,
            stream: NodeStream {
                input: Some(in_tx),
                output: None,
            },
            input_rx: Some(in_rx),
            stats: Arc::new(std::sync::Mutex::new(SinkStats::default())),
            control,
            control_handles: Some(control_handles),
        }
    }

    /// A shared handle to this sink's running stats. Grab it before boxing
    /// the node into a [`crate::graph::Graph`] to read stats during or
    /// after the run.
    pub fn stats_handle(&self) -> Arc<std::sync::Mutex<SinkStats>> {
        self.stats.clone()
    }

    pub fn take_control_handles(&mut self) -> Option<ControlChannelHandles> {
        self.control_handles.take()
    }
}

#[async_trait]
impl Node for CountingSinkNode {
    fn kind_in(&self) -> Option<Kind> {
        Some(self.kind)
    }

    fn kind_out(&self) -> Option<Kind> {
        None
    }

    async fn configure(
        &mut self,
        _params: std::collections::HashMap<String, ParamValue>,
        _config: NodeConfig,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.status = Status::Open;
        Ok(())
    }

    fn stream(&mut self) -> &mut NodeStream {
        &mut self.stream
    }

    async fn run(&mut self) -> Result<(), Error> {
        let mut input = self
            .input_rx
            .take()
            .ok_or_else(|| Error::Configuration("sink already ran".into()))?;

        loop {
            tokio::select! {
                biased;
                Some(request) = self.control.recv_request() => {
                    let response = self.receive_request(request).await?;
                    self.control.send_response(response);
                }
                chunk = input.recv() => {
                    match chunk {
                        Some(chunk) => {
                            let mut stats = self.stats.lock().unwrap();
                            stats.chunks_received += 1;
                            stats.total_bytes += match chunk.kind() {
                                Kind::Audio => chunk.audio_payload().map(|p| p.len() as u64).unwrap_or(0),
                                Kind::Text => chunk.text_payload().map(|p| p.len() as u64).unwrap_or(0),
                            };
                            stats.total_duration +=
                                chunk.timestamp_end().saturating_sub(chunk.timestamp_start());
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn receive_request(&mut self, request: Request) -> Result<Response, Error> {
        match request.method.as_str() {
            "stats" => {
                let stats = self.stats.lock().unwrap().clone();
                Ok(Response {
                    payload: serde_json::json!({
                        "chunksReceived": stats.chunks_received,
                        "totalBytes": stats.total_bytes,
                    }),
                })
            }
            other => Err(Error::Configuration(format!(
                "sink does not support '{other}'"
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.status = Status::Closed;
        Ok(())
    }

    fn status(&self) -> Status {
        self.status
    }

    fn name(&self) -> &str {
        &self.name
    }
}
