//! Node lifecycle and the control-plane side channel (spec.md §4.2).
//!
//! Grounded in `pmoaudio/src/nodes/mod.rs`'s `AudioNode` trait and
//! `pmoaudio/src/events.rs`'s `EventPublisher` (the dashboard/response
//! channel uses the same bounded-`mpsc` + `try_send` shape so a slow
//! control-plane consumer never back-pressures the data path). The inbound
//! half of the control plane (`requests_rx`/`recv_request`) follows the same
//! shape in the other direction: a bounded channel a node drains alongside
//! its data path instead of a callback the graph invokes directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chunk::Kind;
use crate::error::Error;
use crate::stream::NodeStream;

/// Logging level for [`Node::log`], mapped directly onto `tracing` macros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single declared, validated parameter a node accepts.
pub struct ParamSpec {
    pub name: &'static str,
    pub position: Option<usize>,
    pub default: Option<ParamValue>,
    pub validate: Option<Arc<dyn Fn(&ParamValue) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("default", &self.default)
            .finish()
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// The declared parameter table for a node type, used by [`bind_params`] to
/// resolve positional/named/default parameters and reject invalid ones.
#[derive(Debug, Default)]
pub struct ParamSchema {
    pub specs: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.specs.push(spec);
        self
    }
}

/// Binds raw positional and named arguments against `schema`, applying
/// defaults and validators, per spec.md §4.2.
pub fn bind_params(
    schema: &ParamSchema,
    positional: &[ParamValue],
    named: &HashMap<String, ParamValue>,
) -> Result<HashMap<String, ParamValue>, Error> {
    let mut bound = HashMap::new();

    for spec in &schema.specs {
        let value = named
            .get(spec.name)
            .cloned()
            .or_else(|| spec.position.and_then(|i| positional.get(i).cloned()))
            .or_else(|| spec.default.clone());

        let value = value.ok_or_else(|| {
            Error::Configuration(format!("missing required parameter '{}'", spec.name))
        })?;

        if let Some(validate) = &spec.validate {
            if !validate(&value) {
                return Err(Error::Configuration(format!(
                    "parameter '{}' failed validation",
                    spec.name
                )));
            }
        }

        bound.insert(spec.name.to_string(), value);
    }

    Ok(bound)
}

/// Graph-wide defaults propagated to every node at construction (spec.md
/// §4.2/§6), backed by [`speechflow_config::GraphConfig`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub little_endian: bool,
    pub text_encoding: String,
    pub cache_dir: String,
}

impl From<&speechflow_config::GraphConfig> for NodeConfig {
    fn from(cfg: &speechflow_config::GraphConfig) -> Self {
        Self {
            sample_rate: cfg.get_audio_sample_rate() as u32,
            channels: cfg.get_audio_channels() as u16,
            bit_depth: cfg.get_audio_bit_depth() as u16,
            little_endian: cfg.get_audio_little_endian(),
            text_encoding: cfg.get_text_encoding(),
            cache_dir: cfg.get_cache_dir().unwrap_or_else(|_| "cache".to_string()),
        }
    }
}

/// A request delivered to a node over the control-plane side channel.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub payload: serde_json::Value,
}

/// A response or dashboard snapshot published by a node.
#[derive(Debug, Clone)]
pub struct Response {
    pub payload: serde_json::Value,
}

/// Control-plane side channel: requests flow in, responses and dashboard
/// snapshots flow out, none of it ever blocking the data path.
pub struct ControlChannel {
    responses_tx: mpsc::Sender<Response>,
    dashboard_tx: mpsc::Sender<Response>,
    requests_rx: mpsc::Receiver<Request>,
}

pub struct ControlChannelHandles {
    pub responses_rx: mpsc::Receiver<Response>,
    pub dashboard_rx: mpsc::Receiver<Response>,
    pub requests_tx: mpsc::Sender<Request>,
}

impl ControlChannel {
    pub fn new(capacity: usize) -> (Self, ControlChannelHandles) {
        let (responses_tx, responses_rx) = mpsc::channel(capacity);
        let (dashboard_tx, dashboard_rx) = mpsc::channel(capacity);
        let (requests_tx, requests_rx) = mpsc::channel(capacity);
        (
            Self {
                responses_tx,
                dashboard_tx,
                requests_rx,
            },
            ControlChannelHandles {
                responses_rx,
                dashboard_rx,
                requests_tx,
            },
        )
    }

    /// Non-blocking: a full or closed channel just drops the response
    /// rather than stalling node processing.
    pub fn send_response(&self, response: Response) {
        if self.responses_tx.try_send(response).is_err() {
            warn!("control response dropped: channel full or closed");
        }
    }

    pub fn send_dashboard(&self, snapshot: Response) {
        if self.dashboard_tx.try_send(snapshot).is_err() {
            debug!("dashboard snapshot dropped: channel full or closed");
        }
    }

    /// Waits for the next inbound request, or `None` once every
    /// [`ControlChannelHandles::requests_tx`] clone has been dropped. Meant
    /// to be raced against the data path inside a node's `run` loop.
    pub async fn recv_request(&mut self) -> Option<Request> {
        self.requests_rx.recv().await
    }

    /// Non-blocking poll for a request, for nodes whose `run` loop can't
    /// park on a `select!` (e.g. a tight source loop).
    pub fn try_recv_request(&mut self) -> Option<Request> {
        self.requests_rx.try_recv().ok()
    }
}

/// Current lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Configured,
    Open,
    Closed,
    Failed,
}

/// The node lifecycle and data-path contract (spec.md §4.2): `configure` →
/// `open` → `run` → `close`, with `status()` reflecting the current phase,
/// `kind_in`/`kind_out` letting the graph validate wiring before opening
/// anything, `stream()` exposing the external input/output edges
/// `Graph::compose` wires up, and `receive_request` the inbound half of the
/// control plane (spec.md §4.2 Design Notes #2's minimal capability
/// interface: `{open, close, stream, input, output, receiveRequest?,
/// status?}`).
#[async_trait]
pub trait Node: Send + Sync {
    /// Declares this node's accepted parameters.
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    /// The chunk kind this node accepts on its input edge, or `None` for a
    /// source node with no input.
    fn kind_in(&self) -> Option<Kind>;

    /// The chunk kind this node produces on its output edge, or `None` for
    /// a sink node with no output.
    fn kind_out(&self) -> Option<Kind>;

    /// Binds parameters and graph-wide config; called once before `open`.
    async fn configure(
        &mut self,
        params: HashMap<String, ParamValue>,
        config: NodeConfig,
    ) -> Result<(), Error>;

    /// Acquires resources (files, sockets, subprocesses). Nodes are opened
    /// producer-first; if any `open` fails the graph rolls back by closing
    /// whatever was already opened, in reverse order (spec.md §4.4).
    async fn open(&mut self) -> Result<(), Error>;

    /// The node's external wiring handles. `Graph::compose` takes the
    /// `output` half of an upstream node and the `input` half of its
    /// downstream neighbor exactly once, wiring them together with a
    /// forwarder task (spec.md §4.4 Compose phase).
    fn stream(&mut self) -> &mut NodeStream;

    /// Drives this node's own processing loop: pulls from its internal
    /// input (if any), does its work, and pushes to its internal output
    /// (if any), until EOF or failure. `GraphRuntime` spawns one task per
    /// node calling this method; it no longer accepts pre-spawned tasks
    /// from the caller (spec.md §4.4).
    async fn run(&mut self) -> Result<(), Error>;

    /// Handles a control-plane request addressed to this node. The default
    /// rejects every request; nodes that expose control-plane operations
    /// (spec.md §4.2 Design Notes #2's optional `receiveRequest`) override
    /// this.
    async fn receive_request(&mut self, _request: Request) -> Result<Response, Error> {
        Err(Error::Configuration(format!(
            "{} does not accept control requests",
            self.name()
        )))
    }

    /// Releases resources. Always called in reverse open order, even on
    /// failure, each node bounded by a timeout (spec.md §4.4).
    async fn close(&mut self) -> Result<(), Error>;

    fn status(&self) -> Status;

    /// Logs through the node's identity, normalized onto `tracing`.
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Debug => debug!(node = self.name(), "{}", message),
            Level::Info => info!(node = self.name(), "{}", message),
            Level::Warn => warn!(node = self.name(), "{}", message),
            Level::Error => error!(node = self.name(), "{}", message),
        }
    }

    fn name(&self) -> &str;
}
