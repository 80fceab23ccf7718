//! Graph runtime (spec.md §4.4): construction with kind validation,
//! producer-first open with rollback, a Compose phase wiring each node's
//! output to the next node's input, run-until-EOF-or-failure, and
//! reverse-order close.
//!
//! Grounded in `pmoaudio/src/pipeline.rs`'s `AudioPipelineNode::run`, which
//! spawns children, monitors them for the first failure, races completion
//! against a cancellation token, and tears down in a fixed phase order; this
//! module generalizes that same five-phase shape from a node tree to the
//! spec's linear node chain, adding the Compose phase `pipeline.rs`'s
//! in-process node tree doesn't need (its children share memory; ours are
//! wired by chunk channels).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chunk::Kind;
use crate::error::Error;
use crate::node::{Node, Status};

/// Why a graph run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every node reached EOF naturally.
    Completed,
    /// An external cancellation token fired.
    Cancelled,
    /// A node failed.
    Failed,
}

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedNode = Arc<Mutex<Box<dyn Node>>>;

/// A validated, linear chain of nodes (spec.md Design Notes Open Question
/// (b): fan-out/branching graphs are not built; this models a single chain).
///
/// Nodes are held behind `Arc<Mutex<_>>` rather than owned outright so
/// `compose` and the per-node run tasks `GraphRuntime::run` spawns can each
/// hold a handle to the same node concurrently: `compose` only needs a node
/// locked long enough to take its stream halves, while its `run` task holds
/// the lock for the node's whole processing loop.
pub struct Graph {
    nodes: Vec<SharedNode>,
}

impl Graph {
    /// Validates that adjacent nodes' `kind_out`/`kind_in` match, in
    /// construction order, before any node is touched.
    pub fn new(nodes: Vec<Box<dyn Node>>) -> Result<Self, Error> {
        if nodes.is_empty() {
            return Err(Error::Configuration("graph has no nodes".into()));
        }

        for window in nodes.windows(2) {
            let (upstream, downstream) = (&window[0], &window[1]);
            match (upstream.kind_out(), downstream.kind_in()) {
                (Some(out_kind), Some(in_kind)) if out_kind == in_kind => {}
                (out_kind, in_kind) => {
                    return Err(Error::Configuration(format!(
                        "kind mismatch between '{}' (out: {:?}) and '{}' (in: {:?})",
                        upstream.name(),
                        out_kind,
                        downstream.name(),
                        in_kind
                    )));
                }
            }
        }

        Ok(Self {
            nodes: nodes.into_iter().map(|n| Arc::new(Mutex::new(n))).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Opens every node producer-first (index 0 first). If any `open` fails,
    /// already-opened nodes are closed in reverse order before the error is
    /// returned (spec.md §4.4 rollback).
    pub async fn open_all(&mut self) -> Result<(), Error> {
        let mut opened = 0usize;
        for (i, node) in self.nodes.iter().enumerate() {
            let mut node = node.lock().await;
            match node.open().await {
                Ok(()) => opened = i + 1,
                Err(e) => {
                    error!(node = node.name(), error = %e, "open failed, rolling back");
                    drop(node);
                    for node in self.nodes[..opened].iter().rev() {
                        let mut node = node.lock().await;
                        if let Err(close_err) = node.close().await {
                            warn!(node = node.name(), error = %close_err, "rollback close failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Wires each node's output to the next node's input (spec.md §4.4
    /// Compose phase), returning one forwarder task per internal edge. Each
    /// forwarder drains the upstream node's output channel and pushes every
    /// chunk to the downstream node's input channel until either closes.
    pub async fn compose(&self) -> Vec<tokio::task::JoinHandle<Result<(), Error>>> {
        let mut handles = Vec::new();
        for window in self.nodes.windows(2) {
            let (upstream, downstream) = (&window[0], &window[1]);

            let out_rx = upstream.lock().await.stream().output.take();
            let in_tx = downstream.lock().await.stream().input.take();

            match (out_rx, in_tx) {
                (Some(mut out_rx), Some(in_tx)) => {
                    handles.push(tokio::spawn(async move {
                        while let Some(chunk) = out_rx.recv().await {
                            if in_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Ok(())
                    }));
                }
                _ => {
                    warn!("compose: adjacent nodes missing a stream edge, leaving unwired");
                }
            }
        }
        handles
    }

    /// Closes every node in reverse order, bounding each by
    /// `DEFAULT_CLOSE_TIMEOUT` (spec.md §4.4).
    pub async fn close_all(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for node in self.nodes.iter().rev() {
            let mut node = node.lock().await;
            let name = node.name().to_string();
            match tokio::time::timeout(DEFAULT_CLOSE_TIMEOUT, node.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(node = %name, error = %e, "close failed");
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    error!(node = %name, "close timed out");
                    first_err.get_or_insert(Error::Shutdown);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn statuses(&self) -> Vec<(String, Status)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let node = node.lock().await;
            out.push((node.name().to_string(), node.status()));
        }
        out
    }
}

/// Drives a [`Graph`] through open → compose → run → close, per spec.md
/// §4.4.
pub struct GraphRuntime {
    graph: Graph,
    cancel: CancellationToken,
}

impl GraphRuntime {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Opens the graph, composes it (wiring each node's output to the next
    /// node's input), spawns one task per node running its own `Node::run`
    /// loop alongside the forwarder tasks from compose, races all of that
    /// against cancellation, and closes the graph in reverse order
    /// regardless of outcome.
    pub async fn run(mut self) -> Result<StopReason, Error> {
        self.graph.open_all().await?;
        info!(nodes = self.graph.len(), "graph opened");

        let forwarders = self.graph.compose().await;
        info!(edges = forwarders.len(), "graph composed");

        let mut set = JoinSet::new();
        for handle in forwarders {
            set.spawn(async move {
                match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(Error::Stream(format!("forwarder task panicked: {join_err}"))),
                }
            });
        }
        for node in self.graph.nodes.iter().cloned() {
            set.spawn(async move { node.lock().await.run().await });
        }

        let run_result = tokio::select! {
            _ = self.cancel.cancelled() => {
                set.abort_all();
                Ok(StopReason::Cancelled)
            }
            result = drain_first_failure(&mut set) => result,
        };

        let close_result = self.graph.close_all().await;
        info!("graph closed");

        match (run_result, close_result) {
            (Ok(reason), Ok(())) => Ok(reason),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(run_err), _) => Err(run_err),
        }
    }
}

async fn drain_first_failure(
    set: &mut JoinSet<Result<(), Error>>,
) -> Result<StopReason, Error> {
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined.unwrap_or_else(|join_err| {
            Err(Error::Stream(format!("node task panicked: {join_err}")))
        }) {
            if first_err.is_none() {
                set.abort_all();
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(StopReason::Completed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeConfig, ParamValue, Request, Response};
    use crate::stream::NodeStream;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    enum RunBehavior {
        Succeed,
        Fail(String),
    }

    struct FakeNode {
        name: String,
        kind_in: Option<Kind>,
        kind_out: Option<Kind>,
        opened: Arc<AtomicBool>,
        fail_open: bool,
        status: Status,
        stream: NodeStream,
        run_behavior: RunBehavior,
    }

    #[async_trait]
    impl Node for FakeNode {
        fn kind_in(&self) -> Option<Kind> {
            self.kind_in
        }

        fn kind_out(&self) -> Option<Kind> {
            self.kind_out
        }

        async fn configure(
            &mut self,
            _params: HashMap<String, ParamValue>,
            _config: NodeConfig,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn open(&mut self) -> Result<(), Error> {
            if self.fail_open {
                return Err(Error::Resource("simulated open failure".into()));
            }
            self.opened.store(true, Ordering::SeqCst);
            self.status = Status::Open;
            Ok(())
        }

        fn stream(&mut self) -> &mut NodeStream {
            &mut self.stream
        }

        async fn run(&mut self) -> Result<(), Error> {
            match &self.run_behavior {
                RunBehavior::Succeed => Ok(()),
                RunBehavior::Fail(msg) => Err(Error::Stream(msg.clone())),
            }
        }

        async fn receive_request(&mut self, _request: Request) -> Result<Response, Error> {
            Ok(Response {
                payload: serde_json::json!({"node": self.name}),
            })
        }

        async fn close(&mut self) -> Result<(), Error> {
            self.opened.store(false, Ordering::SeqCst);
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

    fn node(name: &str, kind_in: Option<Kind>, kind_out: Option<Kind>, opened: &Arc<AtomicBool>) -> Box<dyn Node> {
        Box::new(FakeNode {
            name: name.to_string(),
            kind_in,
            kind_out,
            opened: opened.clone(),
            fail_open: false,
            status: Status::Configured,
            stream: NodeStream::none(),
            run_behavior: RunBehavior::Succeed,
        })
    }

    #[test]
    fn rejects_kind_mismatch() {
        let opened = Arc::new(AtomicBool::new(false));
        let nodes = vec![
            node("source", None, Some(Kind::Audio), &opened),
            node("sink", Some(Kind::Text), None, &opened),
        ];
        let err = Graph::new(nodes).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_empty_graph() {
        assert!(Graph::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn open_all_rolls_back_on_failure() {
        let opened_a = Arc::new(AtomicBool::new(false));
        let opened_b = Arc::new(AtomicBool::new(false));

        let nodes: Vec<Box<dyn Node>> = vec![
            node("a", None, Some(Kind::Audio), &opened_a),
            Box::new(FakeNode {
                name: "b".into(),
                kind_in: Some(Kind::Audio),
                kind_out: None,
                opened: opened_b.clone(),
                fail_open: true,
                status: Status::Configured,
                stream: NodeStream::none(),
                run_behavior: RunBehavior::Succeed,
            }),
        ];

        let mut graph = Graph::new(nodes).unwrap();
        let err = graph.open_all().await.unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
        assert!(!opened_a.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_completes_when_all_tasks_finish_ok() {
        let opened = Arc::new(AtomicBool::new(false));
        let graph = Graph::new(vec![node("only", None, None, &opened)]).unwrap();
        let runtime = GraphRuntime::new(graph);

        let reason = runtime.run().await.unwrap();
        assert_eq!(reason, StopReason::Completed);
    }

    #[tokio::test]
    async fn run_propagates_first_node_failure() {
        let opened = Arc::new(AtomicBool::new(false));
        let failing = Box::new(FakeNode {
            name: "only".into(),
            kind_in: None,
            kind_out: None,
            opened: opened.clone(),
            fail_open: false,
            status: Status::Configured,
            stream: NodeStream::none(),
            run_behavior: RunBehavior::Fail("boom".into()),
        });
        let graph = Graph::new(vec![failing]).unwrap();
        let runtime = GraphRuntime::new(graph);

        let err = runtime.run().await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[tokio::test]
    async fn compose_wires_output_of_one_node_to_input_of_the_next() {
        use tokio::sync::mpsc;

        let opened = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::channel(4);
        let (in_tx, mut in_rx) = mpsc::channel(4);

        let upstream = FakeNode {
            name: "up".into(),
            kind_in: None,
            kind_out: Some(Kind::Audio),
            opened: opened.clone(),
            fail_open: false,
            status: Status::Configured,
            stream: NodeStream {
                input: None,
                output: Some(out_rx),
            },
            run_behavior: RunBehavior::Succeed,
        };
        let downstream = FakeNode {
            name: "down".into(),
            kind_in: Some(Kind::Audio),
            kind_out: None,
            opened: opened.clone(),
            fail_open: false,
            status: Status::Configured,
            stream: NodeStream {
                input: Some(in_tx),
                output: None,
            },
            run_behavior: RunBehavior::Succeed,
        };

        let graph = Graph::new(vec![Box::new(upstream), Box::new(downstream)]).unwrap();
        let handles = graph.compose().await;
        assert_eq!(handles.len(), 1);

        let chunk = crate::chunk::Chunk::audio(
            Duration::ZERO,
            Duration::from_millis(1),
            vec![0u8],
            crate::chunk::Finality::Final,
        )
        .unwrap();
        out_tx.send(chunk).await.unwrap();
        drop(out_tx);

        let forwarded = in_rx.recv().await.unwrap();
        assert_eq!(forwarded.kind(), Kind::Audio);

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
