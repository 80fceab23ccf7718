//! End-to-end tests driving [`speechflow_core::graph`] through open, compose,
//! run, and close with the demonstration nodes from `nodes/mod.rs`. Nodes are
//! wired together by the graph itself (spec.md §4.4 Compose phase); tests
//! only reach in directly at the two edges a linear chain leaves external:
//! the first node's input and the last node's output/stats.

use std::time::Duration;

use speechflow_core::chunk::{Chunk, Finality, Kind};
use speechflow_core::graph::{Graph, GraphRuntime, StopReason};
use speechflow_core::node::Node;
use speechflow_core::nodes::{CountingSinkNode, PassthroughTextNode, ToneSourceNode};

#[tokio::test]
async fn tone_source_into_counting_sink_runs_to_completion() {
    let mut source = ToneSourceNode::new("tone");
    source.set_chunk_count(10);

    let mut sink = CountingSinkNode::new("counter", Kind::Audio);
    let stats = sink.stats_handle();

    let graph = Graph::new(vec![
        Box::new(source) as Box<dyn Node>,
        Box::new(sink) as Box<dyn Node>,
    ])
    .unwrap();
    let runtime = GraphRuntime::new(graph);

    let reason = runtime.run().await.unwrap();
    assert_eq!(reason, StopReason::Completed);
    assert_eq!(stats.lock().unwrap().chunks_received, 10);
}

#[tokio::test]
async fn passthrough_gate_drops_all_chunks_when_muted() {
    let mut gate = PassthroughTextNode::new("gate");
    gate.set_muted(true);
    let gate_input = gate.stream().input.clone().unwrap();

    let mut sink = CountingSinkNode::new("counter", Kind::Text);
    let stats = sink.stats_handle();

    let graph = Graph::new(vec![
        Box::new(gate) as Box<dyn Node>,
        Box::new(sink) as Box<dyn Node>,
    ])
    .unwrap();
    let runtime = GraphRuntime::new(graph);

    let feeder = tokio::spawn(async move {
        for i in 0..5u64 {
            let chunk = Chunk::text(
                Duration::from_millis(i * 10),
                Duration::from_millis(i * 10 + 10),
                format!("word-{i}"),
                Finality::Final,
            )
            .unwrap();
            gate_input.send(chunk).await.unwrap();
        }
    });

    let reason = runtime.run().await.unwrap();
    feeder.await.unwrap();
    assert_eq!(reason, StopReason::Completed);
    assert_eq!(stats.lock().unwrap().chunks_received, 0);
}

#[tokio::test]
async fn kind_mismatch_between_adjacent_nodes_is_rejected_before_open() {
    let nodes: Vec<Box<dyn Node>> = vec![
        Box::new(ToneSourceNode::new("tone")),
        Box::new(CountingSinkNode::new("counter", Kind::Text)),
    ];
    assert!(Graph::new(nodes).is_err());
}

#[tokio::test]
async fn graph_cancellation_stops_the_run_early() {
    let mut source = ToneSourceNode::new("tone");
    source.set_chunk_count(1_000_000);

    let graph = Graph::new(vec![
        Box::new(source) as Box<dyn Node>,
        Box::new(CountingSinkNode::new("counter", Kind::Audio)) as Box<dyn Node>,
    ])
    .unwrap();
    let runtime = GraphRuntime::new(graph);
    let cancel = runtime.cancellation_token();
    cancel.cancel();

    let reason = runtime.run().await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
}
