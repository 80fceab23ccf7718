#![doc = r#"
speechflow-core - composable streaming runtime for speech-processing graphs

A graph is a validated linear chain of [`node::Node`]s connected by
[`stream::StreamAdapter`] edges carrying [`chunk::Chunk`] values. Nodes are
opened producer-first and closed in reverse order by [`graph::Graph`]; a
[`graph::GraphRuntime`] races the node tasks against cancellation and
surfaces the first failure.

# Example

```no_run
use speechflow_core::chunk::{Chunk, Finality};
use std::time::Duration;

let chunk = Chunk::audio(
    Duration::from_millis(0),
    Duration::from_millis(20),
    vec![0u8; 1920],
    Finality::Final,
).unwrap();
assert_eq!(chunk.duration(), Duration::from_millis(20));
```
"#]

pub mod async_prim;
pub mod chunk;
pub mod error;
pub mod filler;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod stream;
pub mod wire;
pub mod worker;

pub use chunk::{AudioChunk, Chunk, Finality, Kind, MetaValue, TextChunk};
pub use error::{Backoff, Context, Error};
pub use graph::{Graph, GraphRuntime, StopReason};
pub use node::{Node, NodeConfig, Status};
pub use registry::NodeRegistry;
pub use stream::NodeStream;
