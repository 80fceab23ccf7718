//! Node registry (spec.md Design Notes #2): a name-to-constructor table so
//! a graph can be built from config data (a node type name plus positional/
//! named parameters) instead of hand-assembled `Box<dyn Node>` values.
//!
//! Grounded in `pmomediaserver/src/source_registry.rs`'s
//! register/get-by-id shape, narrowed here to a factory table: node
//! instances are graph-local and short-lived, so there is no need for the
//! registry itself to hold `Arc<RwLock<..>>` state the way a server-wide
//! `SourceRegistry` of long-lived sources does.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::node::{Node, ParamValue};

/// Builds one boxed [`Node`] from its bound parameters.
pub type NodeFactory = Arc<dyn Fn(&HashMap<String, ParamValue>) -> Result<Box<dyn Node>, Error> + Send + Sync>;

/// A name-to-constructor table, populated once at startup and consulted
/// whenever a graph is assembled from config.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, replacing any prior factory under the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: NodeFactory) {
        let name = name.into();
        tracing::debug!(node_type = %name, "registering node factory");
        self.factories.insert(name, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Constructs a node of type `name`, or `Error::Configuration` if no
    /// factory is registered under that name.
    pub fn build(
        &self,
        name: &str,
        params: &HashMap<String, ParamValue>,
    ) -> Result<Box<dyn Node>, Error> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("no node type registered as '{name}'")))?;
        factory(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Kind;
    use async_trait::async_trait;

    struct Stub {
        stream: crate::stream::NodeStream,
    }

    impl Stub {
        fn new() -> Self {
            Self {
                stream: crate::stream::NodeStream::none(),
            }
        }
    }

    #[async_trait]
    impl Node for Stub {
        fn kind_in(&self) -> Option<Kind> {
            None
        }
        fn kind_out(&self) -> Option<Kind> {
            Some(Kind::Audio)
        }
        async fn configure(
            &mut self,
            _params: HashMap<String, ParamValue>,
            _config: crate::node::NodeConfig,
        ) -> Result<(), Error> {
            Ok(())
        }
        async fn open(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn stream(&mut self) -> &mut crate::stream::NodeStream {
            &mut self.stream
        }
        async fn run(&mut self) -> Result<(), Error> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn status(&self) -> crate::node::Status {
            crate::node::Status::Configured
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn build_rejects_unknown_name() {
        let registry = NodeRegistry::new();
        let err = registry.build("missing", &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn build_constructs_via_registered_factory() {
        let mut registry = NodeRegistry::new();
        registry.register("stub", Arc::new(|_params| Ok(Box::new(Stub::new()) as Box<dyn Node>)));

        let node = registry.build("stub", &HashMap::new()).unwrap();
        assert_eq!(node.name(), "stub");
        assert_eq!(node.kind_out(), Some(Kind::Audio));
    }

    #[test]
    fn later_registration_replaces_earlier_one() {
        let mut registry = NodeRegistry::new();
        registry.register("stub", Arc::new(|_| Ok(Box::new(Stub::new()) as Box<dyn Node>)));
        registry.register("stub", Arc::new(|_| Err(Error::Configuration("replaced".into()))));

        assert!(registry.build("stub", &HashMap::new()).is_err());
    }
}
