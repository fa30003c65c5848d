//! Type reference graph
//!
//! One node per named type, one edge per field that embeds another type. Used
//! to list which messages are affected when a type they embed changes
//! incompatibly.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::collections::{BTreeSet, HashMap};

use crate::schema::{SchemaSnapshot, TypeDef};

/// Embedding edges between the types of one snapshot
#[derive(Debug, Clone)]
pub struct TypeGraph {
    graph: DiGraph<String, u32>,
    index: HashMap<String, NodeIndex>,
}

impl TypeGraph {
    pub fn build(snapshot: &SchemaSnapshot) -> Self {
        let mut graph = DiGraph::with_capacity(snapshot.len(), snapshot.len() * 2);
        let mut index = HashMap::with_capacity(snapshot.len());

        for name in snapshot.type_names() {
            index.insert(name.to_string(), graph.add_node(name.to_string()));
        }

        for def in snapshot.types() {
            let TypeDef::Message(message) = def else { continue };
            let from = index[&message.name];
            for field in &message.fields {
                if let Some(target) = field.field_type.referenced_type() {
                    if let Some(&to) = index.get(target) {
                        graph.add_edge(from, to, field.number);
                    }
                }
            }
        }

        Self { graph, index }
    }

    /// Every type that transitively embeds `name`, excluding `name` itself
    pub fn embedders(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut out = BTreeSet::new();
        while let Some(node) = bfs.next(reversed) {
            if node != start {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Types directly referenced by `name`
    pub fn references(&self, name: &str) -> BTreeSet<String> {
        self.index
            .get(name)
            .map(|&node| {
                self.graph
                    .neighbors(node)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumType, FieldDef, FieldType, MessageType, SnapshotBuilder, Syntax};

    fn snapshot() -> SchemaSnapshot {
        SnapshotBuilder::new("base")
            .enum_type(EnumType::new("acme.Status", Syntax::Proto3).with_value(0, "UNKNOWN"))
            .message(
                MessageType::new("acme.User", Syntax::Proto3)
                    .with_field(FieldDef::new(1, "status", FieldType::Enum("acme.Status".into())))
                    .with_field(FieldDef::new(2, "manager", FieldType::Message("acme.User".into()))),
            )
            .message(
                MessageType::new("acme.Team", Syntax::Proto3)
                    .with_field(FieldDef::new(1, "members", FieldType::Message("acme.User".into())).repeated()),
            )
            .message(MessageType::new("acme.Org", Syntax::Proto3).with_field(FieldDef::new(
                1,
                "teams",
                FieldType::Message("acme.Team".into()),
            )))
            .build()
            .unwrap()
    }

    #[test]
    fn test_transitive_embedders() {
        let graph = TypeGraph::build(&snapshot());
        let embedders: Vec<_> = graph.embedders("acme.Status").into_iter().collect();
        assert_eq!(embedders, vec!["acme.Org", "acme.Team", "acme.User"]);
    }

    #[test]
    fn test_self_reference_excluded() {
        let graph = TypeGraph::build(&snapshot());
        let embedders = graph.embedders("acme.User");
        assert!(!embedders.contains("acme.User"));
        assert!(embedders.contains("acme.Org"));
        assert!(graph.embedders("acme.Missing").is_empty());
    }

    #[test]
    fn test_direct_references() {
        let graph = TypeGraph::build(&snapshot());
        let refs: Vec<_> = graph.references("acme.User").into_iter().collect();
        assert_eq!(refs, vec!["acme.Status", "acme.User"]);
    }
}
