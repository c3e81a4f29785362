//! Reduces per-source type graphs into one deduplicated model.

use std::str::FromStr;

use indexmap::IndexMap;

use soapts_wsdl::types::{OperationSignature, QualifiedName, TypeGraph, TypeNode, TypedWsdl};

/// How a structurally conflicting redefinition is resolved. The merge is
/// deterministic under either policy: the same inputs in the same order
/// always produce the same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    FirstWins,
    LastWins,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "first" | "first-wins" => Ok(ConflictPolicy::FirstWins),
            "last" | "last-wins" => Ok(ConflictPolicy::LastWins),
            other => Err(format!(
                "unknown conflict policy '{}', expected 'first-wins' or 'last-wins'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub policy: ConflictPolicy,
}

/// One name defined with structurally different shapes in two sources.
/// Recorded for visibility; never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub name: QualifiedName,
    pub kept: TypeNode,
    pub rejected: TypeNode,
    pub kept_source: String,
    pub rejected_source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOperations {
    pub primary_namespace: String,
    pub operations: Vec<OperationSignature>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTypedWsdl {
    pub graph: TypeGraph,
    /// Which source first defined each key, for by-source file grouping.
    pub provenance: IndexMap<QualifiedName, String>,
    pub operations_by_source: IndexMap<String, SourceOperations>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Left-to-right reduction over the sources. Identical redefinitions are
/// dropped as duplicates; different ones are resolved by the policy and
/// recorded. Operations are carried per source and never deduplicated.
pub fn merge(sources: &[TypedWsdl], options: &MergeOptions) -> MergedTypedWsdl {
    let mut merged = MergedTypedWsdl::default();

    for source in sources {
        for (name, node) in source.graph.iter() {
            match merged.graph.get(name) {
                None => {
                    merged.graph.insert(name.clone(), node.clone());
                    merged
                        .provenance
                        .insert(name.clone(), source.source.clone());
                }

                Some(existing) if existing == node => {}

                Some(existing) => {
                    let existing = existing.clone();
                    let existing_source = merged
                        .provenance
                        .get(name)
                        .cloned()
                        .unwrap_or_default();
                    tracing::debug!(name = %name, "conflicting definitions");

                    match options.policy {
                        ConflictPolicy::FirstWins => merged.conflicts.push(ConflictRecord {
                            name: name.clone(),
                            kept: existing,
                            rejected: node.clone(),
                            kept_source: existing_source,
                            rejected_source: source.source.clone(),
                        }),

                        ConflictPolicy::LastWins => {
                            merged.conflicts.push(ConflictRecord {
                                name: name.clone(),
                                kept: node.clone(),
                                rejected: existing,
                                kept_source: source.source.clone(),
                                rejected_source: existing_source,
                            });
                            merged.graph.insert(name.clone(), node.clone());
                            merged
                                .provenance
                                .insert(name.clone(), source.source.clone());
                        }
                    }
                }
            }
        }

        merged.operations_by_source.insert(
            source.source.clone(),
            SourceOperations {
                primary_namespace: source.primary_namespace.clone(),
                operations: source.operations.clone(),
            },
        );
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use soapts_wsdl::types::{Field, PrimitiveKind};

    const NS: &str = "http://example.com/crm";

    fn qn(local: &str) -> QualifiedName {
        QualifiedName::new(NS, local)
    }

    fn string_field(name: &str) -> Field {
        Field {
            name: name.to_owned(),
            ty: TypeNode::Primitive(PrimitiveKind::String),
            optional: false,
            repeated: false,
        }
    }

    fn source_with(name: &str, fields: Vec<Field>) -> TypedWsdl {
        let mut graph = TypeGraph::new();
        graph.insert(qn("T"), TypeNode::Object(fields));
        TypedWsdl {
            source: name.to_owned(),
            primary_namespace: NS.to_owned(),
            graph,
            operations: Vec::new(),
        }
    }

    #[test]
    fn identical_definitions_deduplicate_without_conflict() {
        let a = source_with("a.wsdl", vec![string_field("x")]);
        let b = source_with("b.wsdl", vec![string_field("x")]);

        let merged = merge(&[a.clone(), b], &MergeOptions::default());

        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.graph, a.graph);
        assert_eq!(merged.provenance.get(&qn("T")).map(String::as_str), Some("a.wsdl"));
    }

    #[test]
    fn first_seen_definition_wins_and_conflict_is_recorded() {
        let a = source_with("a.wsdl", vec![string_field("x")]);
        let b = source_with("b.wsdl", vec![string_field("x"), string_field("y")]);

        let merged = merge(&[a.clone(), b.clone()], &MergeOptions::default());
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.graph.get(&qn("T")), a.graph.get(&qn("T")));
        assert_eq!(merged.conflicts[0].kept_source, "a.wsdl");
        assert_eq!(merged.conflicts[0].rejected_source, "b.wsdl");

        // Reversed input order keeps the other definition.
        let merged = merge(&[b.clone(), a], &MergeOptions::default());
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.graph.get(&qn("T")), b.graph.get(&qn("T")));
        assert_eq!(merged.conflicts[0].kept_source, "b.wsdl");
    }

    #[test]
    fn last_wins_policy_replaces_the_definition() {
        let a = source_with("a.wsdl", vec![string_field("x")]);
        let b = source_with("b.wsdl", vec![string_field("x"), string_field("y")]);

        let options = MergeOptions {
            policy: ConflictPolicy::LastWins,
        };
        let merged = merge(&[a, b.clone()], &options);

        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.graph.get(&qn("T")), b.graph.get(&qn("T")));
        assert_eq!(merged.provenance.get(&qn("T")).map(String::as_str), Some("b.wsdl"));
    }

    #[test]
    fn merging_is_deterministic() {
        let a = source_with("a.wsdl", vec![string_field("x")]);
        let b = source_with("b.wsdl", vec![string_field("y")]);

        let first = merge(&[a.clone(), b.clone()], &MergeOptions::default());
        let second = merge(&[a, b], &MergeOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn operations_are_carried_per_source() {
        let mut a = source_with("a.wsdl", vec![string_field("x")]);
        a.operations.push(OperationSignature {
            name: "GetT".to_owned(),
            input: qn("T"),
            output: qn("T"),
        });
        let mut b = source_with("b.wsdl", vec![string_field("x")]);
        b.operations.push(OperationSignature {
            name: "GetT".to_owned(),
            input: qn("T"),
            output: qn("T"),
        });

        let merged = merge(&[a, b], &MergeOptions::default());
        assert_eq!(merged.operations_by_source.len(), 2);
        assert_eq!(
            merged.operations_by_source["a.wsdl"].operations.len(),
            1
        );
        assert_eq!(
            merged.operations_by_source["b.wsdl"].operations.len(),
            1
        );
    }

    #[test]
    fn references_compare_by_name_only() {
        // Both graphs name the same target; the nodes are equal even though
        // each graph resolves the name to its own entry.
        let mut graph_a = TypeGraph::new();
        graph_a.insert(qn("Address"), TypeNode::Object(vec![string_field("city")]));
        graph_a.insert(qn("Customer"), TypeNode::Reference(qn("Address")));
        let mut graph_b = TypeGraph::new();
        graph_b.insert(qn("Address"), TypeNode::Object(vec![string_field("city")]));
        graph_b.insert(qn("Customer"), TypeNode::Reference(qn("Address")));

        let a = TypedWsdl {
            source: "a.wsdl".to_owned(),
            primary_namespace: NS.to_owned(),
            graph: graph_a,
            operations: Vec::new(),
        };
        let b = TypedWsdl {
            source: "b.wsdl".to_owned(),
            primary_namespace: NS.to_owned(),
            graph: graph_b,
            operations: Vec::new(),
        };

        let merged = merge(&[a, b], &MergeOptions::default());
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.graph.len(), 2);
    }
}
