//! Selector execution over a [`DocumentTree`].

use crate::bind::{Variable, VariableMap};
use crate::path::{Axis, NameTest, PathTemplate, Predicate, Step};
use crate::tree::{DocumentTree, NodeId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A selected node: an element, or one attribute of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Element(NodeId),
    Attribute { element: NodeId, index: usize },
}

impl NodeRef {
    /// The element itself, or the owner of the attribute.
    pub fn element(self) -> NodeId {
        match self {
            NodeRef::Element(id) => id,
            NodeRef::Attribute { element, .. } => element,
        }
    }

    pub fn is_attribute(self) -> bool {
        matches!(self, NodeRef::Attribute { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("path '{path}': variable not bound: {variable}")]
    Unbound { path: String, variable: Variable },
}

/// String value of a selected node: attribute value or element text.
pub fn string_value(tree: &DocumentTree, node: NodeRef) -> String {
    match node {
        NodeRef::Element(id) => tree.text_content(id),
        NodeRef::Attribute { element, index } => tree
            .element(element)
            .and_then(|el| el.attributes.get(index))
            .map(|attr| attr.value.clone())
            .unwrap_or_default(),
    }
}

/// Evaluate `template` from the document node.
///
/// Results are deduplicated and in document order; attributes sort after
/// their owning element, in attribute order. An empty result is not an error.
pub fn evaluate(
    tree: &DocumentTree,
    template: &PathTemplate,
    vars: &VariableMap,
) -> Result<Vec<NodeRef>, SelectError> {
    let executor = Executor {
        tree,
        vars,
        path: template.name(),
        order: tree.document_order(),
    };
    let start = vec![NodeRef::Element(tree.document())];
    executor.run(&template.ast().steps, start)
}

struct Executor<'a> {
    tree: &'a DocumentTree,
    vars: &'a VariableMap,
    path: &'a str,
    order: HashMap<NodeId, usize>,
}

impl Executor<'_> {
    fn run(&self, steps: &[Step], mut context: Vec<NodeRef>) -> Result<Vec<NodeRef>, SelectError> {
        for step in steps {
            if context.is_empty() {
                break;
            }
            context = match step {
                Step::Element { axis, test } => {
                    let name = self.name_test(test)?;
                    let mut next = Vec::new();
                    for node in &context {
                        let NodeRef::Element(id) = *node else {
                            continue;
                        };
                        let candidates: Vec<NodeId> = match axis {
                            Axis::Child => self.tree.child_elements(id).collect(),
                            Axis::Descendant => self.tree.descendant_elements(id),
                        };
                        next.extend(
                            candidates
                                .into_iter()
                                .filter(|candidate| self.element_matches(*candidate, name))
                                .map(NodeRef::Element),
                        );
                    }
                    self.normalise(next)
                }
                Step::Attribute { symbol } => {
                    let local = self.var(Variable::AttributeName(symbol.clone()))?;
                    let namespace = self.var(Variable::AttributeNamespace(symbol.clone()))?;
                    let namespace = (!namespace.is_empty()).then_some(namespace);
                    let mut next = Vec::new();
                    for node in &context {
                        let NodeRef::Element(id) = *node else {
                            continue;
                        };
                        let Some(element) = self.tree.element(id) else {
                            continue;
                        };
                        if let Some(index) = element
                            .attributes
                            .iter()
                            .position(|attr| attr.name.matches(local, namespace))
                        {
                            next.push(NodeRef::Attribute { element: id, index });
                        }
                    }
                    next
                }
                Step::Predicate(predicate) => {
                    let mut kept = Vec::with_capacity(context.len());
                    for node in context {
                        if self.predicate_holds(predicate, node)? {
                            kept.push(node);
                        }
                    }
                    kept
                }
            };
        }
        Ok(context)
    }

    fn predicate_holds(&self, predicate: &Predicate, node: NodeRef) -> Result<bool, SelectError> {
        let selected = self.run(&predicate.path, vec![node])?;
        match &predicate.equals {
            None => Ok(!selected.is_empty()),
            Some(name) => {
                let expected = self.var(Variable::Value(name.clone()))?;
                Ok(selected
                    .into_iter()
                    .any(|candidate| string_value(self.tree, candidate) == expected))
            }
        }
    }

    fn name_test(&self, test: &NameTest) -> Result<Option<(&str, Option<&str>)>, SelectError> {
        match test {
            NameTest::Any => Ok(None),
            NameTest::Symbol(symbol) => {
                let local = self.var(Variable::ElementName(symbol.clone()))?;
                let namespace = self.var(Variable::ElementNamespace(symbol.clone()))?;
                Ok(Some((local, (!namespace.is_empty()).then_some(namespace))))
            }
        }
    }

    fn element_matches(&self, id: NodeId, name: Option<(&str, Option<&str>)>) -> bool {
        match (self.tree.element(id), name) {
            (Some(_), None) => true,
            (Some(element), Some((local, namespace))) => element.name.matches(local, namespace),
            (None, _) => false,
        }
    }

    fn var(&self, variable: Variable) -> Result<&str, SelectError> {
        self.vars.get(&variable).ok_or_else(|| SelectError::Unbound {
            path: self.path.to_string(),
            variable,
        })
    }

    fn normalise(&self, nodes: Vec<NodeRef>) -> Vec<NodeRef> {
        let mut seen = HashSet::new();
        let mut out: Vec<NodeRef> = nodes.into_iter().filter(|node| seen.insert(*node)).collect();
        out.sort_by_key(|node| match node {
            NodeRef::Element(id) => (self.order.get(id).copied().unwrap_or(usize::MAX), 0),
            NodeRef::Attribute { element, index } => (
                self.order.get(element).copied().unwrap_or(usize::MAX),
                index + 1,
            ),
        });
        out
    }
}
