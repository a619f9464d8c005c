//! Per-tree identifier allocation.
//!
//! Each identifier namespace (shape ids, relationship ids, ...) gets one
//! counter per patch session. The counter is seeded the first time the
//! namespace is used, by scanning the tree for the largest identifier already
//! present, and only ever moves forward afterwards.

use crate::tree::{DocumentTree, QName};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Compiled `identifiers.<name>` registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierNamespace {
    pub name: String,
    /// Attributes whose values carry identifiers of this namespace.
    pub attributes: Vec<QName>,
    /// Text before the number, e.g. `rId`.
    pub prefix: String,
    pub max: u64,
}

impl IdentifierNamespace {
    pub fn format(&self, value: u64) -> String {
        format!("{}{}", self.prefix, value)
    }

    pub fn parse(&self, text: &str) -> Option<u64> {
        text.strip_prefix(self.prefix.as_str())?.parse().ok()
    }

    /// Largest identifier of this namespace currently attached to `tree`.
    pub fn scan_max(&self, tree: &DocumentTree) -> u64 {
        tree.descendant_elements(tree.document())
            .into_iter()
            .filter_map(|id| tree.element(id))
            .flat_map(|element| element.attributes.iter())
            .filter(|attr| {
                self.attributes.iter().any(|name| {
                    attr.name
                        .matches(&name.local, name.namespace.as_deref())
                })
            })
            .filter_map(|attr| self.parse(&attr.value))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("identifier namespace '{namespace}' exhausted (max {max})")]
pub struct IdentifierNamespaceExhausted {
    pub namespace: String,
    pub max: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    counters: HashMap<String, u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last identifier handed out (or seeded) for `namespace`.
    pub fn current(&self, namespace: &str) -> Option<u64> {
        self.counters.get(namespace).copied()
    }

    pub fn allocate(
        &mut self,
        namespace: &IdentifierNamespace,
        tree: &DocumentTree,
    ) -> Result<String, IdentifierNamespaceExhausted> {
        let current = match self.counters.get(&namespace.name) {
            Some(current) => *current,
            None => {
                let seeded = namespace.scan_max(tree);
                debug!(namespace = %namespace.name, seeded, "seeded identifier counter");
                seeded
            }
        };
        let next = current
            .checked_add(1)
            .filter(|next| *next <= namespace.max)
            .ok_or_else(|| IdentifierNamespaceExhausted {
                namespace: namespace.name.clone(),
                max: namespace.max,
            })?;
        self.counters.insert(namespace.name.clone(), next);
        Ok(namespace.format(next))
    }
}
