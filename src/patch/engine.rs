//! Sequential execution of patch operations against one document tree.
//!
//! Operations run in file order and each one sees the effects of the ones
//! before it. The first failure stops the run and leaves the tree exactly as
//! it was before the failing operation; earlier operations stay applied.

use crate::cache;
use crate::fragment::{instantiate, instantiate_document, FragmentTemplate, IdAllocator};
use crate::part::PartManager;
use crate::patch::errors::{EngineError, PatchError};
use crate::patch::schema::{
    OperationKind, OperationRecord, PatchFile, PatchOperation, Payload, Placement,
};
use crate::registry::version::matches_requirement;
use crate::registry::Registry;
use crate::select::{evaluate, string_value, NodeRef};
use crate::token::{substitute, TokenResolver};
use crate::tree::{DocumentTree, NodeId, TreeError};
use std::fmt;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Treat every operation as `optional = true`.
    pub optional_by_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Applied,
    /// The tree already satisfied the operation.
    AlreadyApplied,
    /// An optional operation whose target did not resolve.
    Skipped { reason: String },
    /// The patch file does not apply to this registry version.
    SkippedVersion { reason: String },
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Applied => write!(f, "applied"),
            OperationResult::AlreadyApplied => write!(f, "already applied"),
            OperationResult::Skipped { reason } => write!(f, "skipped: {reason}"),
            OperationResult::SkippedVersion { reason } => write!(f, "skipped (version): {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub index: usize,
    pub kind: OperationKind,
    pub keys: Vec<String>,
    pub result: OperationResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub name: String,
    pub outcomes: Vec<OperationOutcome>,
}

impl PatchReport {
    fn count(&self, f: impl Fn(&OperationResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.result)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|r| matches!(r, OperationResult::Applied))
    }

    pub fn already_applied(&self) -> usize {
        self.count(|r| matches!(r, OperationResult::AlreadyApplied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| {
            matches!(
                r,
                OperationResult::Skipped { .. } | OperationResult::SkippedVersion { .. }
            )
        })
    }

    /// True when nothing in the tree changed.
    pub fn is_noop(&self) -> bool {
        self.applied() == 0
    }
}

/// Applies patch files to one tree. The session owns that tree's identifier
/// allocator, so use one session per tree.
pub struct PatchSession<'a> {
    registry: &'a Registry,
    tokens: &'a dyn TokenResolver,
    ids: IdAllocator,
    options: ApplyOptions,
}

impl<'a> PatchSession<'a> {
    pub fn new(registry: &'a Registry, tokens: &'a dyn TokenResolver) -> Self {
        Self {
            registry,
            tokens,
            ids: IdAllocator::new(),
            options: ApplyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn apply(
        &mut self,
        tree: &mut DocumentTree,
        parts: &mut dyn PartManager,
        patch: &PatchFile,
    ) -> Result<PatchReport, PatchError> {
        let mut report = PatchReport {
            name: patch.meta.name.clone(),
            outcomes: Vec::with_capacity(patch.operations.len()),
        };

        if let Some(reason) = self.version_mismatch(patch) {
            info!(patch = %patch.meta.name, %reason, "skipping patch file");
            for (index, record) in patch.operations.iter().enumerate() {
                report.outcomes.push(outcome(
                    index,
                    record,
                    OperationResult::SkippedVersion {
                        reason: reason.clone(),
                    },
                ));
            }
            return Ok(report);
        }

        for (index, record) in patch.operations.iter().enumerate() {
            match self.apply_operation(tree, parts, index, record) {
                Ok(result) => report.outcomes.push(outcome(index, record, result)),
                Err(err) => {
                    compact(tree);
                    return Err(err);
                }
            }
        }
        compact(tree);

        info!(
            patch = %patch.meta.name,
            applied = report.applied(),
            already_applied = report.already_applied(),
            skipped = report.skipped(),
            "patch file finished"
        );
        Ok(report)
    }

    /// Apply one operation. On error the tree and allocator are restored to
    /// their state before the call.
    pub fn apply_operation(
        &mut self,
        tree: &mut DocumentTree,
        parts: &mut dyn PartManager,
        index: usize,
        record: &OperationRecord,
    ) -> Result<OperationResult, PatchError> {
        let kind = record.op.kind();
        let keys = record.op.keys();
        debug!(index, %kind, target = keys.first().copied().unwrap_or(""), "applying operation");

        // ensurePart never edits this tree.
        let saved_tree = (kind != OperationKind::EnsurePart).then(|| tree.clone());
        let saved_ids = self.ids.clone();
        match self.execute(tree, parts, &record.op) {
            Ok(result) => {
                match &result {
                    OperationResult::Applied => info!(index, %kind, keys = ?keys, "applied operation"),
                    other => debug!(index, %kind, keys = ?keys, result = %other, "operation unchanged"),
                }
                Ok(result)
            }
            Err(source) => {
                if let Some(saved_tree) = saved_tree {
                    *tree = saved_tree;
                }
                self.ids = saved_ids;

                if source.is_match_failure() && (record.optional || self.options.optional_by_default) {
                    warn!(index, %kind, keys = ?keys, error = %source, "skipping optional operation");
                    return Ok(OperationResult::Skipped {
                        reason: source.to_string(),
                    });
                }
                Err(PatchError {
                    index,
                    kind,
                    keys: keys.into_iter().map(str::to_string).collect(),
                    source,
                })
            }
        }
    }

    fn version_mismatch(&self, patch: &PatchFile) -> Option<String> {
        let requirement = patch.meta.registry_version.as_deref();
        let version = self.registry.meta().version.as_deref();
        match matches_requirement(version, requirement) {
            Ok(true) => None,
            Ok(false) => Some(format!(
                "registry version {} does not satisfy registry_version {}",
                version.unwrap_or("(none)"),
                requirement.unwrap_or("").trim()
            )),
            Err(err) => Some(err.to_string()),
        }
    }

    fn execute(
        &mut self,
        tree: &mut DocumentTree,
        parts: &mut dyn PartManager,
        op: &PatchOperation,
    ) -> Result<OperationResult, EngineError> {
        match op {
            PatchOperation::Set { target, value } => self.set(tree, target, value),
            PatchOperation::Insert {
                target,
                anchor,
                payload,
                placement,
            } => self.insert(tree, target, anchor, payload, *placement),
            PatchOperation::Remove { target } => self.remove(tree, target),
            PatchOperation::EnsurePath {
                target,
                anchor,
                fragment,
                placement,
            } => self.ensure_path(tree, target, anchor, fragment, *placement),
            PatchOperation::EnsurePart { part, fragment } => self.ensure_part(parts, part, fragment),
            PatchOperation::EnsureAttr {
                target,
                attr,
                value,
            } => self.ensure_attr(tree, target, attr, value),
        }
    }

    fn select(&self, tree: &DocumentTree, key: &str) -> Result<Vec<NodeRef>, EngineError> {
        let template = self
            .registry
            .path(key)
            .ok_or_else(|| EngineError::UnknownRef {
                table: "paths",
                key: key.to_string(),
            })?;
        let vars = cache::get_or_bind(self.registry, template)?;
        let vars = vars.with_tokens(key, self.tokens)?;
        Ok(evaluate(tree, template, &vars)?)
    }

    fn select_one(&self, tree: &DocumentTree, key: &str) -> Result<NodeRef, EngineError> {
        let matches = self.select(tree, key)?;
        match matches.as_slice() {
            [] => Err(EngineError::TargetNotFound {
                key: key.to_string(),
            }),
            [node] => Ok(*node),
            _ => Err(EngineError::AmbiguousTarget {
                key: key.to_string(),
                count: matches.len(),
            }),
        }
    }

    fn select_element(&self, tree: &DocumentTree, key: &str) -> Result<NodeId, EngineError> {
        match self.select_one(tree, key)? {
            NodeRef::Element(id) => Ok(id),
            NodeRef::Attribute { .. } => Err(EngineError::InvalidTarget {
                key: key.to_string(),
                message: "expected an element, found an attribute".to_string(),
            }),
        }
    }

    fn set(
        &mut self,
        tree: &mut DocumentTree,
        target: &str,
        value: &str,
    ) -> Result<OperationResult, EngineError> {
        let node = self.select_one(tree, target)?;
        let value = substitute(value, self.tokens)?;
        if string_value(tree, node) == value {
            return Ok(OperationResult::AlreadyApplied);
        }
        match node {
            NodeRef::Element(id) => tree.set_text_content(id, &value)?,
            NodeRef::Attribute { element, index } => {
                let name = tree
                    .element(element)
                    .and_then(|el| el.attributes.get(index))
                    .map(|attr| attr.name.clone())
                    .ok_or(TreeError::NotAnElement(element))?;
                tree.set_attribute(element, name, &value)?;
            }
        }
        Ok(OperationResult::Applied)
    }

    fn insert(
        &mut self,
        tree: &mut DocumentTree,
        target: &str,
        anchor: &str,
        payload: &Payload,
        placement: Placement,
    ) -> Result<OperationResult, EngineError> {
        if !self.select(tree, target)?.is_empty() {
            return Ok(OperationResult::AlreadyApplied);
        }
        let anchor_id = self.select_element(tree, anchor)?;
        let node = match payload {
            Payload::Fragment(fragment) => {
                let template = self.fragment(fragment)?;
                instantiate(template, self.tokens, tree, &mut self.ids, self.registry)?.root
            }
            Payload::Text(value) => {
                let value = substitute(value, self.tokens)?;
                tree.create_text(value)
            }
        };
        place(tree, anchor_id, node, placement)?;
        Ok(OperationResult::Applied)
    }

    fn remove(&mut self, tree: &mut DocumentTree, target: &str) -> Result<OperationResult, EngineError> {
        let matches = self.select(tree, target)?;
        if matches.is_empty() {
            return Ok(OperationResult::AlreadyApplied);
        }
        for node in matches {
            match node {
                NodeRef::Element(id) => tree.detach(id),
                NodeRef::Attribute { element, index } => {
                    let name = tree
                        .element(element)
                        .and_then(|el| el.attributes.get(index))
                        .map(|attr| attr.name.clone());
                    if let Some(name) = name {
                        tree.remove_attribute(element, &name.local, name.namespace.as_deref());
                    }
                }
            }
        }
        Ok(OperationResult::Applied)
    }

    fn ensure_path(
        &mut self,
        tree: &mut DocumentTree,
        target: &str,
        anchor: &str,
        fragment: &str,
        placement: Placement,
    ) -> Result<OperationResult, EngineError> {
        if !self.select(tree, target)?.is_empty() {
            return Ok(OperationResult::AlreadyApplied);
        }
        let anchor_id = self.select_element(tree, anchor)?;
        let template = self.fragment(fragment)?;
        let instance = instantiate(template, self.tokens, tree, &mut self.ids, self.registry)?;
        place(tree, anchor_id, instance.root, placement)?;

        if self.select(tree, target)?.is_empty() {
            tree.detach(instance.root);
            return Err(EngineError::EnsureFailed {
                target: target.to_string(),
                fragment: fragment.to_string(),
            });
        }
        Ok(OperationResult::Applied)
    }

    fn ensure_part(
        &mut self,
        parts: &mut dyn PartManager,
        part: &str,
        fragment: &str,
    ) -> Result<OperationResult, EngineError> {
        let spec = self
            .registry
            .part(part)
            .ok_or_else(|| EngineError::UnknownRef {
                table: "parts",
                key: part.to_string(),
            })?;
        if parts.part_exists(&spec.part_name) {
            return Ok(OperationResult::AlreadyApplied);
        }
        let template = self.fragment(fragment)?;
        let body = instantiate_document(template, self.tokens, self.registry)?;
        let handle = parts.create_part(spec, body)?;
        debug!(part = %handle.part_name, relationship = ?handle.relationship_id, "ensured part");
        Ok(OperationResult::Applied)
    }

    fn ensure_attr(
        &mut self,
        tree: &mut DocumentTree,
        target: &str,
        attr: &str,
        value: &str,
    ) -> Result<OperationResult, EngineError> {
        let id = self.select_element(tree, target)?;
        let name = self
            .registry
            .attribute(attr)
            .ok_or_else(|| EngineError::UnknownRef {
                table: "attributes",
                key: attr.to_string(),
            })?
            .clone();
        let value = substitute(value, self.tokens)?;
        let current = tree
            .element(id)
            .and_then(|el| el.attribute(&name.local, name.namespace.as_deref()));
        if current == Some(value.as_str()) {
            return Ok(OperationResult::AlreadyApplied);
        }
        tree.set_attribute(id, name, &value)?;
        Ok(OperationResult::Applied)
    }

    fn fragment(&self, key: &str) -> Result<&'a FragmentTemplate, EngineError> {
        self.registry
            .fragment(key)
            .ok_or_else(|| EngineError::UnknownRef {
                table: "fragments",
                key: key.to_string(),
            })
    }
}

fn outcome(index: usize, record: &OperationRecord, result: OperationResult) -> OperationOutcome {
    OperationOutcome {
        index,
        kind: record.op.kind(),
        keys: record.op.keys().into_iter().map(str::to_string).collect(),
        result,
    }
}

fn compact(tree: &mut DocumentTree) {
    let dropped = tree.compact();
    if dropped > 0 {
        trace!(dropped, "compacted document arena");
    }
}

fn place(
    tree: &mut DocumentTree,
    anchor: NodeId,
    node: NodeId,
    placement: Placement,
) -> Result<(), EngineError> {
    match placement {
        Placement::Before => tree.insert_before(anchor, node)?,
        Placement::After => tree.insert_after(anchor, node)?,
        Placement::Prepend => tree.prepend_child(anchor, node)?,
        Placement::Append => tree.append_child(anchor, node)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::MemoryPackage;
    use crate::patch::load_from_str;
    use crate::registry;
    use crate::token::NoTokens;
    use crate::tree::parse_str;

    const REGISTRY: &str = r#"
[meta]
version = "1.0.0"

[elements]
root = "root"
item = "item"

[attributes]
state = "state"

[paths]
root = "/root"
items = "/root/item"
state = "/root/@state"
"#;

    fn outcome_of(result: OperationResult) -> OperationOutcome {
        OperationOutcome {
            index: 0,
            kind: OperationKind::Remove,
            keys: vec!["items".to_string()],
            result,
        }
    }

    #[test]
    fn report_counts_by_result() {
        let report = PatchReport {
            name: "counts".to_string(),
            outcomes: vec![
                outcome_of(OperationResult::Applied),
                outcome_of(OperationResult::AlreadyApplied),
                outcome_of(OperationResult::Skipped {
                    reason: "missing".to_string(),
                }),
                outcome_of(OperationResult::SkippedVersion {
                    reason: "old".to_string(),
                }),
            ],
        };
        assert_eq!(report.applied(), 1);
        assert_eq!(report.already_applied(), 1);
        assert_eq!(report.skipped(), 2);
        assert!(!report.is_noop());
        assert_eq!(
            OperationResult::SkippedVersion {
                reason: "old".to_string()
            }
            .to_string(),
            "skipped (version): old"
        );
    }

    #[test]
    fn remove_then_ensure_attr() {
        let registry = registry::load_from_str(REGISTRY).unwrap();
        let patch = load_from_str(
            r#"
[[operations]]
kind = "remove"
target_ref = "items"

[[operations]]
kind = "ensureAttr"
target_ref = "root"
attr = "state"
value = "clean"
"#,
        )
        .unwrap();
        let mut tree = parse_str("<root><item/><item/></root>").unwrap();
        let mut session = PatchSession::new(&registry, &NoTokens);

        let report = session
            .apply(&mut tree, &mut MemoryPackage::new(), &patch)
            .unwrap();
        assert_eq!(report.applied(), 2);
        assert_eq!(
            crate::tree::to_xml_string(&tree),
            r#"<root state="clean"/>"#
        );
        assert_eq!(tree.arena_len(), 2);

        let again = session
            .apply(&mut tree, &mut MemoryPackage::new(), &patch)
            .unwrap();
        assert!(again.is_noop());
        assert_eq!(again.already_applied(), 2);
    }

    #[test]
    fn set_through_attribute_path_reports_equal_value() {
        let registry = registry::load_from_str(REGISTRY).unwrap();
        let patch = load_from_str(
            "[[operations]]\nkind = \"set\"\ntarget_ref = \"state\"\nvalue = \"clean\"\n",
        )
        .unwrap();
        let mut tree = parse_str(r#"<root state="clean"/>"#).unwrap();
        let report = PatchSession::new(&registry, &NoTokens)
            .apply(&mut tree, &mut MemoryPackage::new(), &patch)
            .unwrap();
        assert_eq!(report.outcomes[0].result, OperationResult::AlreadyApplied);
    }
}
