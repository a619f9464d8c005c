//! Arena-backed XML document tree.
//!
//! A [`DocumentTree`] owns every node of one XML part. Nodes are addressed by
//! [`NodeId`] and keep an ordered attribute list and an ordered child list,
//! since OOXML validity depends on child ordering. Detached nodes stay in the
//! arena but are unreachable from the document node, so structural equality
//! and serialisation only ever see the attached tree.

pub mod xml;

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use xml::{parse_str, read_from_path, to_xml_string, write_to_path, XmlError};

/// Handle to a node inside one [`DocumentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Namespace-qualified name. Matching only looks at `local` and `namespace`;
/// `prefix` is kept for serialisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            namespace: None,
        }
    }

    pub fn namespaced(
        prefix: impl Into<String>,
        local: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn matches(&self, local: &str, namespace: Option<&str>) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }

    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// An `xmlns` / `xmlns:prefix` declaration carried by an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespace_decls: Vec<NamespaceDecl>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespace_decls: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name,
            value: value.into(),
        });
        self
    }

    pub fn attribute(&self, local: &str, namespace: Option<&str>) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.matches(local, namespace))
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

/// The `<?xml ...?>` header of a part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("node {0} is already attached to a parent")]
    AlreadyAttached(NodeId),

    #[error("node {0} has no parent")]
    NoParent(NodeId),

    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("a document can only hold one root element")]
    MultipleRoots,

    #[error("the document node cannot be moved")]
    DocumentNode,
}

#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: Vec<NodeData>,
    declaration: Option<XmlDeclaration>,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    /// Create an empty document (document node only).
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            declaration: None,
        }
    }

    /// Create a document whose root is `element`.
    pub fn with_root(element: Element) -> Self {
        let mut tree = Self::new();
        let root = tree.create_element(element);
        tree.nodes[0].children.push(root);
        tree.nodes[root.0].parent = Some(tree.document());
        tree
    }

    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    pub fn declaration(&self) -> Option<&XmlDeclaration> {
        self.declaration.as_ref()
    }

    pub fn set_declaration(&mut self, declaration: Option<XmlDeclaration>) {
        self.declaration = declaration;
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.child_elements(self.document()).next()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|child| matches!(self.nodes[child.0].kind, NodeKind::Element(_)))
    }

    /// Descendant elements of `id` in document order (pre-order), excluding `id`.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.child_elements(id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            out.push(next);
            let before = stack.len();
            stack.extend(self.child_elements(next));
            stack[before..].reverse();
        }
        out
    }

    /// Pre-order position of every attached node.
    pub fn document_order(&self) -> HashMap<NodeId, usize> {
        let mut order = HashMap::new();
        let mut stack = vec![self.document()];
        while let Some(next) = stack.pop() {
            order.insert(next, order.len());
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        order
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.document() {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Number of attached elements.
    pub fn element_count(&self) -> usize {
        self.descendant_elements(self.document()).len()
    }

    /// Arena entries, attached or not.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Drop detached arena entries and renumber the rest in document order.
    /// Every `NodeId` obtained before the call is invalidated. Returns the
    /// number of entries dropped.
    pub fn compact(&mut self) -> usize {
        let before = self.nodes.len();
        let mut order = Vec::with_capacity(before);
        let mut stack = vec![self.document()];
        while let Some(next) = stack.pop() {
            order.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        if order.len() == before {
            return 0;
        }

        let mut remap = vec![None; before];
        for (new, old) in order.iter().enumerate() {
            remap[old.0] = Some(NodeId(new));
        }
        let mut old: Vec<Option<NodeData>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        self.nodes = order
            .iter()
            .filter_map(|id| {
                let mut data = old[id.0].take()?;
                data.parent = data.parent.and_then(|parent| remap[parent.0]);
                data.children = data
                    .children
                    .iter()
                    .filter_map(|child| remap[child.0])
                    .collect();
                Some(data)
            })
            .collect();
        before - self.nodes.len()
    }

    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.push(NodeKind::Element(element))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let position = self.nodes[parent.0].children.len();
        self.insert_at(parent, position, child)
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.insert_at(parent, 0, child)
    }

    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> Result<(), TreeError> {
        let (parent, position) = self.position_of(reference)?;
        self.insert_at(parent, position, node)
    }

    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<(), TreeError> {
        let (parent, position) = self.position_of(reference)?;
        self.insert_at(parent, position + 1, node)
    }

    fn position_of(&self, node: NodeId) -> Result<(NodeId, usize), TreeError> {
        let parent = self.nodes[node.0].parent.ok_or(TreeError::NoParent(node))?;
        let position = self.nodes[parent.0]
            .children
            .iter()
            .position(|child| *child == node)
            .ok_or(TreeError::NoParent(node))?;
        Ok((parent, position))
    }

    fn insert_at(
        &mut self,
        parent: NodeId,
        position: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        if child == self.document() {
            return Err(TreeError::DocumentNode);
        }
        if self.nodes[child.0].parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }
        match self.nodes[parent.0].kind {
            NodeKind::Document => {
                let is_element = matches!(self.nodes[child.0].kind, NodeKind::Element(_));
                if is_element && self.root_element().is_some() {
                    return Err(TreeError::MultipleRoots);
                }
            }
            NodeKind::Element(_) => {}
            _ => return Err(TreeError::NotAnElement(parent)),
        }

        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(TreeError::Cycle { parent, child });
            }
            ancestor = self.nodes[current.0].parent;
        }

        let children = &mut self.nodes[parent.0].children;
        let position = position.min(children.len());
        children.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Detach `id` from its parent. The subtree stays intact and can be
    /// re-attached.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Document | NodeKind::Element(_) => {
                for child in &self.nodes[id.0].children {
                    self.collect_text(*child, out);
                }
            }
            NodeKind::Comment(_) => {}
        }
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), TreeError> {
        if self.element(id).is_none() {
            return Err(TreeError::NotAnElement(id));
        }
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node)?;
        }
        Ok(())
    }

    /// Set an attribute in place, or append it when the element lacks it.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: &str) -> Result<(), TreeError> {
        let element = self.element_mut(id).ok_or(TreeError::NotAnElement(id))?;
        match element
            .attributes
            .iter_mut()
            .find(|attr| attr.name.matches(&name.local, name.namespace.as_deref()))
        {
            Some(attr) => attr.value = value.to_string(),
            None => element.attributes.push(Attribute {
                name,
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, local: &str, namespace: Option<&str>) -> bool {
        let Some(element) = self.element_mut(id) else {
            return false;
        };
        let before = element.attributes.len();
        element
            .attributes
            .retain(|attr| !attr.name.matches(local, namespace));
        element.attributes.len() != before
    }

    fn subtree_eq(&self, a: NodeId, other: &DocumentTree, b: NodeId) -> bool {
        let left = &self.nodes[a.0];
        let right = &other.nodes[b.0];
        left.kind == right.kind
            && left.children.len() == right.children.len()
            && left
                .children
                .iter()
                .zip(&right.children)
                .all(|(x, y)| self.subtree_eq(*x, other, *y))
    }
}

/// Structural equality over the attached tree; detached arena entries are
/// ignored.
impl PartialEq for DocumentTree {
    fn eq(&self, other: &Self) -> bool {
        self.declaration == other.declaration
            && self.subtree_eq(self.document(), other, other.document())
    }
}

impl Eq for DocumentTree {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DocumentTree, NodeId) {
        let mut tree = DocumentTree::with_root(Element::new(QName::local("root")));
        let root = tree.root_element().unwrap();
        let a = tree.create_element(Element::new(QName::local("a")));
        let b = tree.create_element(Element::new(QName::local("b")));
        tree.append_child(root, a).unwrap();
        tree.append_child(root, b).unwrap();
        let c = tree.create_element(Element::new(QName::local("c")));
        tree.append_child(a, c).unwrap();
        (tree, root)
    }

    fn local_names(tree: &DocumentTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|id| tree.element(*id).unwrap().name.local.clone())
            .collect()
    }

    #[test]
    fn descendants_are_pre_order() {
        let (tree, _) = sample();
        let all = tree.descendant_elements(tree.document());
        assert_eq!(local_names(&tree, &all), ["root", "a", "c", "b"]);
    }

    #[test]
    fn insert_before_and_after() {
        let (mut tree, root) = sample();
        let b = tree.child_elements(root).nth(1).unwrap();
        let x = tree.create_element(Element::new(QName::local("x")));
        let y = tree.create_element(Element::new(QName::local("y")));
        tree.insert_before(b, x).unwrap();
        tree.insert_after(b, y).unwrap();
        let kids: Vec<_> = tree.child_elements(root).collect();
        assert_eq!(local_names(&tree, &kids), ["a", "x", "b", "y"]);
    }

    #[test]
    fn detach_removes_from_structure() {
        let (mut tree, root) = sample();
        let original = tree.clone();
        let a = tree.child_elements(root).next().unwrap();
        tree.detach(a);
        assert!(!tree.is_attached(a));
        assert_eq!(tree.element_count(), 2);
        assert_ne!(tree, original);
    }

    #[test]
    fn cycle_is_rejected() {
        let (mut tree, root) = sample();
        let a = tree.child_elements(root).next().unwrap();
        let c = tree.child_elements(a).next().unwrap();
        tree.detach(a);
        assert_eq!(
            tree.append_child(c, a),
            Err(TreeError::Cycle { parent: c, child: a })
        );
    }

    #[test]
    fn second_root_is_rejected() {
        let (mut tree, _) = sample();
        let extra = tree.create_element(Element::new(QName::local("extra")));
        assert_eq!(
            tree.append_child(tree.document(), extra),
            Err(TreeError::MultipleRoots)
        );
    }

    #[test]
    fn set_attribute_replaces_or_appends() {
        let (mut tree, root) = sample();
        tree.set_attribute(root, QName::local("val"), "1").unwrap();
        tree.set_attribute(root, QName::local("val"), "2").unwrap();
        let element = tree.element(root).unwrap();
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.attribute("val", None), Some("2"));
        assert!(tree.remove_attribute(root, "val", None));
        assert!(!tree.remove_attribute(root, "val", None));
    }

    #[test]
    fn set_text_content_replaces_children() {
        let (mut tree, root) = sample();
        let b = tree.child_elements(root).nth(1).unwrap();
        tree.set_text_content(b, "hello").unwrap();
        assert_eq!(tree.text_content(b), "hello");
        tree.set_text_content(b, "bye").unwrap();
        assert_eq!(tree.children(b).len(), 1);
        assert_eq!(tree.text_content(root), "bye");
    }

    #[test]
    fn compact_drops_detached_nodes() {
        let (mut tree, root) = sample();
        let a = tree.child_elements(root).next().unwrap();
        tree.detach(a);
        tree.create_text("loose");
        let expected = tree.clone();
        assert_eq!(tree.arena_len(), 6);

        assert_eq!(tree.compact(), 3);
        assert_eq!(tree.arena_len(), 3);
        assert_eq!(tree, expected);
        let root = tree.root_element().unwrap();
        let b = tree.child_elements(root).next().unwrap();
        assert_eq!(tree.parent(b), Some(root));
        assert_eq!(local_names(&tree, &[b]), ["b"]);
        assert_eq!(tree.compact(), 0);
    }

    #[test]
    fn equality_ignores_detached_nodes() {
        let (mut left, _) = sample();
        let (right, _) = sample();
        let orphan = left.create_element(Element::new(QName::local("orphan")));
        assert!(!left.is_attached(orphan));
        assert_eq!(left, right);
    }
}
