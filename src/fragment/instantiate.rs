use crate::fragment::ids::{IdAllocator, IdentifierNamespaceExhausted};
use crate::fragment::template::{FragmentNode, FragmentTemplate, Segment, TemplateText};
use crate::registry::Registry;
use crate::token::{TokenResolver, UnresolvedToken};
use crate::tree::{Attribute, DocumentTree, Element, NodeId, TreeError, XmlDeclaration};
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstantiateError {
    #[error(transparent)]
    UnresolvedToken(#[from] UnresolvedToken),

    #[error(transparent)]
    Exhausted(#[from] IdentifierNamespaceExhausted),

    #[error("fragment '{fragment}' uses undeclared identifier namespace '{namespace}'")]
    UnknownIdentifierNamespace { fragment: String, namespace: String },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A detached subtree produced from a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instantiation {
    pub root: NodeId,
    /// `(namespace, label)` → allocated identifier.
    pub identifiers: HashMap<(String, String), String>,
}

struct Bindings {
    tokens: HashMap<String, String>,
    identifiers: HashMap<(String, String), String>,
}

impl Bindings {
    fn render(&self, text: &TemplateText) -> String {
        let mut out = String::new();
        for segment in text.segments() {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Token(name) => {
                    if let Some(value) = self.tokens.get(name) {
                        out.push_str(value);
                    }
                }
                Segment::Identifier { namespace, label } => {
                    if let Some(value) = self
                        .identifiers
                        .get(&(namespace.clone(), label.clone()))
                    {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

/// Materialise `template` as a detached subtree of `tree`.
///
/// Every token is resolved before any identifier is allocated, and nothing is
/// attached; the caller decides where the subtree goes. Repeated labels within
/// one instantiation share one identifier.
pub fn instantiate(
    template: &FragmentTemplate,
    tokens: &dyn TokenResolver,
    tree: &mut DocumentTree,
    ids: &mut IdAllocator,
    registry: &Registry,
) -> Result<Instantiation, InstantiateError> {
    let mut resolved = HashMap::new();
    for token in template.tokens() {
        let value = tokens.resolve(token).ok_or_else(|| UnresolvedToken {
            token: token.to_string(),
        })?;
        resolved.insert(token.to_string(), value);
    }

    let mut identifiers = HashMap::new();
    for (namespace, label) in template.identifier_placeholders() {
        let definition = registry.identifier_namespace(namespace).ok_or_else(|| {
            InstantiateError::UnknownIdentifierNamespace {
                fragment: template.name().to_string(),
                namespace: namespace.to_string(),
            }
        })?;
        let value = ids.allocate(definition, tree)?;
        trace!(fragment = template.name(), namespace, label, %value, "allocated identifier");
        identifiers.insert((namespace.to_string(), label.to_string()), value);
    }

    let bindings = Bindings {
        tokens: resolved,
        identifiers,
    };
    let root = build(template.root(), &bindings, tree)?;
    Ok(Instantiation {
        root,
        identifiers: bindings.identifiers,
    })
}

/// Instantiate `template` as the root element of a new part.
pub fn instantiate_document(
    template: &FragmentTemplate,
    tokens: &dyn TokenResolver,
    registry: &Registry,
) -> Result<DocumentTree, InstantiateError> {
    let mut tree = DocumentTree::new();
    tree.set_declaration(Some(XmlDeclaration {
        version: "1.0".to_string(),
        encoding: Some("UTF-8".to_string()),
        standalone: Some("yes".to_string()),
    }));
    let mut ids = IdAllocator::new();
    let instance = instantiate(template, tokens, &mut tree, &mut ids, registry)?;
    let document = tree.document();
    tree.append_child(document, instance.root)?;
    Ok(tree)
}

fn build(
    node: &FragmentNode,
    bindings: &Bindings,
    tree: &mut DocumentTree,
) -> Result<NodeId, TreeError> {
    let mut element = Element::new(node.name.clone());
    for (name, text) in &node.attributes {
        element.attributes.push(Attribute {
            name: name.clone(),
            value: bindings.render(text),
        });
    }
    let id = tree.create_element(element);
    if let Some(text) = &node.text {
        let text = tree.create_text(bindings.render(text));
        tree.append_child(id, text)?;
    }
    for child in &node.children {
        let child = build(child, bindings, tree)?;
        tree.append_child(id, child)?;
    }
    Ok(id)
}
