//! Fragment templates and their instantiation into a live tree.

pub mod ids;
pub mod instantiate;
pub mod template;

pub use ids::{IdAllocator, IdentifierNamespace, IdentifierNamespaceExhausted};
pub use instantiate::{instantiate, instantiate_document, InstantiateError, Instantiation};
pub use template::{FragmentNode, FragmentTemplate, PlaceholderError, Segment, TemplateText};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{load_from_str, Registry};
    use crate::token::{NoTokens, TokenSet, UnresolvedToken};
    use crate::tree::{parse_str, to_xml_string, DocumentTree};

    const REGISTRY: &str = r##"
[namespaces]
p = "urn:p"
r = "urn:r"

[elements]
spTree = "p:spTree"
sp = "p:sp"
cNvPr = "p:cNvPr"
link = "p:link"

[attributes]
id = "id"
name = "name"
rid = "r:id"

[identifiers]
shape = { attributes = ["id"] }
rel = { attributes = ["rid"], prefix = "rId" }

[fragments.linkedShape]
element = "sp"
children = [
    { element = "cNvPr", attrs = { id = "#{shape:main}", name = "{{label}}" } },
    { element = "link", attrs = { id = "#{shape:main}", rid = "#{rel:target}" } },
]
"##;

    fn registry() -> Registry {
        load_from_str(REGISTRY).unwrap()
    }

    fn tokens() -> TokenSet {
        let mut tokens = TokenSet::new();
        tokens.insert("label", "Logo");
        tokens
    }

    #[test]
    fn repeated_labels_share_one_identifier() {
        let registry = registry();
        let mut tree =
            parse_str(r#"<p:spTree xmlns:p="urn:p" xmlns:r="urn:r"><p:sp id="7" r:id="rId2"/></p:spTree>"#)
                .unwrap();
        let mut ids = IdAllocator::new();
        let template = registry.fragment("linkedShape").unwrap();

        let instance = instantiate(template, &tokens(), &mut tree, &mut ids, &registry).unwrap();
        assert_eq!(instance.identifiers[&("shape".to_string(), "main".to_string())], "8");
        assert_eq!(instance.identifiers[&("rel".to_string(), "target".to_string())], "rId3");

        let children = tree.children(instance.root).to_vec();
        let c_nv_pr = tree.element(children[0]).unwrap();
        let link = tree.element(children[1]).unwrap();
        assert_eq!(c_nv_pr.attribute("id", None), Some("8"));
        assert_eq!(link.attribute("id", None), Some("8"));
        assert_eq!(c_nv_pr.attribute("name", None), Some("Logo"));
        assert_eq!(link.attribute("id", Some("urn:r")), Some("rId3"));
        assert!(!tree.is_attached(instance.root));
    }

    #[test]
    fn instantiations_never_collide() {
        let registry = registry();
        let mut tree = parse_str(r#"<p:spTree xmlns:p="urn:p"/>"#).unwrap();
        let root = tree.root_element().unwrap();
        let mut ids = IdAllocator::new();
        let template = registry.fragment("linkedShape").unwrap();

        let first = instantiate(template, &tokens(), &mut tree, &mut ids, &registry).unwrap();
        tree.append_child(root, first.root).unwrap();
        let second = instantiate(template, &tokens(), &mut tree, &mut ids, &registry).unwrap();
        tree.append_child(root, second.root).unwrap();

        let key = ("shape".to_string(), "main".to_string());
        assert_ne!(first.identifiers[&key], second.identifiers[&key]);
    }

    #[test]
    fn unresolved_token_allocates_nothing() {
        let registry = registry();
        let mut tree = DocumentTree::new();
        let mut ids = IdAllocator::new();
        let template = registry.fragment("linkedShape").unwrap();

        let err = instantiate(template, &NoTokens, &mut tree, &mut ids, &registry).unwrap_err();
        assert_eq!(
            err,
            InstantiateError::UnresolvedToken(UnresolvedToken {
                token: "label".to_string()
            })
        );
        assert_eq!(ids.current("shape"), None);
    }

    #[test]
    fn document_instantiation_declares_namespaces() {
        let registry = registry();
        let template = registry.fragment("linkedShape").unwrap();
        let tree = instantiate_document(template, &tokens(), &registry).unwrap();
        let xml = to_xml_string(&tree);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"xmlns:p="urn:p""#));
        assert!(xml.contains(r#"r:id="rId1""#));
    }
}
