//! Namespace-aware selectors expressed purely through registry symbols.

pub mod ast;
pub mod parser;

pub use ast::{Axis, NameTest, PathAst, PathTemplate, Predicate, Step};
pub use parser::{is_symbol_char, parse, PathError};

/// True when `input` is shaped like a registry key rather than selector text.
pub fn is_registry_key(input: &str) -> bool {
    let bytes = input.as_bytes();
    match bytes.first() {
        Some(first) if first.is_ascii_alphabetic() || *first == b'_' => {
            bytes.iter().all(|c| is_symbol_char(*c))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keys() {
        assert!(is_registry_key("accent1ColorAttr"));
        assert!(is_registry_key("footer.placeholder"));
        assert!(is_registry_key("_private-key"));
        assert!(!is_registry_key(""));
        assert!(!is_registry_key("/p:sld"));
        assert!(!is_registry_key("@val"));
        assert!(!is_registry_key("sp[@id]"));
        assert!(!is_registry_key("1st"));
    }
}
