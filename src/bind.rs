//! Variable binding: turn the free symbols of a path template into concrete
//! local names, namespace URIs and comparison values.

use crate::path::PathTemplate;
use crate::registry::Registry;
use crate::token::TokenResolver;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Typed key of a [`VariableMap`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    ElementName(String),
    ElementNamespace(String),
    AttributeName(String),
    AttributeNamespace(String),
    Value(String),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::ElementName(sym) => write!(f, "element name of '{sym}'"),
            Variable::ElementNamespace(sym) => write!(f, "element namespace of '{sym}'"),
            Variable::AttributeName(sym) => write!(f, "attribute name of '{sym}'"),
            Variable::AttributeNamespace(sym) => write!(f, "attribute namespace of '{sym}'"),
            Variable::Value(name) => write!(f, "value ${name}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("path '{path}': unresolved {variable}")]
    UnresolvedVariable { path: String, variable: Variable },
}

/// Bound variables of one path template.
///
/// Namespace variables hold the namespace URI, or the empty string for names
/// in no namespace. `$value` names that the registry does not define stay
/// pending until [`VariableMap::with_tokens`] binds them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMap {
    values: BTreeMap<Variable, String>,
    pending: BTreeSet<String>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: Variable, value: impl Into<String>) {
        if let Variable::Value(name) = &variable {
            self.pending.remove(name);
        }
        self.values.insert(variable, value.into());
    }

    pub fn get(&self, variable: &Variable) -> Option<&str> {
        self.values.get(variable).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &str)> {
        self.values.iter().map(|(key, value)| (key, value.as_str()))
    }

    /// `$value` names still waiting for a token.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Bind pending `$value` names from `tokens`. Borrows `self` when nothing
    /// is pending.
    pub fn with_tokens(
        &self,
        path: &str,
        tokens: &dyn TokenResolver,
    ) -> Result<Cow<'_, VariableMap>, BindError> {
        if self.pending.is_empty() {
            return Ok(Cow::Borrowed(self));
        }
        let mut bound = self.clone();
        for name in &self.pending {
            let value = tokens
                .resolve(name)
                .ok_or_else(|| BindError::UnresolvedVariable {
                    path: path.to_string(),
                    variable: Variable::Value(name.clone()),
                })?;
            bound.insert(Variable::Value(name.clone()), value);
        }
        Ok(Cow::Owned(bound))
    }
}

/// Resolve every free variable of `template` against `registry`.
pub fn bind(registry: &Registry, template: &PathTemplate) -> Result<VariableMap, BindError> {
    let unresolved = |variable: Variable| BindError::UnresolvedVariable {
        path: template.name().to_string(),
        variable,
    };
    let ast = template.ast();
    let mut map = VariableMap::new();

    for symbol in ast.element_symbols() {
        let name = registry
            .element(symbol)
            .ok_or_else(|| unresolved(Variable::ElementName(symbol.to_string())))?;
        map.insert(Variable::ElementName(symbol.to_string()), name.local.clone());
        map.insert(
            Variable::ElementNamespace(symbol.to_string()),
            name.namespace.clone().unwrap_or_default(),
        );
    }

    for symbol in ast.attribute_symbols() {
        let name = registry
            .attribute(symbol)
            .ok_or_else(|| unresolved(Variable::AttributeName(symbol.to_string())))?;
        map.insert(Variable::AttributeName(symbol.to_string()), name.local.clone());
        map.insert(
            Variable::AttributeNamespace(symbol.to_string()),
            name.namespace.clone().unwrap_or_default(),
        );
    }

    for name in ast.value_variables() {
        match registry.value(name) {
            Some(value) => map.insert(Variable::Value(name.to_string()), value),
            None => {
                map.pending.insert(name.to_string());
            }
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::load_from_str;
    use std::collections::HashMap;

    const REGISTRY: &str = r#"
[namespaces]
p = "http://schemas.openxmlformats.org/presentationml/2006/main"

[elements]
sld = "p:sld"
ph = "p:ph"

[attributes]
type = "type"

[values]
footerType = "ftr"

[paths]
footer = "//ph[@type = $footerType]"
byToken = "//ph[@type = $placeholderKind]"
"#;

    #[test]
    fn binds_names_namespaces_and_values() {
        let registry = load_from_str(REGISTRY).unwrap();
        let vars = bind(&registry, registry.path("footer").unwrap()).unwrap();
        assert_eq!(vars.get(&Variable::ElementName("ph".into())), Some("ph"));
        assert_eq!(
            vars.get(&Variable::ElementNamespace("ph".into())),
            Some("http://schemas.openxmlformats.org/presentationml/2006/main")
        );
        assert_eq!(vars.get(&Variable::AttributeName("type".into())), Some("type"));
        assert_eq!(vars.get(&Variable::AttributeNamespace("type".into())), Some(""));
        assert_eq!(vars.get(&Variable::Value("footerType".into())), Some("ftr"));
        assert_eq!(vars.pending().count(), 0);
    }

    #[test]
    fn binding_is_deterministic() {
        let registry = load_from_str(REGISTRY).unwrap();
        let template = registry.path("footer").unwrap();
        assert_eq!(bind(&registry, template), bind(&registry, template));
    }

    #[test]
    fn pending_values_come_from_tokens() {
        let registry = load_from_str(REGISTRY).unwrap();
        let vars = bind(&registry, registry.path("byToken").unwrap()).unwrap();
        assert_eq!(vars.pending().collect::<Vec<_>>(), ["placeholderKind"]);

        let mut tokens = HashMap::new();
        tokens.insert("placeholderKind".to_string(), "sldNum".to_string());
        let bound = vars.with_tokens("byToken", &tokens).unwrap();
        assert_eq!(
            bound.get(&Variable::Value("placeholderKind".into())),
            Some("sldNum")
        );

        let err = vars
            .with_tokens("byToken", &HashMap::<String, String>::new())
            .unwrap_err();
        assert_eq!(
            err,
            BindError::UnresolvedVariable {
                path: "byToken".to_string(),
                variable: Variable::Value("placeholderKind".to_string()),
            }
        );
    }
}
