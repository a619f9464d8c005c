//! Registry compilation: resolve names, parse selectors, validate fragments.

use crate::fragment::{FragmentNode, FragmentTemplate, IdentifierNamespace, TemplateText};
use crate::part::{PartSpec, RelationshipSpec};
use crate::path::{self, is_registry_key, PathTemplate};
use crate::registry::schema::{FragmentNodeDef, NameDef, RegistryDocument, RegistryMeta};
use crate::tree::QName;
use indexmap::IndexMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Element,
    Attribute,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Element => write!(f, "element"),
            SymbolKind::Attribute => write!(f, "attribute"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileIssue {
    UndefinedNamespace {
        key: String,
        prefix: String,
    },
    UndefinedSymbol {
        key: String,
        kind: SymbolKind,
        symbol: String,
        suggestion: Option<String>,
    },
    MalformedPath {
        key: String,
        message: String,
    },
    UndefinedIdentifierNamespace {
        key: String,
        namespace: String,
    },
    MalformedPlaceholder {
        key: String,
        message: String,
    },
    InvalidName {
        key: String,
        message: String,
    },
}

impl CompileIssue {
    /// Registry key (`table.name`) the issue is about.
    pub fn key(&self) -> &str {
        match self {
            CompileIssue::UndefinedNamespace { key, .. }
            | CompileIssue::UndefinedSymbol { key, .. }
            | CompileIssue::MalformedPath { key, .. }
            | CompileIssue::UndefinedIdentifierNamespace { key, .. }
            | CompileIssue::MalformedPlaceholder { key, .. }
            | CompileIssue::InvalidName { key, .. } => key,
        }
    }
}

impl fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileIssue::UndefinedNamespace { key, prefix } => {
                write!(f, "{key}: undefined namespace prefix '{prefix}'")
            }
            CompileIssue::UndefinedSymbol {
                key,
                kind,
                symbol,
                suggestion,
            } => {
                write!(f, "{key}: undefined {kind} symbol '{symbol}'")?;
                if let Some(suggestion) = suggestion {
                    write!(f, " (did you mean '{suggestion}'?)")?;
                }
                Ok(())
            }
            CompileIssue::MalformedPath { key, message } => {
                write!(f, "{key}: malformed path {message}")
            }
            CompileIssue::UndefinedIdentifierNamespace { key, namespace } => {
                write!(f, "{key}: undefined identifier namespace '{namespace}'")
            }
            CompileIssue::MalformedPlaceholder { key, message } => write!(f, "{key}: {message}"),
            CompileIssue::InvalidName { key, message } => write!(f, "{key}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub issues: Vec<CompileIssue>,
}

impl CompileError {
    pub fn issues(&self) -> &[CompileIssue] {
        &self.issues
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Compiled registry. Immutable; share it by reference across workers.
#[derive(Debug, Clone)]
pub struct Registry {
    meta: RegistryMeta,
    fingerprint: u64,
    namespaces: IndexMap<String, String>,
    elements: IndexMap<String, QName>,
    attributes: IndexMap<String, QName>,
    identifiers: IndexMap<String, IdentifierNamespace>,
    values: IndexMap<String, String>,
    paths: IndexMap<String, PathTemplate>,
    fragments: IndexMap<String, FragmentTemplate>,
    parts: IndexMap<String, PartSpec>,
}

impl Registry {
    pub fn meta(&self) -> &RegistryMeta {
        &self.meta
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn element(&self, symbol: &str) -> Option<&QName> {
        self.elements.get(symbol)
    }

    pub fn attribute(&self, symbol: &str) -> Option<&QName> {
        self.attributes.get(symbol)
    }

    pub fn identifier_namespace(&self, name: &str) -> Option<&IdentifierNamespace> {
        self.identifiers.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn path(&self, name: &str) -> Option<&PathTemplate> {
        self.paths.get(name)
    }

    pub fn fragment(&self, name: &str) -> Option<&FragmentTemplate> {
        self.fragments.get(name)
    }

    pub fn part(&self, key: &str) -> Option<&PartSpec> {
        self.parts.get(key)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathTemplate> {
        self.paths.values()
    }

    pub fn fragments(&self) -> impl Iterator<Item = &FragmentTemplate> {
        self.fragments.values()
    }

    pub fn parts(&self) -> impl Iterator<Item = &PartSpec> {
        self.parts.values()
    }
}

/// Compile a (possibly layered) registry document. All issues are collected.
pub fn compile(document: &RegistryDocument) -> Result<Registry, CompileError> {
    let mut issues = Vec::new();

    for prefix in document.namespaces.keys() {
        if prefix.is_empty() || prefix.contains(':') || prefix == "xmlns" {
            issues.push(CompileIssue::InvalidName {
                key: format!("namespaces.{prefix}"),
                message: "namespace prefix must be a plain XML name".to_string(),
            });
        }
    }

    if let Some(version) = &document.meta.version {
        if let Err(err) = semver::Version::parse(version.trim()) {
            issues.push(CompileIssue::InvalidName {
                key: "meta.version".to_string(),
                message: format!("'{version}' is not a semver version: {err}"),
            });
        }
    }

    let elements = resolve_names(document, &document.elements, "elements", &mut issues);
    let attributes = resolve_names(document, &document.attributes, "attributes", &mut issues);

    let mut identifiers = IndexMap::new();
    for (name, def) in &document.identifiers {
        let key = format!("identifiers.{name}");
        check_key(&key, name, &mut issues);
        let mut names = Vec::new();
        for symbol in &def.attributes {
            match attributes.get(symbol) {
                Some(qname) => names.push(qname.clone()),
                None => issues.push(undefined(&key, SymbolKind::Attribute, symbol, &attributes)),
            }
        }
        identifiers.insert(
            name.clone(),
            IdentifierNamespace {
                name: name.clone(),
                attributes: names,
                prefix: def.prefix.clone(),
                max: def.max.unwrap_or(u64::from(u32::MAX)),
            },
        );
    }

    for name in document.values.keys() {
        check_key(&format!("values.{name}"), name, &mut issues);
    }

    let mut paths = IndexMap::new();
    for (name, source) in &document.paths {
        let key = format!("paths.{name}");
        check_key(&key, name, &mut issues);
        let ast = match path::parse(source) {
            Ok(ast) => ast,
            Err(err) => {
                issues.push(CompileIssue::MalformedPath {
                    key,
                    message: format!("'{source}' {err}"),
                });
                continue;
            }
        };
        for symbol in ast.element_symbols() {
            if !elements.contains_key(symbol) {
                issues.push(undefined(&key, SymbolKind::Element, symbol, &elements));
            }
        }
        for symbol in ast.attribute_symbols() {
            if !attributes.contains_key(symbol) {
                issues.push(undefined(&key, SymbolKind::Attribute, symbol, &attributes));
            }
        }
        paths.insert(name.clone(), PathTemplate::new(name.clone(), source.clone(), ast));
    }

    let mut fragments = IndexMap::new();
    for (name, def) in &document.fragments {
        let key = format!("fragments.{name}");
        check_key(&key, name, &mut issues);
        let scope = FragmentScope {
            key: &key,
            elements: &elements,
            attributes: &attributes,
            identifiers: &identifiers,
        };
        if let Some(root) = scope.compile_node(def, &mut issues) {
            fragments.insert(name.clone(), FragmentTemplate::new(name.clone(), root));
        }
    }

    let mut parts = IndexMap::new();
    for (name, def) in &document.parts {
        let key = format!("parts.{name}");
        check_key(&key, name, &mut issues);
        if !def.name.starts_with('/') {
            issues.push(CompileIssue::InvalidName {
                key: key.clone(),
                message: format!("part name '{}' must be absolute", def.name),
            });
        }
        if def.content_type.trim().is_empty() {
            issues.push(CompileIssue::InvalidName {
                key: key.clone(),
                message: "content_type must not be empty".to_string(),
            });
        }
        parts.insert(
            name.clone(),
            PartSpec {
                key: name.clone(),
                part_name: def.name.clone(),
                content_type: def.content_type.clone(),
                relationship: def.relationship.as_ref().map(|rel| RelationshipSpec {
                    source: rel.source.clone(),
                    rel_type: rel.rel_type.clone(),
                }),
            },
        );
    }

    if !issues.is_empty() {
        return Err(CompileError { issues });
    }

    let registry = Registry {
        meta: document.meta.clone(),
        fingerprint: document.fingerprint(),
        namespaces: document.namespaces.clone(),
        elements,
        attributes,
        identifiers,
        values: document.values.clone(),
        paths,
        fragments,
        parts,
    };
    debug!(
        name = %registry.meta.name,
        paths = registry.paths.len(),
        fragments = registry.fragments.len(),
        fingerprint = registry.fingerprint,
        "compiled registry"
    );
    Ok(registry)
}

fn check_key(key: &str, name: &str, issues: &mut Vec<CompileIssue>) {
    if !is_registry_key(name) {
        issues.push(CompileIssue::InvalidName {
            key: key.to_string(),
            message: format!("'{name}' is not a valid registry key"),
        });
    }
}

fn resolve_names(
    document: &RegistryDocument,
    defs: &IndexMap<String, NameDef>,
    table: &str,
    issues: &mut Vec<CompileIssue>,
) -> IndexMap<String, QName> {
    let mut out = IndexMap::new();
    for (symbol, def) in defs {
        let key = format!("{table}.{symbol}");
        check_key(&key, symbol, issues);
        let (prefix, local) = def.parts();
        if local.is_empty() || local.contains(':') {
            issues.push(CompileIssue::InvalidName {
                key,
                message: format!("invalid local name '{local}'"),
            });
            continue;
        }
        let name = match prefix {
            Some(prefix) => match document.namespaces.get(prefix) {
                Some(uri) => QName::namespaced(prefix, local, uri.clone()),
                None => {
                    issues.push(CompileIssue::UndefinedNamespace {
                        key,
                        prefix: prefix.to_string(),
                    });
                    continue;
                }
            },
            None => QName::local(local),
        };
        out.insert(symbol.clone(), name);
    }
    out
}

fn undefined(
    key: &str,
    kind: SymbolKind,
    symbol: &str,
    known: &IndexMap<String, QName>,
) -> CompileIssue {
    let suggestion = known
        .keys()
        .map(|candidate| (strsim::jaro_winkler(symbol, candidate), candidate))
        .filter(|(score, _)| *score >= 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.clone());
    CompileIssue::UndefinedSymbol {
        key: key.to_string(),
        kind,
        symbol: symbol.to_string(),
        suggestion,
    }
}

struct FragmentScope<'a> {
    key: &'a str,
    elements: &'a IndexMap<String, QName>,
    attributes: &'a IndexMap<String, QName>,
    identifiers: &'a IndexMap<String, IdentifierNamespace>,
}

impl FragmentScope<'_> {
    fn compile_node(
        &self,
        def: &FragmentNodeDef,
        issues: &mut Vec<CompileIssue>,
    ) -> Option<FragmentNode> {
        let mut ok = true;
        let name = match self.elements.get(&def.element) {
            Some(name) => Some(name.clone()),
            None => {
                issues.push(undefined(
                    self.key,
                    SymbolKind::Element,
                    &def.element,
                    self.elements,
                ));
                None
            }
        };

        let mut attributes = Vec::with_capacity(def.attrs.len());
        for (symbol, value) in &def.attrs {
            let Some(attr) = self.attributes.get(symbol) else {
                issues.push(undefined(
                    self.key,
                    SymbolKind::Attribute,
                    symbol,
                    self.attributes,
                ));
                ok = false;
                continue;
            };
            match self.compile_text(value, issues) {
                Some(text) => attributes.push((attr.clone(), text)),
                None => ok = false,
            }
        }

        let text = match &def.text {
            Some(value) => match self.compile_text(value, issues) {
                Some(text) => Some(text),
                None => {
                    ok = false;
                    None
                }
            },
            None => None,
        };

        let mut children = Vec::with_capacity(def.children.len());
        for child in &def.children {
            match self.compile_node(child, issues) {
                Some(child) => children.push(child),
                None => ok = false,
            }
        }

        match name {
            Some(name) if ok => Some(FragmentNode {
                name,
                attributes,
                text,
                children,
            }),
            _ => None,
        }
    }

    fn compile_text(&self, value: &str, issues: &mut Vec<CompileIssue>) -> Option<TemplateText> {
        let text = match TemplateText::parse(value) {
            Ok(text) => text,
            Err(err) => {
                issues.push(CompileIssue::MalformedPlaceholder {
                    key: self.key.to_string(),
                    message: err.to_string(),
                });
                return None;
            }
        };
        let mut ok = true;
        for (namespace, _) in text.identifiers() {
            if !self.identifiers.contains_key(namespace) {
                issues.push(CompileIssue::UndefinedIdentifierNamespace {
                    key: self.key.to_string(),
                    namespace: namespace.to_string(),
                });
                ok = false;
            }
        }
        ok.then_some(text)
    }
}
