//! Serde model of a registry document, before compilation.

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegistryDocument {
    #[serde(default)]
    pub meta: RegistryMeta,
    #[serde(default)]
    pub namespaces: IndexMap<String, String>,
    #[serde(default)]
    pub elements: IndexMap<String, NameDef>,
    #[serde(default)]
    pub attributes: IndexMap<String, NameDef>,
    #[serde(default)]
    pub identifiers: IndexMap<String, IdentifierDef>,
    #[serde(default)]
    pub values: IndexMap<String, String>,
    #[serde(default)]
    pub paths: IndexMap<String, String>,
    #[serde(default)]
    pub fragments: IndexMap<String, FragmentNodeDef>,
    #[serde(default)]
    pub parts: IndexMap<String, PartDef>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct RegistryMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Element or attribute name: either `"prefix:local"` / `"local"`, or a
/// table `{ name = "local", ns = "prefix" }`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum NameDef {
    Short(String),
    Full {
        name: String,
        #[serde(default)]
        ns: Option<String>,
    },
}

impl NameDef {
    /// `(namespace prefix, local name)`
    pub fn parts(&self) -> (Option<&str>, &str) {
        match self {
            NameDef::Short(text) => match text.split_once(':') {
                Some((prefix, local)) => (Some(prefix), local),
                None => (None, text.as_str()),
            },
            NameDef::Full { name, ns } => (ns.as_deref(), name.as_str()),
        }
    }
}

/// An identifier namespace (shape ids, relationship ids, ...).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdentifierDef {
    /// Attribute symbols whose values hold identifiers of this namespace.
    pub attributes: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub max: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FragmentNodeDef {
    pub element: String,
    #[serde(default)]
    pub attrs: IndexMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<FragmentNodeDef>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartDef {
    /// Part name inside the package, e.g. `/customXml/item1.xml`.
    pub name: String,
    pub content_type: String,
    #[serde(default)]
    pub relationship: Option<RelationshipDef>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelationshipDef {
    pub source: String,
    #[serde(rename = "type")]
    pub rel_type: String,
}

impl RegistryDocument {
    /// Merge `overlay` on top of `self`; later keys win. Overriding a path
    /// with a different selector is logged at `warn`.
    pub fn layer(mut self, overlay: RegistryDocument) -> Self {
        if !overlay.meta.name.is_empty() {
            self.meta.name = overlay.meta.name;
        }
        if overlay.meta.description.is_some() {
            self.meta.description = overlay.meta.description;
        }
        if overlay.meta.version.is_some() {
            self.meta.version = overlay.meta.version;
        }

        for (key, source) in overlay.paths {
            if let Some(previous) = self.paths.get(&key) {
                if previous.split_whitespace().ne(source.split_whitespace()) {
                    warn!(
                        path = %key,
                        base = %previous,
                        overlay = %source,
                        "registry layer overrides path with a different selector"
                    );
                }
            }
            self.paths.insert(key, source);
        }

        let mut overridden = 0usize;
        overridden += merge(&mut self.namespaces, overlay.namespaces);
        overridden += merge(&mut self.elements, overlay.elements);
        overridden += merge(&mut self.attributes, overlay.attributes);
        overridden += merge(&mut self.identifiers, overlay.identifiers);
        overridden += merge(&mut self.values, overlay.values);
        overridden += merge(&mut self.fragments, overlay.fragments);
        overridden += merge(&mut self.parts, overlay.parts);
        debug!(overridden, "merged registry layer");
        self
    }

    /// Content hash used as the registry's cache identity.
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(format!("{self:?}").as_bytes())
    }
}

fn merge<V>(base: &mut IndexMap<String, V>, overlay: IndexMap<String, V>) -> usize {
    let mut overridden = 0;
    for (key, value) in overlay {
        if base.insert(key, value).is_some() {
            overridden += 1;
        }
    }
    overridden
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(input: &str) -> RegistryDocument {
        toml_edit::de::from_str(input).unwrap()
    }

    #[test]
    fn name_def_forms() {
        let doc = doc(r#"
[elements]
sld = "p:sld"
plain = "plain"
full = { name = "id", ns = "r" }
"#);
        assert_eq!(doc.elements["sld"].parts(), (Some("p"), "sld"));
        assert_eq!(doc.elements["plain"].parts(), (None, "plain"));
        assert_eq!(doc.elements["full"].parts(), (Some("r"), "id"));
    }

    #[test]
    fn layer_is_last_key_wins() {
        let base = doc(r#"
[namespaces]
a = "urn:a"
[paths]
accent = "/theme/@val"
keep = "/theme"
"#);
        let overlay = doc(r#"
[meta]
name = "org"
[paths]
accent = "/theme/clrScheme/@val"
"#);
        let merged = base.clone().layer(overlay);
        assert_eq!(merged.meta.name, "org");
        assert_eq!(merged.paths["accent"], "/theme/clrScheme/@val");
        assert_eq!(merged.paths["keep"], "/theme");
        assert_eq!(merged.namespaces["a"], "urn:a");
        assert_ne!(merged.fingerprint(), base.fingerprint());
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let result: Result<RegistryDocument, _> = toml_edit::de::from_str("[selectors]\n");
        assert!(result.is_err());
    }
}
