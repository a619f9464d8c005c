use crate::path::is_registry_key;
use crate::registry::Registry;
use serde::Deserialize;
use std::fmt;

/// Patch file as written on disk. [`PatchDocument::validate`] turns it into a
/// typed [`PatchFile`].
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct PatchDocument {
    #[serde(default)]
    pub meta: PatchMeta,
    #[serde(default)]
    pub operations: Vec<OperationDef>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PatchMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Semver requirement on the registry's `meta.version`.
    #[serde(default, alias = "registryVersion")]
    pub registry_version: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Set,
    Insert,
    Remove,
    EnsurePath,
    EnsurePart,
    EnsureAttr,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Set => "set",
            OperationKind::Insert => "insert",
            OperationKind::Remove => "remove",
            OperationKind::EnsurePath => "ensurePath",
            OperationKind::EnsurePart => "ensurePart",
            OperationKind::EnsureAttr => "ensureAttr",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Before,
    After,
    Prepend,
    Append,
}

/// One `[[operations]]` record.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OperationDef {
    pub kind: OperationKind,
    #[serde(default, alias = "targetRef")]
    pub target_ref: Option<String>,
    #[serde(default, alias = "anchorRef")]
    pub anchor_ref: Option<String>,
    #[serde(default, alias = "fragmentRef")]
    pub fragment_ref: Option<String>,
    #[serde(default, alias = "partRef")]
    pub part_ref: Option<String>,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub placement: Option<Placement>,
    #[serde(default)]
    pub optional: bool,
}

/// Content inserted by [`PatchOperation::Insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Fragment(String),
    Text(String),
}

/// A validated operation. Every `String` naming a ref is a registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    Set {
        target: String,
        value: String,
    },
    Insert {
        target: String,
        anchor: String,
        payload: Payload,
        placement: Placement,
    },
    Remove {
        target: String,
    },
    EnsurePath {
        target: String,
        anchor: String,
        fragment: String,
        placement: Placement,
    },
    EnsurePart {
        part: String,
        fragment: String,
    },
    EnsureAttr {
        target: String,
        attr: String,
        value: String,
    },
}

impl PatchOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PatchOperation::Set { .. } => OperationKind::Set,
            PatchOperation::Insert { .. } => OperationKind::Insert,
            PatchOperation::Remove { .. } => OperationKind::Remove,
            PatchOperation::EnsurePath { .. } => OperationKind::EnsurePath,
            PatchOperation::EnsurePart { .. } => OperationKind::EnsurePart,
            PatchOperation::EnsureAttr { .. } => OperationKind::EnsureAttr,
        }
    }

    /// Registry keys referenced by this operation, in field order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            PatchOperation::Set { target, .. } | PatchOperation::Remove { target } => {
                vec![target.as_str()]
            }
            PatchOperation::Insert {
                target,
                anchor,
                payload,
                ..
            } => match payload {
                Payload::Fragment(fragment) => vec![target.as_str(), anchor.as_str(), fragment.as_str()],
                Payload::Text(_) => vec![target.as_str(), anchor.as_str()],
            },
            PatchOperation::EnsurePath {
                target,
                anchor,
                fragment,
                ..
            } => vec![target.as_str(), anchor.as_str(), fragment.as_str()],
            PatchOperation::EnsurePart { part, fragment } => vec![part.as_str(), fragment.as_str()],
            PatchOperation::EnsureAttr { target, attr, .. } => vec![target.as_str(), attr.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub op: PatchOperation,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    pub meta: PatchMeta,
    pub operations: Vec<OperationRecord>,
}

impl PatchDocument {
    pub fn validate(&self) -> Result<PatchFile, ValidationError> {
        let mut issues = Vec::new();

        if self.operations.is_empty() {
            issues.push(ValidationIssue::EmptyOperationList);
        }

        if let Some(req) = self.meta.registry_version.as_deref() {
            if !req.trim().is_empty() {
                if let Err(err) = semver::VersionReq::parse(req.trim()) {
                    issues.push(ValidationIssue::InvalidVersionRequirement {
                        value: req.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut operations = Vec::with_capacity(self.operations.len());
        for (index, def) in self.operations.iter().enumerate() {
            let mut check = FieldCheck {
                index,
                kind: def.kind,
                issues: &mut issues,
            };
            if let Some(op) = check.operation(def) {
                operations.push(OperationRecord {
                    op,
                    optional: def.optional,
                });
            }
        }

        if issues.is_empty() {
            Ok(PatchFile {
                meta: self.meta.clone(),
                operations,
            })
        } else {
            Err(ValidationError { issues })
        }
    }
}

struct FieldCheck<'a> {
    index: usize,
    kind: OperationKind,
    issues: &'a mut Vec<ValidationIssue>,
}

impl FieldCheck<'_> {
    fn operation(&mut self, def: &OperationDef) -> Option<PatchOperation> {
        let unused: Vec<(&'static str, bool)> = match def.kind {
            OperationKind::Set => vec![
                ("anchor_ref", def.anchor_ref.is_some()),
                ("fragment_ref", def.fragment_ref.is_some()),
                ("part_ref", def.part_ref.is_some()),
                ("attr", def.attr.is_some()),
                ("placement", def.placement.is_some()),
            ],
            OperationKind::Insert => vec![
                ("part_ref", def.part_ref.is_some()),
                ("attr", def.attr.is_some()),
            ],
            OperationKind::Remove => vec![
                ("anchor_ref", def.anchor_ref.is_some()),
                ("fragment_ref", def.fragment_ref.is_some()),
                ("part_ref", def.part_ref.is_some()),
                ("attr", def.attr.is_some()),
                ("value", def.value.is_some()),
                ("placement", def.placement.is_some()),
            ],
            OperationKind::EnsurePath => vec![
                ("part_ref", def.part_ref.is_some()),
                ("attr", def.attr.is_some()),
                ("value", def.value.is_some()),
            ],
            OperationKind::EnsurePart => vec![
                ("target_ref", def.target_ref.is_some()),
                ("anchor_ref", def.anchor_ref.is_some()),
                ("attr", def.attr.is_some()),
                ("value", def.value.is_some()),
                ("placement", def.placement.is_some()),
            ],
            OperationKind::EnsureAttr => vec![
                ("anchor_ref", def.anchor_ref.is_some()),
                ("fragment_ref", def.fragment_ref.is_some()),
                ("part_ref", def.part_ref.is_some()),
                ("placement", def.placement.is_some()),
            ],
        };
        for (field, present) in unused {
            if present {
                self.issues.push(ValidationIssue::InvalidCombo {
                    index: self.index,
                    kind: self.kind,
                    message: format!("'{field}' is not used by {}", self.kind),
                });
            }
        }

        match def.kind {
            OperationKind::Set => {
                let target = self.reference("target_ref", &def.target_ref);
                let value = self.value(&def.value);
                Some(PatchOperation::Set {
                    target: target?,
                    value: value?,
                })
            }
            OperationKind::Insert => {
                let target = self.reference("target_ref", &def.target_ref);
                let anchor = self.reference("anchor_ref", &def.anchor_ref);
                let placement = self.placement(def.placement);
                let payload = match (&def.fragment_ref, &def.value) {
                    (Some(_), Some(_)) => {
                        self.issues.push(ValidationIssue::InvalidCombo {
                            index: self.index,
                            kind: self.kind,
                            message: "use either 'fragment_ref' or 'value', not both".to_string(),
                        });
                        None
                    }
                    (Some(_), None) => self
                        .reference("fragment_ref", &def.fragment_ref)
                        .map(Payload::Fragment),
                    (None, Some(value)) => Some(Payload::Text(value.clone())),
                    (None, None) => {
                        self.issues.push(ValidationIssue::MissingPayload {
                            index: self.index,
                            kind: self.kind,
                        });
                        None
                    }
                };
                Some(PatchOperation::Insert {
                    target: target?,
                    anchor: anchor?,
                    payload: payload?,
                    placement: placement?,
                })
            }
            OperationKind::Remove => {
                let target = self.reference("target_ref", &def.target_ref);
                Some(PatchOperation::Remove { target: target? })
            }
            OperationKind::EnsurePath => {
                let target = self.reference("target_ref", &def.target_ref);
                let anchor = self.reference("anchor_ref", &def.anchor_ref);
                let fragment = self.reference("fragment_ref", &def.fragment_ref);
                let placement = self.placement(def.placement);
                Some(PatchOperation::EnsurePath {
                    target: target?,
                    anchor: anchor?,
                    fragment: fragment?,
                    placement: placement?,
                })
            }
            OperationKind::EnsurePart => {
                let part = self.reference("part_ref", &def.part_ref);
                let fragment = self.reference("fragment_ref", &def.fragment_ref);
                Some(PatchOperation::EnsurePart {
                    part: part?,
                    fragment: fragment?,
                })
            }
            OperationKind::EnsureAttr => {
                let target = self.reference("target_ref", &def.target_ref);
                let attr = self.reference("attr", &def.attr);
                let value = self.value(&def.value);
                Some(PatchOperation::EnsureAttr {
                    target: target?,
                    attr: attr?,
                    value: value?,
                })
            }
        }
    }

    fn missing(&mut self, field: &'static str) {
        self.issues.push(ValidationIssue::MissingField {
            index: self.index,
            kind: self.kind,
            field,
        });
    }

    fn reference(&mut self, field: &'static str, value: &Option<String>) -> Option<String> {
        let Some(value) = value else {
            self.missing(field);
            return None;
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.missing(field);
            return None;
        }
        if !is_registry_key(trimmed) {
            self.issues.push(ValidationIssue::RawSelector {
                index: self.index,
                kind: self.kind,
                field,
                value: value.clone(),
            });
            return None;
        }
        Some(trimmed.to_string())
    }

    fn value(&mut self, value: &Option<String>) -> Option<String> {
        if value.is_none() {
            self.missing("value");
        }
        value.clone()
    }

    fn placement(&mut self, placement: Option<Placement>) -> Option<Placement> {
        if placement.is_none() {
            self.missing("placement");
        }
        placement
    }
}

impl PatchFile {
    /// Check that every ref names an entry of the right registry table and
    /// that selectors have the shape each operation needs.
    pub fn validate_against(&self, registry: &Registry) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (index, record) in self.operations.iter().enumerate() {
            let kind = record.op.kind();
            let mut check = RefCheck {
                index,
                kind,
                registry,
                issues: &mut issues,
            };
            match &record.op {
                PatchOperation::Set { target, .. } | PatchOperation::Remove { target } => {
                    check.path("target_ref", target, None);
                }
                PatchOperation::Insert {
                    target,
                    anchor,
                    payload,
                    ..
                } => {
                    check.path("target_ref", target, None);
                    check.path("anchor_ref", anchor, Some(false));
                    if let Payload::Fragment(fragment) = payload {
                        check.fragment(fragment);
                    }
                }
                PatchOperation::EnsurePath {
                    target,
                    anchor,
                    fragment,
                    ..
                } => {
                    check.path("target_ref", target, None);
                    check.path("anchor_ref", anchor, Some(false));
                    check.fragment(fragment);
                }
                PatchOperation::EnsurePart { part, fragment } => {
                    if registry.part(part).is_none() {
                        check.unknown("part_ref", part, "parts");
                    }
                    check.fragment(fragment);
                }
                PatchOperation::EnsureAttr { target, attr, .. } => {
                    check.path("target_ref", target, Some(false));
                    if registry.attribute(attr).is_none() {
                        check.unknown("attr", attr, "attributes");
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

struct RefCheck<'a> {
    index: usize,
    kind: OperationKind,
    registry: &'a Registry,
    issues: &'a mut Vec<ValidationIssue>,
}

impl RefCheck<'_> {
    fn unknown(&mut self, field: &'static str, key: &str, table: &'static str) {
        self.issues.push(ValidationIssue::UnknownRef {
            index: self.index,
            kind: self.kind,
            field,
            key: key.to_string(),
            table,
        });
    }

    /// `attribute`: `Some(false)` requires an element selector.
    fn path(&mut self, field: &'static str, key: &str, attribute: Option<bool>) {
        let Some(template) = self.registry.path(key) else {
            self.unknown(field, key, "paths");
            return;
        };
        if attribute == Some(false) && template.ast().selects_attribute() {
            self.issues.push(ValidationIssue::InvalidCombo {
                index: self.index,
                kind: self.kind,
                message: format!("'{field}' path '{key}' must select elements, not attributes"),
            });
        }
    }

    fn fragment(&mut self, key: &str) {
        if self.registry.fragment(key).is_none() {
            self.unknown("fragment_ref", key, "fragments");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
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

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyOperationList,
    InvalidVersionRequirement {
        value: String,
        message: String,
    },
    MissingField {
        index: usize,
        kind: OperationKind,
        field: &'static str,
    },
    /// `insert` without `fragment_ref` or `value`.
    MissingPayload {
        index: usize,
        kind: OperationKind,
    },
    InvalidCombo {
        index: usize,
        kind: OperationKind,
        message: String,
    },
    /// A ref field holds selector text instead of a registry key.
    RawSelector {
        index: usize,
        kind: OperationKind,
        field: &'static str,
        value: String,
    },
    UnknownRef {
        index: usize,
        kind: OperationKind,
        field: &'static str,
        key: String,
        table: &'static str,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyOperationList => write!(f, "patch file contains no operations"),
            ValidationIssue::InvalidVersionRequirement { value, message } => {
                write!(f, "invalid registry_version '{value}': {message}")
            }
            ValidationIssue::MissingField { index, kind, field } => {
                write!(f, "operation #{index} ({kind}) missing required field '{field}'")
            }
            ValidationIssue::MissingPayload { index, kind } => write!(
                f,
                "operation #{index} ({kind}) missing required field 'fragment_ref' or 'value'"
            ),
            ValidationIssue::InvalidCombo {
                index,
                kind,
                message,
            } => write!(f, "operation #{index} ({kind}) is invalid: {message}"),
            ValidationIssue::RawSelector {
                index,
                kind,
                field,
                value,
            } => write!(
                f,
                "operation #{index} ({kind}) field '{field}' must name a registry key, found selector text '{value}'"
            ),
            ValidationIssue::UnknownRef {
                index,
                kind,
                field,
                key,
                table,
            } => write!(
                f,
                "operation #{index} ({kind}) field '{field}': '{key}' is not defined in registry {table}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(input: &str) -> Result<PatchFile, ValidationError> {
        let document: PatchDocument = toml_edit::de::from_str(input).unwrap();
        document.validate()
    }

    #[test]
    fn parses_every_kind() {
        let file = validate(
            r#"
[meta]
name = "brand"
registry_version = ">=1.0"

[[operations]]
kind = "set"
targetRef = "accent1ColorAttr"
value = "{{brand.accent1}}"

[[operations]]
kind = "insert"
target_ref = "titleNote"
anchor_ref = "spTree"
value = "note"
placement = "append"

[[operations]]
kind = "remove"
target_ref = "comments"

[[operations]]
kind = "ensurePath"
target_ref = "footerPlaceholder"
anchor_ref = "spTree"
fragment_ref = "footerShape"
placement = "append"
optional = true

[[operations]]
kind = "ensurePart"
part_ref = "customXml"
fragment_ref = "customXmlBody"

[[operations]]
kind = "ensureAttr"
target_ref = "presentation"
attr = "saveSubsetFonts"
value = "1"
"#,
        )
        .unwrap();

        let kinds: Vec<OperationKind> = file.operations.iter().map(|r| r.op.kind()).collect();
        assert_eq!(
            kinds,
            [
                OperationKind::Set,
                OperationKind::Insert,
                OperationKind::Remove,
                OperationKind::EnsurePath,
                OperationKind::EnsurePart,
                OperationKind::EnsureAttr,
            ]
        );
        assert!(file.operations[3].optional);
        assert_eq!(
            file.operations[1].op,
            PatchOperation::Insert {
                target: "titleNote".to_string(),
                anchor: "spTree".to_string(),
                payload: Payload::Text("note".to_string()),
                placement: Placement::Append,
            }
        );
        assert_eq!(
            file.operations[3].op.keys(),
            ["footerPlaceholder", "spTree", "footerShape"]
        );
    }

    #[test]
    fn raw_selector_in_ref_is_rejected() {
        let err = validate(
            r#"
[[operations]]
kind = "remove"
target_ref = "//p:sp[@id='2']"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.issues.as_slice(),
            [ValidationIssue::RawSelector {
                index: 0,
                field: "target_ref",
                ..
            }]
        ));
    }

    #[test]
    fn issues_are_aggregated() {
        let err = validate(
            r#"
[meta]
registry_version = ">=bad"

[[operations]]
kind = "ensurePath"
target_ref = "footer"

[[operations]]
kind = "set"
target_ref = "accent"
value = "x"
placement = "after"
"#,
        )
        .unwrap_err();
        let rendered = err.to_string();
        assert_eq!(err.issues.len(), 5, "{rendered}");
        assert!(rendered.contains("invalid registry_version"));
        assert!(rendered.contains("operation #0 (ensurePath) missing required field 'anchor_ref'"));
        assert!(rendered.contains("missing required field 'fragment_ref'"));
        assert!(rendered.contains("missing required field 'placement'"));
        assert!(rendered.contains("operation #1 (set) is invalid: 'placement' is not used by set"));
    }

    #[test]
    fn insert_needs_a_payload() {
        let err = validate(
            r#"
[[operations]]
kind = "insert"
target_ref = "titleNote"
anchor_ref = "spTree"
placement = "append"
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.issues,
            [ValidationIssue::MissingPayload {
                index: 0,
                kind: OperationKind::Insert,
            }]
        );
        assert_eq!(
            err.to_string(),
            "operation #0 (insert) missing required field 'fragment_ref' or 'value'"
        );
    }

    #[test]
    fn unused_fields_are_reported() {
        let err = validate(
            r#"
[[operations]]
kind = "remove"
target_ref = "comments"
value = "x"
attr = "id"
"#,
        )
        .unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err.to_string().contains("'attr' is not used by remove"));
        assert!(err.to_string().contains("'value' is not used by remove"));
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = validate("").unwrap_err();
        assert_eq!(err.issues, [ValidationIssue::EmptyOperationList]);
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let result: Result<PatchDocument, _> = toml_edit::de::from_str(
            r#"
[[operations]]
kind = "rewrite"
target_ref = "a"
"#,
        );
        assert!(result.is_err());
    }
}
