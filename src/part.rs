//! Part Manager interface.
//!
//! The engine never touches the package container directly. `ensurePart`
//! asks a [`PartManager`] whether a part exists and, if not, hands it the new
//! part body together with the content type and relationship to register.

use crate::tree::{read_from_path, write_to_path, DocumentTree};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Compiled `parts.<key>` registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSpec {
    pub key: String,
    /// Absolute part name inside the package, e.g. `/customXml/item1.xml`.
    pub part_name: String,
    pub content_type: String,
    pub relationship: Option<RelationshipSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipSpec {
    /// Part (or `/` for the package) the relationship is recorded on.
    pub source: String,
    pub rel_type: String,
}

/// Handle returned for a newly created part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHandle {
    pub part_name: String,
    pub relationship_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    #[error("part already exists: {0}")]
    AlreadyExists(String),

    #[error("relationship source part not found: {0}")]
    MissingSource(String),

    #[error("package rejected part {part}: {reason}")]
    Rejected { part: String, reason: String },
}

pub trait PartManager {
    fn part_exists(&self, part_name: &str) -> bool;

    fn create_part(&mut self, spec: &PartSpec, body: DocumentTree) -> Result<PartHandle, PartError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

/// Content type overrides and relationships recorded for created parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    content_types: BTreeMap<String, String>,
    relationships: BTreeMap<String, Vec<Relationship>>,
}

impl PackageMetadata {
    pub fn content_type(&self, part_name: &str) -> Option<&str> {
        self.content_types.get(part_name).map(String::as_str)
    }

    pub fn content_types(&self) -> impl Iterator<Item = (&str, &str)> {
        self.content_types
            .iter()
            .map(|(part, content_type)| (part.as_str(), content_type.as_str()))
    }

    pub fn relationships(&self, source: &str) -> &[Relationship] {
        self.relationships
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Record a relationship that already exists on `source`. Ids already
    /// present are ignored.
    pub fn add_relationship(&mut self, source: &str, relationship: Relationship) {
        let existing = self.relationships.entry(source.to_string()).or_default();
        if !existing.iter().any(|rel| rel.id == relationship.id) {
            existing.push(relationship);
        }
    }

    /// Record `spec`; returns the relationship id allocated on its source.
    fn register(&mut self, spec: &PartSpec) -> Option<String> {
        self.content_types
            .insert(spec.part_name.clone(), spec.content_type.clone());
        let rel = spec.relationship.as_ref()?;
        let next = self
            .relationships(&rel.source)
            .iter()
            .filter_map(|rel| rel.id.strip_prefix("rId")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("rId{next}");
        self.relationships
            .entry(rel.source.clone())
            .or_default()
            .push(Relationship {
                id: id.clone(),
                rel_type: rel.rel_type.clone(),
                target: spec.part_name.clone(),
            });
        Some(id)
    }
}

/// Name of the `.rels` part holding the relationships recorded on `source`.
///
/// ```
/// use ooxml_patcher::part::relationships_part_name;
///
/// assert_eq!(relationships_part_name("/"), "/_rels/.rels");
/// assert_eq!(
///     relationships_part_name("/ppt/presentation.xml"),
///     "/ppt/_rels/presentation.xml.rels"
/// );
/// ```
pub fn relationships_part_name(source: &str) -> String {
    if source == "/" {
        return "/_rels/.rels".to_string();
    }
    match source.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("/_rels/{source}.rels"),
    }
}

/// `Relationship` children of a parsed `.rels` part. Entries without an `Id`
/// are dropped.
pub fn parse_relationships(rels: &DocumentTree) -> Vec<Relationship> {
    let Some(root) = rels.root_element() else {
        return Vec::new();
    };
    rels.child_elements(root)
        .filter_map(|id| rels.element(id))
        .filter(|element| element.name.local == "Relationship")
        .filter_map(|element| {
            Some(Relationship {
                id: element.attribute("Id", None)?.to_string(),
                rel_type: element.attribute("Type", None).unwrap_or_default().to_string(),
                target: element.attribute("Target", None).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

fn check_source(spec: &PartSpec, exists: impl Fn(&str) -> bool) -> Result<(), PartError> {
    match &spec.relationship {
        Some(rel) if rel.source != "/" && !exists(&rel.source) => {
            Err(PartError::MissingSource(rel.source.clone()))
        }
        _ => Ok(()),
    }
}

/// In-memory package: parts, content type overrides and relationships.
#[derive(Debug, Clone, Default)]
pub struct MemoryPackage {
    parts: BTreeMap<String, DocumentTree>,
    metadata: PackageMetadata,
}

impl MemoryPackage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed relationships the package already records on `source`, so new
    /// ids continue after them.
    pub fn with_relationships(
        mut self,
        source: &str,
        relationships: impl IntoIterator<Item = Relationship>,
    ) -> Self {
        for relationship in relationships {
            self.metadata.add_relationship(source, relationship);
        }
        self
    }

    pub fn insert_part(&mut self, part_name: impl Into<String>, body: DocumentTree) {
        self.parts.insert(part_name.into(), body);
    }

    pub fn part(&self, part_name: &str) -> Option<&DocumentTree> {
        self.parts.get(part_name)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn content_type(&self, part_name: &str) -> Option<&str> {
        self.metadata.content_type(part_name)
    }

    pub fn relationships(&self, source: &str) -> &[Relationship] {
        self.metadata.relationships(source)
    }
}

impl PartManager for MemoryPackage {
    fn part_exists(&self, part_name: &str) -> bool {
        self.parts.contains_key(part_name)
    }

    fn create_part(&mut self, spec: &PartSpec, body: DocumentTree) -> Result<PartHandle, PartError> {
        if self.part_exists(&spec.part_name) {
            return Err(PartError::AlreadyExists(spec.part_name.clone()));
        }
        check_source(spec, |name| self.part_exists(name))?;

        let relationship_id = self.metadata.register(spec);
        self.parts.insert(spec.part_name.clone(), body);
        debug!(part = %spec.part_name, content_type = %spec.content_type, "created part");

        Ok(PartHandle {
            part_name: spec.part_name.clone(),
            relationship_id,
        })
    }
}

/// Parts stored as files under an extracted package directory. New parts
/// are written atomically. Existing relationships are read from the source's
/// `_rels/*.rels` part before an id is allocated on it. Metadata for created
/// parts is only recorded: `[Content_Types].xml` and `.rels` belong to the
/// packaging layer.
#[derive(Debug, Clone)]
pub struct DirectoryPackage {
    root: PathBuf,
    dry_run: bool,
    created: Vec<String>,
    seeded: BTreeSet<String>,
    metadata: PackageMetadata,
}

impl DirectoryPackage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            created: Vec::new(),
            seeded: BTreeSet::new(),
            metadata: PackageMetadata::default(),
        }
    }

    /// Record created parts without writing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn path_of(&self, part_name: &str) -> PathBuf {
        self.root.join(part_name.trim_start_matches('/'))
    }

    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    fn seed_relationships(&mut self, spec: &PartSpec) -> Result<(), PartError> {
        let Some(rel) = &spec.relationship else {
            return Ok(());
        };
        if !self.seeded.insert(rel.source.clone()) {
            return Ok(());
        }
        let path = self.path_of(&relationships_part_name(&rel.source));
        if !path.is_file() {
            return Ok(());
        }
        let rels = read_from_path(&path).map_err(|err| PartError::Rejected {
            part: spec.part_name.clone(),
            reason: err.to_string(),
        })?;
        let existing = parse_relationships(&rels);
        debug!(source = %rel.source, count = existing.len(), "read existing relationships");
        for relationship in existing {
            self.metadata.add_relationship(&rel.source, relationship);
        }
        Ok(())
    }
}

impl PartManager for DirectoryPackage {
    fn part_exists(&self, part_name: &str) -> bool {
        self.created.iter().any(|name| name == part_name) || self.path_of(part_name).is_file()
    }

    fn create_part(&mut self, spec: &PartSpec, body: DocumentTree) -> Result<PartHandle, PartError> {
        if self.part_exists(&spec.part_name) {
            return Err(PartError::AlreadyExists(spec.part_name.clone()));
        }
        check_source(spec, |name| self.part_exists(name))?;
        self.seed_relationships(spec)?;

        if !self.dry_run {
            let path = self.path_of(&spec.part_name);
            let rejected = |reason: String| PartError::Rejected {
                part: spec.part_name.clone(),
                reason,
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| rejected(err.to_string()))?;
            }
            write_to_path(&body, &path).map_err(|err| rejected(err.to_string()))?;
        }

        let relationship_id = self.metadata.register(spec);
        self.created.push(spec.part_name.clone());
        debug!(part = %spec.part_name, dry_run = self.dry_run, "created part file");

        Ok(PartHandle {
            part_name: spec.part_name.clone(),
            relationship_id,
        })
    }
}
