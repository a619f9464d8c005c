use crate::registry::compile::{compile, CompileError, Registry};
use crate::registry::schema::RegistryDocument;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
pub enum RegistryError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Compile {
        path: Option<PathBuf>,
        source: CompileError,
    },
    NoLayers,
}

impl RegistryError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            RegistryError::Toml { path: None, source } => RegistryError::Toml {
                path: Some(path),
                source,
            },
            RegistryError::Compile { path: None, source } => RegistryError::Compile {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Io { path, source } => {
                write!(f, "failed to read registry from {}: {}", path.display(), source)
            }
            RegistryError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse registry TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse registry TOML: {}", source),
            },
            RegistryError::Compile { path, source } => match path {
                Some(path) => write!(f, "invalid registry ({}):\n{}", path.display(), source),
                None => write!(f, "invalid registry:\n{}", source),
            },
            RegistryError::NoLayers => write!(f, "no registry files given"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io { source, .. } => Some(source),
            RegistryError::Toml { source, .. } => Some(source),
            RegistryError::Compile { source, .. } => Some(source),
            RegistryError::NoLayers => None,
        }
    }
}

pub fn parse_document(input: &str) -> Result<RegistryDocument, RegistryError> {
    toml_edit::de::from_str(input).map_err(|source| RegistryError::Toml { path: None, source })
}

fn read_document(path: &Path) -> Result<RegistryDocument, RegistryError> {
    let contents = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&contents).map_err(|error| error.with_path(path))
}

pub fn load_from_str(input: &str) -> Result<Registry, RegistryError> {
    let document = parse_document(input)?;
    compile(&document).map_err(|source| RegistryError::Compile { path: None, source })
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Registry, RegistryError> {
    let path = path.as_ref();
    let document = read_document(path)?;
    let registry = compile(&document)
        .map_err(|source| RegistryError::Compile { path: None, source })
        .map_err(|error| error.with_path(path))?;
    info!(path = %path.display(), name = %registry.meta().name, "loaded registry");
    Ok(registry)
}

/// Load registry layers in order (base first) and compile the merged result.
///
/// Individual layers may reference symbols defined by earlier layers, so only
/// the merged document is compiled.
pub fn load_layers<P: AsRef<Path>>(paths: &[P]) -> Result<Registry, RegistryError> {
    let mut merged: Option<RegistryDocument> = None;
    for path in paths {
        let layer = read_document(path.as_ref())?;
        merged = Some(match merged {
            Some(base) => base.layer(layer),
            None => layer,
        });
    }
    let merged = merged.ok_or(RegistryError::NoLayers)?;
    let registry = compile(&merged).map_err(|source| {
        let path = paths.last().map(|path| path.as_ref().to_path_buf());
        RegistryError::Compile { path, source }
    })?;
    info!(
        layers = paths.len(),
        name = %registry.meta().name,
        "loaded layered registry"
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASE: &str = r#"
[meta]
name = "base"
version = "1.2.0"

[namespaces]
a = "http://schemas.openxmlformats.org/drawingml/2006/main"

[elements]
theme = "a:theme"
clrScheme = "a:clrScheme"
accent1 = "a:accent1"
srgbClr = "a:srgbClr"

[attributes]
val = "val"

[paths]
accent1ColorAttr = "/theme/clrScheme/accent1/srgbClr/@val"
"#;

    #[test]
    fn load_valid_registry() {
        let registry = load_from_str(BASE).unwrap();
        assert_eq!(registry.meta().name, "base");
        assert!(registry.path("accent1ColorAttr").is_some());
        assert_eq!(
            registry.element("accent1").map(|name| name.local.as_str()),
            Some("accent1")
        );
    }

    #[test]
    fn collects_every_issue() {
        let input = r#"
[namespaces]
a = "urn:a"

[elements]
theme = "a:theme"
shape = "p:sp"

[attributes]
val = "val"

[paths]
broken = "/theme[@val"
missing = "/theme/clrSchem/@val"
"#;
        let err = load_from_str(input).unwrap_err();
        let RegistryError::Compile { source, .. } = err else {
            panic!("expected compile error, got {err:?}");
        };
        let keys: Vec<&str> = source.issues().iter().map(|issue| issue.key()).collect();
        assert_eq!(keys, ["elements.shape", "paths.broken", "paths.missing"]);
    }

    #[test]
    fn layers_resolve_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.toml");
        let overlay = dir.path().join("org.toml");
        fs::write(&base, BASE).unwrap();
        let mut file = fs::File::create(&overlay).unwrap();
        writeln!(
            file,
            r#"
[meta]
name = "org"

[paths]
schemeVal = "//clrScheme//srgbClr/@val"
"#
        )
        .unwrap();

        let registry = load_layers(&[&base, &overlay]).unwrap();
        assert_eq!(registry.meta().name, "org");
        assert_eq!(registry.meta().version.as_deref(), Some("1.2.0"));
        assert!(registry.path("schemeVal").is_some());
        assert!(registry.path("accent1ColorAttr").is_some());
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_from_path("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
