use crate::patch::schema::{PatchDocument, PatchFile, ValidationError};
use crate::registry::Registry;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read patch file {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch file TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch file TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch file ({}):\n{}", path.display(), source),
                None => write!(f, "invalid patch file:\n{}", source),
            },
            ConfigError::Walk { path, source } => {
                write!(f, "failed to list patch files in {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Walk { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchFile, ConfigError> {
    let document: PatchDocument = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    document
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchFile, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load a patch file and check every ref against `registry`.
pub fn load_for_registry(
    path: impl AsRef<Path>,
    registry: &Registry,
) -> Result<PatchFile, ConfigError> {
    let path = path.as_ref();
    let patch = load_from_path(path)?;
    patch
        .validate_against(registry)
        .map_err(|source| ConfigError::Validation {
            path: Some(path.to_path_buf()),
            source,
        })?;
    Ok(patch)
}

/// A single `.toml` file, or every `.toml` file directly inside a directory,
/// sorted by path.
pub fn discover(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1) {
        let entry = entry.map_err(|source| ConfigError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_sorts_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20-footer.toml", "10-theme.toml", "notes.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/30-ignored.toml"), "").unwrap();

        let files = discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, ["10-theme.toml", "20-footer.toml"]);
    }

    #[test]
    fn errors_carry_the_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.toml");
        fs::write(&file, "[[operations]]\nkind = \"remove\"\n").unwrap();

        let err = load_from_path(&file).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { path: Some(_), .. }));
        let message = err.to_string();
        assert!(message.contains("bad.toml"));
        assert!(message.contains("missing required field 'target_ref'"));
    }
}
