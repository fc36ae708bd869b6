//! `nwnsc.toml` project manifest.
//!
//! Parallels how a build-tool manifest is normally handled: a thin serde
//! struct with `#[serde(default)]` fields, loaded from a fixed file name
//! in a project directory and turned into [`crate::compile::CompileOptions`]
//! by the CLI driver.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub package: Package,
    #[serde(default)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub include_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_version")]
    pub compiler_version: String,
    #[serde(default = "default_true")]
    pub optimize: bool,
    #[serde(default)]
    pub ignore_includes: bool,
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    #[serde(default = "default_error_prefix")]
    pub error_prefix: String,
    #[serde(default)]
    pub defines: Vec<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            compiler_version: default_version(),
            optimize: default_true(),
            ignore_includes: false,
            max_errors: default_max_errors(),
            error_prefix: default_error_prefix(),
            defines: Vec::new(),
        }
    }
}

fn default_entry() -> String {
    "main.nss".to_string()
}

fn default_version() -> String {
    "1.74".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_errors() -> usize {
    100
}

fn default_error_prefix() -> String {
    "Error".to_string()
}

#[derive(Debug)]
pub enum ManifestError {
    Io(PathBuf, String),
    Parse(PathBuf, String),
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Io(path, e) => write!(f, "failed to read {}: {}", path.display(), e),
            ManifestError::Parse(path, e) => write!(f, "failed to parse {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ManifestError {}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Io(path.to_path_buf(), e.to_string()))?;
        toml::from_str(&content).map_err(|e| ManifestError::Parse(path.to_path_buf(), e.to_string()))
    }

    pub fn new(name: &str) -> Self {
        Manifest {
            package: Package {
                name: name.to_string(),
                entry: default_entry(),
                include_paths: Vec::new(),
            },
            build: BuildSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_manifest() {
        let toml = r#"
[package]
name = "mymod"
"#;
        let manifest: Manifest = toml::from_str(toml).expect("should parse minimal manifest");
        assert_eq!(manifest.package.name, "mymod");
        assert_eq!(manifest.package.entry, "main.nss");
        assert_eq!(manifest.build.max_errors, 100);
        assert!(manifest.build.optimize);
    }

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
[package]
name = "mymod"
entry = "src/mymod.nss"
include_paths = ["include"]

[build]
compiler_version = "1.69"
optimize = false
ignore_includes = true
max_errors = 10
error_prefix = "ERROR"
defines = ["DEBUG"]
"#;
        let manifest: Manifest = toml::from_str(toml).expect("should parse full manifest");
        assert_eq!(manifest.package.entry, "src/mymod.nss");
        assert_eq!(manifest.package.include_paths, vec!["include".to_string()]);
        assert!(!manifest.build.optimize);
        assert!(manifest.build.ignore_includes);
        assert_eq!(manifest.build.max_errors, 10);
        assert_eq!(manifest.build.defines, vec!["DEBUG".to_string()]);
    }
}
