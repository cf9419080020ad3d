//! App manifest embedded in `package.json`.
//!
//! The manifest lives under a configurable top-level property of
//! `package.json`. Lookup falls back to [`DEFAULT_MANIFEST_PROPERTY`] and then
//! to the built-in default manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Property name read when the configured one is absent.
pub const DEFAULT_MANIFEST_PROPERTY: &str = "_virtualApp";

/// Engine used when the manifest does not name one.
pub const DEFAULT_ENGINE: &str = "copy";

pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Cannot parse package.json: {0}")]
    Parse(String),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            ManifestError::Parse(_) => "manifestParse",
            ManifestError::Io { .. } => "manifestRead",
        }
    }
}

/// Deployment manifest: router configuration plus build settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub router: Vec<Value>,
    #[serde(default)]
    pub build: BuildSettings,
    /// Any other keys the app declares are kept as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            router: vec![serde_json::json!({ "module": "webpage" })],
            build: BuildSettings::default(),
            extra: serde_json::Map::new(),
        }
    }
}

/// `build` block of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Output directory, relative to the source root.
    pub output: Option<String>,
    /// npm script to run.
    pub script: Option<String>,
    /// Git repository cloned into `themes/` before a hugo build.
    #[serde(alias = "themeUrl")]
    pub theme_repo: Option<String>,
    /// Engine-specific options.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            output: None,
            script: None,
            theme_repo: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl Manifest {
    /// Parse the manifest out of `package.json` contents.
    ///
    /// The configured property is used when it holds an object, then
    /// [`DEFAULT_MANIFEST_PROPERTY`], then the default manifest. Empty input
    /// yields the default manifest. Malformed JSON, or a manifest object with
    /// invalid fields, is a [`ManifestError::Parse`].
    pub fn from_package_json(json: &str, property: &str) -> Result<Self, ManifestError> {
        if json.trim().is_empty() {
            return Ok(Manifest::default());
        }

        let package: Value =
            serde_json::from_str(json).map_err(|e| ManifestError::Parse(e.to_string()))?;

        let section = [property, DEFAULT_MANIFEST_PROPERTY]
            .into_iter()
            .filter_map(|key| package.get(key))
            .find(|value| value.is_object());

        match section {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| ManifestError::Parse(e.to_string())),
            None => Ok(Manifest::default()),
        }
    }

    /// Read `package.json` from `dir`. A missing file yields the default manifest.
    pub fn read_from_dir(dir: &Path, property: &str) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_package_json(&content, property),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(source) => Err(ManifestError::Io { path, source }),
        }
    }

    pub fn engine(&self) -> &str {
        &self.build.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_input_is_default() {
        let manifest = Manifest::from_package_json("", "_virtualApp").unwrap();
        assert_eq!(manifest, Manifest::default());
        assert_eq!(manifest.engine(), "copy");
        assert_eq!(manifest.router, vec![json!({ "module": "webpage" })]);
    }

    #[test]
    fn test_missing_property_is_default() {
        let manifest = Manifest::from_package_json(r#"{"name":"site"}"#, "_virtualApp").unwrap();
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_reads_configured_property() {
        let json = r#"{
            "_virtualApp": { "router": [], "build": { "engine": "npm" } },
            "_aerobatic": { "router": [{ "module": "basic-auth" }], "build": { "engine": "hugo", "themeRepo": "https://example.com/theme.git" } }
        }"#;
        let manifest = Manifest::from_package_json(json, "_aerobatic").unwrap();
        assert_eq!(manifest.engine(), "hugo");
        assert_eq!(
            manifest.build.theme_repo.as_deref(),
            Some("https://example.com/theme.git")
        );
        assert_eq!(manifest.router.len(), 1);
    }

    #[test]
    fn test_falls_back_to_default_property() {
        let json = r#"{ "_virtualApp": { "build": { "engine": "jekyll" } } }"#;
        let manifest = Manifest::from_package_json(json, "_custom").unwrap();
        assert_eq!(manifest.engine(), "jekyll");
    }

    #[test]
    fn test_non_object_property_is_default() {
        for json in [
            r#"{"_virtualApp":"nope"}"#,
            r#"{"_virtualApp":true}"#,
            r#"{"_virtualApp":null}"#,
            r#"{"_virtualApp":[{"build":{"engine":"npm"}}]}"#,
        ] {
            let manifest = Manifest::from_package_json(json, "_virtualApp").unwrap();
            assert_eq!(manifest, Manifest::default(), "{json}");
        }
    }

    #[test]
    fn test_non_object_configured_property_falls_back() {
        let json = r#"{"_custom":true,"_virtualApp":{"build":{"engine":"hugo"}}}"#;
        let manifest = Manifest::from_package_json(json, "_custom").unwrap();
        assert_eq!(manifest.engine(), "hugo");

        let json = r#"{"_custom":"x","_virtualApp":1}"#;
        let manifest = Manifest::from_package_json(json, "_custom").unwrap();
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_invalid_manifest_object_is_parse_error() {
        let json = r#"{"_virtualApp":{"router":"webpage"}}"#;
        let err = Manifest::from_package_json(json, "_virtualApp").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_missing_engine_defaults_to_copy() {
        let json = r#"{ "_virtualApp": { "router": [], "build": { "output": "dist" } } }"#;
        let manifest = Manifest::from_package_json(json, "_virtualApp").unwrap();
        assert_eq!(manifest.engine(), "copy");
        assert_eq!(manifest.build.output.as_deref(), Some("dist"));
    }

    #[test]
    fn test_engine_specific_options_kept() {
        let json = r#"{ "_virtualApp": { "build": { "engine": "npm", "script": "build", "nodeVersion": "20" } } }"#;
        let manifest = Manifest::from_package_json(json, "_virtualApp").unwrap();
        assert_eq!(manifest.build.script.as_deref(), Some("build"));
        assert_eq!(manifest.build.extra.get("nodeVersion"), Some(&json!("20")));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = Manifest::from_package_json("{ not json", "_virtualApp").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
        assert_eq!(err.code(), "manifestParse");
        assert!(err.to_string().starts_with("Cannot parse package.json"));
    }

    #[test]
    fn test_read_from_dir_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::read_from_dir(dir.path(), "_virtualApp").unwrap();
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_read_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "_virtualApp": { "build": { "engine": "wintersmith" } } }"#,
        )
        .unwrap();
        let manifest = Manifest::read_from_dir(dir.path(), "_virtualApp").unwrap();
        assert_eq!(manifest.engine(), "wintersmith");
    }
}
