//! Mapping raw archive paths to deploy paths.
//!
//! Resolution is pure: the same raw path and filter always give the same
//! answer.

use hostdeck_core::manifest::MANIFEST_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entry is the top-level directory itself, or an empty path.
    TopLevel,
    /// The path climbs above the archive root.
    Escapes,
    OutsideDeployDirectory,
    DeniedExtension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Deploy(String),
    Skip(SkipReason),
}

/// Lexically normalize a slash-separated relative path: `.` and empty
/// segments vanish, `..` pops. `None` when `..` climbs above the start.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Trim leading/trailing slashes from a deploy directory. Empty or `/`
/// means "no deploy directory".
pub fn normalize_deploy_directory(dir: &str) -> Option<String> {
    normalize(dir).filter(|d| !d.is_empty())
}

/// Path with its first component removed, or `None` when nothing remains.
pub fn strip_top_level(raw: &str) -> Option<&str> {
    let (_, rest) = raw.split_once('/')?;
    (!rest.is_empty()).then_some(rest)
}

fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    (!stem.is_empty()).then_some(ext)
}

#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    deploy_directory: Option<String>,
    denied_extensions: Vec<String>,
}

impl PathFilter {
    pub fn new(deploy_directory: Option<&str>, denied_extensions: &[String]) -> Self {
        Self {
            deploy_directory: deploy_directory.and_then(normalize_deploy_directory),
            denied_extensions: denied_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn deploy_directory(&self) -> Option<&str> {
        self.deploy_directory.as_deref()
    }

    pub fn is_denied(&self, path: &str) -> bool {
        extension(path).is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            self.denied_extensions.iter().any(|d| *d == ext)
        })
    }

    /// Resolve a raw archive path (with its top-level directory).
    pub fn resolve(&self, raw: &str) -> Resolution {
        let Some(stripped) = strip_top_level(raw) else {
            return Resolution::Skip(SkipReason::TopLevel);
        };
        self.resolve_relative(stripped)
    }

    /// Resolve a path already relative to the source root.
    pub fn resolve_relative(&self, path: &str) -> Resolution {
        let Some(path) = normalize(path) else {
            return Resolution::Skip(SkipReason::Escapes);
        };
        if path.is_empty() {
            return Resolution::Skip(SkipReason::TopLevel);
        }
        if path == MANIFEST_FILE {
            return Resolution::Deploy(path);
        }

        let relative = match &self.deploy_directory {
            Some(dir) => match path.strip_prefix(dir.as_str()).and_then(|r| r.strip_prefix('/')) {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                _ => return Resolution::Skip(SkipReason::OutsideDeployDirectory),
            },
            None => path,
        };

        if self.is_denied(&relative) {
            return Resolution::Skip(SkipReason::DeniedExtension);
        }
        Resolution::Deploy(relative)
    }
}
