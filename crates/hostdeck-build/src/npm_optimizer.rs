//! Prefer local npm tarballs over registry downloads.
//!
//! A tarball directory holds files named `<module>-<version>.tgz`. Any
//! dependency whose range the local version satisfies is rewritten to the
//! tarball path before `npm install` runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};

const SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

#[derive(Debug, Clone, Default)]
pub struct LocalTarballs {
    dir: PathBuf,
    modules: HashMap<String, Version>,
}

/// Split `grunt-0.4.5.tgz` into `("grunt", 0.4.5)`.
fn parse_file_name(file_name: &str) -> Option<(String, Version)> {
    let stem = file_name.strip_suffix(".tgz")?;
    let (name, version) = stem.rsplit_once('-')?;
    if name.is_empty() {
        return None;
    }
    let version = Version::parse(version).ok()?;
    Some((name.to_string(), version))
}

impl LocalTarballs {
    pub fn load(dir: &Path) -> BuildResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))?;
        let mut modules = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| BuildError::io(dir, e))?;
            let file_name = entry.file_name();
            match parse_file_name(&file_name.to_string_lossy()) {
                Some((name, version)) => {
                    modules.insert(name, version);
                }
                None => debug!(file = %file_name.to_string_lossy(), "ignoring non-tarball file"),
            }
        }
        debug!(dir = %dir.display(), count = modules.len(), "loaded local npm tarballs");
        Ok(Self {
            dir: dir.to_path_buf(),
            modules,
        })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn tarball_path(&self, name: &str, version: &Version) -> PathBuf {
        self.dir.join(format!("{name}-{version}.tgz"))
    }

    /// Rewrite satisfiable dependencies of a parsed `package.json` in place.
    /// Returns the number of rewritten entries.
    pub fn optimize(&self, package: &mut Value) -> usize {
        let mut rewritten = 0;
        for section in SECTIONS {
            let Some(deps) = package.get_mut(section).and_then(Value::as_object_mut) else {
                continue;
            };
            for (name, range) in deps.iter_mut() {
                let Some(local) = self.modules.get(name) else {
                    continue;
                };
                let satisfied = range
                    .as_str()
                    .and_then(|r| VersionReq::parse(r).ok())
                    .is_some_and(|req| req.matches(local));
                if satisfied {
                    info!(module = %name, version = %local, "using local tarball");
                    let path = self.tarball_path(name, local);
                    *range = Value::String(path.to_string_lossy().into_owned());
                    rewritten += 1;
                }
            }
        }
        rewritten
    }
}
