//! Static engine registry.

use crate::engine::{
    BuildEngine, CopyEngine, EngineKind, HugoEngine, JekyllEngine, NpmEngine, WintersmithEngine,
};
use crate::error::BuildResult;

static COPY: CopyEngine = CopyEngine;
static NPM: NpmEngine = NpmEngine;
static HUGO: HugoEngine = HugoEngine;
static JEKYLL: JekyllEngine = JekyllEngine;
static WINTERSMITH: WintersmithEngine = WintersmithEngine;

pub fn engine(kind: EngineKind) -> &'static dyn BuildEngine {
    match kind {
        EngineKind::Copy => &COPY,
        EngineKind::Npm => &NPM,
        EngineKind::Hugo => &HUGO,
        EngineKind::Jekyll => &JEKYLL,
        EngineKind::Wintersmith => &WINTERSMITH,
    }
}

/// Look an engine up by its manifest name. Unknown names are
/// `InvalidBuildEngine`.
pub fn lookup(name: &str) -> BuildResult<&'static dyn BuildEngine> {
    Ok(engine(name.parse()?))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    EngineKind::ALL.into_iter().map(EngineKind::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_resolves_to_its_engine() {
        for name in names() {
            assert_eq!(lookup(name).unwrap().kind().as_str(), name);
        }
        assert_eq!(
            names().collect::<Vec<_>>(),
            vec!["copy", "npm", "hugo", "jekyll", "wintersmith"]
        );
    }

    #[test]
    fn unknown_engine() {
        let err = lookup("gulp").err().unwrap();
        assert_eq!(err.code(), "invalidBuildEngine");
        assert_eq!(err.to_string(), "Invalid build engine gulp");
    }
}
