//! Workspace cache keyed by build configuration.

use crate::store::{LoadOutcome, WorkspaceFile};
use hb_core::Result;
use hb_model::workspace::WORKSPACE_NAME;
use hb_model::{BuildSpec, Workspace};
use std::path::{Path, PathBuf};

/// Identifies one cached workspace: the build spec it comes from and the file it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    spec: BuildSpec,
    file_name: String,
}

impl CacheKey {
    /// Key for `spec` stored in `file_name`.
    pub fn new(spec: BuildSpec, file_name: impl Into<String>) -> Self {
        Self { spec, file_name: file_name.into() }
    }

    /// Key named after two sweep axes: `workspace<axis1><axis2>.root`.
    pub fn with_axes(spec: BuildSpec, axis1: usize, axis2: usize) -> Self {
        Self::new(spec, format!("workspace{}{}.root", axis1, axis2))
    }

    /// Key whose file name is derived from the build spec alone.
    pub fn from_spec(spec: BuildSpec) -> Self {
        let mut name = format!("workspace_c{}_b{}_n{}", spec.channels, spec.bins, spec.nuisances);
        if !spec.stat_errors {
            name.push_str("_nostat");
        }
        if !spec.crosstalk {
            name.push_str("_local");
        }
        name.push_str(".root");
        Self::new(spec, name)
    }

    /// The reference single-channel model in `workspace.root`.
    pub fn reference() -> Self {
        Self::new(BuildSpec::reference(), "workspace.root")
    }

    /// Build spec.
    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }

    /// Storage file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Signature stored with the entry and compared on load.
    pub fn signature(&self) -> String {
        self.spec.signature()
    }
}

/// Tri-state cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Usable workspace found.
    Present(Workspace),
    /// Nothing stored under the key.
    Absent,
    /// Something stored but unusable.
    Corrupt(String),
}

/// Directory of persisted workspaces.
///
/// No cross-process coordination: two concurrent `load_or_build` calls on the
/// same key can both miss and both rebuild; the last rename wins. Both
/// results are equivalent.
#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    /// Cache rooted at `dir` (created on first store).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Classify what is stored under `key`.
    ///
    /// A stored signature that differs from the key's counts as corrupt.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let file = match WorkspaceFile::open(self.path_for(key)) {
            LoadOutcome::Present(f) => f,
            LoadOutcome::Absent => return Lookup::Absent,
            LoadOutcome::Corrupt(reason) => return Lookup::Corrupt(reason),
        };
        let expected = key.signature();
        if file.signature() != Some(expected.as_str()) {
            return Lookup::Corrupt(format!(
                "{}: signature {:?} does not match {}",
                file.path().display(),
                file.signature(),
                expected
            ));
        }
        match file.read(WORKSPACE_NAME) {
            Ok(ws) => Lookup::Present(ws),
            Err(e) => Lookup::Corrupt(e.to_string()),
        }
    }

    /// Persist `workspace` under `key`.
    pub fn store(&self, key: &CacheKey, workspace: &Workspace) -> Result<()> {
        let mut file = WorkspaceFile::create(self.path_for(key));
        file.set_signature(key.signature());
        file.write(workspace, WORKSPACE_NAME)?;
        file.save()
    }

    /// Cached workspace for `key`, building and persisting it on a miss.
    ///
    /// Corrupt entries are treated as misses. `builder` runs at most once;
    /// its error is returned unchanged. A failure to persist is logged and
    /// the freshly built workspace is still returned.
    pub fn load_or_build<F>(&self, key: &CacheKey, builder: F) -> Result<Workspace>
    where
        F: FnOnce() -> Result<Workspace>,
    {
        match self.lookup(key) {
            Lookup::Present(ws) => {
                log::debug!("cache hit: {}", self.path_for(key).display());
                return Ok(ws);
            }
            Lookup::Absent => {
                log::info!("cache miss: building {}", key.file_name());
            }
            Lookup::Corrupt(reason) => {
                log::warn!("rebuilding {}: {}", key.file_name(), reason);
            }
        }

        let workspace = builder()?;
        if let Err(e) = self.store(key, &workspace) {
            log::warn!("cannot persist {}: {}", self.path_for(key).display(), e);
        }
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_names() {
        assert_eq!(CacheKey::reference().file_name(), "workspace.root");
        let spec = BuildSpec::new(3, 30, 3);
        assert_eq!(CacheKey::with_axes(spec, 3, 2).file_name(), "workspace32.root");
        assert_eq!(CacheKey::from_spec(spec).file_name(), "workspace_c3_b30_n3.root");
        assert_eq!(
            CacheKey::from_spec(BuildSpec::reference()).file_name(),
            "workspace_c1_b10_n0_nostat.root"
        );
    }

    #[test]
    fn test_identical_keys_share_signature() {
        let a = CacheKey::with_axes(BuildSpec::new(2, 30, 3), 2, 1);
        let b = CacheKey::with_axes(BuildSpec::new(2, 30, 3), 2, 1);
        assert_eq!(a, b);
        assert_eq!(a.signature(), b.signature());
    }
}
