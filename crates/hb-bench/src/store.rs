//! Workspace files: versioned JSON documents holding named objects.

use hb_core::{Error, Result};
use hb_model::Workspace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Format tag stored in every file.
pub const FORMAT: &str = "histbench-workspace";

/// Current document version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    format: String,
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    objects: BTreeMap<String, serde_json::Value>,
}

/// Result of opening a workspace file.
#[derive(Debug)]
pub enum LoadOutcome {
    /// File exists and parsed as a workspace document.
    Present(WorkspaceFile),
    /// No file at the path.
    Absent,
    /// File exists but cannot be used.
    Corrupt(String),
}

/// In-memory view of one workspace file.
#[derive(Debug)]
pub struct WorkspaceFile {
    path: PathBuf,
    doc: Document,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl WorkspaceFile {
    /// Empty document that will be saved at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: Document {
                format: FORMAT.to_string(),
                version: FORMAT_VERSION,
                signature: None,
                objects: BTreeMap::new(),
            },
        }
    }

    /// Open `path`, classifying what is found there.
    pub fn open(path: impl AsRef<Path>) -> LoadOutcome {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Absent,
            Err(e) => return LoadOutcome::Corrupt(format!("cannot read {}: {}", path.display(), e)),
        };
        let doc: Document = match serde_json::from_slice(&bytes) {
            Ok(d) => d,
            Err(e) => return LoadOutcome::Corrupt(format!("{}: {}", path.display(), e)),
        };
        if doc.format != FORMAT {
            return LoadOutcome::Corrupt(format!("{}: unknown format '{}'", path.display(), doc.format));
        }
        if doc.version != FORMAT_VERSION {
            return LoadOutcome::Corrupt(format!(
                "{}: unsupported version {} (expected {})",
                path.display(),
                doc.version,
                FORMAT_VERSION
            ));
        }
        LoadOutcome::Present(Self { path: path.to_path_buf(), doc })
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier of the configuration the content was built from.
    pub fn signature(&self) -> Option<&str> {
        self.doc.signature.as_deref()
    }

    /// Record the build configuration identifier.
    pub fn set_signature(&mut self, signature: impl Into<String>) {
        self.doc.signature = Some(signature.into());
    }

    /// Names of the stored objects.
    pub fn object_names(&self) -> Vec<&str> {
        self.doc.objects.keys().map(String::as_str).collect()
    }

    /// Store `workspace` under `name`, replacing any previous object.
    pub fn write(&mut self, workspace: &Workspace, name: &str) -> Result<()> {
        let value = serde_json::to_value(workspace)?;
        self.doc.objects.insert(name.to_string(), value);
        Ok(())
    }

    /// Read and validate the workspace stored under `name`.
    pub fn read(&self, name: &str) -> Result<Workspace> {
        let value = self.doc.objects.get(name).ok_or_else(|| {
            Error::CacheCorruption(format!("{}: no object '{}'", self.path.display(), name))
        })?;
        let ws: Workspace = serde_json::from_value(value.clone()).map_err(|e| {
            Error::CacheCorruption(format!("{}: object '{}': {}", self.path.display(), name, e))
        })?;
        ws.validate().map_err(|e| {
            Error::CacheCorruption(format!("{}: object '{}': {}", self.path.display(), name, e))
        })?;
        Ok(ws)
    }

    /// Write to a temporary sibling, then rename over the target.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file_name = self.path.file_name().and_then(|s| s.to_str()).unwrap_or("workspace");
        let tmp = self.path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let bytes = serde_json::to_vec(&self.doc)?;
        if let Err(e) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
