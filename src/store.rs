use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::identity;

/// Language variant of an uploaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Interpreted,
    Compiled,
}

/// Extension for stored interpreted scripts.
const SCRIPT_EXT: &str = "fn";

/// Outcome of persisting one upload.
#[derive(Debug)]
pub struct SavedArtifact {
    /// Absolute path of the stored source file
    pub path: PathBuf,
    /// Compiled-unit identifier (source file name minus extension);
    /// `None` for interpreted artifacts
    pub unit: Option<String>,
}

/// Filesystem-backed store for uploaded source artifacts, keyed by
/// identity. One artifact per identity and variant; a later save for the
/// same identity replaces the prior artifact.
///
/// Interpreted scripts live at `<root>/<identity>.fn`; compiled sources
/// under `<root>/<identity>/<filename>` so the external tools get a
/// private working directory per identity.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create artifact root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Opens the store under the per-user data directory.
    pub fn at_default_location() -> anyhow::Result<Self> {
        use directories::ProjectDirs;

        let proj_dirs =
            ProjectDirs::from("", "", "funtime").context("unable to find user directory")?;
        Self::new(proj_dirs.data_local_dir().join("artifacts"))
    }

    /// Persists one upload, replacing any prior artifact for the identity.
    ///
    /// The write goes to a temp file in the destination directory and is
    /// renamed into place, so a concurrent load for the same identity
    /// never observes a half-written artifact.
    pub fn save(
        &self,
        identity: &str,
        variant: Variant,
        filename: &str,
        bytes: &[u8],
    ) -> Result<SavedArtifact, HarnessError> {
        if !identity::is_valid(identity) {
            return Err(HarnessError::ingest("invalid identity token"));
        }

        match variant {
            Variant::Interpreted => {
                let path = self.script_path(identity);
                write_atomic(&path, bytes)
                    .map_err(|e| HarnessError::ingest(format!("failed to store artifact: {e}")))?;
                Ok(SavedArtifact { path, unit: None })
            }
            Variant::Compiled => {
                let filename = sanitize_filename(filename)?;
                let dir = self.unit_dir(identity);
                fs::create_dir_all(&dir)
                    .map_err(|e| HarnessError::ingest(format!("failed to create unit dir: {e}")))?;

                let path = dir.join(filename);
                write_atomic(&path, bytes)
                    .map_err(|e| HarnessError::ingest(format!("failed to store artifact: {e}")))?;

                let unit = filename
                    .rsplit_once('.')
                    .map_or(filename, |(stem, _)| stem)
                    .to_string();
                Ok(SavedArtifact {
                    path,
                    unit: Some(unit),
                })
            }
        }
    }

    /// Reads back the interpreted artifact stored for `identity`.
    pub fn read_script(&self, identity: &str) -> Result<String, HarnessError> {
        fs::read_to_string(self.script_path(identity))
            .map_err(|e| HarnessError::load(format!("failed to read stored artifact: {e}")))
    }

    pub fn script_path(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{identity}.{SCRIPT_EXT}"))
    }

    /// Working directory for an identity's compiled unit; external tools
    /// run with this as their current directory.
    pub fn unit_dir(&self, identity: &str) -> PathBuf {
        self.root.join(identity)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp{}", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Upload metadata is client-controlled; the file name must stay a single
/// plain path component.
fn sanitize_filename(filename: &str) -> Result<&str, HarnessError> {
    let bad = filename.is_empty()
        || filename.starts_with('.')
        || filename
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(HarnessError::ingest(format!(
            "unacceptable upload file name {filename:?}"
        )));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;

    fn temp_store(tag: &str) -> ArtifactStore {
        let root = std::env::temp_dir()
            .join("funtime-store-tests")
            .join(format!("{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        ArtifactStore::new(root).unwrap()
    }

    #[test]
    fn saves_and_reads_back_script() {
        let store = temp_store("script");
        let id = identity::issue();

        store
            .save(&id, Variant::Interpreted, "ignored.fn", b"def f(x):\n    return x\n")
            .unwrap();
        let source = store.read_script(&id).unwrap();
        assert!(source.starts_with("def f(x):"));
    }

    #[test]
    fn overwrite_replaces_prior_artifact() {
        let store = temp_store("overwrite");
        let id = identity::issue();

        store.save(&id, Variant::Interpreted, "", b"old").unwrap();
        store.save(&id, Variant::Interpreted, "", b"new").unwrap();
        assert_eq!(store.read_script(&id).unwrap(), "new");
    }

    #[test]
    fn compiled_save_reports_unit_stem() {
        let store = temp_store("unit");
        let id = identity::issue();

        let saved = store
            .save(&id, Variant::Compiled, "Calculator.java", b"class Calculator {}")
            .unwrap();
        assert_eq!(saved.unit.as_deref(), Some("Calculator"));
        assert!(saved.path.ends_with(format!("{id}/Calculator.java")));
    }

    #[test]
    fn rejects_invalid_identity_and_traversal_names() {
        let store = temp_store("reject");
        let id = identity::issue();

        let err = store
            .save("../../etc", Variant::Interpreted, "", b"x")
            .unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Ingest);

        let err = store
            .save(&id, Variant::Compiled, "../evil.java", b"x")
            .unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Ingest);
    }

    #[test]
    fn missing_script_is_a_load_error() {
        let store = temp_store("missing");
        let err = store.read_script(&identity::issue()).unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Load);
    }
}
