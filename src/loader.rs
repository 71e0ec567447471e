//! Dynamic loader for the interpreted pipeline.

use crate::error::HarnessError;
use crate::script::{Module, parse_module};
use crate::store::ArtifactStore;

/// Loads the interpreted artifact stored under `identity` as an executable
/// module.
///
/// Syntax errors in the uploaded artifact are a load failure reported to
/// the caller; nothing here can take the harness process down.
pub fn load(store: &ArtifactStore, identity: &str) -> Result<Module, HarnessError> {
    let source = store.read_script(identity)?;
    parse_module(&source).map_err(|e| HarnessError::load(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::identity;
    use crate::store::Variant;

    fn temp_store(tag: &str) -> ArtifactStore {
        let root = std::env::temp_dir()
            .join("funtime-loader-tests")
            .join(format!("{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        ArtifactStore::new(root).unwrap()
    }

    #[test]
    fn loads_stored_module() {
        let store = temp_store("ok");
        let id = identity::issue();
        store
            .save(&id, Variant::Interpreted, "", b"def add(a, b):\n    return a + b\n")
            .unwrap();

        let module = load(&store, &id).unwrap();
        assert!(module.get("add").is_some());
    }

    #[test]
    fn syntax_error_becomes_load_error() {
        let store = temp_store("syntax");
        let id = identity::issue();
        store
            .save(&id, Variant::Interpreted, "", b"def broken(:\n    return 1\n")
            .unwrap();

        let err = load(&store, &id).unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        assert!(err.detail.contains("line 1"));
    }

    #[test]
    fn missing_artifact_becomes_load_error() {
        let store = temp_store("absent");
        let err = load(&store, &identity::issue()).unwrap_err();
        assert_eq!(err.stage, Stage::Load);
    }
}
