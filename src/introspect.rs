//! Builds the uniform [`CallableSurface`] from either pipeline: a loaded
//! script module (interpreted) or the analyzer tool's output (compiled).

use crate::error::HarnessError;
use crate::script::Module;
use crate::surface::CallableSurface;

/// Enumerates a loaded module's function definitions in source order.
///
/// Builtins live in the evaluator, not the module, so only
/// artifact-defined callables ever appear here.
pub fn surface_of_module(module: &Module) -> CallableSurface {
    let mut surface = CallableSurface::new();
    for function in module.functions() {
        surface.insert(function.name.clone(), function.params.clone());
    }
    surface
}

/// Parses the analyzer tool's stdout into a surface.
///
/// The contract is a strict JSON array of single-key objects,
/// `[{"add": ["int", "int"]}, ...]`, in declaration order. The output is
/// data and is never evaluated; anything that does not match the schema
/// is rejected as an analyze failure. Synthetic names the toolchain
/// injects (`lambda$0`, `<init>`, ...) are filtered out; duplicate names
/// keep their first position and take the later parameter list.
pub fn surface_from_analysis(raw: &str) -> Result<CallableSurface, HarnessError> {
    let entries: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(raw)
        .map_err(|e| HarnessError::analyze(format!("malformed analyzer output: {e}")))?;

    let mut surface = CallableSurface::new();
    for entry in &entries {
        if entry.len() != 1 {
            return Err(HarnessError::analyze(format!(
                "analyzer entry must have exactly one key, found {}",
                entry.len()
            )));
        }
        let (name, params) = entry.iter().next().unwrap();

        let params = params
            .as_array()
            .and_then(|items| {
                items
                    .iter()
                    .map(|p| p.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| {
                HarnessError::analyze(format!(
                    "parameter list for {name:?} must be an array of strings"
                ))
            })?;

        if !is_plain_identifier(name) {
            log::debug!("filtering synthetic analyzer entry {name:?}");
            continue;
        }
        surface.insert(name.clone(), params);
    }

    Ok(surface)
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::script::parse_module;
    use pretty_assertions::assert_eq;

    #[test]
    fn module_surface_in_source_order() {
        let module =
            parse_module("def add(a, b):\n    return a + b\ndef one():\n    return 1\n").unwrap();
        let surface = surface_of_module(&module);

        let names: Vec<_> = surface.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["add", "one"]);
        assert_eq!(surface.params("add").unwrap(), ["a", "b"]);
        assert_eq!(surface.params("one").unwrap(), Vec::<String>::new().as_slice());
    }

    #[test]
    fn analysis_surface_parses_single_key_entries() {
        let surface = surface_from_analysis(
            r#"[{"add": ["int", "int"]}, {"greet": ["java.lang.String"]}]"#,
        )
        .unwrap();
        assert_eq!(surface.len(), 2);
        assert_eq!(surface.params("greet").unwrap(), ["java.lang.String"]);
    }

    #[test]
    fn analysis_filters_synthetic_names() {
        let surface = surface_from_analysis(
            r#"[{"add": ["int"]}, {"lambda$add$0": ["int"]}, {"<init>": []}]"#,
        )
        .unwrap();
        let names: Vec<_> = surface.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["add"]);
    }

    #[test]
    fn analysis_rejects_schema_violations() {
        for raw in [
            "not json",
            r#"{"add": ["int"]}"#,            // not an array
            r#"[{"a": [], "b": []}]"#,        // two keys in one entry
            r#"[{"add": "int"}]"#,            // params not an array
            r#"[{"add": [1, 2]}]"#,           // params not strings
        ] {
            let err = surface_from_analysis(raw).unwrap_err();
            assert_eq!(err.stage, Stage::Analyze, "accepted {raw:?}");
        }
    }

    #[test]
    fn analysis_duplicate_names_last_wins() {
        let surface =
            surface_from_analysis(r#"[{"add": ["int"]}, {"add": ["long", "long"]}]"#).unwrap();
        assert_eq!(surface.len(), 1);
        assert_eq!(surface.params("add").unwrap(), ["long", "long"]);
    }
}
