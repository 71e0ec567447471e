use serde::{Deserialize, Serialize};

/// Pipeline stage at which a failure occurred.
///
/// Compile/load/analyze failures abort the binding step and surface once
/// per session; dispatch/invoke failures are scoped to a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Compile,
    Load,
    Analyze,
    Dispatch,
    Invoke,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Compile => "compile",
            Stage::Load => "load",
            Stage::Analyze => "analyze",
            Stage::Dispatch => "dispatch",
            Stage::Invoke => "invoke",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{stage} error: {detail}")]
pub struct HarnessError {
    pub stage: Stage,
    pub detail: String,
}

impl HarnessError {
    pub fn new(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }

    pub fn ingest(detail: impl Into<String>) -> Self {
        Self::new(Stage::Ingest, detail)
    }

    pub fn compile(detail: impl Into<String>) -> Self {
        Self::new(Stage::Compile, detail)
    }

    pub fn load(detail: impl Into<String>) -> Self {
        Self::new(Stage::Load, detail)
    }

    pub fn analyze(detail: impl Into<String>) -> Self {
        Self::new(Stage::Analyze, detail)
    }

    pub fn dispatch(detail: impl Into<String>) -> Self {
        Self::new(Stage::Dispatch, detail)
    }

    pub fn invoke(detail: impl Into<String>) -> Self {
        Self::new(Stage::Invoke, detail)
    }
}

/// Outcome of a single test case. `Mismatch` is a test verdict, not a
/// harness failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Pass,
    Mismatch { expected: String, actual: String },
    Fault(HarnessError),
}
