//! Connection-scoped execution protocol.
//!
//! Inbound frames are JSON objects `{method: {expected: [args...]}}`.
//! Methods and their expected-value entries run in frame key order, every
//! per-case outcome is accumulated (a bad case never aborts the rest of
//! the batch), and one outbound frame reports the whole batch: the
//! failing entries keyed by method, or the distinct pass marker when
//! nothing failed.

use serde_json::{Value as Json, json};

use crate::error::{CaseOutcome, HarnessError};
use crate::session::{Session, SessionMap};

/// Outbound frame for an all-passing batch. A JSON string, so it can
/// never be mistaken for an (empty) failure map.
pub const PASS_MARKER: &str = "pass";

enum State {
    Unbound,
    Bound(Session),
    Terminal,
}

/// Per-connection state machine: `Unbound -> Bound -> Terminal`.
pub struct Connection {
    identity: String,
    state: State,
}

impl Connection {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            state: State::Unbound,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Unbound -> Bound: rebuilds the surface from the identity's latest
    /// artifact. On failure the connection stays unbound and the caller
    /// is expected to report the diagnostic and drop the connection.
    pub async fn bind(&mut self, sessions: &SessionMap) -> Result<&Session, HarnessError> {
        let session = sessions.bind(&self.identity).await?;
        log::info!(
            "{} bound with {} callable method(s)",
            self.identity,
            session.surface.len()
        );
        self.state = State::Bound(session);
        match &self.state {
            State::Bound(session) => Ok(session),
            _ => unreachable!(),
        }
    }

    /// Processes one inbound frame and returns the outbound frame.
    pub async fn handle_frame(&self, text: &str) -> Json {
        let session = match &self.state {
            State::Bound(session) => session,
            State::Unbound | State::Terminal => {
                return error_frame(&HarnessError::dispatch("no artifact bound"));
            }
        };

        match parse_batch(text) {
            Ok(batch) => run_batch(session, batch).await,
            Err(e) => error_frame(&e),
        }
    }

    /// Bound -> Terminal on connection close.
    pub fn close(&mut self) {
        log::info!("goodbye, {}", self.identity);
        self.state = State::Terminal;
    }
}

/// Whole-session failure frame (bind errors, malformed frames).
pub fn error_frame(error: &HarnessError) -> Json {
    json!({ "error": error })
}

struct TestCase {
    method: String,
    expected: String,
    args: Vec<Json>,
}

/// Validates the frame shape and flattens it into cases in frame key
/// order.
fn parse_batch(text: &str) -> Result<Vec<TestCase>, HarnessError> {
    let frame: serde_json::Map<String, Json> = serde_json::from_str(text)
        .map_err(|e| HarnessError::dispatch(format!("malformed test batch: {e}")))?;

    let mut cases = Vec::new();
    for (method, entries) in frame {
        let entries = entries.as_object().ok_or_else(|| {
            HarnessError::dispatch(format!(
                "cases for {method:?} must be an object of expected values to argument lists"
            ))
        })?;
        for (expected, args) in entries {
            let args = args.as_array().cloned().ok_or_else(|| {
                HarnessError::dispatch(format!(
                    "arguments for {method:?}/{expected:?} must be an array"
                ))
            })?;
            cases.push(TestCase {
                method: method.clone(),
                expected: expected.clone(),
                args,
            });
        }
    }
    Ok(cases)
}

async fn run_batch(session: &Session, cases: Vec<TestCase>) -> Json {
    // Failing entries per method, in first-failure method order; each
    // failing case appends its [expected, actual] pair.
    let mut failures: Vec<(String, Vec<String>)> = Vec::new();

    for case in cases {
        let outcome = run_case(session, &case).await;
        let (expected, actual) = match outcome {
            CaseOutcome::Pass => continue,
            CaseOutcome::Mismatch { expected, actual } => (expected, actual),
            CaseOutcome::Fault(error) => (
                case.expected.clone(),
                format!("error({}): {}", error.stage, error.detail),
            ),
        };

        match failures.iter_mut().find(|(method, _)| *method == case.method) {
            Some((_, pairs)) => pairs.extend([expected, actual]),
            None => failures.push((case.method.clone(), vec![expected, actual])),
        }
    }

    if failures.is_empty() {
        return Json::String(PASS_MARKER.to_string());
    }

    let mut frame = serde_json::Map::new();
    for (method, pairs) in failures {
        frame.insert(method, json!(pairs));
    }
    Json::Object(frame)
}

async fn run_case(session: &Session, case: &TestCase) -> CaseOutcome {
    if !session.surface.contains(&case.method) {
        return CaseOutcome::Fault(HarnessError::dispatch(format!(
            "unknown method {:?}",
            case.method
        )));
    }

    match session.invoke(&case.method, &case.expected, &case.args).await {
        Ok(actual) if actual == case.expected => CaseOutcome::Pass,
        Ok(actual) => CaseOutcome::Mismatch {
            expected: case.expected.clone(),
            actual,
        },
        Err(error) => CaseOutcome::Fault(error),
    }
}
