use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One failed expectation. Execution continues after it is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub check: String,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: expected {}, got {}", self.check, self.expected, self.actual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Validate,
    Teardown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::Validate => write!(f, "validate"),
            Stage::Teardown => write!(f, "teardown"),
        }
    }
}

/// An error that stopped a stage, as opposed to a recorded mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub unique_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub checks: usize,
    pub mismatches: Vec<Mismatch>,
    pub errors: Vec<StageError>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            unique_id: unique_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            checks: 0,
            mismatches: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.errors.push(StageError {
            stage,
            message: message.into(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub scenarios: Vec<ScenarioReport>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|s| !s.passed())
    }
}
