//! Scripted replays against in-memory collaborators
//!
//! A scenario file declares worksheets, polygon geometry and users, then a
//! list of workflow steps executed in order on behalf of named users. Work
//! sessions opened by a `start` step can be given a label and referred to later
//! as `@label`, since their keys are only known once the step has run.
//!
//! ```json
//! {
//!   "worksheets": [{"id": 1, "operations": [{"code": "OP1", "area_ha": 2.0}], "polygon_ids": [10]}],
//!   "polygons": {"10": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}},
//!   "users": [{"username": "rep", "role": "PRBO", "organization": "acme"}],
//!   "steps": [{"as": "rep", "op": "create", "worksheet": 1}],
//!   "export": [1]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ForestExecConfig;
use crate::errors::WorkflowError;
use crate::external::{
    Caller, InMemoryWorksheets, MemoryNotificationSink, StaticIdentityProvider, WorkflowEvent, WorksheetPlan,
};
use crate::geodesy::Geometry;
use crate::model::{ActivityKey, KeyParseError, OperationKey, ParcelKey, PolygonId, SheetKey, WorksheetId};
use crate::observability::{OperationTimer, WorkflowMetrics, WorkflowStats};
use crate::store::MemoryStore;
use crate::workflows::{ActivityInfo, Coordinator, SheetExport, WorkflowOp, WorkflowOutcome};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("step {step}: {source}")]
    InvalidKey {
        step: usize,
        #[source]
        source: KeyParseError,
    },
    #[error("step {step}: no activity labelled '{label}'")]
    UnknownLabel { step: usize, label: String },
    #[error("step {step} ({op}) failed: {source}")]
    StepFailed {
        step: usize,
        op: &'static str,
        #[source]
        source: WorkflowError,
    },
    #[error("step {step} ({op}): expected {expected}, got {got}")]
    ExpectationNotMet {
        step: usize,
        op: &'static str,
        expected: String,
        got: String,
    },
    #[error("export of worksheet {worksheet} failed: {source}")]
    ExportFailed {
        worksheet: WorksheetId,
        #[source]
        source: WorkflowError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub worksheets: Vec<WorksheetPlan>,
    #[serde(default)]
    pub polygons: HashMap<PolygonId, Geometry>,
    #[serde(default)]
    pub users: Vec<Caller>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Worksheets whose execution sheet is exported after the last step.
    #[serde(default)]
    pub export: Vec<WorksheetId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Credential the step runs under.
    #[serde(rename = "as")]
    pub credential: String,
    #[serde(flatten)]
    pub action: StepAction,
    /// Error kind the step must fail with, e.g. `"invalid_state"`.
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepAction {
    Create {
        worksheet: WorksheetId,
    },
    Assign {
        parcel: String,
        operator: String,
    },
    Start {
        parcel: String,
        #[serde(default)]
        label: Option<String>,
    },
    Stop {
        activity: String,
        #[serde(default)]
        finished: bool,
    },
    RecordInfo {
        activity: String,
        info: ActivityInfo,
    },
    EditOperation {
        operation: String,
        observation: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    pub credential: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WorkflowOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub events: Vec<WorkflowEvent>,
    pub exports: Vec<SheetExport>,
    pub stats: WorkflowStats,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Replays the steps on a fresh in-memory store.
    ///
    /// A step that fails without an `expect_error`, or whose failure differs
    /// from the expected kind, stops the run.
    pub async fn run(&self, config: &ForestExecConfig) -> Result<ScenarioReport, ScenarioError> {
        let mut catalog = InMemoryWorksheets::new();
        for plan in &self.worksheets {
            catalog = catalog.with_worksheet(plan.clone());
        }
        for (id, geometry) in &self.polygons {
            catalog = catalog.with_polygon(*id, geometry.clone());
        }
        let catalog = Arc::new(catalog);

        let mut identity = StaticIdentityProvider::new();
        for user in &self.users {
            identity = identity.with_user(user.clone());
        }

        let sink = Arc::new(MemoryNotificationSink::new());
        let metrics = Arc::new(WorkflowMetrics::new());
        let coordinator = Coordinator::from_config(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(identity),
            catalog.clone(),
            catalog,
        )
        .with_notifications(sink.clone())
        .with_metrics(metrics.clone());

        let mut labels: HashMap<String, ActivityKey> = HashMap::new();
        let mut reports = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            let op = step.to_op(number, &labels)?;
            let name = op.name();

            let timer = OperationTimer::new(name);
            let result = coordinator.execute(&step.credential, op).await;
            timer.finish();

            let report = match (result, &step.expect_error) {
                (Ok(outcome), None) => {
                    if let (StepAction::Start { label: Some(label), .. }, WorkflowOutcome::Started(activity)) =
                        (&step.action, &outcome)
                    {
                        labels.insert(label.clone(), activity.key.clone());
                    }
                    StepReport {
                        step: number,
                        op: name,
                        credential: step.credential.clone(),
                        outcome: Some(outcome),
                        error: None,
                    }
                }
                (Ok(_), Some(expected)) => {
                    return Err(ScenarioError::ExpectationNotMet {
                        step: number,
                        op: name,
                        expected: expected.clone(),
                        got: "success".to_string(),
                    })
                }
                (Err(err), Some(expected)) if err.kind() == expected.as_str() => {
                    info!(step = number, op = name, error = %err, "step failed as expected");
                    StepReport {
                        step: number,
                        op: name,
                        credential: step.credential.clone(),
                        outcome: None,
                        error: Some(err.to_string()),
                    }
                }
                (Err(err), Some(expected)) => {
                    return Err(ScenarioError::ExpectationNotMet {
                        step: number,
                        op: name,
                        expected: expected.clone(),
                        got: err.kind().to_string(),
                    })
                }
                (Err(source), None) => {
                    warn!(step = number, op = name, error = %source, "scenario step failed");
                    return Err(ScenarioError::StepFailed {
                        step: number,
                        op: name,
                        source,
                    });
                }
            };
            reports.push(report);
        }

        let exporter = self.users.first().map(|u| u.username.as_str()).unwrap_or_default();
        let mut exports = Vec::with_capacity(self.export.len());
        for worksheet in &self.export {
            let export = coordinator
                .export_sheet(exporter, SheetKey(*worksheet))
                .await
                .map_err(|source| ScenarioError::ExportFailed {
                    worksheet: *worksheet,
                    source,
                })?;
            exports.push(export);
        }

        metrics.log_stats();
        Ok(ScenarioReport {
            steps: reports,
            events: sink.events(),
            exports,
            stats: metrics.get_stats(),
        })
    }
}

impl Step {
    fn to_op(&self, step: usize, labels: &HashMap<String, ActivityKey>) -> Result<WorkflowOp, ScenarioError> {
        let invalid = |source| ScenarioError::InvalidKey { step, source };
        let op = match &self.action {
            StepAction::Create { worksheet } => WorkflowOp::Create { worksheet: *worksheet },
            StepAction::Assign { parcel, operator } => WorkflowOp::Assign {
                parcel: parcel.parse::<ParcelKey>().map_err(invalid)?,
                operator: operator.clone(),
            },
            StepAction::Start { parcel, .. } => WorkflowOp::Start {
                parcel: parcel.parse::<ParcelKey>().map_err(invalid)?,
            },
            StepAction::Stop { activity, finished } => WorkflowOp::Stop {
                activity: resolve_activity(step, activity, labels)?,
                finished: *finished,
            },
            StepAction::RecordInfo { activity, info } => WorkflowOp::RecordInfo {
                activity: resolve_activity(step, activity, labels)?,
                info: info.clone(),
            },
            StepAction::EditOperation { operation, observation } => WorkflowOp::EditOperation {
                operation: operation.parse::<OperationKey>().map_err(invalid)?,
                observation: observation.clone(),
            },
        };
        Ok(op)
    }
}

fn resolve_activity(
    step: usize,
    reference: &str,
    labels: &HashMap<String, ActivityKey>,
) -> Result<ActivityKey, ScenarioError> {
    match reference.strip_prefix('@') {
        Some(label) => labels.get(label).cloned().ok_or_else(|| ScenarioError::UnknownLabel {
            step,
            label: label.to_string(),
        }),
        None => reference
            .parse()
            .map_err(|source| ScenarioError::InvalidKey { step, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "worksheets": [{"id": 7, "operations": [{"code": "OP1", "area_ha": 0.5}], "polygon_ids": [10]}],
        "polygons": {"10": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}},
        "users": [
            {"username": "rep", "role": "PRBO", "organization": "acme"},
            {"username": "op1", "role": "PO", "organization": "acme"}
        ],
        "steps": [
            {"as": "rep", "op": "create", "worksheet": 7},
            {"as": "op1", "op": "start", "parcel": "execution_7_OP1_10", "expect_error": "invalid_state"},
            {"as": "rep", "op": "assign", "parcel": "execution_7_OP1_10", "operator": "op1"},
            {"as": "op1", "op": "start", "parcel": "execution_7_OP1_10", "label": "first"},
            {"as": "op1", "op": "stop", "activity": "@first", "finished": true},
            {"as": "op1", "op": "record_info", "activity": "@first", "info": {"observations": "done", "gps_path": "[[0,0],[1,1]]"}}
        ],
        "export": [7]
    }"#;

    fn test_config() -> ForestExecConfig {
        let mut config = ForestExecConfig::default();
        config.engine.retry_jitter = false;
        config
    }

    #[tokio::test]
    async fn test_scenario_replays_to_completed_sheet() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let report = scenario.run(&test_config()).await.unwrap();

        assert_eq!(report.steps.len(), 6);
        assert!(report.steps[1].error.is_some());
        assert_eq!(report.exports.len(), 1);

        let export = &report.exports[0];
        assert!(export.ended_at.is_some());
        assert_eq!(export.operations[0].percent, 100.0);
        assert_eq!(export.polygons[0].operations[0].status_code, "EXECUTADO");
        assert_eq!(export.polygons[0].operations[0].tracks.len(), 1);
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::SheetCompleted { .. })));
        assert_eq!(report.stats.committed, 5);
    }

    #[tokio::test]
    async fn test_unknown_label_is_reported() {
        let scenario = Scenario::from_json(
            r#"{"steps": [{"as": "x", "op": "stop", "activity": "@missing", "finished": true}]}"#,
        )
        .unwrap();
        let err = scenario.run(&test_config()).await.unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownLabel { step: 1, .. }));
    }

    #[tokio::test]
    async fn test_unexpected_success_fails_the_run() {
        let scenario = Scenario::from_json(
            r#"{
                "worksheets": [{"id": 1, "operations": [{"code": "OP1"}], "polygon_ids": [1]}],
                "users": [{"username": "rep", "role": "PRBO", "organization": "acme"}],
                "steps": [{"as": "rep", "op": "create", "worksheet": 1, "expect_error": "not_found"}]
            }"#,
        )
        .unwrap();
        let err = scenario.run(&test_config()).await.unwrap_err();
        assert!(matches!(err, ScenarioError::ExpectationNotMet { step: 1, .. }));
    }
}
