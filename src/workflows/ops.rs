// Typed requests and results of the workflow operations

use serde::{Deserialize, Serialize};

use crate::model::{
    Activity, ActivityKey, Operation, OperationKey, ParcelAssignment, ParcelKey, Sheet, WorksheetId,
};

/// One workflow request, as accepted by `Coordinator::execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOp {
    Create {
        worksheet: WorksheetId,
    },
    Assign {
        parcel: ParcelKey,
        operator: String,
    },
    Start {
        parcel: ParcelKey,
    },
    Stop {
        activity: ActivityKey,
        finished: bool,
    },
    RecordInfo {
        activity: ActivityKey,
        info: ActivityInfo,
    },
    EditOperation {
        operation: OperationKey,
        observation: String,
    },
}

impl WorkflowOp {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowOp::Create { .. } => "create",
            WorkflowOp::Assign { .. } => "assign",
            WorkflowOp::Start { .. } => "start",
            WorkflowOp::Stop { .. } => "stop",
            WorkflowOp::RecordInfo { .. } => "record_info",
            WorkflowOp::EditOperation { .. } => "edit_operation",
        }
    }
}

/// Field notes attached to a finished work session. Blank values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub gps_path: Option<String>,
    #[serde(default)]
    pub photo_refs: Vec<String>,
}

impl ActivityInfo {
    pub fn observation(&self) -> Option<&str> {
        non_blank(self.observations.as_deref())
    }

    pub fn gps_segment(&self) -> Option<&str> {
        non_blank(self.gps_path.as_deref())
    }

    pub fn photos(&self) -> impl Iterator<Item = &str> {
        self.photo_refs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetCreated {
    pub sheet: Sheet,
    pub operations: Vec<Operation>,
    pub parcel_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub activity: Activity,
    pub parcel: ParcelAssignment,
    /// Geodesic area credited to the operation, when the parcel finished.
    pub credited_area_ha: Option<f64>,
    /// The operation after crediting, when the parcel finished.
    pub operation: Option<Operation>,
    pub operation_completed: bool,
    pub sheet_completed: bool,
    /// Other sessions on the parcel still open when it completed. They can no
    /// longer be stopped and so never accept `record_info`.
    pub open_activities: Vec<ActivityKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Created(SheetCreated),
    Assigned(ParcelAssignment),
    Started(Activity),
    Stopped(StopOutcome),
    InfoRecorded(Activity),
    OperationEdited(Operation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_info_ignores_blank_values() {
        let info = ActivityInfo {
            observations: Some("   ".into()),
            gps_path: Some(" [[1,2],[3,4]] ".into()),
            photo_refs: vec!["".into(), "photo-1.jpg".into()],
        };
        assert_eq!(info.observation(), None);
        assert_eq!(info.gps_segment(), Some("[[1,2],[3,4]]"));
        assert_eq!(info.photos().collect::<Vec<_>>(), vec!["photo-1.jpg"]);
    }
}
