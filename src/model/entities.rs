// Execution-sheet records persisted in the entity store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::keys::{ActivityKey, OperationCode, OperationKey, ParcelKey, PolygonId, SheetKey};

pub type Timestamp = DateTime<Utc>;

/// Work status of one parcel under one operation.
///
/// Only `lifecycle::parcel` moves a parcel between these; the status never
/// goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParcelStatus {
    Unassigned,
    Assigned,
    InProgress,
    Completed,
}

impl ParcelStatus {
    /// Status code used by the worksheet exchange format.
    pub fn exchange_code(&self) -> &'static str {
        match self {
            ParcelStatus::Unassigned => "POR_ATRIBUIR",
            ParcelStatus::Assigned => "ATRIBUIDO",
            ParcelStatus::InProgress => "EM_EXECUCAO",
            ParcelStatus::Completed => "EXECUTADO",
        }
    }
}

impl std::fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ParcelStatus::Unassigned => "unassigned",
            ParcelStatus::Assigned => "assigned",
            ParcelStatus::InProgress => "in-progress",
            ParcelStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Sets the first-activity timestamp once and always moves the last-activity one.
pub(crate) fn touch(started_at: &mut Option<Timestamp>, last_activity_at: &mut Option<Timestamp>, now: Timestamp) {
    if started_at.is_none() {
        *started_at = Some(now);
    }
    *last_activity_at = Some(now);
}

fn append_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push(';');
    }
    path.push_str(segment);
}

/// Execution record for one worksheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub key: SheetKey,
    /// Codes of the operations opened with this sheet, in worksheet order.
    pub operation_codes: Vec<OperationCode>,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
}

impl Sheet {
    pub fn new(key: SheetKey, operation_codes: Vec<OperationCode>) -> Self {
        Self {
            key,
            operation_codes,
            started_at: None,
            last_activity_at: None,
            ended_at: None,
            observations: Vec::new(),
        }
    }

    pub fn operation_keys(&self) -> impl Iterator<Item = OperationKey> + '_ {
        self.operation_codes
            .iter()
            .map(move |code| self.key.operation(code.clone()))
    }

    pub fn touch(&mut self, now: Timestamp) {
        touch(&mut self.started_at, &mut self.last_activity_at, now);
    }

    pub fn is_completed(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// One unit of planned work with a fixed target area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub key: OperationKey,
    pub total_area_ha: f64,
    /// Cumulative completion, 0.0 to 100.0, never decreasing.
    pub percent_complete: f64,
    /// Polygons this operation covers, one parcel each.
    pub polygon_ids: Vec<PolygonId>,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
}

impl Operation {
    pub fn new(key: OperationKey, total_area_ha: f64, polygon_ids: Vec<PolygonId>) -> Self {
        Self {
            key,
            total_area_ha,
            percent_complete: 0.0,
            polygon_ids,
            started_at: None,
            last_activity_at: None,
            ended_at: None,
            observations: Vec::new(),
        }
    }

    pub fn parcel_keys(&self) -> impl Iterator<Item = ParcelKey> + '_ {
        self.polygon_ids.iter().map(move |polygon| self.key.parcel(*polygon))
    }

    pub fn touch(&mut self, now: Timestamp) {
        touch(&mut self.started_at, &mut self.last_activity_at, now);
    }

    pub fn is_completed(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Hectares covered so far according to the accumulated percentage.
    pub fn executed_area_ha(&self) -> f64 {
        self.total_area_ha * self.percent_complete / 100.0
    }
}

/// Work-tracking record for one polygon under one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelAssignment {
    pub key: ParcelKey,
    pub status: ParcelStatus,
    /// Assigned operators, in assignment order, without duplicates.
    pub operators: Vec<String>,
    pub observations: Vec<String>,
    /// GPS segments of every session, joined with `;`.
    pub gps_path: String,
    pub activity_ids: Vec<Uuid>,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

impl ParcelAssignment {
    pub fn new(key: ParcelKey) -> Self {
        Self {
            key,
            status: ParcelStatus::Unassigned,
            operators: Vec::new(),
            observations: Vec::new(),
            gps_path: String::new(),
            activity_ids: Vec::new(),
            started_at: None,
            last_activity_at: None,
            ended_at: None,
        }
    }

    pub fn has_operator(&self, username: &str) -> bool {
        self.operators.iter().any(|op| op == username)
    }

    pub fn activity_keys(&self) -> impl Iterator<Item = ActivityKey> + '_ {
        self.activity_ids.iter().map(move |id| self.key.activity(*id))
    }

    pub fn append_gps_path(&mut self, segment: &str) {
        append_segment(&mut self.gps_path, segment);
    }

    /// Status implied by the record's own fields.
    ///
    /// A committed parcel always has `status == derived_status()`.
    pub fn derived_status(&self) -> ParcelStatus {
        if self.ended_at.is_some() {
            ParcelStatus::Completed
        } else if self.started_at.is_some() {
            ParcelStatus::InProgress
        } else if !self.operators.is_empty() {
            ParcelStatus::Assigned
        } else {
            ParcelStatus::Unassigned
        }
    }
}

/// A single timed work session by one operator on one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub key: ActivityKey,
    pub operator: String,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
    pub gps_path: String,
    pub photo_refs: Vec<String>,
}

impl Activity {
    pub fn new(key: ActivityKey, operator: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            key,
            operator: operator.into(),
            started_at,
            ended_at: None,
            observations: Vec::new(),
            gps_path: String::new(),
            photo_refs: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn append_gps_path(&mut self, segment: &str) {
        append_segment(&mut self.gps_path, segment);
    }
}
