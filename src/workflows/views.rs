// Read-only reports over execution sheets
//
// Each report reads inside one transaction that writes nothing. The read set is
// validated at the end and a report that raced a commit is read again, so it
// never mixes records from before and after that commit.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, Instrument};

use super::coordinator::{finish_read, require, Coordinator};
use crate::errors::WorkflowError;
use crate::lifecycle::{average_percent, CompletionState};
use crate::model::{
    Activity, Operation, OperationCode, OperationKey, ParcelAssignment, ParcelKey, ParcelStatus,
    PolygonId, Sheet, SheetKey, Timestamp, WorksheetId,
};
use crate::store::{EntityKey, EntityKind, Transaction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParcelView {
    pub parcel: ParcelAssignment,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStatus {
    pub operation: Operation,
    pub parcels: Vec<ParcelView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetStatus {
    pub worksheet: WorksheetId,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    /// Sum of the operations' declared areas.
    pub total_area_ha: f64,
    pub average_percent: f64,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSummary {
    pub worksheet: WorksheetId,
    /// Average operation percent, rounded to two decimals.
    pub progress: f64,
    pub state: CompletionState,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationExport {
    /// 1-based position of the operation on the sheet.
    pub index: usize,
    pub code: OperationCode,
    pub executed_area_ha: f64,
    pub percent: f64,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonOperationExport {
    pub operation_index: usize,
    pub code: OperationCode,
    pub status: ParcelStatus,
    pub status_code: &'static str,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
    /// GPS tracks of the parcel's activities, one JSON value per recorded segment.
    pub tracks: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonExport {
    pub polygon_id: PolygonId,
    pub operations: Vec<PolygonOperationExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetExport {
    pub worksheet: WorksheetId,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub observations: Vec<String>,
    pub operations: Vec<OperationExport>,
    pub polygons: Vec<PolygonExport>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_tracks(gps_path: &str) -> Vec<Value> {
    gps_path
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match serde_json::from_str(segment) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "skipping unreadable gps segment");
                None
            }
        })
        .collect()
}

async fn load_parcel_view(txn: &mut Transaction, key: &ParcelKey) -> Result<ParcelView, WorkflowError> {
    let parcel: ParcelAssignment = require(txn, key).await?;
    let mut activities = Vec::with_capacity(parcel.activity_ids.len());
    for activity_key in parcel.activity_keys() {
        activities.push(require::<Activity>(txn, &activity_key).await?);
    }
    Ok(ParcelView { parcel, activities })
}

async fn load_operations(txn: &mut Transaction, sheet: &Sheet) -> Result<Vec<Operation>, WorkflowError> {
    let mut operations = Vec::with_capacity(sheet.operation_codes.len());
    for key in sheet.operation_keys() {
        operations.push(require::<Operation>(txn, &key).await?);
    }
    Ok(operations)
}

impl Coordinator {
    /// A parcel with every work session recorded on it.
    pub async fn view_parcel(&self, credential: &str, key: &ParcelKey) -> Result<ParcelView, WorkflowError> {
        let span = self.span("view_parcel", &key.to_string());
        async {
            self.authenticate(credential).await?;
            self.read_consistent(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let view = load_parcel_view(&mut txn, key).await;
                finish_read(txn, view).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// An operation with all of its parcels and their activities.
    pub async fn operation_status(
        &self,
        credential: &str,
        key: &OperationKey,
    ) -> Result<OperationStatus, WorkflowError> {
        let span = self.span("operation_status", &key.to_string());
        async {
            self.authenticate(credential).await?;
            self.read_consistent(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let status = async {
                    let operation: Operation = require(&mut txn, key).await?;
                    let mut parcels = Vec::with_capacity(operation.polygon_ids.len());
                    for parcel_key in operation.parcel_keys() {
                        parcels.push(load_parcel_view(&mut txn, &parcel_key).await?);
                    }
                    Ok::<_, WorkflowError>(OperationStatus { operation, parcels })
                }
                .await;
                finish_read(txn, status).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Sheet timestamps with area and progress rolled up over its operations.
    pub async fn sheet_status(&self, credential: &str, key: SheetKey) -> Result<SheetStatus, WorkflowError> {
        let span = self.span("sheet_status", &key.to_string());
        async {
            self.authenticate(credential).await?;
            self.read_consistent(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let status = async {
                    let sheet: Sheet = require(&mut txn, &key).await?;
                    let operations = load_operations(&mut txn, &sheet).await?;
                    Ok::<_, WorkflowError>(SheetStatus {
                        worksheet: sheet.key.worksheet(),
                        started_at: sheet.started_at,
                        last_activity_at: sheet.last_activity_at,
                        ended_at: sheet.ended_at,
                        total_area_ha: operations.iter().map(|op| op.total_area_ha).sum(),
                        average_percent: average_percent(&operations),
                        operations,
                    })
                }
                .await;
                finish_read(txn, status).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// One progress summary per execution sheet, ordered by worksheet id.
    pub async fn list_sheets(&self, credential: &str) -> Result<Vec<SheetSummary>, WorkflowError> {
        let span = self.span("list_sheets", "execution");
        async {
            self.authenticate(credential).await?;
            let mut sheet_keys: Vec<SheetKey> = self
                .store
                .keys(EntityKind::Sheet)
                .await?
                .into_iter()
                .filter_map(|key| match key {
                    EntityKey::Sheet(sheet) => Some(sheet),
                    _ => None,
                })
                .collect();
            sheet_keys.sort();
            let sheet_keys = &sheet_keys;

            self.read_consistent(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let summaries = async {
                    let mut summaries = Vec::with_capacity(sheet_keys.len());
                    for key in sheet_keys {
                        let sheet: Sheet = require(&mut txn, key).await?;
                        let operations = load_operations(&mut txn, &sheet).await?;
                        let average = average_percent(&operations);
                        summaries.push(SheetSummary {
                            worksheet: key.worksheet(),
                            progress: round2(average),
                            state: CompletionState::from_percent(average),
                            started_at: sheet.started_at,
                            ended_at: sheet.ended_at,
                        });
                    }
                    Ok::<_, WorkflowError>(summaries)
                }
                .await;
                finish_read(txn, summaries).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Full report of a sheet: executed area per operation and, per polygon,
    /// the state and GPS tracks of each operation's parcel.
    pub async fn export_sheet(&self, credential: &str, key: SheetKey) -> Result<SheetExport, WorkflowError> {
        let span = self.span("export_sheet", &key.to_string());
        async {
            self.authenticate(credential).await?;
            self.read_consistent(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let export = async {
                    let sheet: Sheet = require(&mut txn, &key).await?;
                    let operations = load_operations(&mut txn, &sheet).await?;

                    let mut polygons: Vec<PolygonExport> = Vec::new();
                    for (position, operation) in operations.iter().enumerate() {
                        for parcel_key in operation.parcel_keys() {
                            let view = load_parcel_view(&mut txn, &parcel_key).await?;
                            let tracks = view
                                .activities
                                .iter()
                                .flat_map(|activity| parse_tracks(&activity.gps_path))
                                .collect();
                            let parcel = view.parcel;
                            let entry = PolygonOperationExport {
                                operation_index: position + 1,
                                code: operation.key.code.clone(),
                                status: parcel.status,
                                status_code: parcel.status.exchange_code(),
                                started_at: parcel.started_at,
                                last_activity_at: parcel.last_activity_at,
                                ended_at: parcel.ended_at,
                                observations: parcel.observations,
                                tracks,
                            };
                            match polygons.iter_mut().find(|p| p.polygon_id == parcel_key.polygon) {
                                Some(polygon) => polygon.operations.push(entry),
                                None => polygons.push(PolygonExport {
                                    polygon_id: parcel_key.polygon,
                                    operations: vec![entry],
                                }),
                            }
                        }
                    }

                    let operation_exports = operations
                        .iter()
                        .enumerate()
                        .map(|(position, op)| OperationExport {
                            index: position + 1,
                            code: op.key.code.clone(),
                            executed_area_ha: op.executed_area_ha(),
                            percent: op.percent_complete,
                            started_at: op.started_at,
                            last_activity_at: op.last_activity_at,
                            ended_at: op.ended_at,
                            observations: op.observations.clone(),
                        })
                        .collect();

                    Ok::<_, WorkflowError>(SheetExport {
                        worksheet: sheet.key.worksheet(),
                        started_at: sheet.started_at,
                        last_activity_at: sheet.last_activity_at,
                        ended_at: sheet.ended_at,
                        observations: sheet.observations,
                        operations: operation_exports,
                        polygons,
                    })
                }
                .await;
                finish_read(txn, export).await
            })
            .await
        }
        .instrument(span)
        .await
    }
}
