//! End-to-end workflow tests against the in-memory store
//! Testing library/framework: Rust built-in test framework with Tokio async runtime (#[tokio::test]).

mod fixtures;

use fixtures::{parcel, plan, HarnessBuilder, MANAGER, OP1, OP2, OUTSIDER, REP};
use forest_exec::external::WorkflowEvent;
use forest_exec::model::{OperationKey, ParcelStatus, SheetKey};
use forest_exec::workflows::ActivityInfo;
use forest_exec::WorkflowError;

fn count(events: &[WorkflowEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

#[tokio::test]
async fn sixty_forty_split_completes_operation_and_sheet() {
    let h = HarnessBuilder::new()
        .worksheet(plan(1, &[("OP1", 10.0)], &[1, 2]))
        .area(1, 6.0)
        .area(2, 4.0)
        .build();
    h.coordinator.create(REP, 1).await.unwrap();

    let first = h.complete_parcel(&parcel(1, "OP1", 1), OP1).await;
    assert_eq!(first.credited_area_ha, Some(6.0));
    assert_eq!(first.parcel.status, ParcelStatus::Completed);
    let op = first.operation.unwrap();
    assert!((op.percent_complete - 60.0).abs() < 1e-9);
    assert!(op.ended_at.is_none());
    assert!(!first.operation_completed);

    let second = h.complete_parcel(&parcel(1, "OP1", 2), OP1).await;
    let op = second.operation.unwrap();
    assert_eq!(op.percent_complete, 100.0);
    assert!(op.ended_at.is_some());
    assert!(second.operation_completed);
    assert!(second.sheet_completed);

    let status = h.coordinator.sheet_status(MANAGER, SheetKey(1)).await.unwrap();
    assert!(status.ended_at.is_some());
    assert_eq!(status.average_percent, 100.0);
    assert_eq!(status.total_area_ha, 10.0);

    let events = h.events.events();
    assert_eq!(count(&events, "operation_completed"), 1);
    assert_eq!(count(&events, "sheet_completed"), 1);
}

#[tokio::test]
async fn sheet_waits_for_every_operation() {
    let h = HarnessBuilder::new()
        .worksheet(plan(2, &[("OP1", 1.0), ("OP2", 1.0)], &[5]))
        .area(5, 1.0)
        .build();
    h.coordinator.create(REP, 2).await.unwrap();

    let first = h.complete_parcel(&parcel(2, "OP1", 5), OP1).await;
    assert!(first.operation_completed);
    assert!(!first.sheet_completed);
    let status = h.coordinator.sheet_status(MANAGER, SheetKey(2)).await.unwrap();
    assert!(status.ended_at.is_none());
    assert_eq!(status.average_percent, 50.0);

    let second = h.complete_parcel(&parcel(2, "OP2", 5), OP2).await;
    assert!(second.sheet_completed);
}

#[tokio::test]
async fn unfinished_sessions_credit_nothing_and_completion_counts_once() {
    let h = HarnessBuilder::new()
        .worksheet(plan(3, &[("OP1", 10.0)], &[1, 2]))
        .area(1, 6.0)
        .area(2, 4.0)
        .build();
    h.coordinator.create(REP, 3).await.unwrap();
    let key = parcel(3, "OP1", 1);
    h.coordinator.assign(REP, &key, OP1).await.unwrap();

    let morning = h.start(&key, OP1).await;
    let paused = h.coordinator.stop(OP1, &morning, false).await.unwrap();
    assert_eq!(paused.parcel.status, ParcelStatus::InProgress);
    assert_eq!(paused.credited_area_ha, None);

    let again = h.coordinator.stop(OP1, &morning, true).await;
    assert!(matches!(again, Err(WorkflowError::InvalidState(_))));

    let afternoon = h.start(&key, OP1).await;
    let done = h.coordinator.stop(OP1, &afternoon, true).await.unwrap();
    assert_eq!(done.credited_area_ha, Some(6.0));

    assert!(matches!(
        h.coordinator.start(OP1, &key).await,
        Err(WorkflowError::InvalidState(_))
    ));
    assert!(matches!(
        h.coordinator.stop(OP1, &afternoon, true).await,
        Err(WorkflowError::InvalidState(_))
    ));

    let status = h
        .coordinator
        .operation_status(MANAGER, &key.operation)
        .await
        .unwrap();
    assert!((status.operation.percent_complete - 60.0).abs() < 1e-9);
    let view = status.parcels.iter().find(|p| p.parcel.key == key).unwrap();
    assert_eq!(view.activities.len(), 2);
    assert!(view.activities.iter().all(|a| a.ended_at.is_some()));
}

#[tokio::test]
async fn state_and_permission_boundaries() {
    let h = HarnessBuilder::new()
        .worksheet(plan(4, &[("OP1", 2.0)], &[1]))
        .area(1, 2.0)
        .build();
    h.coordinator.create(REP, 4).await.unwrap();
    let key = parcel(4, "OP1", 1);

    assert!(matches!(
        h.coordinator.start(OP1, &key).await,
        Err(WorkflowError::InvalidState(_))
    ));
    assert!(matches!(
        h.coordinator.stop(OP1, &key.new_activity(), true).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.assign(REP, &key, OUTSIDER).await,
        Err(WorkflowError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.coordinator.assign(REP, &key, MANAGER).await,
        Err(WorkflowError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.coordinator.assign(REP, &key, "ghost").await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.assign("bad-token", &key, OP1).await,
        Err(WorkflowError::Unauthenticated(_))
    ));

    let assigned = h.coordinator.assign(REP, &key, OP1).await.unwrap();
    assert_eq!(assigned.status, ParcelStatus::Assigned);
    let again = h.coordinator.assign(REP, &key, OP1).await.unwrap();
    assert_eq!(again.operators, vec![OP1.to_string()]);
    assert_eq!(count(&h.events.events(), "parcel_assigned"), 1);

    assert!(matches!(
        h.coordinator.start(OP2, &key).await,
        Err(WorkflowError::PermissionDenied(_))
    ));
    let activity = h.start(&key, OP1).await;
    assert!(matches!(
        h.coordinator.stop(OP2, &activity, true).await,
        Err(WorkflowError::PermissionDenied(_))
    ));

    let missing = OperationKey::new(4, fixtures::code("OP9")).parcel(1);
    assert!(matches!(
        h.coordinator.assign(REP, &missing, OP1).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(h.metrics.get_stats().rejected >= 8);
}

#[tokio::test]
async fn create_opens_one_parcel_per_operation_and_polygon() {
    let h = HarnessBuilder::new()
        .worksheet(plan(5, &[("OP1", 1.0), ("OP2", 2.0)], &[1, 2, 3]))
        .build();

    let created = h.coordinator.create(REP, 5).await.unwrap();
    assert_eq!(created.parcel_count, 6);
    assert_eq!(created.operations.len(), 2);
    assert!(created.operations.iter().all(|op| op.percent_complete == 0.0));
    assert!(created.sheet.started_at.is_none());

    assert!(matches!(
        h.coordinator.create(REP, 5).await,
        Err(WorkflowError::InvalidState(_))
    ));
    assert!(matches!(
        h.coordinator.create(REP, 99).await,
        Err(WorkflowError::NotFound(_))
    ));

    let view = h.coordinator.view_parcel(MANAGER, &parcel(5, "OP2", 3)).await.unwrap();
    assert_eq!(view.parcel.status, ParcelStatus::Unassigned);
    assert!(view.activities.is_empty());
}

#[tokio::test]
async fn start_touches_operation_and_sheet_once() {
    let h = HarnessBuilder::new()
        .worksheet(plan(6, &[("OP1", 2.0)], &[1, 2]))
        .build();
    h.coordinator.create(REP, 6).await.unwrap();
    for polygon in [1, 2] {
        h.coordinator.assign(REP, &parcel(6, "OP1", polygon), OP1).await.unwrap();
    }

    let first = h.coordinator.start(OP1, &parcel(6, "OP1", 1)).await.unwrap();
    let second = h.coordinator.start(OP1, &parcel(6, "OP1", 2)).await.unwrap();

    let status = h.coordinator.sheet_status(MANAGER, SheetKey(6)).await.unwrap();
    assert_eq!(status.started_at, Some(first.started_at));
    assert_eq!(status.last_activity_at, Some(second.started_at));
    let op = &status.operations[0];
    assert_eq!(op.started_at, Some(first.started_at));
    assert_eq!(op.last_activity_at, Some(second.started_at));
}

#[tokio::test]
async fn record_info_lands_on_every_level() {
    let h = HarnessBuilder::new()
        .worksheet(plan(7, &[("OP1", 1.0)], &[1]))
        .area(1, 1.0)
        .build();
    h.coordinator.create(REP, 7).await.unwrap();
    let key = parcel(7, "OP1", 1);
    h.coordinator.assign(REP, &key, OP1).await.unwrap();
    let activity = h.start(&key, OP1).await;

    let info = ActivityInfo {
        observations: Some("thinning done".to_string()),
        gps_path: Some("[[200000,300000],[200050,300020]]".to_string()),
        photo_refs: vec!["photo-1.jpg".to_string(), "  ".to_string()],
    };
    assert!(matches!(
        h.coordinator.record_info(OP1, &activity, &info).await,
        Err(WorkflowError::InvalidState(_))
    ));

    h.coordinator.stop(OP1, &activity, true).await.unwrap();
    assert!(matches!(
        h.coordinator.record_info(OP2, &activity, &info).await,
        Err(WorkflowError::PermissionDenied(_))
    ));

    let recorded = h.coordinator.record_info(OP1, &activity, &info).await.unwrap();
    assert_eq!(recorded.observations, vec!["thinning done".to_string()]);
    assert_eq!(recorded.photo_refs, vec!["photo-1.jpg".to_string()]);

    let view = h.coordinator.view_parcel(MANAGER, &key).await.unwrap();
    assert_eq!(view.parcel.observations, vec!["thinning done".to_string()]);
    assert_eq!(view.parcel.gps_path, "[[200000,300000],[200050,300020]]");

    let export = h.coordinator.export_sheet(MANAGER, SheetKey(7)).await.unwrap();
    assert_eq!(export.observations, vec!["thinning done".to_string()]);
    assert_eq!(export.operations[0].observations, vec!["thinning done".to_string()]);
    let entry = &export.polygons[0].operations[0];
    assert_eq!(entry.status_code, "EXECUTADO");
    assert_eq!(entry.tracks.len(), 1);
}

#[tokio::test]
async fn edit_operation_appends_observation() {
    let h = HarnessBuilder::new()
        .worksheet(plan(8, &[("OP1", 1.0)], &[1]))
        .build();
    h.coordinator.create(REP, 8).await.unwrap();
    let key = OperationKey::new(8, fixtures::code("OP1"));

    let edited = h
        .coordinator
        .edit_operation(MANAGER, &key, "  soil too wet, resume next week ")
        .await
        .unwrap();
    assert_eq!(edited.observations, vec!["soil too wet, resume next week".to_string()]);
    assert!(matches!(
        h.coordinator.edit_operation(MANAGER, &key, "   ").await,
        Err(WorkflowError::InvalidState(_))
    ));
}

#[tokio::test]
async fn list_and_export_report_progress() {
    let h = HarnessBuilder::new()
        .worksheet(plan(12, &[("OP1", 4.0)], &[1, 2]))
        .worksheet(plan(11, &[("OP1", 3.0), ("OP2", 3.0)], &[1]))
        .area(1, 1.0)
        .area(2, 3.0)
        .build();
    h.coordinator.create(REP, 12).await.unwrap();
    h.coordinator.create(REP, 11).await.unwrap();
    h.complete_parcel(&parcel(12, "OP1", 1), OP1).await;

    let sheets = h.coordinator.list_sheets(MANAGER).await.unwrap();
    assert_eq!(sheets.iter().map(|s| s.worksheet).collect::<Vec<_>>(), vec![11, 12]);
    assert_eq!(sheets[0].progress, 0.0);
    assert_eq!(sheets[1].progress, 25.0);

    let export = h.coordinator.export_sheet(MANAGER, SheetKey(12)).await.unwrap();
    assert_eq!(export.operations[0].index, 1);
    assert!((export.operations[0].executed_area_ha - 1.0).abs() < 1e-9);
    assert_eq!(export.polygons.len(), 2);
    let statuses: Vec<&str> = export
        .polygons
        .iter()
        .map(|p| p.operations[0].status_code)
        .collect();
    assert_eq!(statuses, vec!["EXECUTADO", "POR_ATRIBUIR"]);

    let multi = h.coordinator.export_sheet(MANAGER, SheetKey(11)).await.unwrap();
    assert_eq!(multi.polygons.len(), 1);
    assert_eq!(multi.polygons[0].operations.len(), 2);
    assert_eq!(multi.polygons[0].operations[1].operation_index, 2);

    assert!(matches!(
        h.coordinator.export_sheet(MANAGER, SheetKey(404)).await,
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn completing_a_parcel_reports_sessions_left_open() {
    let h = HarnessBuilder::new()
        .worksheet(plan(8, &[("OP1", 1.0)], &[1]))
        .area(1, 1.0)
        .build();
    h.coordinator.create(REP, 8).await.unwrap();
    let key = parcel(8, "OP1", 1);
    h.coordinator.assign(REP, &key, OP1).await.unwrap();
    h.coordinator.assign(REP, &key, OP2).await.unwrap();

    let first = h.start(&key, OP1).await;
    let second = h.start(&key, OP2).await;
    let done = h.coordinator.stop(OP1, &first, true).await.unwrap();
    assert_eq!(done.parcel.status, ParcelStatus::Completed);
    assert_eq!(done.open_activities, vec![second.clone()]);

    assert!(matches!(
        h.coordinator.stop(OP2, &second, true).await,
        Err(WorkflowError::InvalidState(_))
    ));
    let info = ActivityInfo {
        observations: Some("late note".to_string()),
        gps_path: None,
        photo_refs: vec![],
    };
    assert!(matches!(
        h.coordinator.record_info(OP2, &second, &info).await,
        Err(WorkflowError::InvalidState(_))
    ));
}
