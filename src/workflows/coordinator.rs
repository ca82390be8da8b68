//! Transactional update coordinator
//!
//! Each workflow operation authenticates the caller once, then runs as a
//! single store transaction: read every record it touches by key, let the
//! lifecycle rules decide, buffer the writes and commit. A commit lost to a
//! concurrent writer reruns the whole attempt from a fresh transaction.
//! Notifications go out only after a successful commit.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::ops::{ActivityInfo, SheetCreated, StopOutcome, WorkflowOp, WorkflowOutcome};
use super::retry::{RetryConfig, RetryHandler};
use crate::config::ForestExecConfig;
use crate::errors::WorkflowError;
use crate::external::{
    Caller, GeometryProvider, IdentityProvider, LogNotificationSink, NotificationSink,
    WorkflowEvent, WorksheetCatalog, WorksheetPlan,
};
use crate::geodesy::{GeodesicAreaCalculator, ParcelAreaService};
use crate::lifecycle::{self, ParcelEvent, ProgressAggregator};
use crate::model::{
    Activity, ActivityKey, Operation, OperationKey, ParcelAssignment, ParcelKey, Sheet, SheetKey,
    WorksheetId,
};
use crate::observability::{create_workflow_span, workflow_metrics, WorkflowMetrics};
use crate::store::{EntityStore, Record, Transaction};
use crate::telemetry::generate_correlation_id;

type Attempt<T> = Result<(T, Vec<WorkflowEvent>), WorkflowError>;

pub struct Coordinator {
    pub(super) store: Arc<dyn EntityStore>,
    identity: Arc<dyn IdentityProvider>,
    worksheets: Arc<dyn WorksheetCatalog>,
    areas: ParcelAreaService,
    notifications: Arc<dyn NotificationSink>,
    aggregator: ProgressAggregator,
    retry: RetryHandler,
    metrics: Arc<WorkflowMetrics>,
}

/// Loads a record that must exist.
pub(super) async fn require<R: Record>(txn: &mut Transaction, key: &R::Key) -> Result<R, WorkflowError> {
    txn.fetch::<R>(key)
        .await?
        .ok_or_else(|| WorkflowError::not_found(key))
}

/// Commits on success, rolls back on failure.
async fn finish<T>(txn: Transaction, result: Result<T, WorkflowError>) -> Result<T, WorkflowError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Ends a report's transaction; a stale read surfaces as `Conflict`.
pub(super) async fn finish_read<T>(txn: Transaction, result: Result<T, WorkflowError>) -> Result<T, WorkflowError> {
    match result {
        Ok(value) => {
            txn.validate_reads().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityProvider>,
        worksheets: Arc<dyn WorksheetCatalog>,
        areas: ParcelAreaService,
    ) -> Self {
        let metrics = workflow_metrics();
        Self {
            store,
            identity,
            worksheets,
            areas: areas.with_metrics(metrics.clone()),
            notifications: Arc::new(LogNotificationSink),
            aggregator: ProgressAggregator::default(),
            retry: RetryHandler::default(),
            metrics,
        }
    }

    /// Wires a coordinator with the geodesic calculator, cache and retry
    /// policy described by `config`.
    pub fn from_config(
        config: &ForestExecConfig,
        store: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityProvider>,
        worksheets: Arc<dyn WorksheetCatalog>,
        geometry: Arc<dyn GeometryProvider>,
    ) -> Self {
        let calculator = Arc::new(GeodesicAreaCalculator::new(config.geometry.strict));
        let areas = ParcelAreaService::new(geometry, calculator, config.geometry.area_cache_capacity);
        Self::new(store, identity, worksheets, areas)
            .with_aggregator(ProgressAggregator::new(config.progress.completion_tolerance))
            .with_retry_config(config.engine.retry_config())
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    pub fn with_aggregator(mut self, aggregator: ProgressAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryHandler::new(config);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<WorkflowMetrics>) -> Self {
        self.areas = self.areas.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.metrics
    }

    /// Runs any workflow operation on behalf of `credential`.
    pub async fn execute(&self, credential: &str, op: WorkflowOp) -> Result<WorkflowOutcome, WorkflowError> {
        match op {
            WorkflowOp::Create { worksheet } => self.create(credential, worksheet).await.map(WorkflowOutcome::Created),
            WorkflowOp::Assign { parcel, operator } => self
                .assign(credential, &parcel, &operator)
                .await
                .map(WorkflowOutcome::Assigned),
            WorkflowOp::Start { parcel } => self.start(credential, &parcel).await.map(WorkflowOutcome::Started),
            WorkflowOp::Stop { activity, finished } => self
                .stop(credential, &activity, finished)
                .await
                .map(WorkflowOutcome::Stopped),
            WorkflowOp::RecordInfo { activity, info } => self
                .record_info(credential, &activity, &info)
                .await
                .map(WorkflowOutcome::InfoRecorded),
            WorkflowOp::EditOperation { operation, observation } => self
                .edit_operation(credential, &operation, &observation)
                .await
                .map(WorkflowOutcome::OperationEdited),
        }
    }

    /// Opens the execution sheet of a worksheet, with one operation per
    /// declared operation and one parcel per (operation, polygon).
    pub async fn create(&self, credential: &str, worksheet: WorksheetId) -> Result<SheetCreated, WorkflowError> {
        let span = self.span("create", &SheetKey(worksheet).to_string());
        async {
            let caller = self.authenticate(credential).await?;
            let plan = self
                .worksheets
                .worksheet(worksheet)
                .await
                .ok_or_else(|| WorkflowError::not_found(format!("worksheet {worksheet}")))?;
            let plan = &plan;
            let created = self
                .transact(|| async move {
                    let mut txn = Transaction::begin(self.store.as_ref()).await?;
                    let result = self.create_in(&mut txn, plan).await;
                    finish(txn, result).await
                })
                .await?;
            info!(
                user = %caller.username,
                operations = created.operations.len(),
                parcels = created.parcel_count,
                "execution sheet created"
            );
            Ok::<_, WorkflowError>(created)
        }
        .instrument(span)
        .await
    }

    async fn create_in(&self, txn: &mut Transaction, plan: &WorksheetPlan) -> Attempt<SheetCreated> {
        let sheet_key = SheetKey(plan.id);
        if txn.fetch::<Sheet>(&sheet_key).await?.is_some() {
            return Err(WorkflowError::InvalidState(format!("{sheet_key} already exists")));
        }

        let mut codes = Vec::with_capacity(plan.operations.len());
        for planned in &plan.operations {
            if codes.contains(&planned.code) {
                return Err(WorkflowError::InvalidState(format!(
                    "worksheet {} declares operation {} twice",
                    plan.id, planned.code
                )));
            }
            codes.push(planned.code.clone());
        }

        let sheet = Sheet::new(sheet_key, codes);
        let mut operations = Vec::with_capacity(plan.operations.len());
        let mut parcel_count = 0;
        for planned in &plan.operations {
            let operation = Operation::new(
                sheet_key.operation(planned.code.clone()),
                planned.area_ha.unwrap_or(0.0),
                plan.polygon_ids.clone(),
            );
            for parcel_key in operation.parcel_keys() {
                txn.put(ParcelAssignment::new(parcel_key)).await?;
                parcel_count += 1;
            }
            txn.put(operation.clone()).await?;
            operations.push(operation);
        }
        txn.put(sheet.clone()).await?;

        let created = SheetCreated {
            sheet,
            operations,
            parcel_count,
        };
        Ok((created, vec![WorkflowEvent::SheetCreated { sheet: sheet_key }]))
    }

    /// Adds `operator` to a parcel. The assigner and the operator must share
    /// a partner organization.
    pub async fn assign(
        &self,
        credential: &str,
        parcel: &ParcelKey,
        operator: &str,
    ) -> Result<ParcelAssignment, WorkflowError> {
        let span = self.span("assign", &parcel.to_string());
        async {
            let assigner = self.authenticate(credential).await?;
            let target = self
                .identity
                .lookup(operator)
                .await?
                .ok_or_else(|| WorkflowError::not_found(format!("user {operator}")))?;
            let (assigner, target) = (&assigner, &target);
            self.transact(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let result = self.assign_in(&mut txn, assigner, target, parcel).await;
                finish(txn, result).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    async fn assign_in(
        &self,
        txn: &mut Transaction,
        assigner: &Caller,
        operator: &Caller,
        key: &ParcelKey,
    ) -> Attempt<ParcelAssignment> {
        let mut parcel: ParcelAssignment = require(txn, key).await?;
        let newly_added = !parcel.has_operator(&operator.username);
        let transition = lifecycle::apply(&mut parcel, &ParcelEvent::Assign { operator, assigner }, Utc::now())?;
        debug!(from = %transition.from, to = %transition.to, operator = %operator.username, "parcel assigned");

        txn.put(parcel.clone()).await?;
        let events = if newly_added {
            vec![WorkflowEvent::ParcelAssigned {
                parcel: key.clone(),
                operator: operator.username.clone(),
            }]
        } else {
            Vec::new()
        };
        Ok((parcel, events))
    }

    /// Opens a work session on a parcel for the calling operator.
    pub async fn start(&self, credential: &str, parcel: &ParcelKey) -> Result<Activity, WorkflowError> {
        let span = self.span("start", &parcel.to_string());
        async {
            let caller = self.authenticate(credential).await?;
            let caller = &caller;
            self.transact(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let result = self.start_in(&mut txn, caller, parcel).await;
                finish(txn, result).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    async fn start_in(&self, txn: &mut Transaction, caller: &Caller, key: &ParcelKey) -> Attempt<Activity> {
        let now = Utc::now();
        let mut parcel: ParcelAssignment = require(txn, key).await?;
        lifecycle::apply(
            &mut parcel,
            &ParcelEvent::Start {
                operator: &caller.username,
            },
            now,
        )?;
        let mut operation: Operation = require(txn, &key.operation).await?;
        let mut sheet: Sheet = require(txn, &key.sheet()).await?;

        let activity = Activity::new(key.new_activity(), caller.username.clone(), now);
        parcel.activity_ids.push(activity.key.id);
        operation.touch(now);
        sheet.touch(now);

        txn.put(activity.clone()).await?;
        txn.put(parcel).await?;
        txn.put(operation).await?;
        txn.put(sheet).await?;

        let event = WorkflowEvent::ActivityStarted {
            activity: activity.key.clone(),
            operator: caller.username.clone(),
        };
        Ok((activity, vec![event]))
    }

    /// Closes a work session. With `finished`, the parcel is completed and
    /// its geodesic area is credited to the operation, cascading to the sheet.
    ///
    /// Completing a parcel leaves any other open session on it open for good;
    /// those are listed in [`StopOutcome::open_activities`].
    pub async fn stop(
        &self,
        credential: &str,
        activity: &ActivityKey,
        finished: bool,
    ) -> Result<StopOutcome, WorkflowError> {
        let span = self.span("stop", &activity.to_string());
        async {
            let caller = self.authenticate(credential).await?;
            let caller = &caller;
            self.transact(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let result = self.stop_in(&mut txn, caller, activity, finished).await;
                finish(txn, result).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    async fn stop_in(
        &self,
        txn: &mut Transaction,
        caller: &Caller,
        key: &ActivityKey,
        finished: bool,
    ) -> Attempt<StopOutcome> {
        let now = Utc::now();
        let mut parcel: ParcelAssignment = require(txn, &key.parcel).await?;
        let mut activity: Activity = require(txn, key).await?;
        if !parcel.activity_ids.contains(&key.id) {
            return Err(WorkflowError::not_found(format!("{key} on parcel {}", parcel.key)));
        }

        let transition = lifecycle::apply(
            &mut parcel,
            &ParcelEvent::Stop {
                operator: &caller.username,
                finished,
            },
            now,
        )?;
        if !activity.is_open() {
            return Err(WorkflowError::InvalidState(format!("{key} was already stopped")));
        }
        activity.ended_at = Some(now);

        let mut events = vec![WorkflowEvent::ActivityCompleted {
            activity: key.clone(),
            finished,
        }];
        let mut outcome = StopOutcome {
            activity: activity.clone(),
            parcel: parcel.clone(),
            credited_area_ha: None,
            operation: None,
            operation_completed: false,
            sheet_completed: false,
            open_activities: Vec::new(),
        };

        if transition.completed_parcel() {
            let area_ha = self.areas.area_ha(parcel.key.polygon).await?;
            let mut operation: Operation = require(txn, &parcel.key.operation).await?;
            let progress = self.aggregator.apply_completion(&mut operation, area_ha, now)?;
            info!(
                polygon = parcel.key.polygon,
                area_ha,
                previous_percent = progress.previous_percent,
                percent = progress.percent,
                "parcel credited to operation"
            );
            txn.put(operation.clone()).await?;

            if progress.completed_now {
                events.push(WorkflowEvent::OperationCompleted {
                    operation: operation.key.clone(),
                });
                outcome.operation_completed = true;
                outcome.sheet_completed = self.cascade_to_sheet(txn, &operation, now, &mut events).await?;
            }
            outcome.credited_area_ha = Some(area_ha);
            outcome.operation = Some(operation);

            for sibling in parcel.activity_keys().filter(|candidate| candidate != key) {
                let other: Activity = require(txn, &sibling).await?;
                if other.is_open() {
                    outcome.open_activities.push(sibling);
                }
            }
            if !outcome.open_activities.is_empty() {
                warn!(
                    parcel = %parcel.key,
                    open = outcome.open_activities.len(),
                    "parcel completed with other sessions still open"
                );
            }
        }

        txn.put(activity).await?;
        txn.put(parcel).await?;
        Ok((outcome, events))
    }

    /// Closes the sheet if `completed` was its last open operation.
    async fn cascade_to_sheet(
        &self,
        txn: &mut Transaction,
        completed: &Operation,
        now: chrono::DateTime<Utc>,
        events: &mut Vec<WorkflowEvent>,
    ) -> Result<bool, WorkflowError> {
        let mut sheet: Sheet = require(txn, &completed.key.sheet).await?;
        let mut operations = Vec::with_capacity(sheet.operation_codes.len());
        for key in sheet.operation_keys() {
            operations.push(require::<Operation>(txn, &key).await?);
        }

        if self.aggregator.close_sheet_if_complete(&mut sheet, &operations, now) {
            info!(sheet = %sheet.key, "execution sheet completed");
            events.push(WorkflowEvent::SheetCompleted { sheet: sheet.key });
            txn.put(sheet).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Attaches observations, a GPS track and photo references to a finished
    /// work session. Observations also land on the parcel, operation and sheet.
    pub async fn record_info(
        &self,
        credential: &str,
        activity: &ActivityKey,
        info: &ActivityInfo,
    ) -> Result<Activity, WorkflowError> {
        let span = self.span("record_info", &activity.to_string());
        async {
            let caller = self.authenticate(credential).await?;
            let caller = &caller;
            self.transact(|| async move {
                let mut txn = Transaction::begin(self.store.as_ref()).await?;
                let result = self.record_info_in(&mut txn, caller, activity, info).await;
                finish(txn, result).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    async fn record_info_in(
        &self,
        txn: &mut Transaction,
        caller: &Caller,
        key: &ActivityKey,
        info: &ActivityInfo,
    ) -> Attempt<Activity> {
        let mut activity: Activity = require(txn, key).await?;
        if activity.operator != caller.username {
            return Err(WorkflowError::PermissionDenied(format!(
                "{key} belongs to {}",
                activity.operator
            )));
        }
        if activity.is_open() {
            return Err(WorkflowError::InvalidState(format!("{key} has not been stopped yet")));
        }

        let observation = info.observation();
        let gps = info.gps_segment();

        if observation.is_some() || gps.is_some() {
            let mut parcel: ParcelAssignment = require(txn, &key.parcel).await?;
            if let Some(text) = observation {
                parcel.observations.push(text.to_string());
            }
            if let Some(segment) = gps {
                parcel.append_gps_path(segment);
            }
            txn.put(parcel).await?;
        }
        if let Some(text) = observation {
            let mut operation: Operation = require(txn, &key.parcel.operation).await?;
            let mut sheet: Sheet = require(txn, &key.parcel.sheet()).await?;
            operation.observations.push(text.to_string());
            sheet.observations.push(text.to_string());
            activity.observations.push(text.to_string());
            txn.put(operation).await?;
            txn.put(sheet).await?;
        }
        if let Some(segment) = gps {
            activity.append_gps_path(segment);
        }
        activity.photo_refs.extend(info.photos().map(str::to_string));

        txn.put(activity.clone()).await?;
        Ok((activity, Vec::new()))
    }

    /// Appends a free-text observation to an operation.
    pub async fn edit_operation(
        &self,
        credential: &str,
        operation: &OperationKey,
        observation: &str,
    ) -> Result<Operation, WorkflowError> {
        let span = self.span("edit_operation", &operation.to_string());
        async {
            let caller = self.authenticate(credential).await?;
            let observation = observation.trim();
            if observation.is_empty() {
                return Err(WorkflowError::InvalidState("observation is empty".to_string()));
            }
            let edited = self
                .transact(|| async move {
                    let mut txn = Transaction::begin(self.store.as_ref()).await?;
                    let result: Attempt<Operation> = async {
                        let mut op: Operation = require(&mut txn, operation).await?;
                        op.observations.push(observation.to_string());
                        txn.put(op.clone()).await?;
                        Ok((op, Vec::new()))
                    }
                    .await;
                    finish(txn, result).await
                })
                .await?;
            debug!(user = %caller.username, "operation observation added");
            Ok(edited)
        }
        .instrument(span)
        .await
    }

    pub(super) async fn authenticate(&self, credential: &str) -> Result<Caller, WorkflowError> {
        self.identity.authenticate(credential).await.map_err(|err| {
            self.metrics.record_rejection();
            WorkflowError::from(err)
        })
    }

    pub(super) fn span(&self, operation: &str, target: &str) -> tracing::Span {
        create_workflow_span(operation, target, &generate_correlation_id())
    }

    /// Retries `attempt` on conflict, then publishes the events of the
    /// committed attempt.
    async fn transact<T, F, Fut>(&self, mut attempt: F) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let result = self
            .retry
            .run(|number| {
                if number > 1 {
                    self.metrics.record_conflict_retry();
                }
                attempt()
            })
            .await;

        match result {
            Ok((value, events)) => {
                self.metrics.record_commit();
                self.publish(events).await;
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.metrics.record_conflict_exhausted();
                } else {
                    self.metrics.record_rejection();
                }
                warn!(kind = err.kind(), error = %err, "workflow operation failed");
                Err(err)
            }
        }
    }

    /// Retries a read-only report until its reads validate, so it never
    /// mixes records from before and after a concurrent commit.
    pub(super) async fn read_consistent<T, F, Fut>(&self, mut read: F) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let result = self
            .retry
            .run(|number| {
                if number > 1 {
                    self.metrics.record_conflict_retry();
                }
                read()
            })
            .await;
        if let Err(err) = &result {
            if err.is_retryable() {
                self.metrics.record_conflict_exhausted();
            }
            debug!(kind = err.kind(), error = %err, "report failed");
        }
        result
    }

    async fn publish(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            if let Err(err) = self.notifications.notify(&event).await {
                self.metrics.record_notification_failure();
                warn!(event = event.name(), error = %err, "notification delivery failed");
            }
        }
    }
}
