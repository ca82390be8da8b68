// Progress accumulation and the operation -> sheet completion cascade

use serde::Serialize;

use crate::geodesy::GeometryError;
use crate::model::{Operation, Sheet, Timestamp};

pub const COMPLETE_PERCENT: f64 = 100.0;

/// Result of crediting one finished parcel to its operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationProgress {
    pub previous_percent: f64,
    pub percent: f64,
    pub contribution_percent: f64,
    /// The operation reached 100% with this contribution.
    pub completed_now: bool,
}

/// Coarse completion label derived from a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionState {
    NotStarted,
    InProgress,
    Completed,
}

impl CompletionState {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= COMPLETE_PERCENT {
            CompletionState::Completed
        } else if percent > 0.0 {
            CompletionState::InProgress
        } else {
            CompletionState::NotStarted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressAggregator {
    completion_tolerance: f64,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl ProgressAggregator {
    /// `completion_tolerance` is how many percentage points short of 100 still
    /// count as complete, absorbing floating-point residue from summing areas.
    pub fn new(completion_tolerance: f64) -> Self {
        Self {
            completion_tolerance: completion_tolerance.max(0.0),
        }
    }

    /// Share of the operation's declared area covered by `area_ha`, in percent.
    ///
    /// An operation declared with no area is covered by any completion.
    pub fn contribution_percent(&self, area_ha: f64, total_area_ha: f64) -> f64 {
        if total_area_ha <= 0.0 {
            COMPLETE_PERCENT
        } else {
            area_ha / total_area_ha * COMPLETE_PERCENT
        }
    }

    /// Adds a finished parcel's area to the operation.
    ///
    /// Accumulates onto the stored percentage, never recomputes it; clamps at
    /// 100 and sets the operation end the first time 100 is reached. A
    /// non-finite or negative area is rejected and leaves the operation as is.
    pub fn apply_completion(
        &self,
        operation: &mut Operation,
        area_ha: f64,
        now: Timestamp,
    ) -> Result<OperationProgress, GeometryError> {
        if !area_ha.is_finite() || area_ha < 0.0 {
            return Err(GeometryError::InvalidArea { area_ha });
        }
        let previous = operation.percent_complete;
        let contribution = self.contribution_percent(area_ha, operation.total_area_ha);

        let mut percent = (previous + contribution).min(COMPLETE_PERCENT);
        if percent >= COMPLETE_PERCENT - self.completion_tolerance {
            percent = COMPLETE_PERCENT;
        }
        let percent = percent.max(previous);
        operation.percent_complete = percent;

        let completed_now = percent >= COMPLETE_PERCENT && operation.ended_at.is_none();
        if completed_now {
            operation.ended_at = Some(now);
        }

        Ok(OperationProgress {
            previous_percent: previous,
            percent,
            contribution_percent: contribution,
            completed_now,
        })
    }

    /// Sets the sheet end when every one of its operations is complete.
    ///
    /// `operations` must be all operations of the sheet. Returns true when this
    /// call closed the sheet.
    pub fn close_sheet_if_complete(&self, sheet: &mut Sheet, operations: &[Operation], now: Timestamp) -> bool {
        if sheet.ended_at.is_some() || operations.is_empty() {
            return false;
        }
        if operations.iter().all(|op| op.percent_complete >= COMPLETE_PERCENT) {
            sheet.ended_at = Some(now);
            return true;
        }
        false
    }
}

/// Mean completion over a sheet's operations; 0 with no operations.
pub fn average_percent(operations: &[Operation]) -> f64 {
    if operations.is_empty() {
        return 0.0;
    }
    operations.iter().map(|op| op.percent_complete).sum::<f64>() / operations.len() as f64
}
