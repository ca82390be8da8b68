// Parcel assignment state machine
//
// Every status change of a parcel goes through `decide`, a pure table over
// (status, event). `apply` runs the decision and updates the fields the status
// is derived from, so a parcel that went through it always satisfies
// `status == derived_status()`.

use thiserror::Error;

use crate::external::Caller;
use crate::model::{ParcelAssignment, ParcelStatus, Timestamp};

#[derive(Debug, Clone, Copy)]
pub enum ParcelEvent<'a> {
    /// A partner representative adds `operator` to the parcel.
    Assign {
        operator: &'a Caller,
        assigner: &'a Caller,
    },
    /// An assigned operator opens a work session.
    Start { operator: &'a str },
    /// An assigned operator closes a work session.
    Stop { operator: &'a str, finished: bool },
}

impl ParcelEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ParcelEvent::Assign { .. } => "assign",
            ParcelEvent::Start { .. } => "start",
            ParcelEvent::Stop { .. } => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {event} a parcel that is {status}")]
    InvalidState {
        status: ParcelStatus,
        event: &'static str,
    },
    #[error("{0}")]
    PermissionDenied(String),
}

/// Outcome of an applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ParcelStatus,
    pub to: ParcelStatus,
}

impl Transition {
    pub fn completed_parcel(&self) -> bool {
        self.from != ParcelStatus::Completed && self.to == ParcelStatus::Completed
    }
}

fn require_member(parcel: &ParcelAssignment, operator: &str) -> Result<(), TransitionError> {
    if parcel.has_operator(operator) {
        Ok(())
    } else {
        Err(TransitionError::PermissionDenied(format!(
            "{operator} is not assigned to parcel {}",
            parcel.key
        )))
    }
}

/// Target status for `event`, without touching the parcel.
pub fn decide(parcel: &ParcelAssignment, event: &ParcelEvent<'_>) -> Result<ParcelStatus, TransitionError> {
    use ParcelStatus::*;

    let status = parcel.status;
    let invalid = || TransitionError::InvalidState {
        status,
        event: event.name(),
    };

    match (status, event) {
        (_, ParcelEvent::Assign { operator, assigner }) => {
            if !operator.is_operator() {
                return Err(TransitionError::PermissionDenied(format!(
                    "{} does not hold the operator role",
                    operator.username
                )));
            }
            if !assigner.shares_organization_with(operator) {
                return Err(TransitionError::PermissionDenied(format!(
                    "{} and {} belong to different organizations",
                    assigner.username, operator.username
                )));
            }
            Ok(if status == Unassigned { Assigned } else { status })
        }

        (Unassigned | Completed, ParcelEvent::Start { .. }) => Err(invalid()),
        (Assigned | InProgress, ParcelEvent::Start { operator }) => {
            require_member(parcel, operator)?;
            Ok(InProgress)
        }

        (InProgress, ParcelEvent::Stop { operator, finished }) => {
            require_member(parcel, operator)?;
            Ok(if *finished { Completed } else { InProgress })
        }
        (Unassigned | Assigned | Completed, ParcelEvent::Stop { .. }) => Err(invalid()),
    }
}

/// Applies `event` to the parcel at `now`.
pub fn apply(
    parcel: &mut ParcelAssignment,
    event: &ParcelEvent<'_>,
    now: Timestamp,
) -> Result<Transition, TransitionError> {
    let from = parcel.status;
    let to = decide(parcel, event)?;

    match event {
        ParcelEvent::Assign { operator, .. } => {
            if !parcel.has_operator(&operator.username) {
                parcel.operators.push(operator.username.clone());
            }
        }
        ParcelEvent::Start { .. } => {
            crate::model::entities::touch(&mut parcel.started_at, &mut parcel.last_activity_at, now);
        }
        ParcelEvent::Stop { finished, .. } => {
            parcel.last_activity_at = Some(now);
            if *finished {
                parcel.ended_at = Some(now);
            }
        }
    }
    parcel.status = to;
    debug_assert_eq!(parcel.status, parcel.derived_status());

    Ok(Transition { from, to })
}
