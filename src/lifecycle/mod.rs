// Status rules for parcels and completion roll-up for operations and sheets

pub mod parcel;
pub mod progress;

pub use parcel::{apply, decide, ParcelEvent, Transition, TransitionError};
pub use progress::{average_percent, CompletionState, OperationProgress, ProgressAggregator};
