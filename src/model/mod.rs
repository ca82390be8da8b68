// Execution-sheet data model: typed keys and the four tracked records

pub mod entities;
pub mod keys;

pub use entities::{Activity, Operation, ParcelAssignment, ParcelStatus, Sheet, Timestamp};
pub use keys::{
    ActivityKey, KeyParseError, OperationCode, OperationKey, ParcelKey, PolygonId, SheetKey,
    WorksheetId,
};
