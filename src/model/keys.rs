// Typed composite keys for execution-sheet records
//
// Every record is addressed by a key derived from its parent, so a parcel key
// carries its operation key which carries its sheet key. The canonical string
// form (`execution_<worksheet>_<code>_<polygon>_<activity>`) is only used at
// the edges (CLI, logs, notifications); inside the engine keys stay structured.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub type WorksheetId = i64;
pub type PolygonId = i64;

const SHEET_PREFIX: &str = "execution";
const SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("key '{key}' must start with 'execution_'")]
    MissingPrefix { key: String },
    #[error("key '{key}' has {found} segments, expected {expected}")]
    WrongSegmentCount {
        key: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid numeric id '{segment}' in key '{key}'")]
    InvalidNumber { key: String, segment: String },
    #[error("invalid activity id '{segment}' in key '{key}'")]
    InvalidActivityId { key: String, segment: String },
    #[error("operation code '{code}' must be non-empty and must not contain '_'")]
    InvalidOperationCode { code: String },
}

/// Operation code as declared on the worksheet (e.g. `"OP1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationCode(String);

impl OperationCode {
    pub fn new(code: impl Into<String>) -> Result<Self, KeyParseError> {
        let code = code.into();
        if code.trim().is_empty() || code.contains(SEPARATOR) {
            return Err(KeyParseError::InvalidOperationCode { code });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationCode {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OperationCode> for String {
    fn from(code: OperationCode) -> Self {
        code.0
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetKey(pub WorksheetId);

impl SheetKey {
    pub fn worksheet(&self) -> WorksheetId {
        self.0
    }

    pub fn operation(&self, code: OperationCode) -> OperationKey {
        OperationKey { sheet: *self, code }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    pub sheet: SheetKey,
    pub code: OperationCode,
}

impl OperationKey {
    pub fn new(worksheet: WorksheetId, code: OperationCode) -> Self {
        Self {
            sheet: SheetKey(worksheet),
            code,
        }
    }

    pub fn parcel(&self, polygon: PolygonId) -> ParcelKey {
        ParcelKey {
            operation: self.clone(),
            polygon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParcelKey {
    pub operation: OperationKey,
    pub polygon: PolygonId,
}

impl ParcelKey {
    pub fn sheet(&self) -> SheetKey {
        self.operation.sheet
    }

    /// Key for a new work session on this parcel.
    pub fn new_activity(&self) -> ActivityKey {
        ActivityKey {
            parcel: self.clone(),
            id: Uuid::new_v4(),
        }
    }

    pub fn activity(&self, id: Uuid) -> ActivityKey {
        ActivityKey {
            parcel: self.clone(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityKey {
    pub parcel: ParcelKey,
    pub id: Uuid,
}

impl fmt::Display for SheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHEET_PREFIX}{SEPARATOR}{}", self.0)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.sheet, self.code)
    }
}

impl fmt::Display for ParcelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.operation, self.polygon)
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.parcel, self.id)
    }
}

fn split_key(key: &str, expected: usize) -> Result<Vec<&str>, KeyParseError> {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    if segments.first() != Some(&SHEET_PREFIX) {
        return Err(KeyParseError::MissingPrefix {
            key: key.to_string(),
        });
    }
    if segments.len() != expected {
        return Err(KeyParseError::WrongSegmentCount {
            key: key.to_string(),
            expected,
            found: segments.len(),
        });
    }
    Ok(segments)
}

fn parse_id(key: &str, segment: &str) -> Result<i64, KeyParseError> {
    segment.parse::<i64>().map_err(|_| KeyParseError::InvalidNumber {
        key: key.to_string(),
        segment: segment.to_string(),
    })
}

impl FromStr for SheetKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split_key(s, 2)?;
        Ok(SheetKey(parse_id(s, segments[1])?))
    }
}

impl FromStr for OperationKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split_key(s, 3)?;
        Ok(OperationKey::new(
            parse_id(s, segments[1])?,
            OperationCode::new(segments[2])?,
        ))
    }
}

impl FromStr for ParcelKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split_key(s, 4)?;
        let operation = OperationKey::new(parse_id(s, segments[1])?, OperationCode::new(segments[2])?);
        Ok(operation.parcel(parse_id(s, segments[3])?))
    }
}

impl FromStr for ActivityKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = split_key(s, 5)?;
        let operation = OperationKey::new(parse_id(s, segments[1])?, OperationCode::new(segments[2])?);
        let id = Uuid::parse_str(segments[4]).map_err(|_| KeyParseError::InvalidActivityId {
            key: s.to_string(),
            segment: segments[4].to_string(),
        })?;
        Ok(operation.parcel(parse_id(s, segments[3])?).activity(id))
    }
}
