//! Query responses
//!
//! A [`Response`] serializes to a compact JSON object with single-letter
//! keys, in this order:
//! - `t`: response type code
//! - `e`: error type code, only for runtime errors that carry one
//! - `r`: data array
//! - `b`: backtrace, when present
//! - `p`: profile, when present
//! - `n`: note codes, only for partial and sequence successes

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// Kind of response sent back for a query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResponseType {
    SuccessAtom = 1,
    SuccessSequence = 2,
    SuccessPartial = 3,
    WaitComplete = 4,
    ServerInfo = 5,
    ClientError = 16,
    CompileError = 17,
    RuntimeError = 18,
}

impl ResponseType {
    /// Wire code
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Check whether this type reports an error
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::ClientError | Self::CompileError | Self::RuntimeError
        )
    }

    const fn carries_notes(self) -> bool {
        matches!(self, Self::SuccessPartial | Self::SuccessSequence)
    }
}

/// Classification of a runtime error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorType {
    Internal = 1_000_000,
    ResourceLimit = 2_000_000,
    QueryLogic = 3_000_000,
    NonExistence = 3_100_000,
    OpFailed = 4_100_000,
    OpIndeterminate = 4_200_000,
    User = 5_000_000,
    PermissionError = 6_000_000,
}

impl ErrorType {
    /// Wire code
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Extra information about a sequence response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResponseNote {
    SequenceFeed = 1,
    AtomFeed = 2,
    OrderByLimitFeed = 3,
    UnionedFeed = 4,
    IncludesStates = 5,
}

impl ResponseNote {
    /// Wire code
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Response to one query
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    response_type: ResponseType,
    error_type: Option<ErrorType>,
    data: Vec<Value>,
    backtrace: Option<Value>,
    profile: Option<Value>,
    notes: Vec<ResponseNote>,
}

impl Response {
    /// Single-value success
    #[must_use]
    pub fn atom(value: Value) -> Self {
        Self::with_data(ResponseType::SuccessAtom, vec![value])
    }

    /// Complete sequence success
    #[must_use]
    pub const fn sequence(values: Vec<Value>) -> Self {
        Self::with_data(ResponseType::SuccessSequence, values)
    }

    /// Partial sequence success; more batches follow
    #[must_use]
    pub const fn partial(values: Vec<Value>) -> Self {
        Self::with_data(ResponseType::SuccessPartial, values)
    }

    /// Error response carrying `message` and an empty backtrace
    #[must_use]
    pub fn error(
        response_type: ResponseType,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            response_type,
            error_type: Some(error_type),
            data: vec![Value::String(message.into())],
            backtrace: Some(Value::Array(Vec::new())),
            profile: None,
            notes: Vec::new(),
        }
    }

    const fn with_data(response_type: ResponseType, data: Vec<Value>) -> Self {
        Self {
            response_type,
            error_type: None,
            data,
            backtrace: None,
            profile: None,
            notes: Vec::new(),
        }
    }

    /// Attach sequence notes
    #[must_use]
    pub fn with_notes(mut self, notes: impl IntoIterator<Item = ResponseNote>) -> Self {
        self.notes.extend(notes);
        self
    }

    /// Attach a query profile
    #[must_use]
    pub fn with_profile(mut self, profile: Value) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub const fn response_type(&self) -> ResponseType {
        self.response_type
    }

    #[must_use]
    pub const fn error_type(&self) -> Option<ErrorType> {
        self.error_type
    }

    #[must_use]
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    #[must_use]
    pub fn notes(&self) -> &[ResponseNote] {
        &self.notes
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("t", &self.response_type.code())?;
        if self.response_type == ResponseType::RuntimeError
            && let Some(error_type) = self.error_type
        {
            map.serialize_entry("e", &error_type.code())?;
        }
        map.serialize_entry("r", &self.data)?;
        if let Some(backtrace) = &self.backtrace {
            map.serialize_entry("b", backtrace)?;
        }
        if let Some(profile) = &self.profile {
            map.serialize_entry("p", profile)?;
        }
        if self.response_type.carries_notes() {
            let notes: Vec<i32> = self.notes.iter().map(|n| n.code()).collect();
            map.serialize_entry("n", &notes)?;
        }
        map.end()
    }
}
