//! blockser wire - query/response framing
//!
//! Queries arrive as `token (i64 LE) | size (u32 LE) | JSON body`;
//! responses go out as `token (i64 LE) | size (u32 LE) | JSON payload`.

pub mod error;
pub mod protocol;
pub mod response;

pub use error::{Result, WireError};
pub use protocol::{Query, QueryHandler, WireProtocol, serve_connection};
pub use response::{ErrorType, Response, ResponseNote, ResponseType};
