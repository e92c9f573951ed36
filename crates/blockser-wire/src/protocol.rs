//! Query framing over a byte stream
//!
//! Frame layout, both directions:
//!
//! ```text
//! | token: i64 LE | size: u32 LE | JSON: size bytes |
//! ```
//!
//! Oversized queries are answered with a client error and end the
//! connection. Unparseable queries are answered the same way but the
//! connection stays usable.

use crate::error::{Result, WireError};
use crate::response::{ErrorType, Response, ResponseType};
use async_trait::async_trait;
use blockser_common::WireConfig;
use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const FRAME_HEADER_SIZE: usize = 12;

const UNPARSEABLE_QUERY_MESSAGE: &str = "Client is buggy (failed to deserialize query).";

/// A decoded query frame
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Client-chosen token echoed back in the response
    pub token: i64,
    /// Parsed JSON body
    pub body: Value,
}

/// Answers decoded queries
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: Query) -> Response;
}

/// Frame codec with configured size limits
#[derive(Clone, Debug, Default)]
pub struct WireProtocol {
    config: WireConfig,
}

impl WireProtocol {
    #[must_use]
    pub const fn new(config: WireConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &WireConfig {
        &self.config
    }

    /// Read one query frame
    ///
    /// Returns `Ok(None)` when the body was not valid JSON; the client has
    /// already been sent an error and the next frame can be read. An
    /// oversized query is answered and then reported as
    /// [`WireError::QueryTooLarge`]; the caller must close the connection.
    pub async fn read_query<S>(&self, stream: &mut S) -> Result<Option<Query>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let token = stream.read_i64_le().await?;
        let size = stream.read_u32_le().await?;

        let limit = self.config.max_query_size;
        if size >= limit {
            warn!(token, size, limit, "rejecting oversized query");
            let response = Response::error(
                ResponseType::ClientError,
                ErrorType::ResourceLimit,
                format!(
                    "Query size ({size}) greater than maximum ({}).",
                    limit.saturating_sub(1)
                ),
            );
            self.send_response(stream, token, &response).await?;
            return Err(WireError::QueryTooLarge { size, limit });
        }

        let mut body = vec![0u8; size as usize];
        stream.read_exact(&mut body).await?;

        match serde_json::from_slice(&body) {
            Ok(body) => Ok(Some(Query { token, body })),
            Err(e) => {
                debug!(token, error = %e, "failed to parse query");
                let response = Response::error(
                    ResponseType::ClientError,
                    ErrorType::ResourceLimit,
                    UNPARSEABLE_QUERY_MESSAGE,
                );
                self.send_response(stream, token, &response).await?;
                Ok(None)
            }
        }
    }

    /// Encode a response frame
    ///
    /// A payload at or above the response limit is replaced by a runtime
    /// error describing its size.
    pub fn encode_response(&self, token: i64, response: &Response) -> Result<BytesMut> {
        let payload = serde_json::to_vec(response)?;
        let limit = self.config.max_response_size;

        match u32::try_from(payload.len()) {
            Ok(size) if size < limit => Ok(frame(token, size, &payload)),
            _ => {
                warn!(token, size = payload.len(), limit, "response too large");
                let replacement = Response::error(
                    ResponseType::RuntimeError,
                    ErrorType::ResourceLimit,
                    format!(
                        "Response size ({}) greater than maximum ({}).",
                        payload.len(),
                        limit.saturating_sub(1)
                    ),
                );
                let payload = serde_json::to_vec(&replacement)?;
                let size = u32::try_from(payload.len()).map_err(|_| {
                    WireError::Io(std::io::Error::other("error response exceeds frame size"))
                })?;
                Ok(frame(token, size, &payload))
            }
        }
    }

    /// Write one response frame
    pub async fn send_response<S>(
        &self,
        stream: &mut S,
        token: i64,
        response: &Response,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let frame = self.encode_response(token, response)?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn frame(token: i64, size: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_i64_le(token);
    buf.put_u32_le(size);
    buf.put_slice(payload);
    buf
}

/// Answer queries on `stream` until the client disconnects
///
/// Returns `Ok(())` when the client closes the connection between frames
/// and the error otherwise, including for oversized queries.
pub async fn serve_connection<S, H>(
    protocol: &WireProtocol,
    stream: &mut S,
    handler: &H,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: QueryHandler + ?Sized,
{
    let mut served = 0u64;
    loop {
        let query = match protocol.read_query(stream).await {
            Ok(Some(query)) => query,
            Ok(None) => continue,
            Err(e) if e.is_disconnect() => {
                info!(served, "client disconnected");
                return Ok(());
            }
            Err(e) => {
                warn!(served, error = %e, "closing connection");
                return Err(e);
            }
        };

        let token = query.token;
        let response = handler.handle(query).await;
        protocol.send_response(stream, token, &response).await?;
        served += 1;
    }
}
