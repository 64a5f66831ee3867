//! HTTP request/response exchange
//!
//! The long polling transport only needs this much of an HTTP server, so any
//! framework can drive it through an adapter.

use super::error::BridgeResult;
use async_trait::async_trait;

/// One HTTP request and the response being built for it
#[async_trait]
pub trait Exchange: Send {
    /// Request method, upper case
    fn method(&self) -> &str;

    /// Request URI including the query string
    fn uri(&self) -> &str;

    /// First value of a request header
    fn header(&self, name: &str) -> Option<&str>;

    /// Next chunk of the request body, `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Option<BridgeResult<Vec<u8>>>;

    fn set_status(&mut self, status: u16);

    fn set_header(&mut self, name: &str, value: &str);

    /// Append to the response body
    async fn write(&mut self, data: String) -> BridgeResult<()>;

    /// Finish the response
    async fn close(&mut self) -> BridgeResult<()>;
}

/// Read the whole request body as UTF-8 text
pub(crate) async fn read_body<X>(exchange: &mut X) -> BridgeResult<String>
where
    X: Exchange + ?Sized,
{
    let mut body = Vec::new();
    while let Some(chunk) = exchange.next_chunk().await {
        body.extend(chunk?);
    }

    String::from_utf8(body).map_err(|err| super::BridgeError::InvalidBody(err.to_string()))
}
