//! Outbound transport used to deliver notifications to the control service. Each call is
//! attempted at most once; retry policy belongs to the callers.

use crate::config::NotifyMethod;
use crate::response::NotifyResponse;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request, Response};
use thiserror::Error;
use tracing::{error, info, instrument};

/// One notification to be delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyRequest {
    pub method: NotifyMethod,
    pub url: String,

    /// Url encoded form body. For GET requests it becomes the query string.
    pub body: String,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to build the request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),

    #[error("The request failed: {0}")]
    RequestFailed(hyper::Error),

    #[error("Failed to read the response body: {0}")]
    BodyReadFailed(hyper::Error),

    #[error("No response was received")]
    NoResponse,
}

/// Sends notifications and returns the raw response. The returned future must not depend on
/// the transport's lifetime, since the session actor awaits it alongside other work.
pub trait NotifyTransport: Send + Sync {
    fn send(
        &self,
        request: NotifyRequest,
    ) -> BoxFuture<'static, Result<NotifyResponse, TransportError>>;
}

/// Transport that delivers notifications over plain HTTP with hyper
#[derive(Clone, Default)]
pub struct HyperTransport {
    client: Client<HttpConnector>,
}

impl HyperTransport {
    pub fn new() -> Self {
        HyperTransport {
            client: Client::new(),
        }
    }
}

impl NotifyTransport for HyperTransport {
    fn send(
        &self,
        request: NotifyRequest,
    ) -> BoxFuture<'static, Result<NotifyResponse, TransportError>> {
        execute_http_call(self.client.clone(), request).boxed()
    }
}

#[instrument(skip(client, request), fields(url = %request.url, method = ?request.method))]
async fn execute_http_call(
    client: Client<HttpConnector>,
    request: NotifyRequest,
) -> Result<NotifyResponse, TransportError> {
    let request = build_request(request)?;
    let response = match client.request(request).await {
        Ok(response) => response,
        Err(error) => {
            error!("Error performing request: {}", error);
            return Err(TransportError::RequestFailed(error));
        }
    };

    info!("Control service responded with {}", response.status());

    let head = format_head(&response);
    let body = match hyper::body::to_bytes(response.into_body()).await {
        Ok(bytes) => bytes,
        Err(error) => {
            error!("Failed to read response body: {}", error);
            return Err(TransportError::BodyReadFailed(error));
        }
    };

    let mut chunks = vec![head];
    if !body.is_empty() {
        chunks.push(body);
    }

    Ok(NotifyResponse::from_chunks(chunks))
}

fn build_request(request: NotifyRequest) -> Result<Request<Body>, TransportError> {
    let request = match request.method {
        NotifyMethod::Get => {
            let separator = if request.url.contains('?') { '&' } else { '?' };
            let uri = if request.body.is_empty() {
                request.url
            } else {
                format!("{}{}{}", request.url, separator, request.body)
            };

            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())?
        }

        NotifyMethod::Post => Request::builder()
            .method(Method::POST)
            .uri(request.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(request.body))?,
    };

    Ok(request)
}

/// Rebuilds the status line and header block as they appeared on the wire, so the response
/// interpreter can work over the same bytes whichever transport delivered them.
fn format_head(response: &Response<Body>) -> Bytes {
    let status = response.status();
    let mut head = BytesMut::new();
    head.extend_from_slice(
        format!(
            "{:?} {} {}\r\n",
            response.version(),
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );

    for (name, value) in response.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(b"\r\n");
    head.freeze()
}
