//! HTTP transport backed by reqwest.
//!
//! Each started request runs as its own tokio task that streams the response
//! body and reports it chunk by chunk. Cancelling aborts that tokio task, so
//! no further events are delivered after [`TransportHandle::cancel`] returns
//! (apart from one already in progress).

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::runtime::{Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, instrument, warn};

use super::{Timeouts, Transport, TransportError, TransportHandle, TransportObserver};
use crate::request::{Request, Response};

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

// Used only when a transport is created outside of any tokio runtime, e.g.
// by `Session::shared()` from synchronous code.
static FALLBACK_RUNTIME: LazyLock<Result<Runtime, String>> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name("netsession-transport")
        .enable_all()
        .build()
        .map_err(|e| e.to_string())
});

/// [`Transport`] implementation that performs requests with reqwest.
///
/// Created once and shared by a session; the inner client pools connections
/// across tasks.
///
/// # Example
///
/// ```no_run
/// use netsession_core::{ReqwestTransport, Session};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = ReqwestTransport::new()?;
/// let session = Session::builder().transport(Arc::new(transport)).build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    runtime: Handle,
}

impl ReqwestTransport {
    /// Creates a transport with a default client (30s connect timeout, gzip).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the client cannot be built or no tokio
    /// runtime is available to run requests on.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .map_err(TransportError::Network)?;
        Self::with_client(client)
    }

    /// Wraps an existing reqwest client.
    ///
    /// Requests run on the current tokio runtime if there is one, otherwise on
    /// a lazily created background runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if the background runtime cannot be built.
    pub fn with_client(client: Client) -> Result<Self, TransportError> {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => match &*FALLBACK_RUNTIME {
                Ok(runtime) => runtime.handle().clone(),
                Err(message) => {
                    return Err(TransportError::Other(format!(
                        "failed to build transport runtime: {message}"
                    )));
                }
            },
        };
        Ok(Self { client, runtime })
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    fn start(
        &self,
        request: Request,
        timeouts: Timeouts,
        observer: Arc<dyn TransportObserver>,
    ) -> Box<dyn TransportHandle> {
        let join = self
            .runtime
            .spawn(run_exchange(self.client.clone(), request, timeouts, observer));
        Box::new(SpawnedExchange {
            abort: join.abort_handle(),
        })
    }
}

struct SpawnedExchange {
    abort: AbortHandle,
}

impl TransportHandle for SpawnedExchange {
    fn cancel(&self) {
        self.abort.abort();
    }
}

#[instrument(level = "debug", skip_all, fields(method = %request.method(), url = %request.url()))]
async fn run_exchange(
    client: Client,
    request: Request,
    timeouts: Timeouts,
    observer: Arc<dyn TransportObserver>,
) {
    match exchange(&client, &request, timeouts, observer.as_ref()).await {
        Ok(bytes) => {
            debug!(bytes, "exchange finished");
            observer.on_finished();
        }
        Err(error) => {
            warn!(error = %error, "exchange failed");
            observer.on_failed(error);
        }
    }
}

/// Sends the request and streams the body to `observer`, returning the body size.
async fn exchange(
    client: &Client,
    request: &Request,
    timeouts: Timeouts,
    observer: &dyn TransportObserver,
) -> Result<u64, TransportError> {
    let mut builder = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone())
        .timeout(timeouts.resource);
    if let Some(body) = request.body() {
        builder = builder.body(body.clone());
    }

    // A per-request timeout overrides the session-wide idle timeout.
    let idle = request.timeout().unwrap_or(timeouts.request);

    let response = tokio::time::timeout(idle, builder.send())
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(TransportError::from_reqwest)?;

    debug!(status = response.status().as_u16(), "response received");
    observer.on_response(Response::new(
        response.url().clone(),
        response.status(),
        response.headers().clone(),
    ));

    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    loop {
        match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(None) => return Ok(received),
            Ok(Some(chunk)) => {
                let chunk = chunk.map_err(TransportError::from_reqwest)?;
                received += chunk.len() as u64;
                observer.on_data(chunk);
            }
        }
    }
}
