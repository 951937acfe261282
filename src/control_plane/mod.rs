//! Resilient calls against the asynchronous control plane.
//!
//! Every mutating request follows the same lifecycle: authenticate (lazily,
//! through the shared [`CredentialCache`]), submit with a single re-auth
//! retry on `401`, then poll the completion-status link returned by the
//! remote side until the operation reaches `Succeeded` or `Failed`.

mod error;
mod operation;
mod token;
mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

pub use error::ControlPlaneError;
pub use operation::{AsyncOperation, OperationState};
pub use token::{AuthToken, CredentialCache, ServicePrincipal};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody,
};

/// Header carrying the completion-status link of an accepted operation.
pub const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(1800);

/// Backoff and deadline applied while polling completion links.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll; doubled after every non-terminal poll.
    pub interval: Duration,
    /// Upper bound for the doubled delay.
    pub max_interval: Duration,
    /// Total time allowed before giving up with a timeout.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_interval: MAX_POLL_INTERVAL,
            timeout: OPERATION_TIMEOUT,
        }
    }
}

/// Single entry point for authenticated control-plane requests.
#[derive(Debug)]
pub struct ControlPlane<T: HttpTransport> {
    transport: T,
    credentials: Arc<CredentialCache>,
    policy: PollPolicy,
}

impl<T: HttpTransport> ControlPlane<T> {
    /// Creates a protocol driver sharing `credentials` with other callers.
    #[must_use]
    pub fn new(transport: T, credentials: Arc<CredentialCache>) -> Self {
        Self {
            transport,
            credentials,
            policy: PollPolicy::default(),
        }
    }

    /// Overrides the completion polling policy.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Submits a mutating request and waits for it to complete.
    ///
    /// `204 No Content` completes immediately. Any other accepted status
    /// (`200`, `201`, `202`) must carry a completion-status link which is
    /// polled until it reports a terminal state. The submit response body is
    /// returned (`Value::Null` when empty).
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Authentication`] when a token cannot be
    /// obtained or is rejected twice, [`ControlPlaneError::RemoteRejected`]
    /// for other non-accepted statuses, [`ControlPlaneError::Protocol`] when
    /// the completion link is missing, [`ControlPlaneError::OperationFailed`]
    /// when the operation reports `Failed`, [`ControlPlaneError::Transport`]
    /// when polling returns a non-2xx status and
    /// [`ControlPlaneError::Timeout`] when the poll deadline passes.
    pub async fn call(
        &self,
        method: HttpMethod,
        uri: &str,
        body: RequestBody,
    ) -> Result<Value, ControlPlaneError> {
        info!(method = method.as_str(), uri, "submitting operation");
        let response = self.send_authenticated(method, uri, body).await?;
        match response.status {
            204 => return Ok(Value::Null),
            200..=202 => {}
            status => {
                return Err(ControlPlaneError::RemoteRejected {
                    status,
                    body: response.body,
                });
            }
        }

        let link = response
            .header(ASYNC_OPERATION_HEADER)
            .ok_or_else(|| ControlPlaneError::Protocol {
                message: String::from("missing completion link"),
            })?;
        let operation = AsyncOperation::new(method, uri, link);
        self.track(operation).await?;
        parse_body(&response.body)
    }

    /// Reads a resource, returning `None` when the remote side reports `404`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Authentication`] on credential failures
    /// and [`ControlPlaneError::Transport`] for other non-2xx statuses.
    pub async fn get(&self, uri: &str) -> Result<Option<Value>, ControlPlaneError> {
        let response = self
            .send_authenticated(HttpMethod::Get, uri, RequestBody::Empty)
            .await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(ControlPlaneError::Transport {
                status: response.status,
                context: format!("GET {uri}"),
            });
        }
        parse_body(&response.body).map(Some)
    }

    async fn send_authenticated(
        &self,
        method: HttpMethod,
        uri: &str,
        body: RequestBody,
    ) -> Result<HttpResponse, ControlPlaneError> {
        let token = self.credentials.bearer(&self.transport).await?;
        let response = self
            .send_with_token(method, uri, body.clone(), token.clone())
            .await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug!(uri, "token rejected, refreshing once");
        let refreshed = self
            .credentials
            .refresh_after_rejection(&self.transport, &token)
            .await?;
        let retried = self.send_with_token(method, uri, body, refreshed).await?;
        if retried.status == 401 {
            return Err(ControlPlaneError::Authentication {
                message: String::from("token invalid after refresh"),
            });
        }
        Ok(retried)
    }

    async fn send_with_token(
        &self,
        method: HttpMethod,
        uri: &str,
        body: RequestBody,
        token: String,
    ) -> Result<HttpResponse, ControlPlaneError> {
        self.transport
            .send(HttpRequest {
                method,
                url: uri.to_owned(),
                bearer: Some(token),
                body,
            })
            .await
    }

    async fn track(&self, mut operation: AsyncOperation) -> Result<(), ControlPlaneError> {
        let started = Instant::now();
        let mut interval = self.policy.interval;

        loop {
            let token = self.credentials.bearer(&self.transport).await?;
            let response = self
                .send_with_token(
                    HttpMethod::Get,
                    &operation.status_link,
                    RequestBody::Empty,
                    token,
                )
                .await?;
            if !response.is_success() {
                return Err(ControlPlaneError::Transport {
                    status: response.status,
                    context: String::from("check_completion"),
                });
            }

            operation.observe(&response.body)?;
            match &operation.state {
                OperationState::Succeeded => {
                    debug!(uri = %operation.uri, "operation succeeded");
                    return Ok(());
                }
                OperationState::Failed => {
                    return Err(ControlPlaneError::OperationFailed {
                        payload: response.body,
                    });
                }
                OperationState::Pending(status) => {
                    debug!(uri = %operation.uri, status = %status, "operation still running");
                }
            }

            if started.elapsed() + interval > self.policy.timeout {
                return Err(ControlPlaneError::Timeout {
                    uri: operation.uri,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            sleep(interval).await;
            interval = interval.saturating_mul(2).min(self.policy.max_interval);
        }
    }
}

fn parse_body(body: &str) -> Result<Value, ControlPlaneError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|err| ControlPlaneError::decode("response body", &err))
}
