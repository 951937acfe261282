//! HTTP transport seam used by the control-plane protocol.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::ControlPlaneError;
use crate::CloudFuture;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP verbs issued against the control plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl HttpMethod {
    /// Returns the upper-case verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Request payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON document.
    Json(Value),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
}

/// Outgoing HTTP request.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    /// Bearer token sent in the `Authorization` header.
    pub bearer: Option<String>,
    /// Payload.
    pub body: RequestBody,
}

/// Response returned by a transport.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers keyed by lower-case name.
    pub headers: BTreeMap<String, String>,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// Looks a header up by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends HTTP requests on behalf of the protocol.
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the raw response.
    fn send(&self, request: HttpRequest) -> CloudFuture<'_, HttpResponse, ControlPlaneError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn send(&self, request: HttpRequest) -> CloudFuture<'_, HttpResponse, ControlPlaneError> {
        (**self).send(request)
    }
}

/// Transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default request timeout.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> CloudFuture<'_, HttpResponse, ControlPlaneError> {
        Box::pin(async move {
            let url = request.url.as_str();
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(url),
                HttpMethod::Put => self.client.put(url),
                HttpMethod::Post => self.client.post(url),
                HttpMethod::Patch => self.client.patch(url),
                HttpMethod::Delete => self.client.delete(url),
            };
            if let Some(token) = &request.bearer {
                builder = builder.bearer_auth(token);
            }
            builder = match &request.body {
                RequestBody::Empty if request.method == HttpMethod::Get => builder,
                RequestBody::Empty => builder.header(reqwest::header::CONTENT_LENGTH, 0_u64),
                RequestBody::Json(document) => builder.json(document),
                RequestBody::Form(fields) => builder.form(fields),
            };

            let response = builder
                .send()
                .await
                .map_err(|err| ControlPlaneError::Http {
                    message: err.to_string(),
                })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|text| (name.as_str().to_owned(), text.to_owned()))
                })
                .collect();
            let body = response
                .text()
                .await
                .map_err(|err| ControlPlaneError::Http {
                    message: err.to_string(),
                })?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}
