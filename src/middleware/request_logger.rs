//! Request logging for the import API.
//!
//! Uploads are logged with their declared body size and event streams with the
//! id they resume from, so a slow import or a reconnect storm shows up in the
//! logs without turning on debug output.

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::{StatusCode, header};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::api::events::LAST_EVENT_ID_HEADER;
use crate::config::USER_HEADER;

/// What gets logged about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    pub user: String,
    /// Declared body size, uploads only.
    pub upload_bytes: Option<u64>,
    /// Resume point of an event stream.
    pub resume_from: Option<String>,
}

impl RequestSummary {
    pub fn from_request(req: &ServiceRequest) -> Self {
        let header_str = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            method: req.method().to_string(),
            path: req.path().to_string(),
            remote_addr: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string(),
            user: header_str(USER_HEADER).unwrap_or_else(|| "anonymous".to_string()),
            upload_bytes: header_str(header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0),
            resume_from: header_str(LAST_EVENT_ID_HEADER),
        }
    }

    fn is_event_stream(&self) -> bool {
        self.path.ends_with("/events")
    }
}

/// How a finished request is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    StreamOpened,
    ClientError,
    ServerError,
}

impl Outcome {
    pub fn classify(summary: &RequestSummary, status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::ServerError
        } else if status.is_client_error() {
            Outcome::ClientError
        } else if summary.is_event_stream() {
            Outcome::StreamOpened
        } else {
            Outcome::Completed
        }
    }
}

fn log_finished(summary: &RequestSummary, status: StatusCode, elapsed: Duration) {
    let outcome = Outcome::classify(summary, status);
    let status = status.as_u16();
    let duration_ms = elapsed.as_millis() as u64;
    let s = summary;

    match outcome {
        Outcome::Completed => {
            info!(target: "api", method = %s.method, path = %s.path, user = %s.user, status, duration_ms, "Request completed")
        }
        Outcome::StreamOpened => {
            info!(target: "api", path = %s.path, user = %s.user, resume_from = ?s.resume_from, "Event stream opened")
        }
        Outcome::ClientError => {
            warn!(target: "api", method = %s.method, path = %s.path, user = %s.user, status, duration_ms, "Request rejected")
        }
        Outcome::ServerError => {
            warn!(target: "api", method = %s.method, path = %s.path, user = %s.user, status, duration_ms, "Request failed")
        }
    }
}

/// Request logger middleware factory.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware { service }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let summary = RequestSummary::from_request(&req);

        if let Some(bytes) = summary.upload_bytes {
            info!(
                target: "api",
                method = %summary.method,
                path = %summary.path,
                remote_addr = %summary.remote_addr,
                user = %summary.user,
                upload_bytes = bytes,
                "Upload started"
            );
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            log_finished(&summary, res.status(), start.elapsed());
            Ok(res)
        })
    }
}
