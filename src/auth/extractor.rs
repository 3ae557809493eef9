//! Actix-web extractor for the forwarded caller identity.
//!
//! # Security
//! - The session token is wrapped in `SecretString` as soon as it is read
//! - The token is never logged or exposed in debug output

use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::{FromRequest, HttpRequest, HttpResponse, ResponseError};
use secrecy::SecretString;
use std::future::{Ready, ready};

use crate::config::{GROUP_HEADER, SESSION_TOKEN_HEADER, USER_HEADER};
use crate::error::ErrorResponse;
use crate::services::Caller;

/// Read a header as trimmed, non-empty UTF-8.
fn header_value(req: &HttpRequest, header_name: &str) -> Option<String> {
    req.headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Rejected caller identity.
#[derive(Debug)]
pub struct AuthError {
    message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::UNAUTHORIZED).json(ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: self.message.clone(),
        })
    }
}

/// Extractor that requires the user and session token headers.
///
/// The group header is optional; a missing group is recorded as unknown.
///
/// ```ignore
/// async fn handler(identity: CallerIdentity) -> impl Responder {
///     // identity.caller.user, identity.caller.group
/// }
/// ```
#[derive(Debug)]
pub struct CallerIdentity {
    pub caller: Caller,
}

impl CallerIdentity {
    pub fn user(&self) -> &str {
        &self.caller.user
    }
}

impl FromRequest for CallerIdentity {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(user) = header_value(req, USER_HEADER) else {
            return ready(Err(AuthError {
                message: format!("Missing user. Provide {} header.", USER_HEADER),
            }));
        };

        // Used as a directory name under the staging root.
        if user.contains(['/', '\\']) || user == "." || user == ".." {
            return ready(Err(AuthError {
                message: "Invalid user name".to_string(),
            }));
        }

        let Some(token) = header_value(req, SESSION_TOKEN_HEADER) else {
            return ready(Err(AuthError {
                message: format!(
                    "Missing repository session. Provide {} header.",
                    SESSION_TOKEN_HEADER
                ),
            }));
        };

        let group = header_value(req, GROUP_HEADER).unwrap_or_default();

        ready(Ok(CallerIdentity {
            caller: Caller {
                user,
                group,
                session: SecretString::from(token),
            },
        }))
    }
}
