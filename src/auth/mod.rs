//! Caller identity supplied by the fronting layer.
//!
//! The import server does not authenticate users itself. A reverse proxy or
//! login service in front of it forwards the user, group and repository session
//! token in request headers.

mod extractor;

pub use extractor::{AuthError, CallerIdentity};
