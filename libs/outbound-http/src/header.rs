//! Header names the client and its callers use most often.

use http::HeaderName;

pub use http::header::{ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};

pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub const X_ID_TOKEN: HeaderName = HeaderName::from_static("x-id-token");

pub const APPLICATION_JSON: &str = "application/json";
