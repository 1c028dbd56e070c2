//! Outbound HTTP client
//!
//! HTTP/1.1 request orchestration over hyper with:
//!
//! - a base URL that relative call targets resolve against
//! - base options merged with per-call options (headers merge per name)
//! - an optional [`RequestInterceptor`] that sees every request last
//! - an optional response transform ([`to_buffer_response`], [`to_json_response`]
//!   or your own)
//! - per-call lifecycle [telemetry](telemetry)
//! - a keep-alive [`Agent`] shared by clients that want to pool connections
//!
//! # Examples
//!
//! ## Raw responses
//!
//! ```no_run
//! use outbound_http::{ClientConfig, HttpClient, header};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(
//!     ClientConfig::new("http://localhost:8080/api/")?
//!         .with_header(header::X_CORRELATION_ID, "c0ffee")?,
//! )?;
//!
//! let response = client.post("users", r#"{"name":"ada"}"#).send().await?;
//! let status = response.status();
//! println!("{status} {}", response.text().await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## JSON mode with telemetry
//!
//! ```no_run
//! use outbound_http::{ClientConfig, TelemetryRecorder, json_client};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = json_client(ClientConfig::from_env()?)?;
//! let recorder = TelemetryRecorder::new();
//!
//! let created = client
//!     .request(http::Method::POST, "widgets")
//!     .json(&json!({"size": 3}))?
//!     .telemetry(recorder.clone())
//!     .await?;
//!
//! println!("{:?} -> {}", created.status_class, created.data);
//! println!("{:?}", recorder.kinds());
//! # Ok(())
//! # }
//! ```
//!
//! ## Interceptors
//!
//! ```no_run
//! use outbound_http::{ClientConfig, HttpClient, interceptor_fn};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(ClientConfig::new("http://localhost:8080")?)?
//!     .with_interceptor(interceptor_fn(|request| {
//!         request
//!             .options
//!             .headers
//!             .insert("x-user-agent", http::HeaderValue::from_static("billing"));
//!     }));
//!
//! let status = client.get("/health").await?.status();
//! assert!(status.is_success());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod body;
mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod header;
pub mod options;
pub mod response;
pub mod telemetry;
pub mod transform;

pub use agent::{Agent, AgentConfig, BoxError};
pub use body::{ByteStream, Consumable, assert_consumable, is_consumable};
pub use call::CallBuilder;
pub use client::{
    HttpClient, InterceptorFn, OutboundRequest, RequestInterceptor, Target, interceptor_fn,
    json_client,
};
pub use config::{ClientConfig, Protocol};
pub use error::{ErrorKind, HttpError};
pub use options::RequestOptions;
pub use response::Response;
pub use telemetry::{EventData, EventType, TelemetryEvent, TelemetryRecorder, TelemetrySink};
pub use transform::{
    JsonSource, StatusClass, TransformedResponse, status_class, to_buffer_response,
    to_json_response,
};
