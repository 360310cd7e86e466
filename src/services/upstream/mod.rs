//! Upstream Call Module
//!
//! Everything between "a handler wants data from the upstream API" and the
//! wire: request descriptors, the retrying `CallExecutor`, the pluggable
//! `Transport`, and the error taxonomy callers branch on.
//!
//! # Example
//! ```ignore
//! let executor = CallExecutor::new(pool, Arc::new(HttpTransport::new(Default::default())?), config);
//! let request = UpstreamRequest::get(format!("{}/ajax/illust/{}", base, id))
//!     .expect(BodyKind::Envelope);
//!
//! match executor.execute(&request).await {
//!     Ok(response) => render(response.body),
//!     Err(e) if e.is_not_found() => not_found(),
//!     Err(e) => service_unavailable(e),
//! }
//! ```

mod envelope;
mod error;
mod executor;
mod request;
mod transport;

pub use error::{AttemptError, ErrorKind, ExecuteError};
pub use executor::{CallExecutor, ExecutorConfig, NoCredentialPolicy, CREDENTIAL_REJECTION_STATUSES};
pub use request::{AuthMode, BodyKind, Method, RequestBody, UpstreamRequest, UpstreamResponse};
pub use transport::{
    HttpTransport, HttpTransportConfig, Transport, TransportError, TransportRequest,
    TransportResponse,
};
