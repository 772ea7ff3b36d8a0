//! fininfer common types
//!
//! Shared types used by the gateway core and by model endpoints.

pub mod backend;
pub mod operation;
pub mod protocol;
pub mod request;
pub mod response;

pub use backend::{BackendCapabilities, BackendKind, PerformanceMetrics};
pub use operation::{Operation, UnknownOperation};
pub use protocol::{InferBatchRequest, InferBatchResponse, InferItem, InferOutput};
pub use request::{AIRequest, Priority, DEFAULT_TIMEOUT_MS};
pub use response::{AIResponse, ErrorInfo, ErrorKind, ProcessingTime};
