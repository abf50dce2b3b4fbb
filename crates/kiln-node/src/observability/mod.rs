//! Logging and request tracing for the node.

mod logging;
pub mod middleware;

pub use logging::{default_directives, init_logging};
pub use middleware::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
