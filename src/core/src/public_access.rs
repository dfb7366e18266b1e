//! Public reachability of running labs.
//!
//! Maps an allocated host port to the URL a learner opens, either directly
//! on the node or behind a reverse proxy.

pub mod resolver;
pub mod types;

pub use resolver::PublicAccessResolver;
pub use types::{ExposureMode, PublicEndpoint};
