pub mod error;
pub mod proxy;

pub use error::{ProxyError, ProxyFault};
pub use proxy::{ProxySource, ResilientProxy};
