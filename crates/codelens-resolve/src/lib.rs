//! Reference resolution for codelens
//!
//! This crate turns raw parser references into edge targets with an explicit
//! confidence level. Static resolution follows import and re-export chains
//! through a [`SymbolSource`](codelens_core::SymbolSource); an optional
//! out-of-process resolver can strengthen weak results.

pub mod builtins;
pub mod cache;
pub mod error;
pub mod external;
pub mod pool;
pub mod providers;
pub mod resolver;


pub use cache::{ReferenceKey, ResolutionCache};
pub use error::ResolveError;
pub use external::{ExternalRequest, ExternalResolver, ExternalResult, RequestBatch, ResponseBatch};
pub use pool::ResolverPool;
pub use resolver::{DEFAULT_MAX_DEPTH, Resolver};
