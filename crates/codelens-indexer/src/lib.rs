//! File parsing and reference extraction
//!
//! Adapters turn source files into units and raw references; the
//! [`Coordinator`] runs them in parallel and resolves the results into
//! graph updates.

pub mod adapter;
pub mod coordinator;
pub mod error;
pub mod languages;
pub mod links;
pub mod parser_pool;

#[cfg(test)]
pub mod tests;

pub use adapter::{FragmentDefinition, FragmentInfo, Param, ParserAdapter, dedent};
pub use coordinator::{Coordinator, IndexOutcome, IndexStats, ParsedFile, build_update};
pub use error::IndexError;
pub use languages::AdapterRegistry;
pub use parser_pool::{Grammar, ParseRequest, ParseResult, ParserPool, create_parser_pool};
