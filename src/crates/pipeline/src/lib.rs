//! The knowledge-graph construction pipeline.
//!
//! Three stages run in order over shared services:
//!
//! 1. [`processor::ListProcessor`] screens the watch list by freshness,
//!    samples a bounded subset weighted by pageviews, and writes one
//!    fragment JSON per extracted entity.
//! 2. [`merger::GraphMerger`] folds unprocessed fragments into the master
//!    graph, resolving every node to a canonical identity.
//! 3. [`cleaner::GraphCleaner`] runs the eight-step deep maintenance pass.
//!
//! Services (wiki client, LLM service, watch list) are constructor-injected
//! by the binary; nothing here owns global state.

pub mod cleaner;
pub mod config;
pub mod error;
pub mod merger;
pub mod processor;
pub mod sampling;
pub mod watchlist;

pub use cleaner::GraphCleaner;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use merger::GraphMerger;
pub use processor::ListProcessor;
pub use watchlist::{ListEntry, ListSection, WatchList};
