//! Client for Wikipedia, Wikidata and the secondary sources the graph
//! falls back to when a page is missing from wiki.
//!
//! All traffic is paced by a shared leaky bucket plus an in-flight
//! semaphore, because the pipeline runs from one shared IP. The client owns
//! four persistent caches (Q-code, link status, pageviews, creation dates),
//! loaded at construction and written back on [`WikiClient::save_caches`].
//!
//! The pipeline consumes the client through the [`WikiSource`] trait so
//! tests can substitute a scripted implementation.

pub mod cache;
pub mod client;
pub mod error;
pub mod pageviews;
pub mod source;
pub mod status;

pub use cache::JsonCache;
pub use client::{WikiClient, WikiConfig};
pub use error::{Result, WikiError};
pub use pageviews::PageViewStats;
pub use source::{QcodeHit, TitleSink, WikiSource};
pub use status::{AuthStatus, LinkStatus, LinkStatusEntry, TitleStatus};
