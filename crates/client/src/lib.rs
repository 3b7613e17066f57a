//! Client side of folio.
//!
//! This crate provides the network fetch pipeline, the request router that
//! sits in front of it, and the page-side session that owns pinned items and
//! queued activity.

pub mod fetch;
pub mod page;
pub mod router;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, MemoryNetwork, Network};
pub use page::PageSession;
pub use router::{InterceptedRequest, RequestRouter, ResponseSource, RouteOutcome, RoutedResponse, SweepReport};
