//! Worker message handlers.
//!
//! One module per concern; each `*_impl` performs the operation and builds
//! the reply, logging rather than propagating cache failures.

pub mod books;
pub mod cache;
pub mod state;
