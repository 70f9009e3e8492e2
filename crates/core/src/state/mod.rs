//! Workflow state management.
//!
//! This module provides:
//! - The workflow state machine (`workflow`)
//! - Durable state stores with compare-and-swap (`store`)

pub mod store;
pub mod workflow;

pub use store::{FileStore, MemoryStore, StateStore, StoreError};
pub use workflow::TransitionError;
