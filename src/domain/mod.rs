//! Domain types for the prompt shield.
//!
//! This module contains the decision, trace, and event value objects shared
//! across the engine, pipeline, and API layers.

mod decision;
mod event;
mod trace;

pub use decision::*;
pub use event::*;
pub use trace::*;
