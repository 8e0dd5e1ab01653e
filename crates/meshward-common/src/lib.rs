//! # Meshward Common
//!
//! Shared types, traits, and utilities used across Meshward components.
//!
//! ## Modules
//! - `types` - Identifiers, channel masks, power states, connectivity entries
//! - `event` - Dispatch bus events and their suppression flags
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod event;
pub mod types;

pub use error::MeshError;
pub use event::{Event, EventFlags, NodeConnect};
pub use types::*;
