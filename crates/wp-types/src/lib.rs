//! # wp-types
//!
//! Core types shared by the Waypoint crates: search spaces and configuration
//! resolution, run identity, and the error taxonomy.

pub mod configuration;
pub mod errors;
pub mod run;
pub mod space;

pub use configuration::*;
pub use errors::*;
pub use run::*;
pub use space::*;
