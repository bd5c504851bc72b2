//! Shared Glance data models consumed by the core library, diff sources and
//! the HTTP surface.

pub mod diff;
pub mod error;

pub use diff::*;
pub use error::*;
