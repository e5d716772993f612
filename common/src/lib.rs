//! Exchanger Common Types
//!
//! Shared types used across the exchanger workspace: currencies, money,
//! provider identifiers and time helpers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
