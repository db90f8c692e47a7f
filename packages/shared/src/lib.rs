//! Utilities shared across Tsudoi packages.

pub mod logger;
pub mod time;
