//! Utility functions for the routing engine

pub mod time;
pub mod url;

pub use self::time::*;
pub use self::url::*;
