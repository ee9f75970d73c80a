//! Command-line interface for resolving URLs and managing nodes

pub mod check;
pub mod nodes;
pub mod run;

pub use check::*;
pub use nodes::*;
pub use run::*;
