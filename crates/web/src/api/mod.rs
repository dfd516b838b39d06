//! REST API endpoint modules.

pub mod git;
pub mod status;
