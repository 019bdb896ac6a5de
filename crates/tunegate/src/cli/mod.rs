//! CLI command implementations

pub mod files;
pub mod output;
pub mod run;
pub mod status;
