//! CLI command implementations

pub mod dap;
pub mod init;
pub mod serve;
