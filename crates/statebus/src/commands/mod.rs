//! Command handlers, one module per command group.

pub mod config_cmd;
pub mod rpc;
pub mod serve;
pub mod subject;
