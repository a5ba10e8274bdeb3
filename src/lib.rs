pub mod api;
pub mod cluster;
pub mod config;
pub mod mcp;
pub mod mode;
pub mod portforward;
