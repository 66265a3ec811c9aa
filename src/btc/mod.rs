pub mod adapter;
pub mod config;
pub mod rpc;
