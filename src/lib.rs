pub mod adapter;
pub mod btc;
pub mod config;
pub mod domain;
pub mod eth;
pub mod query;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod worker;
