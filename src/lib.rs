pub mod config;
pub mod error;
pub mod intervals;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rpc;
pub mod server;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod wal;
pub mod workflow;
