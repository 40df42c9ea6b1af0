pub mod combin;
pub mod config;
pub mod dataset;
pub mod display;
pub mod errors;
pub mod exec;
pub mod ledger;
pub mod scheduler;
pub mod shell;
pub mod types;
