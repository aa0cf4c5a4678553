pub mod config;
pub mod infra;
pub mod join;
pub mod output;
pub mod parser;
pub mod services;
pub mod stats;
