pub mod app_context;
pub mod config;
pub mod consumer;
pub mod error;
pub mod lookup;
pub mod message;
pub mod metric_consts;
pub mod pipeline;
pub mod sink;
pub mod store;
