pub mod analysis;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod eth;
pub mod formatter;
pub mod generator;
pub mod limiter;
pub mod models;
pub mod numeric;
pub mod pipeline;
pub mod registry;
pub mod stats;
pub mod storage;
