pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod crawl;
pub mod discovery;
pub mod download;
pub mod driver;
pub mod logging;
mod pool;
pub mod resolver;
