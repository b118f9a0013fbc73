pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod latency;
pub mod normalize;
pub mod types;
