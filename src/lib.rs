pub mod config;
pub mod constants;
pub mod engine;
pub mod kv_store;
pub mod rank_protocol;
pub mod rank_remote;
pub mod rank_service;
pub mod ranking_store;
pub mod rng;
pub mod server_utils;
pub mod session;
pub mod types;
pub mod world;
