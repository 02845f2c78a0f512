pub mod alert;
pub mod artifacts;
pub mod commands;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod process;
pub mod repro;
pub mod utils;
