//! Integration tests driving real engine processes

pub mod helpers;
pub mod pipeline;
