//! Augury - realtime trading-signal distribution and performance
//! analytics server.

pub mod config;
pub mod error;
pub mod services;
pub mod types;
