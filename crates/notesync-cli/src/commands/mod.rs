//! Command handlers

pub mod config;
pub mod daemon;
pub mod sync;
