// src/lib.rs
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod process;
pub mod publish;
