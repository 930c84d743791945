// src/process/mod.rs
//! CPU-side stages: unpack an archive, consolidate its CSV files into one
//! Arrow batch, and reshape that batch for analysis.

pub mod convert;
pub mod date_parser;
pub mod extract;
pub mod load;
pub mod schema;
pub mod transform;
pub mod utils;
