// src/fetch/mod.rs

/// URL templates for the yearly archives.
pub mod urls;

/// Streaming download of a yearly archive to disk.
pub mod zips;

/// PTAX dollar quotes from the central bank's OData service.
pub mod ptax;
