//! tripsink: a small HTTP service that ingests trip CSVs into PostgreSQL.
//!
//! Uploaded files land verbatim in a raw database (one all-text table per
//! file), get reshaped into the typed `bronze_trips` table, and can be
//! aggregated into weekly averages in a silver layer on request.

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod server;
