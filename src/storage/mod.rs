//! Durable pipeline store

mod database;

pub use database::PipelineDb;
