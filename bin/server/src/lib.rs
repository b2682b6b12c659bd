//! billhound HTTP server and Postgres persistence.
//!
//! This crate wires the follow-up engine to the outside world: a small
//! trigger API over axum, sqlx-backed implementations of the engine's
//! storage ports, and environment-driven configuration.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod sink;
pub mod state;
