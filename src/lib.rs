//! Local-first, persistent memory service for AI agents.
//!
//! The library crate holds every component (`db`, `memory`, `recall`,
//! `graph`, `jobs`, `workers`, `session`, `signing`, `secrets`, `pidfile`,
//! `telemetry`, `http`) so both `signetd` and the integration tests can
//! drive them directly instead of only through the HTTP surface.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod http;
pub mod index;
pub mod jobs;
pub mod memory;
pub mod pidfile;
pub mod recall;
pub mod secrets;
pub mod session;
pub mod signing;
pub mod telemetry;
pub mod workers;
