//! The monitoring engine: probe scheduling, rule evaluation, and the
//! control/inspection façade.
//!
//! [`engine::Engine`] composes the platform registry, the state store, the
//! alert pipeline, and the per-probe scheduler ([`runner::ProbeRunner`]).
//! The admin surface and the configuration loader live outside this crate
//! and consume the façade only.

pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod runner;

pub use engine::Engine;
pub use error::EngineError;
