//! Ambient infrastructure shared by the router: structured logging, graceful
//! drain, readiness tracking, shutdown signal handling, build metadata and a
//! couple of small general-purpose helpers. None of this is specific to the
//! HTTP request pipeline — it is the same scaffolding any long-running
//! network service in this codebase is built on.

pub mod drain;
pub mod prelude;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;
