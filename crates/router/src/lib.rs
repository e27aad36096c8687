//! The request-processing core of a layer-7 HTTP reverse proxy: an ordered
//! pipeline of middleware stages fronting a fleet of application instance
//! endpoints, plus the ambient scaffolding (config, metrics, admin surface,
//! process assembly) needed to run it as a standalone binary.
//!
//! `pipeline` holds the 16-stage chain (spec §2/§4); `registry`, `crypto`
//! and `trace` are its collaborator data models; `app` wires everything
//! into a runnable process, following the teacher's `app.rs` split.

pub mod access_log;
pub mod admin;
pub mod app;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod net;
pub mod pipeline;
pub mod registry;
pub mod request_info;
pub mod response_writer;
pub mod router_groups;
pub mod tls;
pub mod trace;
pub mod transport;
