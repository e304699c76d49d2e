//! Turnstile - Fixed-Window Request Admission Control
//!
//! This crate decides whether each incoming request may proceed, based on a
//! per-caller, per-route quota that resets at fixed window boundaries. It can
//! run in-process as axum middleware, as a standalone decision service, and
//! with counters shared across instances through a gossip mesh.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod mesh;
pub mod ratelimit;
