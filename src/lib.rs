//! Floodgate - Request Admission Control
//!
//! This crate throttles how many requests each client may make per time
//! window. Counters live in memory on a single process; an axum middleware
//! checks every request against them and answers with 429 once a client's
//! quota for the current window is spent.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
