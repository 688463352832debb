//! Mealmatch - rate-limited HTTP gateway for the meal matchmaking API
//!
//! Every protected route is guarded by a fixed-window rate limiter whose
//! counters live in a shared store (Redis in production), so any number of
//! gateway processes enforce one budget per caller and route.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod ratelimit;
pub mod store;
