//! Turnstile - In-Process Admission Limiting
//!
//! This crate answers one question for request-handling code: should this
//! request from this identifier, in this bucket, be admitted right now? It
//! keeps an exact sliding-window log of admitted requests per
//! (bucket, identifier) pair and rejects once the trailing window is full.
//! State lives in process memory only.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Result, TurnstileError};
pub use ratelimit::{
    Admission, AdmissionLimiter, Clock, Decision, LimitPolicy, ManualClock, MonotonicClock,
    PolicySpec, PolicyTable, RateLimitKey, SerialLimiter, SystemClock, WindowLog, DEFAULT_BUCKET,
    DEFAULT_LIMIT, DEFAULT_WINDOW_MS,
};
