//! Admission limiting logic and state management.

mod backend;
mod clock;
mod key;
mod limiter;
mod policy;
mod rules;
mod serial;
mod window;

pub use backend::Admission;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use key::RateLimitKey;
pub use limiter::AdmissionLimiter;
pub use policy::{LimitPolicy, PolicySpec, DEFAULT_BUCKET, DEFAULT_LIMIT, DEFAULT_WINDOW_MS};
pub use rules::PolicyTable;
pub use serial::SerialLimiter;
pub use window::{Decision, WindowLog};
