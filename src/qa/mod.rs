mod channel;
mod rate_limit;

pub use channel::{QaChannel, QaTarget, MAX_QUESTION_CHARS};
pub use rate_limit::RateLimiter;
