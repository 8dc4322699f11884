pub mod gate;
pub mod rate_limiter;
