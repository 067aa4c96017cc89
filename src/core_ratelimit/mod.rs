pub mod bucket;

pub use bucket::RateLimiter;
