pub mod config_cache;
pub mod memory;
pub mod rate_limit;
pub mod response_cache;
pub mod secrets;

pub use config_cache::ConfigResolver;
pub use rate_limit::{QuotaCounter, RateLimiter};
pub use response_cache::ResponseCache;
pub use secrets::SecretResolver;
