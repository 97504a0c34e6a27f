pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod model;
pub mod percent;
pub mod repository;
pub mod scope;
pub mod sigv4;

pub use config::GatewayConfig;
pub use connector::Connector;
pub use endpoint::Endpoint;
pub use error::GatewayError;
pub use scope::Scope;
