//! Hub configuration: a closed set of recognized environment variables,
//! typed defaults, and validation performed once at boot.

pub mod schema;
pub mod validate;

pub use schema::HubConfig;
pub use validate::ConfigError;
