pub mod config;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{DatabaseConfig, KeelConfig, MigrationsConfig};
pub use error::{KeelError, Result};
