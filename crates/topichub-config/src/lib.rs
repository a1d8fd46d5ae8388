//! # topichub configuration
//!
//! Configuration types for the topichub event hub, plus TOML loading.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topichub_config::{ConfigLoader, HubConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: HubConfig = ConfigLoader::load_from_file("hub.toml").await?;
//!     assert!(config.validate().is_ok());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod loader;

pub use config::*;
pub use loader::*;
