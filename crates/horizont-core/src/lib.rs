pub mod config;
pub mod error;
pub mod types;

pub use config::HorizontConfig;
pub use error::{HorizontError, Result};
pub use types::*;
