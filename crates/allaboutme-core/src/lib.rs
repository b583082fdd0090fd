//! # AllAboutMe Core
//!
//! Configuration and error types shared by the automation crates and the CLI.

pub mod config;
pub mod error;

pub use config::AllAboutMeConfig;
pub use error::{AllAboutMeError, Result};
