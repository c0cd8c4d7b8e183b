pub mod config;
pub mod error;
pub mod id;
pub mod scoring;
pub mod types;

pub use config::{AppConfig, FileConfig};
pub use error::{Result, TallyError};
pub use id::TweetId;
pub use types::*;
