pub mod config;

pub use config::{BlockchainOptions, ChainConfig, ConfigError, Milestone};
