//! cbt-providers: generative text backends.
//!
//! Implements the `TextGenerator` trait for OpenAI-compatible chat APIs and
//! Ollama, plus a mock for tests, and loads the `cbt.toml` configuration.

pub mod config;
pub mod error;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use config::{create_generator, load_config, load_config_from, CbtConfig, ProviderConfig};
pub use error::ProviderError;
