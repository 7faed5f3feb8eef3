//! easygpt - streaming chat-completion relay
//!
//! This library relays prompts to OpenAI, Azure OpenAI and OpenRouter,
//! reframes their SSE streams for browser clients, and caches provider
//! model lists.

pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod proxy;
pub mod relay;

pub use config::Config;
pub use error::{Error, Result};
