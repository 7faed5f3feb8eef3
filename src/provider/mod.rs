//! Upstream provider adapters.
//!
//! One shared [`Provider`] adapter, parameterized by a [`ProviderProfile`]
//! per provider kind, offers `prompt_once`, `prompt_streaming` and
//! `list_models`.

mod adapter;
pub mod payload;
pub mod profile;
mod registry;

pub use adapter::Provider;
pub use profile::ProviderProfile;
pub use registry::ProviderRegistry;
