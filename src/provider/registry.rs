//! Name-keyed set of configured providers.

use reqwest::Client;

use super::adapter::Provider;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    default: Option<String>,
}

impl ProviderRegistry {
    /// Build one adapter per configured provider, sharing `client`.
    pub fn from_config(config: &Config, client: Client) -> Result<Self> {
        let providers = config
            .providers
            .iter()
            .map(|p| Provider::new(p, client.clone(), config.relay.clone(), &config.cache))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            providers,
            default: config.default_provider().map(str::to_string),
        })
    }

    /// Look up a provider by name, or the default when `name` is `None`.
    pub fn get(&self, name: Option<&str>) -> Result<&Provider> {
        let wanted = match name.or(self.default.as_deref()) {
            Some(n) => n,
            None => return Err(Error::BadRequest("No providers configured".to_string())),
        };
        self.providers
            .iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| Error::BadRequest(format!("Unknown provider '{}'", wanted)))
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }
}
