//! Backend selection from available credentials
//!
//! Policy: a valid explicit override wins; otherwise the single available
//! backend; otherwise the first detected one, with a note. No credentials at
//! all is a fatal configuration error. The first successful selection is
//! cached.

use super::provider::ProviderId;
use crate::error::PipelineError;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Environment variable naming an explicit backend
pub const PROVIDER_OVERRIDE_VAR: &str = "OPGEN_LLM_PROVIDER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider: ProviderId,
    pub api_key: String,
    /// Why this provider was picked, when the choice was not obvious
    pub note: Option<String>,
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct ProviderSelector {
    preferred: Option<String>,
    lookup: Lookup,
    selected: OnceLock<ProviderSelection>,
}

impl ProviderSelector {
    /// Read credentials from the process environment
    pub fn from_env(preferred: Option<String>) -> Self {
        Self::with_lookup(preferred, |var| std::env::var(var).ok())
    }

    /// Read credentials through `lookup` (tests pass a map)
    pub fn with_lookup<F>(preferred: Option<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            preferred: preferred.filter(|p| !p.trim().is_empty()),
            lookup: Box::new(lookup),
            selected: OnceLock::new(),
        }
    }

    fn credential(&self, provider: ProviderId) -> Option<String> {
        (self.lookup)(provider.credential_var()).filter(|k| !k.trim().is_empty())
    }

    /// Providers with a credential, in detection order
    pub fn available(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| self.credential(*p).is_some())
            .collect()
    }

    pub fn select(&self) -> Result<ProviderSelection, PipelineError> {
        if let Some(selection) = self.selected.get() {
            return Ok(selection.clone());
        }
        let selection = self.resolve()?;
        info!(provider = %selection.provider, "Using synthesis provider");
        Ok(self.selected.get_or_init(|| selection).clone())
    }

    fn resolve(&self) -> Result<ProviderSelection, PipelineError> {
        let mut override_note = None;
        if let Some(preferred) = &self.preferred {
            match preferred.parse::<ProviderId>() {
                Ok(provider) => match self.credential(provider) {
                    Some(api_key) => {
                        return Ok(ProviderSelection {
                            provider,
                            api_key,
                            note: Some(format!("from {}", PROVIDER_OVERRIDE_VAR)),
                        })
                    }
                    None => {
                        warn!(
                            "{} is set to '{}' but {} is not found",
                            PROVIDER_OVERRIDE_VAR,
                            provider,
                            provider.credential_var()
                        );
                        override_note = Some(format!(
                            "{} ignored: {} is not set",
                            PROVIDER_OVERRIDE_VAR,
                            provider.credential_var()
                        ));
                    }
                },
                Err(e) => {
                    warn!("{}: {}", PROVIDER_OVERRIDE_VAR, e);
                    override_note = Some(format!("{} ignored: {}", PROVIDER_OVERRIDE_VAR, e));
                }
            }
        }

        let available = self.available();
        let Some(&provider) = available.first() else {
            return Err(PipelineError::FatalConfig(format!(
                "No synthesis provider credentials found. Set one of: {}",
                ProviderId::ALL
                    .iter()
                    .map(|p| p.credential_var())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        };
        let api_key = self.credential(provider).unwrap_or_default();

        let multiple_note = (available.len() > 1).then(|| {
            let names: Vec<&str> = available.iter().map(|p| p.as_str()).collect();
            format!(
                "multiple providers detected ({}); set {}={} to choose",
                names.join(", "),
                PROVIDER_OVERRIDE_VAR,
                names.join(" or ")
            )
        });
        let note = match (override_note, multiple_note) {
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };

        Ok(ProviderSelection {
            provider,
            api_key,
            note,
        })
    }
}
