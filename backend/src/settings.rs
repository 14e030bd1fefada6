//! Process-wide settings shared by every session.
//!
//! Read-mostly: the provider name and verbose flag change only through
//! control messages, last write wins. A provider change applies to sessions
//! accepted after it; running sessions keep the client they started with.

use std::sync::{PoisonError, RwLock};

use tracing::warn;

use crate::logging::LogHandle;

#[derive(Debug, Clone)]
struct State {
    provider: String,
    verbose: bool,
}

pub struct Settings {
    state: RwLock<State>,
    log: Option<LogHandle>,
}

impl Settings {
    /// `log` is absent when no subscriber was installed (tests, embedding).
    pub fn new(provider: impl Into<String>, verbose: bool, log: Option<LogHandle>) -> Self {
        Self {
            state: RwLock::new(State {
                provider: provider.into(),
                verbose,
            }),
            log,
        }
    }

    pub fn provider(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .provider
            .clone()
    }

    /// Record a provider switch for sessions started from now on.
    pub fn set_provider(&self, provider: impl Into<String>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .provider = provider.into();
    }

    pub fn verbose(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).verbose
    }

    /// Toggle debug logging for the whole process.
    pub fn set_verbose(&self, verbose: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .verbose = verbose;
        if let Some(log) = &self.log
            && let Err(err) = log.set_verbose(verbose)
        {
            warn!(err = %format!("{err:#}"), "could not switch log filter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_switch_is_last_write_wins() {
        let settings = Settings::new("openai", false, None);
        settings.set_provider("ollama");
        settings.set_provider("openrouter");
        assert_eq!(settings.provider(), "openrouter");
    }

    #[test]
    fn verbose_toggle_without_subscriber() {
        let settings = Settings::new("openai", false, None);
        settings.set_verbose(true);
        assert!(settings.verbose());
        settings.set_verbose(false);
        assert!(!settings.verbose());
    }
}
