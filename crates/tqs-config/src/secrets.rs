//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g., `"TQS_AUTH_TOKEN"`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result
//!   into constructors; `std::env::var` is not scattered across the codebase.
//! - `Debug` output redacts values.
//! - Error messages reference the env var NAME, never the value.

use anyhow::{bail, Result};

use crate::SyncConfig;

/// Secrets resolved from the environment. **Values are redacted in `Debug`.**
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Bearer token for the quiz-state endpoint. `None` if the named env var
    /// was absent or blank.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Resolve all secrets named by `cfg`.
///
/// A missing token is not an error: the remote endpoint treats an
/// unauthenticated caller as "no remote result" and the cache keeps working.
/// A blank env var NAME is a config error.
pub fn resolve_secrets(cfg: &SyncConfig) -> Result<ResolvedSecrets> {
    let name = cfg.remote.auth_token_env.trim();
    if name.is_empty() {
        bail!("SECRETS_CONFIG_INVALID: /remote/auth_token_env must name an env var");
    }
    Ok(ResolvedSecrets {
        auth_token: resolve_env(name),
    })
}
