//! tqs-config
//!
//! Layered YAML configuration for the quiz-status workspace.
//!
//! Layers are merged in order (earlier = base, later = override), converted to
//! JSON, checked for secret-looking literals, canonicalized and hashed, then
//! deserialized into a typed [`SyncConfig`]. Secrets are never stored in
//! config; only the NAME of the env var that carries them (see [`secrets`]).

pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// If any leaf string value in the effective config starts with one of these,
/// loading aborts with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "xoxb-",      // Slack bot token
    "xoxp-",      // Slack user token
    "eyJ",        // JWT (Supabase access / service tokens)
    "SG.",        // SendGrid
];

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// Soft debounce between non-forced refreshes.
    pub min_interval_ms: u64,
    /// Upper bound on how long a modal-open request waits for a settled state.
    pub modal_wait_timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            modal_wait_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: String,
    pub state_path: String,
    pub request_timeout_ms: u64,
    /// Env var NAME holding the bearer token.
    pub auth_token_env: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            state_path: "/api/quiz-state".to_string(),
            request_timeout_ms: 8_000,
            auth_token_env: "TQS_AUTH_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: ".tqs-cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncWorkerConfig {
    pub retry_interval_ms: u64,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 30_000,
        }
    }
}

/// Effective configuration. Every key has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub refresh: RefreshConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub sync: SyncWorkerConfig,
}

impl SyncConfig {
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh.min_interval_ms)
    }

    pub fn modal_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh.modal_wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.request_timeout_ms)
    }

    pub fn sync_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sync.retry_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
    pub config: SyncConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses to null; treat it as an empty layer.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let config: SyncConfig =
        serde_json::from_value(merged.clone()).context("config does not match schema")?;
    validate(&config)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
        config,
    })
}

fn validate(cfg: &SyncConfig) -> Result<()> {
    if cfg.remote.base_url.trim().is_empty() {
        bail!("CONFIG_INVALID: /remote/base_url must not be empty");
    }
    if !cfg.remote.state_path.starts_with('/') {
        bail!(
            "CONFIG_INVALID: /remote/state_path must start with '/', got '{}'",
            cfg.remote.state_path
        );
    }
    if cfg.remote.request_timeout_ms == 0 {
        bail!("CONFIG_INVALID: /remote/request_timeout_ms must be > 0");
    }
    if cfg.sync.retry_interval_ms == 0 {
        bail!("CONFIG_INVALID: /sync/retry_interval_ms must be > 0");
    }
    Ok(())
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default map is ordered by key, so this is stable across
    // key order in the source YAML.
    let s = serde_json::to_string(v).context("canonical json serialize failed")?;
    Ok(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
