//! Tool mediator: the `http.get`/`http.post`/`json.decode`/`json.encode`
//! surface scripts call out to the host through (spec §4.4).
//!
//! Grounded on the teacher's `OnceLock`-backed process-wide singleton
//! pattern (`cache::BytecodeCache::global`, `pool::InterpreterPool::global`)
//! for `HostConfig`, and on `r3e-network-neo-rs`'s use of `reqwest::blocking`
//! + `url` for outbound HTTP with host validation. Every failure mode here
//! surfaces as a *string* returned to the script, never a Lua error or a
//! panic — scripts are expected to branch on the result, not pcall it.

use std::env;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value as JsonValue;
use url::Url;

use crate::types::{Key, Value};

/// Default essential keys a nested JSON object must contain to survive the
/// decode simplification policy (spec §4.4.3).
const DEFAULT_ESSENTIAL_KEYS: &[&str] = &["id", "name", "url", "height", "weight", "base_experience"];

/// Maximum sequence length kept by the decode simplification policy; longer
/// arrays are dropped entirely rather than truncated, so a script never sees
/// a silently-partial list (spec §4.4.3).
const MAX_SEQUENCE_LEN: usize = 5;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide tool configuration, read once from the environment the same
/// way the teacher's cache/pool sizes are (spec §4.7 Configuration).
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub allowed_hosts: Vec<String>,
    pub essential_json_keys: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            essential_json_keys: DEFAULT_ESSENTIAL_KEYS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl HostConfig {
    /// Return the process-wide singleton [`HostConfig`], read from the
    /// environment exactly once via [`HostConfig::from_env`] and never
    /// mutated thereafter (spec §5/§9: "the allowlist is a process-wide
    /// configuration value... initialised at startup and never mutated").
    /// Mirrors [`crate::cache::BytecodeCache::global`]'s `OnceLock`-backed
    /// singleton pattern.
    pub fn global() -> Arc<HostConfig> {
        static INSTANCE: OnceLock<Arc<HostConfig>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(HostConfig::from_env())))
    }

    /// Parse `SCRIPTEXEC_ALLOWED_HOSTS` (comma-separated) and
    /// `SCRIPTEXEC_ESSENTIAL_JSON_KEYS` (comma-separated) from the
    /// environment, falling back to defaults for either when unset.
    pub fn from_env() -> Self {
        let allowed_hosts = env::var("SCRIPTEXEC_ALLOWED_HOSTS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let essential_json_keys = env::var("SCRIPTEXEC_ESSENTIAL_JSON_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_ESSENTIAL_KEYS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        Self {
            allowed_hosts,
            essential_json_keys,
        }
    }
}

fn http_client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("building the shared reqwest client")
    })
}

/// Validate `raw_url` against the allowlist policy (spec §4.4.2): scheme
/// must be `http` or `https`, a host must be present, and that host must
/// either appear verbatim in `config.allowed_hosts` or end in `.local`.
fn check_url_allowed(config: &HostConfig, raw_url: &str) -> Result<Url, String> {
    let url = Url::parse(raw_url).map_err(|e| format!("Invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("Invalid URL: unsupported scheme `{other}`")),
    }

    let host = url
        .host_str()
        .ok_or_else(|| "Invalid URL: missing host".to_string())?;

    let allowed = host.ends_with(".local")
        || config.allowed_hosts.iter().any(|h| h == host);
    if !allowed {
        return Err(format!("Invalid URL: host `{host}` is not allowlisted"));
    }

    Ok(url)
}

/// `http.get(url)` — returns the response body as a string, or an
/// `Invalid URL:` / `HTTP Error:` / `Request failed:` message (spec §4.4.2).
pub fn http_get(config: &HostConfig, raw_url: &str) -> String {
    let url = match check_url_allowed(config, raw_url) {
        Ok(u) => u,
        Err(msg) => return msg,
    };

    match http_client().get(url).send() {
        Ok(resp) => respond(resp),
        Err(e) => format!("Request failed: {e}"),
    }
}

/// `http.post(url, {headers=..., body=...})`.
pub fn http_post(
    config: &HostConfig,
    raw_url: &str,
    headers: Option<Vec<(String, String)>>,
    body: Option<String>,
) -> String {
    let url = match check_url_allowed(config, raw_url) {
        Ok(u) => u,
        Err(msg) => return msg,
    };

    let mut request = http_client().post(url);
    if let Some(headers) = headers {
        for (name, value) in headers {
            request = request.header(name, value);
        }
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    match request.send() {
        Ok(resp) => respond(resp),
        Err(e) => format!("Request failed: {e}"),
    }
}

fn respond(resp: reqwest::blocking::Response) -> String {
    let status = resp.status();
    if !status.is_success() {
        return format!("HTTP Error: {}", status.as_u16());
    }
    match resp.text() {
        Ok(body) => body,
        Err(e) => format!("Request failed: {e}"),
    }
}

/// `json.decode(s)` — parse `s` and apply the lossy simplification policy
/// (spec §4.4.3) so scripts only ever see small, predictable shapes.
pub fn json_decode(config: &HostConfig, source: &str) -> Value {
    match serde_json::from_str::<JsonValue>(source) {
        Ok(json) => simplify(&config.essential_json_keys, &json, true),
        Err(e) => Value::Str(format!("JSON decode error: {e}")),
    }
}

/// `json.encode(v)` — serialize a host [`Value`] to a JSON string.
pub fn json_encode(value: &Value) -> String {
    let json = value_to_json(value);
    match serde_json::to_string(&json) {
        Ok(s) => s,
        Err(e) => format!("JSON encode error: {e}"),
    }
}

/// Apply the decode simplification policy recursively. `is_root` lets the
/// top-level object through even if it lacks an essential key — the
/// "essential key" gate only applies to *nested* objects (spec §4.4.3:
/// nested maps are kept only if they contain one of the essential keys,
/// which would otherwise make a legitimately bare top-level result vanish).
fn simplify(essential_keys: &[String], json: &JsonValue, is_root: bool) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => {
            if items.len() > MAX_SEQUENCE_LEN {
                Value::Null
            } else {
                Value::Seq(
                    items
                        .iter()
                        .map(|item| simplify(essential_keys, item, false))
                        .collect(),
                )
            }
        }
        JsonValue::Object(map) => {
            let has_essential = map.keys().any(|k| essential_keys.iter().any(|e| e == k));
            if !is_root && !has_essential {
                return Value::Null;
            }
            let pairs = map
                .iter()
                .map(|(k, v)| (Key::Str(k.clone()), simplify(essential_keys, v, false)))
                .collect();
            Value::Map(pairs)
        }
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Seq(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(pairs) => {
            let map = pairs
                .iter()
                .map(|(k, v)| (k.to_host_string(), value_to_json(v)))
                .collect();
            JsonValue::Object(map)
        }
    }
}
