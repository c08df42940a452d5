//! Gateway configuration, read once from `EDGEGATE_*` environment
//! variables.

use std::time::Duration;

use edgegate_auth::{Action, Rule, StaticIdentityStore, StaticPolicy};
use edgegate_protocol::ClientId;

use crate::retry::RetryPolicy;
use crate::GatewayError;

const PREFIX: &str = "EDGEGATE_";

/// Everything the binary needs to wire a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub mqtt_addr: String,
    pub ws_addr: String,
    /// Instance id stamped on every lifecycle event.
    pub instance: String,
    pub subject_prefix: String,
    pub forwarder_timeout: Duration,
    pub auth_cache_ttl: Duration,
    /// URL that must answer `200 OK` before start. `None` skips the check.
    pub health_check: Option<String>,
    pub health_max_elapsed: Duration,
    /// `secret → client_id` pairs.
    pub things: Vec<(String, ClientId)>,
    pub policies: Vec<Rule>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mqtt_addr: "0.0.0.0:1883".to_string(),
            ws_addr: "0.0.0.0:8080".to_string(),
            instance: String::new(),
            subject_prefix: "mqtt".to_string(),
            forwarder_timeout: Duration::from_secs(30),
            auth_cache_ttl: Duration::from_secs(600),
            health_check: None,
            health_max_elapsed: Duration::from_secs(900),
            things: Vec::new(),
            policies: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Reads the process environment.
    ///
    /// # Errors
    /// [`GatewayError::Startup`] naming the first malformed variable.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which is given the full
    /// variable name. Unset and empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = get("MQTT_ADDR") {
            config.mqtt_addr = v;
        }
        if let Some(v) = get("WS_ADDR") {
            config.ws_addr = v;
        }
        if let Some(v) = get("INSTANCE") {
            config.instance = v;
        }
        if let Some(v) = get("SUBJECT_PREFIX") {
            config.subject_prefix = v;
        }
        if let Some(v) = get("FORWARDER_TIMEOUT_MS") {
            config.forwarder_timeout = Duration::from_millis(number("FORWARDER_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("AUTH_CACHE_TTL_SECS") {
            config.auth_cache_ttl = Duration::from_secs(number("AUTH_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = get("HEALTH_CHECK") {
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                return Err(invalid("HEALTH_CHECK", format!("expected an http(s) URL, got {v:?}")));
            }
            config.health_check = Some(v);
        }
        if let Some(v) = get("HEALTH_MAX_ELAPSED_SECS") {
            config.health_max_elapsed =
                Duration::from_secs(number("HEALTH_MAX_ELAPSED_SECS", &v)?);
        }
        if let Some(v) = get("THINGS") {
            config.things = parse_things(&v)?;
        }
        if let Some(v) = get("POLICIES") {
            config.policies = parse_policies(&v)?;
        }
        Ok(config)
    }

    pub fn identity_store(&self) -> StaticIdentityStore {
        self.things.iter().cloned().collect()
    }

    pub fn policy(&self) -> StaticPolicy {
        self.policies.iter().cloned().collect()
    }

    /// Backoff for the pre-start health check.
    pub fn health_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_elapsed: self.health_max_elapsed,
            ..RetryPolicy::default()
        }
    }
}

fn invalid(name: &str, reason: impl std::fmt::Display) -> GatewayError {
    GatewayError::Startup(format!("invalid {PREFIX}{name}: {reason}"))
}

fn number(name: &str, raw: &str) -> Result<u64, GatewayError> {
    raw.parse().map_err(|e| invalid(name, e))
}

/// `secret=client_id,secret=client_id`
fn parse_things(raw: &str) -> Result<Vec<(String, ClientId)>, GatewayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((secret, client)) if !secret.is_empty() && !client.is_empty() => {
                Ok((secret.to_string(), ClientId::new(client)))
            }
            _ => Err(invalid("THINGS", format!("expected secret=client_id, got {entry:?}"))),
        })
        .collect()
}

/// `client:channel:action,...` with `*` wildcards for client and channel.
fn parse_policies(raw: &str) -> Result<Vec<Rule>, GatewayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let [client, channel, action] = parts.as_slice() else {
                return Err(invalid(
                    "POLICIES",
                    format!("expected client:channel:action, got {entry:?}"),
                ));
            };
            let action = Action::parse(action)
                .ok_or_else(|| invalid("POLICIES", format!("unknown action {action:?}")))?;
            if client.is_empty() || channel.is_empty() {
                return Err(invalid("POLICIES", format!("empty id in {entry:?}")));
            }
            Ok(Rule::new(*client, *channel, action))
        })
        .collect()
}
