use std::{env, fs, path::Path, time::Duration};

use crate::{
    errors::Error,
    forwarder::RetryPolicy,
    messaging::throttled::ThrottleConfig,
    Result,
};

/// How a channel is named in configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    /// Numeric chat id (e.g. `-1001234567890`).
    Id(i64),
    /// Public username, always stored with the leading `@`.
    Username(String),
}

impl ChannelRef {
    /// Accepts `@name`, bare `name`, or a numeric id.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() || s == "@" {
            return None;
        }
        if s.starts_with('@') {
            return Some(Self::Username(s.to_string()));
        }
        if let Ok(id) = s.parse::<i64>() {
            return Some(Self::Id(id));
        }
        Some(Self::Username(format!("@{s}")))
    }

    /// True if the raw value needed no normalization to be understood.
    pub fn is_canonical(raw: &str) -> bool {
        let s = raw.trim();
        s.starts_with('@') || s.parse::<i64>().is_ok()
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => f.write_str(name),
        }
    }
}

/// Typed configuration for the relay process.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub source_channel: ChannelRef,
    pub target_channel: ChannelRef,

    // Forwarding
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,

    // Runtime
    pub shutdown_grace: Duration,
    pub event_queue_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| required("TELEGRAM_BOT_TOKEN"))?;
        let source_channel = env_channel("SOURCE_CHANNEL")?;
        let target_channel = env_channel("TARGET_CHANNEL")?;

        let retry = retry_policy(
            env_u32("MAX_RETRIES"),
            env_u64("BACKOFF_BASE_MS"),
            env_u64("BACKOFF_MAX_MS"),
        )?;

        let throttle = ThrottleConfig {
            per_channel_min_interval: env_u64("CHANNEL_MIN_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(ThrottleConfig::default().per_channel_min_interval),
            ..ThrottleConfig::default()
        };

        let shutdown_grace =
            Duration::from_millis(env_u64("SHUTDOWN_GRACE_MS").unwrap_or(10_000));
        let event_queue_capacity = env_usize("EVENT_QUEUE_CAPACITY").unwrap_or(256).max(1);

        Ok(Self {
            telegram_bot_token,
            source_channel,
            target_channel,
            retry,
            throttle,
            shutdown_grace,
            event_queue_capacity,
        })
    }
}

/// Report of which settings are present, without failing on the first gap.
///
/// Channel entries carry the normalized value the relay would use; the token
/// is only reported as set.
#[derive(Clone, Debug)]
pub struct ConfigCheck {
    pub entries: Vec<(&'static str, Option<String>)>,
    pub warnings: Vec<String>,
}

impl ConfigCheck {
    pub fn from_env() -> Self {
        load_dotenv_if_present(Path::new(".env"));
        Self::build(
            env_str("TELEGRAM_BOT_TOKEN"),
            env_str("SOURCE_CHANNEL"),
            env_str("TARGET_CHANNEL"),
        )
    }

    fn build(token: Option<String>, source: Option<String>, target: Option<String>) -> Self {
        let mut warnings = Vec::new();
        let mut channel = |name: &str, raw: Option<String>| {
            let raw = raw.and_then(non_empty)?;
            let normalized = ChannelRef::parse(&raw)?.to_string();
            if !ChannelRef::is_canonical(&raw) {
                warnings.push(format!(
                    "{name} should be @username or a numeric id (got {raw:?}, using {normalized})"
                ));
            }
            Some(normalized)
        };
        let source = channel("SOURCE_CHANNEL", source);
        let target = channel("TARGET_CHANNEL", target);

        Self {
            entries: vec![
                (
                    "TELEGRAM_BOT_TOKEN",
                    token.and_then(non_empty).map(|_| "set".to_string()),
                ),
                ("SOURCE_CHANNEL", source),
                ("TARGET_CHANNEL", target),
            ],
            warnings,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_some())
    }
}

fn required(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

fn env_channel(key: &str) -> Result<ChannelRef> {
    env_str(key)
        .and_then(|v| ChannelRef::parse(&v))
        .ok_or_else(|| required(key))
}

fn retry_policy(
    max_retries: Option<u32>,
    base_ms: Option<u64>,
    max_ms: Option<u64>,
) -> Result<RetryPolicy> {
    let defaults = RetryPolicy::default();
    let policy = RetryPolicy {
        max_retries: max_retries.unwrap_or(defaults.max_retries),
        base_delay: base_ms.map(Duration::from_millis).unwrap_or(defaults.base_delay),
        max_delay: max_ms.map(Duration::from_millis).unwrap_or(defaults.max_delay),
    };
    if policy.base_delay > policy.max_delay {
        return Err(Error::Config(format!(
            "BACKOFF_BASE_MS ({}) must not exceed BACKOFF_MAX_MS ({})",
            policy.base_delay.as_millis(),
            policy.max_delay.as_millis()
        )));
    }
    Ok(policy)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
