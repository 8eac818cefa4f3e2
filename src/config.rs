//! Configuration types.
//!
//! Everything is read from `SPRINKLERD_*` environment variables with sane
//! defaults so the daemon can run unattended on a field device with no
//! config file at all. A variable that is set but unparseable is a startup
//! error; silently watering on defaults would hide the typo forever.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Daemon configuration, shared by the control plane and the worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment identifier. Doubles as the control queue name.
    pub deployment_id: String,
    /// AMQP broker URL.
    pub broker_url: String,
    /// Directory holding one registry entry file per running schedule.
    pub registry_dir: PathBuf,
    /// JSON file persisting recurring schedule definitions.
    pub schedule_file: PathBuf,
    /// Status heartbeat endpoint. Heartbeats are disabled when unset.
    pub status_url: Option<String>,
    /// Interval between status heartbeats.
    pub heartbeat_interval: Duration,
    /// Interval between stale-entry cleanup sweeps.
    pub cleanup_interval: Duration,
    /// Delay between control-plane reconnect attempts.
    pub reconnect_delay: Duration,
    /// Delay between worker reconnect attempts.
    pub worker_reconnect_delay: Duration,
    /// Window during which repeated errors are demoted to debug.
    pub warn_window: Duration,
    /// Interval between recurring-schedule checks.
    pub schedule_tick: Duration,
    /// Path to the worker binary spawned on `play`.
    pub worker_bin: PathBuf,
    /// Whether to drive real GPIO pins. When false, actuation is log-only.
    pub gpio_enabled: bool,
    /// Root of the sysfs GPIO tree.
    pub gpio_root: PathBuf,
    /// Zone identifier to GPIO pin number map.
    pub zone_pins: HashMap<String, u32>,
    /// Directory for rolling file logs. Stderr-only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_id: "sprinklerd".to_string(),
            broker_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            registry_dir: PathBuf::from("/tmp/sprinklerd/active"),
            // A sibling of the registry dir, never inside it: the cleanup
            // sweep treats every file in the registry dir as a run entry.
            schedule_file: PathBuf::from("/tmp/sprinklerd/schedules.json"),
            status_url: None,
            heartbeat_interval: Duration::from_secs(450),
            cleanup_interval: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(15),
            worker_reconnect_delay: Duration::from_secs(5),
            warn_window: Duration::from_secs(20 * 60),
            schedule_tick: Duration::from_secs(30),
            worker_bin: default_worker_bin(),
            gpio_enabled: false,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            zone_pins: HashMap::new(),
            log_dir: None,
        }
    }
}

/// The worker binary normally sits next to the control-plane binary.
fn default_worker_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("zone-worker")))
        .unwrap_or_else(|| PathBuf::from("zone-worker"))
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    /// A set-but-invalid variable is an error, not a silent default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let registry_dir = env_path("SPRINKLERD_REGISTRY_DIR", defaults.registry_dir);
        let schedule_file = match env_value("SPRINKLERD_SCHEDULE_FILE") {
            Some(path) => PathBuf::from(path),
            None => registry_dir
                .parent()
                .map(|dir| dir.join("schedules.json"))
                .unwrap_or_else(|| PathBuf::from("schedules.json")),
        };

        Ok(Self {
            deployment_id: env_string("SPRINKLERD_DEPLOYMENT_ID", defaults.deployment_id),
            broker_url: env_string("SPRINKLERD_BROKER_URL", defaults.broker_url),
            registry_dir,
            schedule_file,
            status_url: env_value("SPRINKLERD_STATUS_URL"),
            heartbeat_interval: env_secs("SPRINKLERD_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            cleanup_interval: env_secs("SPRINKLERD_CLEANUP_SECS", defaults.cleanup_interval)?,
            reconnect_delay: env_secs("SPRINKLERD_RECONNECT_SECS", defaults.reconnect_delay)?,
            worker_reconnect_delay: env_secs(
                "SPRINKLERD_WORKER_RECONNECT_SECS",
                defaults.worker_reconnect_delay,
            )?,
            warn_window: env_secs("SPRINKLERD_WARN_WINDOW_SECS", defaults.warn_window)?,
            schedule_tick: env_secs("SPRINKLERD_SCHEDULE_TICK_SECS", defaults.schedule_tick)?,
            worker_bin: env_path("SPRINKLERD_WORKER_BIN", defaults.worker_bin),
            gpio_enabled: match env_value("SPRINKLERD_GPIO_ENABLED") {
                Some(raw) => parse_bool("SPRINKLERD_GPIO_ENABLED", &raw)?,
                None => defaults.gpio_enabled,
            },
            gpio_root: env_path("SPRINKLERD_GPIO_ROOT", defaults.gpio_root),
            zone_pins: match env_value("SPRINKLERD_ZONE_PINS") {
                Some(raw) => parse_zone_pins("SPRINKLERD_ZONE_PINS", &raw)?,
                None => defaults.zone_pins,
            },
            log_dir: env_value("SPRINKLERD_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

/// A set, non-empty environment variable.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_string(key: &str, default: String) -> String {
    env_value(key).unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env_value(key).map(PathBuf::from).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env_value(key) {
        Some(raw) => parse_secs(key, &raw),
        None => Ok(default),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid(key, format!("{raw:?} is not a whole number of seconds")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "1" => Ok(true),
        "0" => Ok(false),
        _ if raw.eq_ignore_ascii_case("true") => Ok(true),
        _ if raw.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(invalid(key, format!("{raw:?} is not a boolean"))),
    }
}

/// Parse a `zone=pin` comma list, e.g. `"front=7,back=11"`.
fn parse_zone_pins(key: &str, raw: &str) -> Result<HashMap<String, u32>, ConfigError> {
    let mut pins = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((zone, pin)) = pair.split_once('=') else {
            return Err(invalid(key, format!("{pair:?} is not a zone=pin pair")));
        };
        let zone = zone.trim();
        if zone.is_empty() {
            return Err(invalid(key, format!("{pair:?} has an empty zone name")));
        }
        let pin: u32 = pin
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("{pair:?} has an invalid pin number")))?;
        pins.insert(zone.to_string(), pin);
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.deployment_id, "sprinklerd");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(450));
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(15));
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(15));
        assert_eq!(cfg.warn_window, Duration::from_secs(1200));
        assert!(cfg.status_url.is_none());
        assert!(!cfg.gpio_enabled);
    }

    #[test]
    fn schedule_file_never_lives_inside_the_registry_dir() {
        let cfg = Config::default();
        assert!(!cfg.schedule_file.starts_with(&cfg.registry_dir));
    }

    #[test]
    fn zone_pins_parse() {
        let pins = parse_zone_pins("K", "front=7, back=11").unwrap();
        assert_eq!(pins.len(), 2);
        assert_eq!(pins.get("front"), Some(&7));
        assert_eq!(pins.get("back"), Some(&11));
    }

    #[test]
    fn zone_pins_empty_input() {
        assert!(parse_zone_pins("K", "").unwrap().is_empty());
    }

    #[test]
    fn zone_pins_reject_typos() {
        assert!(parse_zone_pins("K", "front=7,back").is_err());
        assert!(parse_zone_pins("K", "=3").is_err());
        assert!(parse_zone_pins("K", "back=x").is_err());
    }

    #[test]
    fn seconds_parse_or_error() {
        assert_eq!(parse_secs("K", "450").unwrap(), Duration::from_secs(450));
        assert!(parse_secs("K", "7.5").is_err());
        assert!(parse_secs("K", "soon").is_err());
    }

    #[test]
    fn bools_parse_or_error() {
        assert!(parse_bool("K", "1").unwrap());
        assert!(parse_bool("K", "TRUE").unwrap());
        assert!(!parse_bool("K", "false").unwrap());
        assert!(parse_bool("K", "yes").is_err());
    }
}
