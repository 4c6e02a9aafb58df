//! Relay configuration – reads `~/.roverlink/config.toml` or an explicit path.
//!
//! Every key is optional; missing keys take the defaults below.  After the
//! file is read, `ROVERLINK_*` environment variables override it.
//!
//! ```toml
//! listen_addr = "127.0.0.1:8765"
//! reconnect_backoff_ms = 1000
//! recv_timeout_ms = 2000
//! poll_interval_ms = 5
//! distance_threshold = 5.0
//! autopilot = true
//! send_on_change_only = false
//! packet_format = "envelope"        # or "raw_binary"
//!
//! [stream]
//! uri = "ws://192.168.50.66:8766/stream"
//! overflow = "keep_latest"
//!
//! [telemetry]
//! uri = "ws://192.168.50.66/telemetry"
//!
//! [control]
//! uri = "ws://192.168.50.66/"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roverlink_runtime::{FeedConfig, PacketFormat, SessionConfig};
use roverlink_types::{ConnectionMode, OverflowPolicy, RelayError};
use serde::{Deserialize, Serialize};

/// Optional overrides for one upstream feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ConnectionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow: Option<OverflowPolicy>,
}

impl FeedSection {
    fn resolve(&self, default: FeedConfig) -> FeedConfig {
        FeedConfig {
            uri: self.uri.clone().unwrap_or(default.uri),
            mode: self.mode.unwrap_or(default.mode),
            overflow: self.overflow.unwrap_or(default.overflow),
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address downstream consumers connect to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub stream: FeedSection,

    #[serde(default)]
    pub telemetry: FeedSection,

    #[serde(default)]
    pub control: FeedSection,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Obstacle distance below which the autopilot brakes.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    #[serde(default = "default_true")]
    pub autopilot: bool,

    #[serde(default)]
    pub send_on_change_only: bool,

    #[serde(default)]
    pub packet_format: PacketFormat,
}

fn default_listen_addr() -> String {
    roverlink_server::DEFAULT_LISTEN_ADDR.to_string()
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_recv_timeout_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_distance_threshold() -> f64 {
    roverlink_runtime::drive_policy::DEFAULT_DISTANCE_THRESHOLD
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            stream: FeedSection::default(),
            telemetry: FeedSection::default(),
            control: FeedSection::default(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            distance_threshold: default_distance_threshold(),
            autopilot: true,
            send_on_change_only: false,
            packet_format: PacketFormat::default(),
        }
    }
}

impl Config {
    /// Build the per-session configuration, rejecting combinations the relay
    /// cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] naming the offending key.
    pub fn session_config(&self) -> Result<SessionConfig, RelayError> {
        let defaults = SessionConfig::default();
        let stream = self.stream.resolve(defaults.stream);
        let telemetry = self.telemetry.resolve(defaults.telemetry);
        let control = self.control.resolve(defaults.control);

        for (key, feed) in [("stream", &stream), ("telemetry", &telemetry)] {
            if !feed.mode.reads() {
                return Err(RelayError::Config(format!("{key}.mode must include read")));
            }
        }
        if !control.mode.writes() {
            return Err(RelayError::Config("control.mode must include write".to_string()));
        }
        for (key, feed) in [("stream", &stream), ("telemetry", &telemetry), ("control", &control)] {
            if feed.uri.trim().is_empty() {
                return Err(RelayError::Config(format!("{key}.uri is empty")));
            }
        }
        if self.recv_timeout_ms == 0 {
            return Err(RelayError::Config("recv_timeout_ms must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RelayError::Config("poll_interval_ms must be positive".to_string()));
        }
        if !self.distance_threshold.is_finite() {
            return Err(RelayError::Config("distance_threshold must be a number".to_string()));
        }

        Ok(SessionConfig {
            stream,
            telemetry,
            control,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            recv_timeout: Duration::from_millis(self.recv_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            packet_format: self.packet_format,
            send_on_change_only: self.send_on_change_only,
            autopilot: self.autopilot,
            distance_threshold: self.distance_threshold,
        })
    }
}

/// A configuration together with the file it came from, if any.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub path: Option<PathBuf>,
}

/// Return the path to `~/.roverlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".roverlink").join("config.toml")
}

/// Load the configuration and apply environment overrides.
///
/// An `explicit` path must exist.  Without one, a missing default file means
/// built-in defaults.
///
/// # Errors
///
/// Returns [`RelayError::Config`] when the file cannot be read or parsed.
pub fn load(explicit: Option<&Path>) -> Result<Loaded, RelayError> {
    let (mut config, path) = match explicit {
        Some(path) => match load_from(path)? {
            Some(config) => (config, Some(path.to_path_buf())),
            None => {
                return Err(RelayError::Config(format!(
                    "no config file at {}",
                    path.display()
                )));
            }
        },
        None => {
            let path = config_path();
            match load_from(&path)? {
                Some(config) => (config, Some(path)),
                None => (Config::default(), None),
            }
        }
    };

    apply_env_overrides(&mut config);
    Ok(Loaded { config, path })
}

/// Read a config file.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RelayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&raw).map_err(|e| {
        RelayError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(Some(config))
}

/// Apply `ROVERLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVERLINK_LISTEN_ADDR` | `listen_addr` |
/// | `ROVERLINK_STREAM_URI` | `stream.uri` |
/// | `ROVERLINK_TELEMETRY_URI` | `telemetry.uri` |
/// | `ROVERLINK_CONTROL_URI` | `control.uri` |
/// | `ROVERLINK_DISTANCE_THRESHOLD` | `distance_threshold` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROVERLINK_LISTEN_ADDR") {
        cfg.listen_addr = v;
    }
    if let Ok(v) = std::env::var("ROVERLINK_STREAM_URI") {
        cfg.stream.uri = Some(v);
    }
    if let Ok(v) = std::env::var("ROVERLINK_TELEMETRY_URI") {
        cfg.telemetry.uri = Some(v);
    }
    if let Ok(v) = std::env::var("ROVERLINK_CONTROL_URI") {
        cfg.control.uri = Some(v);
    }
    if let Ok(v) = std::env::var("ROVERLINK_DISTANCE_THRESHOLD")
        && let Ok(threshold) = v.parse::<f64>()
    {
        cfg.distance_threshold = threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_match_the_vehicle_layout() {
        let session = Config::default().session_config().unwrap();
        assert_eq!(session.stream.uri, "ws://localhost:8766/stream");
        assert_eq!(session.telemetry.uri, "ws://localhost:80/telemetry");
        assert_eq!(session.control.uri, "ws://localhost:80/");
        assert_eq!(session.stream.overflow, OverflowPolicy::DropNewest);
        assert_eq!(session.control.mode, ConnectionMode::Write);
        assert_eq!(session.control.overflow, OverflowPolicy::BlockProducer);
        assert_eq!(session.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(session.recv_timeout, Duration::from_secs(2));
        assert_eq!(session.poll_interval, Duration::from_millis(5));
        assert_eq!(session.distance_threshold, 5.0);
        assert!(session.autopilot);
        assert_eq!(session.packet_format, PacketFormat::Envelope);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config(
            r#"
            recv_timeout_ms = 3500
            packet_format = "raw_binary"

            [stream]
            uri = "ws://192.168.50.66:8766/stream"
            overflow = "keep_latest"
            "#,
        );

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.listen_addr, "127.0.0.1:8765");
        assert_eq!(cfg.recv_timeout_ms, 3500);

        let session = cfg.session_config().unwrap();
        assert_eq!(session.stream.uri, "ws://192.168.50.66:8766/stream");
        assert_eq!(session.stream.mode, ConnectionMode::Read);
        assert_eq!(session.stream.overflow, OverflowPolicy::KeepLatest);
        assert_eq!(session.telemetry.uri, "ws://localhost:80/telemetry");
        assert_eq!(session.packet_format, PacketFormat::RawBinary);
    }

    #[test]
    fn short_mode_names_are_accepted() {
        let (_dir, path) = write_config(
            r#"
            [control]
            mode = "rw"
            "#,
        );
        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.control.mode, Some(ConnectionMode::ReadWrite));
        assert!(cfg.session_config().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let (_dir, path) = write_config("listen_port = 9000\n");
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)), "got {err:?}");
    }

    #[test]
    fn read_only_control_feed_is_rejected() {
        let cfg = Config {
            control: FeedSection {
                mode: Some(ConnectionMode::Read),
                ..FeedSection::default()
            },
            ..Config::default()
        };
        let err = cfg.session_config().unwrap_err();
        assert!(err.to_string().contains("control.mode"));
    }

    #[test]
    fn write_only_stream_feed_is_rejected() {
        let cfg = Config {
            stream: FeedSection {
                mode: Some(ConnectionMode::Write),
                ..FeedSection::default()
            },
            ..Config::default()
        };
        assert!(cfg.session_config().is_err());
    }

    #[test]
    fn zero_receive_timeout_is_rejected() {
        let cfg = Config {
            recv_timeout_ms: 0,
            ..Config::default()
        };
        assert!(cfg.session_config().is_err());
    }

    #[test]
    fn config_path_points_to_roverlink_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".roverlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load(Some(&dir.path().join("relay.toml"))).unwrap_err();
        assert!(err.to_string().contains("no config file"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let (_dir, path) = write_config("send_on_change_only = true\n");
        let loaded = load(Some(&path)).unwrap();
        assert!(loaded.config.send_on_change_only);
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn apply_env_overrides_changes_stream_uri() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERLINK_STREAM_URI", "ws://car.local:8766/stream") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.stream.uri.as_deref(), Some("ws://car.local:8766/stream"));
        unsafe { std::env::remove_var("ROVERLINK_STREAM_URI") };
    }

    #[test]
    fn apply_env_overrides_changes_listen_addr() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERLINK_LISTEN_ADDR", "0.0.0.0:9000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.listen_addr, "0.0.0.0:9000");
        unsafe { std::env::remove_var("ROVERLINK_LISTEN_ADDR") };
    }

    #[test]
    fn apply_env_overrides_changes_distance_threshold() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERLINK_DISTANCE_THRESHOLD", "12.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.distance_threshold, 12.5);

        unsafe { std::env::set_var("ROVERLINK_DISTANCE_THRESHOLD", "near") };
        let mut cfg = Config {
            distance_threshold: 7.0,
            ..Config::default()
        };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.distance_threshold, 7.0);
        unsafe { std::env::remove_var("ROVERLINK_DISTANCE_THRESHOLD") };
    }

    #[test]
    fn apply_env_overrides_changes_control_uri() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERLINK_CONTROL_URI", "ws://car.local/") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.uri.as_deref(), Some("ws://car.local/"));
        assert_eq!(
            cfg.session_config().unwrap().control.uri,
            "ws://car.local/"
        );
        unsafe { std::env::remove_var("ROVERLINK_CONTROL_URI") };
    }
}
