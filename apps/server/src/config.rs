//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Every section and field is optional; missing values fall back to the
//! core defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use artmatrix_core::display::{Transport, WireOptions};
use artmatrix_core::supervisor::{BackendMode, HardwareOptions, OutputMode};
use artmatrix_core::{
    BusConfig, Config, DisplayConfig, DisplayServerConfig, FitMode, ReadinessConfig,
    RestartPolicy, TlsConfig, VolumeOverlayConfig,
};
use directories::ProjectDirs;
use serde::Deserialize;

/// System-wide config file, shared with the shairport-sync listener setup.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/shairport-sync-mqtt-listener.yaml";

/// File name looked up in the user config directory.
const USER_CONFIG_FILE: &str = "config.yaml";

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub mqtt: MqttSection,
    #[serde(alias = "flaschen")]
    pub display: DisplaySection,
    pub server: ServerSection,
    pub hardware: HardwareSection,
    pub terminal: TerminalSection,
    pub restart: RestartSection,
    pub volume: VolumeSection,
}

/// Broker settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Override: `ARTMATRIX_MQTT_HOST`
    pub host: String,
    /// Override: `ARTMATRIX_MQTT_PORT`
    pub port: u16,
    /// Topic root shairport-sync publishes under.
    pub topic: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    pub tls: Option<TlsSection>,
}

impl Default for MqttSection {
    fn default() -> Self {
        let bus = BusConfig::default();
        Self {
            host: bus.host,
            port: bus.port,
            topic: bus.topic_root,
            client_id: None,
            username: None,
            password: None,
            keep_alive: bus.keep_alive.as_secs(),
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TlsSection {
    pub ca_certs_path: PathBuf,
    pub certfile_path: Option<PathBuf>,
    pub keyfile_path: Option<PathBuf>,
}

/// Matrix geometry and the display server endpoint.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    #[serde(alias = "led-columns")]
    pub width: u32,
    #[serde(alias = "led-rows")]
    pub height: u32,
    #[serde(alias = "server")]
    pub host: String,
    /// Override: `ARTMATRIX_DISPLAY_PORT`
    pub port: u16,
    pub transport: Transport,
    pub fit: FitMode,
    #[serde(flatten)]
    pub wire: WireOptions,
}

impl Default for DisplaySection {
    fn default() -> Self {
        let display = DisplayConfig::default();
        Self {
            width: display.width,
            height: display.height,
            host: display.host,
            port: display.port,
            transport: display.transport,
            fit: display.fit,
            wire: display.wire,
        }
    }
}

/// Which backend `ft-server` renders to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Terminal,
    Hardware,
}

/// What happens to `ft-server`'s own output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerOutput {
    Inherit,
    #[default]
    Discard,
    Log,
}

impl From<ServerOutput> for OutputMode {
    fn from(output: ServerOutput) -> Self {
        match output {
            ServerOutput::Inherit => OutputMode::Inherit,
            ServerOutput::Discard => OutputMode::Discard,
            ServerOutput::Log => OutputMode::Log,
        }
    }
}

/// How `ft-server` is found and launched.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Explicit `ft-server` binary; no search happens when set.
    /// Override: `ARTMATRIX_SERVER_PATH`
    pub path: Option<PathBuf>,
    /// Candidate binaries tried before the built-in locations.
    pub search_paths: Vec<PathBuf>,
    pub mode: ServerMode,
    pub layer_timeout: Option<u32>,
    pub extra_args: Vec<String>,
    /// Defaults to on in hardware mode (GPIO access needs root).
    pub sudo: Option<bool>,
    pub output: ServerOutput,
}

/// LED panel options, used in hardware mode.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HardwareSection {
    pub led_gpio_mapping: String,
    pub led_slowdown_gpio: u32,
    pub led_brightness: u8,
    pub led_show_refresh: bool,
    pub led_chain: Option<u32>,
    pub led_parallel: Option<u32>,
    pub led_pwm_bits: Option<u8>,
}

impl Default for HardwareSection {
    fn default() -> Self {
        let hw = HardwareOptions::default();
        Self {
            led_gpio_mapping: hw.gpio_mapping,
            led_slowdown_gpio: hw.slowdown_gpio,
            led_brightness: hw.brightness,
            led_show_refresh: hw.show_refresh,
            led_chain: hw.chain,
            led_parallel: hw.parallel,
            led_pwm_bits: hw.pwm_bits,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    pub hd_terminal: bool,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self { hd_terminal: true }
    }
}

/// Readiness, restart, and shutdown timing. Durations are milliseconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RestartSection {
    pub max_restarts: u32,
    pub delay_ms: u64,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub terminate_grace_ms: u64,
}

impl Default for RestartSection {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        let readiness = ReadinessConfig::default();
        let server = DisplayServerConfig::default();
        Self {
            max_restarts: policy.max_restarts,
            delay_ms: millis(policy.delay),
            readiness_timeout_ms: millis(readiness.timeout),
            readiness_poll_ms: millis(readiness.poll_interval),
            terminate_grace_ms: millis(server.terminate_grace),
        }
    }
}

/// Volume bar overlay.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VolumeSection {
    pub enabled: bool,
    /// Bar width in pixels.
    pub width: u32,
    /// Layer above the cover art.
    pub layer: u8,
    pub timeout_ms: u64,
}

impl Default for VolumeSection {
    fn default() -> Self {
        let overlay = VolumeOverlayConfig::default();
        Self {
            enabled: true,
            width: overlay.bar_width,
            layer: overlay.layer,
            timeout_ms: millis(overlay.timeout),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    ///
    /// With no explicit path the system file and then the user config file
    /// are tried; when neither exists the built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_candidates().into_iter().find(|p| p.is_file()),
        };

        let mut config = if let Some(path) = path {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(&path)?
        } else {
            log::info!("No configuration file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn from_yaml(content: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults config.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn default_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(dirs) = ProjectDirs::from("", "", "artmatrix") {
            candidates.push(dirs.config_dir().join(USER_CONFIG_FILE));
        }
        candidates
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("ARTMATRIX_MQTT_HOST").filter(|h| !h.is_empty()) {
            self.mqtt.host = host;
        }

        if let Some(val) = var("ARTMATRIX_MQTT_PORT") {
            match val.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => log::warn!("Ignoring invalid ARTMATRIX_MQTT_PORT={}", val),
            }
        }

        if let Some(val) = var("ARTMATRIX_DISPLAY_PORT") {
            match val.parse() {
                Ok(port) => self.display.port = port,
                Err(_) => log::warn!("Ignoring invalid ARTMATRIX_DISPLAY_PORT={}", val),
            }
        }

        if let Some(path) = var("ARTMATRIX_SERVER_PATH").filter(|p| !p.is_empty()) {
            self.server.path = Some(PathBuf::from(path));
        }
    }

    fn backend(&self) -> BackendMode {
        match self.server.mode {
            ServerMode::Terminal => BackendMode::Terminal {
                hd_terminal: self.terminal.hd_terminal,
            },
            ServerMode::Hardware => {
                let hw = &self.hardware;
                BackendMode::Hardware(HardwareOptions {
                    gpio_mapping: hw.led_gpio_mapping.clone(),
                    slowdown_gpio: hw.led_slowdown_gpio,
                    brightness: hw.led_brightness,
                    show_refresh: hw.led_show_refresh,
                    chain: hw.led_chain,
                    parallel: hw.led_parallel,
                    pwm_bits: hw.led_pwm_bits,
                })
            }
        }
    }

    /// Converts to artmatrix-core's Config type.
    pub fn to_core_config(&self) -> Config {
        let mqtt = &self.mqtt;
        let bus = BusConfig {
            host: mqtt.host.clone(),
            port: mqtt.port,
            topic_root: mqtt.topic.clone(),
            client_id: mqtt.client_id.clone(),
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            keep_alive: Duration::from_secs(mqtt.keep_alive),
            tls: mqtt.tls.as_ref().map(|tls| TlsConfig {
                ca_certs: tls.ca_certs_path.clone(),
                client_cert: tls.certfile_path.clone(),
                client_key: tls.keyfile_path.clone(),
            }),
            ..BusConfig::default()
        };

        let d = &self.display;
        let display = DisplayConfig {
            width: d.width,
            height: d.height,
            host: d.host.clone(),
            port: d.port,
            transport: d.transport,
            fit: d.fit,
            wire: d.wire,
            volume: self.volume.enabled.then(|| VolumeOverlayConfig {
                bar_width: self.volume.width,
                layer: self.volume.layer,
                timeout: Duration::from_millis(self.volume.timeout_ms),
            }),
        };

        let r = &self.restart;
        let server = DisplayServerConfig {
            executable: self.server.path.clone(),
            search_paths: self.server.search_paths.clone(),
            backend: self.backend(),
            layer_timeout: self.server.layer_timeout,
            extra_args: self.server.extra_args.clone(),
            sudo: self
                .server
                .sudo
                .unwrap_or(self.server.mode == ServerMode::Hardware),
            output: self.server.output.into(),
            readiness: ReadinessConfig {
                poll_interval: Duration::from_millis(r.readiness_poll_ms),
                timeout: Duration::from_millis(r.readiness_timeout_ms),
            },
            restart: RestartPolicy {
                max_restarts: r.max_restarts,
                delay: Duration::from_millis(r.delay_ms),
            },
            terminate_grace: Duration::from_millis(r.terminate_grace_ms),
        };

        Config {
            display,
            bus,
            server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_matches_core_defaults() {
        let config = ServerConfig::from_yaml("").unwrap();
        let core = config.to_core_config();
        let defaults = Config::default();

        assert_eq!(core.display, defaults.display);
        assert_eq!(core.server, defaults.server);
        assert_eq!(core.bus.host, defaults.bus.host);
        assert_eq!(core.bus.topic_root, "shairport-sync");
    }

    #[test]
    fn parses_a_full_hardware_config() {
        let yaml = r#"
mqtt:
  host: broker.lan
  port: 8883
  topic: living-room
  username: pi
  password: secret
  tls:
    ca_certs_path: /etc/ssl/ca.pem
display:
  width: 32
  height: 16
  host: 10.0.0.5
  transport: tcp
  fit: fit
  layer: 2
server:
  path: /opt/ft/ft-server
  mode: hardware
  layer_timeout: 10
  output: log
hardware:
  led_brightness: 80
  led_show_refresh: true
restart:
  max_restarts: 5
  delay_ms: 250
volume:
  layer: 3
  timeout_ms: 2000
"#;
        let core = ServerConfig::from_yaml(yaml).unwrap().to_core_config();

        assert_eq!(core.bus.broker(), "broker.lan:8883");
        assert_eq!(core.bus.topic_root, "living-room");
        assert_eq!(core.bus.username.as_deref(), Some("pi"));
        assert_eq!(
            core.bus.tls.as_ref().unwrap().ca_certs,
            PathBuf::from("/etc/ssl/ca.pem")
        );
        assert_eq!((core.display.width, core.display.height), (32, 16));
        assert_eq!(core.display.transport, Transport::Tcp);
        assert_eq!(core.display.fit, FitMode::Fit);
        assert_eq!(core.display.wire.layer, 2);
        let volume = core.display.volume.unwrap();
        assert_eq!(volume.layer, 3);
        assert_eq!(volume.bar_width, 4);
        assert_eq!(volume.timeout, Duration::from_secs(2));
        assert_eq!(core.server.output, OutputMode::Log);
        assert!(core.server.sudo);
        assert_eq!(core.server.restart.max_restarts, 5);
        assert_eq!(core.server.restart.delay, Duration::from_millis(250));
        match &core.server.backend {
            BackendMode::Hardware(hw) => {
                assert_eq!(hw.brightness, 80);
                assert!(hw.show_refresh);
                assert_eq!(hw.gpio_mapping, "adafruit-hat");
            }
            other => panic!("expected hardware backend, got {other:?}"),
        }
        assert!(core.validate().is_ok());
    }

    #[test]
    fn volume_overlay_can_be_disabled() {
        let core = ServerConfig::from_yaml("volume:\n  enabled: false\n")
            .unwrap()
            .to_core_config();
        assert_eq!(core.display.volume, None);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn accepts_legacy_flaschen_section() {
        let yaml = "flaschen:\n  server: matrix.local\n  led-columns: 48\n  led-rows: 24\n";
        let core = ServerConfig::from_yaml(yaml).unwrap().to_core_config();

        assert_eq!(core.display.host, "matrix.local");
        assert_eq!((core.display.width, core.display.height), (48, 24));
    }

    #[test]
    fn explicit_sudo_wins_over_mode_default() {
        let yaml = "server:\n  mode: hardware\n  sudo: false\n";
        let core = ServerConfig::from_yaml(yaml).unwrap().to_core_config();
        assert!(!core.server.sudo);
    }

    #[test]
    fn rejects_unknown_enum_values() {
        assert!(ServerConfig::from_yaml("server:\n  mode: hologram\n").is_err());
    }

    #[test]
    fn env_overrides_apply_after_parsing() {
        let env: HashMap<&str, &str> = [
            ("ARTMATRIX_MQTT_HOST", "mqtt.example"),
            ("ARTMATRIX_MQTT_PORT", "not-a-port"),
            ("ARTMATRIX_DISPLAY_PORT", "1400"),
            ("ARTMATRIX_SERVER_PATH", "/usr/bin/ft-server"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::from_yaml("mqtt:\n  port: 1999\n").unwrap();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.host, "mqtt.example");
        assert_eq!(config.mqtt.port, 1999);
        assert_eq!(config.display.port, 1400);
        assert_eq!(
            config.server.path.as_deref(),
            Some(Path::new("/usr/bin/ft-server"))
        );
    }

    #[test]
    fn loads_an_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artmatrix.yaml");
        std::fs::write(&path, "display:\n  width: 16\n  height: 16\n").unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.display.width, 16);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
