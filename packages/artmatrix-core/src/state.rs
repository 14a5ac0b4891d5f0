//! Core configuration and orchestrator state.
//!
//! [`Config`] is plain data built by the server from its YAML file and CLI
//! flags. [`OrchestratorState`] bundles it with the runtime seams (process
//! launcher, readiness probe, frame sink connector, event emitter) so every
//! component receives its dependencies at construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::artwork::FitMode;
use crate::bus::BusConfig;
use crate::display::{
    encoded_len, DisplayConnector, DisplayEndpoint, DisplayFrame, FrameSinkConnector,
    ReadinessProbe, Transport, WireOptions,
};
use crate::events::EventEmitter;
use crate::lifecycle::Lifecycle;
use crate::protocol_constants::{
    DEFAULT_DISPLAY_PORT, DEFAULT_DISPLAY_SIZE, MAX_DISPLAY_LAYER, MAX_UDP_PAYLOAD,
    TERMINATE_GRACE_MS,
};
use crate::supervisor::{
    BackendMode, ExecutableSearch, LaunchSpec, OutputMode, ProcessLauncher, ReadinessConfig,
    RestartPolicy, ServerArgs,
};
use crate::volume::VolumeOverlayConfig;

/// Matrix geometry and where frames go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub fit: FitMode,
    pub wire: WireOptions,
    /// Volume bar overlay; `None` ignores volume changes.
    pub volume: Option<VolumeOverlayConfig>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_DISPLAY_SIZE,
            height: DEFAULT_DISPLAY_SIZE,
            host: "localhost".to_string(),
            port: DEFAULT_DISPLAY_PORT,
            transport: Transport::Udp,
            fit: FitMode::Fill,
            wire: WireOptions::default(),
            volume: Some(VolumeOverlayConfig::default()),
        }
    }
}

impl DisplayConfig {
    #[must_use]
    pub fn endpoint(&self) -> DisplayEndpoint {
        DisplayEndpoint::new(self.host.clone(), self.port, self.transport)
    }

    #[must_use]
    pub fn connector(&self) -> DisplayConnector {
        DisplayConnector {
            endpoint: self.endpoint(),
        }
    }
}

/// How the display server process is found, started, and kept alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayServerConfig {
    /// Explicit binary; disables the search when set.
    pub executable: Option<PathBuf>,
    /// Checked before the built-in install locations.
    pub search_paths: Vec<PathBuf>,
    pub backend: BackendMode,
    pub layer_timeout: Option<u32>,
    pub extra_args: Vec<String>,
    /// Launch through `sudo` (hardware GPIO access).
    pub sudo: bool,
    pub output: OutputMode,
    pub readiness: ReadinessConfig,
    pub restart: RestartPolicy,
    /// SIGTERM to SIGKILL escalation delay.
    pub terminate_grace: Duration,
}

impl Default for DisplayServerConfig {
    fn default() -> Self {
        Self {
            executable: None,
            search_paths: Vec::new(),
            backend: BackendMode::default(),
            layer_timeout: None,
            extra_args: Vec::new(),
            sudo: false,
            output: OutputMode::Discard,
            readiness: ReadinessConfig::default(),
            restart: RestartPolicy::default(),
            terminate_grace: Duration::from_millis(TERMINATE_GRACE_MS),
        }
    }
}

impl DisplayServerConfig {
    #[must_use]
    pub fn search(&self) -> ExecutableSearch {
        ExecutableSearch::new(self.executable.clone(), self.search_paths.clone())
    }

    #[must_use]
    pub fn server_args(&self, display: &DisplayConfig) -> ServerArgs {
        ServerArgs {
            width: display.width,
            height: display.height,
            backend: self.backend.clone(),
            layer_timeout: self.layer_timeout,
            extra_args: self.extra_args.clone(),
        }
    }

    /// Launch parameters for a resolved binary.
    #[must_use]
    pub fn launch_spec(&self, program: PathBuf, display: &DisplayConfig) -> LaunchSpec {
        LaunchSpec {
            program,
            args: self.server_args(display).to_args(),
            output: self.output,
            sudo: self.sudo,
        }
    }
}

/// Everything the orchestrator needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub display: DisplayConfig,
    pub bus: BusConfig,
    pub server: DisplayServerConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let display = &self.display;
        if display.width == 0 || display.height == 0 {
            return Err(format!(
                "display size must be positive (got {}x{})",
                display.width, display.height
            ));
        }
        if display.host.trim().is_empty() {
            return Err("display host must not be empty".to_string());
        }
        if display.port == 0 {
            return Err("display port must be >= 1".to_string());
        }
        if display.transport == Transport::Udp {
            let blank = DisplayFrame::blank(display.width, display.height)
                .map_err(|e| e.to_string())?;
            let size = encoded_len(&blank, &display.wire);
            if size > MAX_UDP_PAYLOAD {
                return Err(format!(
                    "a {}x{} frame is {} bytes, over the {}-byte UDP limit; use tcp transport",
                    display.width, display.height, size, MAX_UDP_PAYLOAD
                ));
            }
        }
        if display.wire.layer > MAX_DISPLAY_LAYER {
            return Err(format!(
                "display layer must be 0-{} (got {})",
                MAX_DISPLAY_LAYER, display.wire.layer
            ));
        }
        if let Some(volume) = &display.volume {
            if volume.layer <= display.wire.layer || volume.layer > MAX_DISPLAY_LAYER {
                return Err(format!(
                    "volume layer must be above the cover layer {} and at most {} (got {})",
                    display.wire.layer, MAX_DISPLAY_LAYER, volume.layer
                ));
            }
            if !(1..=display.width).contains(&volume.bar_width) {
                return Err(format!(
                    "volume bar width must be 1-{} (got {})",
                    display.width, volume.bar_width
                ));
            }
            if volume.timeout.is_zero() {
                return Err("volume timeout must be positive".to_string());
            }
        }

        let bus = &self.bus;
        if bus.host.trim().is_empty() {
            return Err("mqtt host must not be empty".to_string());
        }
        if bus.port == 0 {
            return Err("mqtt port must be >= 1".to_string());
        }
        let root = bus.topic_root.trim_end_matches('/');
        if root.is_empty() || root.contains(['#', '+']) {
            return Err(format!(
                "mqtt topic root must be a non-empty topic without wildcards (got {:?})",
                bus.topic_root
            ));
        }
        if let Some(tls) = &bus.tls {
            if tls.client_cert.is_some() != tls.client_key.is_some() {
                return Err("mqtt TLS client certificate and key must be set together".to_string());
            }
        }

        let server = &self.server;
        if server.readiness.poll_interval.is_zero() || server.readiness.timeout.is_zero() {
            return Err("readiness poll interval and timeout must be positive".to_string());
        }
        if let BackendMode::Hardware(hw) = &server.backend {
            if !(1..=100).contains(&hw.brightness) {
                return Err(format!("led brightness must be 1-100 (got {})", hw.brightness));
            }
        }
        Ok(())
    }
}

/// Shared dependencies handed to every component at construction.
pub struct OrchestratorState {
    pub config: Config,
    /// Resolved display server binary.
    pub executable: PathBuf,
    pub lifecycle: Arc<dyn Lifecycle>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub connector: Arc<dyn FrameSinkConnector>,
    pub emitter: Arc<dyn EventEmitter>,
}

impl OrchestratorState {
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        self.config
            .server
            .launch_spec(self.executable.clone(), &self.config.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::HardwareOptions;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let mut config = Config::default();
        config.display.height = 0;
        assert!(config.validate().unwrap_err().contains("0"));
    }

    #[test]
    fn oversized_udp_frames_are_rejected_up_front() {
        let mut config = Config::default();
        config.display.width = 256;
        config.display.height = 128;
        assert!(config.validate().unwrap_err().contains("UDP"));

        config.display.transport = Transport::Tcp;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn volume_overlay_must_sit_above_the_cover_layer() {
        let mut config = Config::default();
        config.display.wire.layer = 1;
        assert!(config.validate().unwrap_err().contains("volume layer"));

        config.display.volume = Some(VolumeOverlayConfig {
            layer: 2,
            ..Default::default()
        });
        assert!(config.validate().is_ok());

        config.display.volume = Some(VolumeOverlayConfig {
            layer: 16,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.display.volume = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn volume_bar_must_fit_the_display() {
        let mut config = Config::default();
        config.display.volume = Some(VolumeOverlayConfig {
            bar_width: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.display.volume = Some(VolumeOverlayConfig {
            bar_width: config.display.width + 1,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn wildcard_topic_roots_are_rejected() {
        let mut config = Config::default();
        config.bus.topic_root = "shairport-sync/#".to_string();
        assert!(config.validate().is_err());

        config.bus.topic_root = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn hardware_brightness_is_range_checked() {
        let mut config = Config::default();
        config.server.backend = BackendMode::Hardware(HardwareOptions {
            brightness: 150,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn launch_spec_uses_display_geometry() {
        let mut config = Config::default();
        config.display.width = 32;
        config.display.height = 16;
        config.server.sudo = true;

        let spec = config
            .server
            .launch_spec(PathBuf::from("/opt/ft-server"), &config.display);
        assert_eq!(spec.args[0], "-D32x16");
        assert!(spec.sudo);
        assert_eq!(spec.output, OutputMode::Discard);
    }
}
