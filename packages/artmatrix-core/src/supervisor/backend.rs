//! Command-line construction for `ft-server`.
//!
//! The argument list is a pure function of the configured [`BackendMode`]
//! and display geometry, so every launch and restart uses identical flags.

/// Rendering backend the display server drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// Render into the controlling terminal (development / testing).
    Terminal {
        /// Use half-block characters for double vertical resolution.
        hd_terminal: bool,
    },
    /// Drive an RGB LED matrix over GPIO.
    Hardware(HardwareOptions),
}

impl Default for BackendMode {
    fn default() -> Self {
        Self::Terminal { hd_terminal: true }
    }
}

impl BackendMode {
    /// Backend-specific flags, excluding the common geometry flag.
    #[must_use]
    pub fn args(&self, width: u32, height: u32) -> Vec<String> {
        match self {
            Self::Terminal { hd_terminal } => {
                if *hd_terminal {
                    vec!["--hd-terminal".to_string()]
                } else {
                    Vec::new()
                }
            }
            Self::Hardware(hw) => hw.args(width, height),
        }
    }
}

/// rpi-rgb-led-matrix options passed through by `ft-server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareOptions {
    /// Pin mapping name, e.g. `adafruit-hat` or `regular`.
    pub gpio_mapping: String,
    /// GPIO slowdown factor for faster Pis.
    pub slowdown_gpio: u32,
    /// Brightness percentage (1-100).
    pub brightness: u8,
    /// Print the refresh rate on the server's terminal.
    pub show_refresh: bool,
    /// Panels daisy-chained per output.
    pub chain: Option<u32>,
    /// Parallel chains.
    pub parallel: Option<u32>,
    /// PWM bits (lower trades color depth for refresh rate).
    pub pwm_bits: Option<u8>,
}

impl Default for HardwareOptions {
    fn default() -> Self {
        Self {
            gpio_mapping: "adafruit-hat".to_string(),
            slowdown_gpio: 2,
            brightness: 50,
            show_refresh: false,
            chain: None,
            parallel: None,
            pwm_bits: None,
        }
    }
}

impl HardwareOptions {
    fn args(&self, width: u32, height: u32) -> Vec<String> {
        let mut args = vec![
            format!("--led-rows={height}"),
            format!("--led-cols={width}"),
            format!("--led-gpio-mapping={}", self.gpio_mapping),
            format!("--led-slowdown-gpio={}", self.slowdown_gpio),
            format!("--led-brightness={}", self.brightness.clamp(1, 100)),
        ];
        if let Some(chain) = self.chain {
            args.push(format!("--led-chain={chain}"));
        }
        if let Some(parallel) = self.parallel {
            args.push(format!("--led-parallel={parallel}"));
        }
        if let Some(bits) = self.pwm_bits {
            args.push(format!("--led-pwm-bits={bits}"));
        }
        if self.show_refresh {
            args.push("--led-show-refresh".to_string());
        }
        args
    }
}

/// Everything that goes into the `ft-server` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    pub width: u32,
    pub height: u32,
    pub backend: BackendMode,
    /// Seconds after which an idle layer is cleared by the server.
    pub layer_timeout: Option<u32>,
    /// Appended verbatim.
    pub extra_args: Vec<String>,
}

impl ServerArgs {
    /// Builds the full argument list.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("-D{}x{}", self.width, self.height)];
        args.extend(self.backend.args(self.width, self.height));
        if let Some(timeout) = self.layer_timeout {
            args.push(format!("--layer-timeout={timeout}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}
