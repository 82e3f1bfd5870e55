//! Typed configuration for a simulation pass: scene bounds, reader
//! inventory parameters, tag population and channel model.
//!
//! Configurations are deserialized from TOML. Symbolic fields use their
//! Gen2 spelling ("64/3", "FM0", "ALL", "S0", "A"); an unknown spelling is
//! a parse error. `validate()` rejects out-of-range numerics with a
//! specific message before any simulation state is built.

use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::gen2::{DivideRatio, InventoryFlag, Sel, Session, TagEncoding};
use crate::geometry::Vec3;
use crate::sim::channel::ChannelModel;

/// Default thermal noise floor in dBm.
pub const THERMAL_NOISE: f64 = -110.0;
/// Vacuum speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299792458.0;
/// Path loss in dB applied outside the connection distance of the constant
/// channel, effectively severing the link.
pub const NOCONN_PATH_LOSS: f64 = -200.0;

/// Error raised while loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "failed to read configuration: {msg}"),
            ConfigError::Parse(msg) => write!(f, "failed to parse configuration: {msg}"),
            ConfigError::Validation(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Scene-level bounds and bookkeeping switches.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    /// Reader-tag distance (m) beyond which the pass is declared over.
    pub max_distance: f64,
    /// Interval (s) between reader position and channel updates.
    pub position_update_interval: f64,
    /// Inventory rounds before the pass ends; negative means unbounded.
    #[serde(default = "default_max_num_rounds")]
    pub max_num_rounds: i32,
    /// Raise per-event logging to trace level.
    #[serde(default)]
    pub verbose: bool,
}

fn default_max_num_rounds() -> i32 {
    -1
}

/// Reader inventory parameters and RF front-end figures.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Initial position (m).
    pub position: Vec3,
    /// Velocity (m/s); the reader flies a straight line.
    pub velocity: Vec3,
    /// Slot-count exponent: a round has 2^q slots.
    pub q: u8,
    /// Tag-to-reader encoding requested in Query.
    pub m: TagEncoding,
    pub sel: Sel,
    #[serde(default)]
    pub trext: bool,
    pub dr: DivideRatio,
    /// Reference pulse interval (s).
    pub tari: f64,
    /// Reader-to-tag calibration interval (s).
    pub rtcal: f64,
    /// Tag-to-reader calibration interval (s).
    pub trcal: f64,
    pub session: Session,
    pub target: InventoryFlag,
    /// Words requested by the Read command.
    pub wordcnt: usize,
    /// Transmit power (dBm).
    pub tx_power: f64,
    /// Circulator leakage noise at the receiver (dBm).
    pub circulator_noise: f64,
    /// Record the simulated time of every successful EPC read.
    #[serde(default)]
    pub record_read_timestamps: bool,
}

/// Per-tag placement and RF characteristics.
#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    pub position: Vec3,
    /// Minimum received power (dBm) that keeps the tag energized.
    pub sensitivity: f64,
    /// EPC identifier length in 16-bit words.
    pub epcid_wordcnt: usize,
    /// Backscatter modulation loss (dB).
    pub modulation_loss: f64,
    /// Fixed EPC as a hex string; generated from the run seed when absent.
    #[serde(default)]
    pub epc: Option<String>,
    /// Invert the session's inventoried flag after each EPC transmission.
    #[serde(default)]
    pub switch_target: bool,
}

/// Channel model selection plus shared physical constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(flatten)]
    pub model: ChannelModelConfig,
    #[serde(default = "default_thermal_noise")]
    pub thermal_noise: f64,
    #[serde(default = "default_speed_of_light")]
    pub speed_of_light: f64,
}

fn default_thermal_noise() -> f64 {
    THERMAL_NOISE
}

fn default_speed_of_light() -> f64 {
    SPEED_OF_LIGHT
}

/// The two channel variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ChannelModelConfig {
    Constant {
        connection_distance: f64,
        ber: f64,
        path_loss: f64,
        #[serde(default = "default_noconn_path_loss")]
        noconn_path_loss: f64,
    },
    Awgn {
        frequency: f64,
    },
}

fn default_noconn_path_loss() -> f64 {
    NOCONN_PATH_LOSS
}

impl ChannelModelConfig {
    pub fn build(&self) -> ChannelModel {
        match *self {
            ChannelModelConfig::Constant { connection_distance, ber, path_loss, noconn_path_loss } => {
                ChannelModel::Constant { connection_distance, path_loss, ber, noconn_path_loss }
            }
            ChannelModelConfig::Awgn { frequency } => ChannelModel::Awgn { frequency },
        }
    }
}

/// Full configuration of one simulation pass.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub scene: SceneConfig,
    pub reader: ReaderConfig,
    pub tags: Vec<TagConfig>,
    pub channel: ChannelConfig,
    /// RNG seed; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the simulation cannot run meaningfully.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn fail(msg: String) -> Result<(), ConfigError> {
            Err(ConfigError::Validation(msg))
        }

        if self.scene.max_distance <= 0.0 {
            return fail(format!("scene.max_distance must be positive, got {}", self.scene.max_distance));
        }
        if self.scene.position_update_interval <= 0.0 {
            return fail(format!(
                "scene.position_update_interval must be positive, got {}",
                self.scene.position_update_interval
            ));
        }

        let r = &self.reader;
        if r.q > 15 {
            return fail(format!("reader.q must be in 0..=15, got {}", r.q));
        }
        if r.tari <= 0.0 || r.rtcal <= 0.0 || r.trcal <= 0.0 {
            return fail("reader.tari, reader.rtcal and reader.trcal must be positive".to_string());
        }
        if r.rtcal <= r.tari {
            return fail(format!(
                "reader.rtcal ({}) must exceed reader.tari ({}) for a positive data-1 interval",
                r.rtcal, r.tari
            ));
        }
        if r.wordcnt == 0 {
            return fail("reader.wordcnt must be at least 1".to_string());
        }

        if self.tags.is_empty() {
            return fail("at least one tag is required".to_string());
        }
        for (i, tag) in self.tags.iter().enumerate() {
            if tag.epcid_wordcnt == 0 {
                return fail(format!("tags[{i}].epcid_wordcnt must be at least 1"));
            }
            if let Some(epc) = &tag.epc {
                if !epc.chars().all(|c| c.is_ascii_hexdigit()) {
                    return fail(format!("tags[{i}].epc must be a hex string, got \"{epc}\""));
                }
                if epc.len() != tag.epcid_wordcnt * 4 {
                    return fail(format!(
                        "tags[{i}].epc has {} hex digits, expected {} for {} words",
                        epc.len(),
                        tag.epcid_wordcnt * 4,
                        tag.epcid_wordcnt
                    ));
                }
            }
        }

        match self.channel.model {
            ChannelModelConfig::Constant { connection_distance, ber, .. } => {
                if connection_distance <= 0.0 {
                    return fail(format!("channel.connection_distance must be positive, got {connection_distance}"));
                }
                if !(0.0..=1.0).contains(&ber) {
                    return fail(format!("channel.ber must lie in [0, 1], got {ber}"));
                }
            }
            ChannelModelConfig::Awgn { frequency } => {
                if frequency <= 0.0 {
                    return fail(format!("channel.frequency must be positive, got {frequency}"));
                }
            }
        }
        if self.channel.speed_of_light <= 0.0 {
            return fail(format!("channel.speed_of_light must be positive, got {}", self.channel.speed_of_light));
        }

        Ok(())
    }
}

/// Programmatic baseline configuration shared by unit tests across the
/// simulation modules.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn base_config() -> SimulationConfig {
        SimulationConfig {
            scene: SceneConfig {
                max_distance: 15.0,
                position_update_interval: 0.1,
                max_num_rounds: -1,
                verbose: false,
            },
            reader: ReaderConfig {
                position: Vec3::new(0.0, 0.0, 1.0),
                velocity: Vec3::new(4.0, 0.0, 0.0),
                q: 2,
                m: TagEncoding::Fm0,
                sel: Sel::All,
                trext: false,
                dr: DivideRatio::Dr8,
                tari: 6.25e-6,
                rtcal: 15.0e-6,
                trcal: 20.0e-6,
                session: Session::S0,
                target: InventoryFlag::A,
                wordcnt: 4,
                tx_power: 31.5,
                circulator_noise: -80.0,
                record_read_timestamps: false,
            },
            tags: vec![TagConfig {
                position: Vec3::ZERO,
                sensitivity: -18.0,
                epcid_wordcnt: 6,
                modulation_loss: -10.0,
                epc: None,
                switch_target: false,
            }],
            channel: ChannelConfig {
                model: ChannelModelConfig::Constant {
                    connection_distance: 2.0,
                    ber: 0.0,
                    path_loss: -40.0,
                    noconn_path_loss: NOCONN_PATH_LOSS,
                },
                thermal_noise: THERMAL_NOISE,
                speed_of_light: SPEED_OF_LIGHT,
            },
            seed: Some(42),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
            seed = 42

            [scene]
            max_distance = 15.0
            position_update_interval = 0.1
            max_num_rounds = -1
            verbose = false

            [reader]
            position = [0.0, 0.0, 10.0]
            velocity = [1.0, 0.0, 0.0]
            q = 2
            m = "M2"
            sel = "ALL"
            trext = false
            dr = "64/3"
            tari = 6.25e-6
            rtcal = 15.0e-6
            trcal = 20.0e-6
            session = "S0"
            target = "A"
            wordcnt = 4
            tx_power = 31.5
            circulator_noise = -80.0

            [[tags]]
            position = [0.0, 0.0, 0.0]
            sensitivity = -18.0
            epcid_wordcnt = 6
            modulation_loss = -10.0

            [channel]
            model = "constant"
            connection_distance = 11.0
            ber = 0.01
            path_loss = -40.0
        "#
        .to_string()
    }

    #[test]
    fn parses_symbolic_fields() {
        let cfg = SimulationConfig::from_toml_str(&base_toml()).expect("config parses");
        assert_eq!(cfg.reader.m, TagEncoding::M2);
        assert_eq!(cfg.reader.dr, DivideRatio::Dr64_3);
        assert_eq!(cfg.reader.sel, Sel::All);
        assert_eq!(cfg.reader.session, Session::S0);
        assert_eq!(cfg.reader.target, InventoryFlag::A);
        assert_eq!(cfg.seed, Some(42));
        assert!(matches!(cfg.channel.model, ChannelModelConfig::Constant { .. }));
        assert_eq!(cfg.channel.thermal_noise, THERMAL_NOISE);
        assert_eq!(cfg.channel.speed_of_light, SPEED_OF_LIGHT);
    }

    #[test]
    fn unknown_symbol_is_a_parse_error() {
        let toml = base_toml().replace("\"64/3\"", "\"64/5\"");
        match SimulationConfig::from_toml_str(&toml) {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn awgn_variant_parses() {
        let toml = base_toml().replace(
            "model = \"constant\"\n            connection_distance = 11.0\n            ber = 0.01\n            path_loss = -40.0",
            "model = \"awgn\"\n            frequency = 860e6",
        );
        let cfg = SimulationConfig::from_toml_str(&toml).expect("awgn config parses");
        assert!(matches!(cfg.channel.model, ChannelModelConfig::Awgn { frequency } if frequency == 860e6));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let toml = base_toml().replace("q = 2", "q = 16");
        match SimulationConfig::from_toml_str(&toml) {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("reader.q")),
            other => panic!("expected validation error, got {other:?}"),
        }

        let toml = base_toml().replace("ber = 0.01", "ber = 1.5");
        assert!(matches!(SimulationConfig::from_toml_str(&toml), Err(ConfigError::Validation(_))));

        let toml = base_toml().replace("[[tags]]", "[[removed]]");
        assert!(matches!(SimulationConfig::from_toml_str(&toml), Err(_)));
    }
}
