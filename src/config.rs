//! Run configuration.
//!
//! Everything a run needs is passed in explicitly: `SimulationDefaults` holds the
//! knobs that stay fixed across a batch (radio stack defaults, timing layout, output
//! root), `ExperimentConfig` describes one run and `BatchConfig` a sequence of runs.
//!
//! Loading order for the binary:
//! 1. Built-in defaults (the demonstration batch)
//! 2. `config/cdos.yaml`, if present
//! 3. `CDOS_*` environment variables, `__` separating nested keys

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::ActivityWindow;
use crate::error::ConfigError;

const CONFIG_FILE: &str = "config/cdos.yaml";

// NaN compares false, so it is rejected together with non-positive values.
fn positive(value: f64) -> bool {
    value > 0.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationDefaults {
    /// Fixed data rate of every station, also used as the burst rate cap.
    pub link_rate_bps: f64,
    /// Handshake threshold in bytes when the handshake is enabled.
    pub rts_threshold_enabled: u32,
    /// Threshold used when disabled; larger than any frame the device accepts.
    pub rts_threshold_disabled: u32,
    pub mtu: u32,
    /// Lifetime of a resolved address-cache entry.
    pub arp_alive_timeout_s: f64,
    pub station_origin_m: f64,
    pub station_spacing_m: f64,
    pub station_height_m: f64,
    pub network_base: Ipv4Addr,
    pub data_port_base: u16,
    pub probe_port: u16,
    pub probe_payload: u32,
    pub probe_start_s: f64,
    pub probe_spacing_s: f64,
    pub ordinary_start_s: f64,
    pub ordinary_stagger_s: f64,
    pub attack_start_s: f64,
    pub attack_stop_s: f64,
    pub stats_interval_s: f64,
    pub output_root: PathBuf,
}

impl Default for SimulationDefaults {
    fn default() -> Self {
        Self {
            link_rate_bps: 6_000_000.0,
            rts_threshold_enabled: 100,
            rts_threshold_disabled: 10_000_000,
            mtu: 2296,
            arp_alive_timeout_s: 120_000.0,
            station_origin_m: 43.5,
            station_spacing_m: 8.0,
            station_height_m: 1.0,
            network_base: Ipv4Addr::new(10, 0, 0, 0),
            data_port_base: 12345,
            probe_port: 9,
            probe_payload: 10,
            probe_start_s: 0.001,
            probe_spacing_s: 0.001,
            ordinary_start_s: 3.1,
            ordinary_stagger_s: 0.01,
            attack_start_s: 53.0,
            attack_stop_s: 153.0,
            stats_interval_s: 1.0,
            output_root: PathBuf::from("CDoS-6Mbps-adhoc-UDP-building"),
        }
    }
}

impl SimulationDefaults {
    pub fn rts_threshold(&self, handshake_enabled: bool) -> u32 {
        if handshake_enabled {
            self.rts_threshold_enabled
        } else {
            self.rts_threshold_disabled
        }
    }

    pub fn probe_start(&self, flow: usize) -> f64 {
        self.probe_start_s + self.probe_spacing_s * flow as f64
    }

    pub fn ordinary_window(&self, flow: usize) -> ActivityWindow {
        ActivityWindow {
            start: self.ordinary_start_s + self.ordinary_stagger_s * flow as f64,
            stop: None,
        }
    }

    pub fn attack_window(&self) -> ActivityWindow {
        ActivityWindow {
            start: self.attack_start_s,
            stop: Some(self.attack_stop_s),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !positive(self.link_rate_bps) {
            return Err(ConfigError::NonPositiveLinkRate);
        }
        if !positive(self.ordinary_stagger_s) {
            return Err(ConfigError::InvalidSetting("ordinary_stagger_s"));
        }
        if !positive(self.probe_spacing_s) {
            return Err(ConfigError::InvalidSetting("probe_spacing_s"));
        }
        if !positive(self.stats_interval_s) {
            return Err(ConfigError::InvalidSetting("stats_interval_s"));
        }
        if !positive(self.attack_stop_s - self.attack_start_s) {
            return Err(ConfigError::InvalidSetting("attack_stop_s"));
        }
        if self.arp_alive_timeout_s.is_nan() || self.arp_alive_timeout_s < 0.0 {
            return Err(ConfigError::InvalidSetting("arp_alive_timeout_s"));
        }
        Ok(())
    }
}

/// Inputs of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub handshake_enabled: bool,
    pub station_count: usize,
    pub duration_s: f64,
    pub attacking_flow_utilization: f64,
    pub ordinary_flow_utilization: f64,
    pub packet_length: u32,
}

impl ExperimentConfig {
    /// Checks the shape of the run. Utilizations are checked per flow when the
    /// traffic parameters are derived.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station_count < 2 {
            return Err(ConfigError::TooFewStations(self.station_count));
        }
        if self.station_count % 2 != 0 {
            return Err(ConfigError::OddStationCount(self.station_count));
        }
        if !positive(self.duration_s) {
            return Err(ConfigError::NonPositiveDuration);
        }
        if self.packet_length == 0 {
            return Err(ConfigError::NonPositivePacketLength);
        }
        Ok(())
    }

    /// Directory name of this run below the output root.
    pub fn run_dir_name(&self) -> String {
        format!(
            "u_0={:.2}rho={:.2}T={}",
            self.attacking_flow_utilization, self.ordinary_flow_utilization, self.packet_length
        )
    }
}

/// A sequence of runs sharing one seed and differing only in packet length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub seed: u64,
    pub station_count: usize,
    pub duration_s: f64,
    pub attacking_flow_utilization: f64,
    pub ordinary_flow_utilization: f64,
    pub handshake_enabled: bool,
    pub packet_lengths: Vec<u32>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            station_count: 6,
            duration_s: 203.0,
            attacking_flow_utilization: 1.0,
            ordinary_flow_utilization: 0.14,
            handshake_enabled: false,
            packet_lengths: vec![200, 1500],
        }
    }
}

impl BatchConfig {
    pub fn experiment(&self, packet_length: u32) -> ExperimentConfig {
        ExperimentConfig {
            handshake_enabled: self.handshake_enabled,
            station_count: self.station_count,
            duration_s: self.duration_s,
            attacking_flow_utilization: self.attacking_flow_utilization,
            ordinary_flow_utilization: self.ordinary_flow_utilization,
            packet_length,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub defaults: SimulationDefaults,
    pub batch: BatchConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(Path::new(CONFIG_FILE))
    }

    /// Defaults, then `file` if it exists, then `CDOS_*` environment variables.
    pub fn load_with(file: &Path) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if file.exists() {
            info!(path = %file.display(), "loading configuration file");
            figment = figment.merge(Yaml::file(file));
        }
        let config: Self = figment.merge(Env::prefixed("CDOS_").split("__")).extract()?;
        config.defaults.validate()?;
        Ok(config)
    }
}
