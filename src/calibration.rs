/*
    t_pkt = L * 8 / R
    u     = t_on / (t_on + E[t_off])
    t_on  = t_pkt   =>   E[t_off] = t_pkt * (1/u - 1)
 */

use rand::Rng;
use rand_distr::{Distribution, Exp};
use tracing::debug;

use crate::error::ConfigError;
use crate::topology::FlowKind;

/// Duration distribution handed to an on/off source, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OnOffDistribution {
    Constant(f64),
    Exponential { mean: f64 },
}

impl OnOffDistribution {
    pub fn mean(&self) -> f64 {
        match *self {
            OnOffDistribution::Constant(value) => value,
            OnOffDistribution::Exponential { mean } => mean,
        }
    }

    /// Draws one duration. An exponential with infinite mean never ends and one
    /// with zero mean always yields zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            OnOffDistribution::Constant(value) => value,
            OnOffDistribution::Exponential { mean } => {
                if mean <= 0.0 {
                    return 0.0;
                }
                if !mean.is_finite() {
                    return f64::INFINITY;
                }
                match Exp::new(1.0 / mean) {
                    Ok(exp) => exp.sample(rng),
                    Err(_) => f64::INFINITY,
                }
            }
        }
    }
}

/// Interval in which a source is allowed to run. `stop == None` means until the end of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityWindow {
    pub start: f64,
    pub stop: Option<f64>,
}

impl ActivityWindow {
    pub fn whole_run() -> ActivityWindow {
        ActivityWindow { start: 0.0, stop: None }
    }
}

/// Inputs for one flow's offered load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSpec {
    pub flow: usize,
    pub packet_length: u32,
    pub link_rate_bps: f64,
    pub target_utilization: f64,
    pub kind: FlowKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficParams {
    pub on: OnOffDistribution,
    pub off: OnOffDistribution,
    pub data_rate_bps: f64,
    pub packet_size: u32,
    pub window: ActivityWindow,
}

impl TrafficParams {
    pub fn with_window(self, window: ActivityWindow) -> TrafficParams {
        TrafficParams { window, ..self }
    }

    /// Long-run fraction of time spent "on".
    pub fn expected_utilization(&self) -> f64 {
        let on = self.on.mean();
        let total = on + self.off.mean();
        if total == 0.0 {
            return 0.0;
        }
        on / total
    }
}

/// Seconds needed to put one packet on the air at `link_rate_bps`.
pub fn packet_transmit_time(packet_length: u32, link_rate_bps: f64) -> f64 {
    f64::from(packet_length) * 8.0 / link_rate_bps
}

/// Maps a target utilization to on/off parameters.
///
/// Only the attacking flow short-circuits utilization 0 and 1 to the always-off and
/// always-on sources. Ordinary flows always go through the exponential mean, which
/// becomes infinite at 0 and zero at 1.
pub fn derive_traffic_params(load: &LoadSpec) -> Result<TrafficParams, ConfigError> {
    if load.packet_length == 0 {
        return Err(ConfigError::NonPositivePacketLength);
    }
    if load.link_rate_bps.is_nan() || load.link_rate_bps <= 0.0 {
        return Err(ConfigError::NonPositiveLinkRate);
    }
    let utilization = load.target_utilization;
    if !(0.0..=1.0).contains(&utilization) {
        return Err(ConfigError::UtilizationOutOfRange {
            flow: load.flow,
            value: utilization,
        });
    }

    let pkt_time = packet_transmit_time(load.packet_length, load.link_rate_bps);
    let (on, off) = match load.kind {
        FlowKind::Attacking if utilization == 1.0 => (
            OnOffDistribution::Constant(1.0),
            OnOffDistribution::Constant(0.0),
        ),
        FlowKind::Attacking if utilization == 0.0 => (
            OnOffDistribution::Constant(0.0),
            OnOffDistribution::Constant(1.0),
        ),
        _ => (
            OnOffDistribution::Constant(pkt_time),
            OnOffDistribution::Exponential {
                mean: pkt_time * (1.0 / utilization - 1.0),
            },
        ),
    };
    debug!(
        flow = load.flow,
        kind = ?load.kind,
        utilization,
        pkt_time,
        on = ?on,
        off = ?off,
        "derived traffic parameters"
    );

    Ok(TrafficParams {
        on,
        off,
        data_rate_bps: load.link_rate_bps,
        packet_size: load.packet_length,
        window: ActivityWindow::whole_run(),
    })
}
