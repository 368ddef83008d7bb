use std::path::PathBuf;
use thiserror::Error;

/// Rejected experiment inputs. Raised before anything is scheduled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("flow {flow}: target utilization {value} is outside [0, 1]")]
    UtilizationOutOfRange { flow: usize, value: f64 },

    #[error("station count must be even, got {0}")]
    OddStationCount(usize),

    #[error("at least two stations are required, got {0}")]
    TooFewStations(usize),

    #[error("packet length must be positive")]
    NonPositivePacketLength,

    #[error("simulation duration must be positive")]
    NonPositiveDuration,

    #[error("link rate must be positive")]
    NonPositiveLinkRate,

    #[error("invalid setting `{0}`")]
    InvalidSetting(&'static str),

    #[error("flow {flow}: probe at {probe}s does not precede traffic start at {traffic}s")]
    ProbeAfterTraffic { flow: usize, probe: f64, traffic: f64 },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Output location could not be prepared or written.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write statistics file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised by the event engine while installing or running a scenario.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("event scheduled at {at} ns but simulated time is already {now} ns")]
    EventInPast { now: u64, at: u64 },

    #[error("no traffic source installed for flow {0}")]
    UnknownFlow(usize),
}

#[derive(Debug, Error)]
pub enum CdosError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
