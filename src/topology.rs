use std::fmt;
use std::net::Ipv4Addr;

use crate::config::SimulationDefaults;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationRole {
    Sender,
    Receiver,
}

impl fmt::Display for StationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationRole::Sender => write!(f, "Sender"),
            StationRole::Receiver => write!(f, "Receiver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Ordinary,
    Attacking,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::Ordinary => write!(f, "Ordinary"),
            FlowKind::Attacking => write!(f, "Attacking"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: usize,
    pub role: StationRole,
    pub position: Position,
    pub address: Ipv4Addr,
}

/// Flow `index` sends from station `2 * index` to station `2 * index + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flow {
    pub index: usize,
    pub sender: usize,
    pub receiver: usize,
    pub port: u16,
    pub kind: FlowKind,
}

/// Stations on a single line inside the building, numbered from the far end.
#[derive(Debug, Clone)]
pub struct Topology {
    stations: Vec<Station>,
    flows: Vec<Flow>,
}

impl Topology {
    /// The last flow is the attacking one; every other flow is ordinary.
    pub fn linear(station_count: usize, defaults: &SimulationDefaults) -> Result<Topology, ConfigError> {
        if station_count < 2 {
            return Err(ConfigError::TooFewStations(station_count));
        }
        if station_count % 2 != 0 {
            return Err(ConfigError::OddStationCount(station_count));
        }

        let base = u32::from(defaults.network_base);
        let stations = (0..station_count)
            .map(|id| Station {
                id,
                role: if id % 2 == 0 {
                    StationRole::Sender
                } else {
                    StationRole::Receiver
                },
                position: Position {
                    x: defaults.station_origin_m - defaults.station_spacing_m * id as f64,
                    y: 0.0,
                    z: defaults.station_height_m,
                },
                address: Ipv4Addr::from(base + id as u32 + 1),
            })
            .collect();

        let flow_count = station_count / 2;
        let flows = (0..flow_count)
            .map(|index| {
                let port = u16::try_from(index)
                    .ok()
                    .and_then(|offset| defaults.data_port_base.checked_add(offset))
                    .ok_or(ConfigError::InvalidSetting("data_port_base"))?;
                Ok(Flow {
                    index,
                    sender: index * 2,
                    receiver: index * 2 + 1,
                    port,
                    kind: if index == flow_count - 1 {
                        FlowKind::Attacking
                    } else {
                        FlowKind::Ordinary
                    },
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Topology { stations, flows })
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn attacking_flow(&self) -> Option<&Flow> {
        self.flows.iter().find(|f| f.kind == FlowKind::Attacking)
    }
}
