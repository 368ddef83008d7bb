use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, info_span, warn};

use crate::calibration::{derive_traffic_params, LoadSpec, TrafficParams};
use crate::config::{ExperimentConfig, SimulationDefaults};
use crate::error::{CdosError, ConfigError, EngineError, ResourceError};
use crate::node::{DeliveryType, Device, DeviceCounters};
use crate::scheduler::{seconds, to_seconds, Event, EventHandler, EventType, Scheduler, Time};
use crate::stats::StatsCollector;
use crate::topology::{Flow, FlowKind, Topology};
use crate::traffic::{OnOffSource, Probe};

/// Where a finished run left its statistics.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub config: ExperimentConfig,
    pub dir: PathBuf,
    pub stats_prefix: PathBuf,
    pub artifacts: Vec<PathBuf>,
    pub totals: Vec<DeviceCounters>,
    pub events_handled: u64,
}

/// Traffic parameters of one flow, ready to install.
#[derive(Debug, Clone, Copy)]
pub struct FlowPlan {
    pub flow: Flow,
    pub params: TrafficParams,
    pub probe_start: f64,
}

/// Derives every flow's parameters and activity window. Nothing is scheduled yet, so
/// an error here leaves no trace.
pub fn plan_flows(
    config: &ExperimentConfig,
    defaults: &SimulationDefaults,
    topology: &Topology,
) -> Result<Vec<FlowPlan>, ConfigError> {
    topology
        .flows()
        .iter()
        .map(|flow| {
            let (utilization, window) = match flow.kind {
                FlowKind::Attacking => (config.attacking_flow_utilization, defaults.attack_window()),
                FlowKind::Ordinary => (config.ordinary_flow_utilization, defaults.ordinary_window(flow.index)),
            };
            let params = derive_traffic_params(&LoadSpec {
                flow: flow.index,
                packet_length: config.packet_length,
                link_rate_bps: defaults.link_rate_bps,
                target_utilization: utilization,
                kind: flow.kind,
            })?
            .with_window(window);

            debug!(
                flow = flow.index,
                kind = %flow.kind,
                start = window.start,
                stop = ?window.stop,
                utilization = params.expected_utilization(),
                "flow planned"
            );

            let probe_start = defaults.probe_start(flow.index);
            if probe_start >= window.start {
                return Err(ConfigError::ProbeAfterTraffic {
                    flow: flow.index,
                    probe: probe_start,
                    traffic: window.start,
                });
            }
            Ok(FlowPlan {
                flow: *flow,
                params,
                probe_start,
            })
        })
        .collect()
}

fn prepare_output(root: &Path, config: &ExperimentConfig) -> Result<PathBuf, ResourceError> {
    let dir = root.join(config.run_dir_name());
    fs::create_dir_all(&dir).map_err(|source| ResourceError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// One device per station, receivers listening on their flow port. Fails on payloads
/// that do not fit the MTU; runs before the output directory exists.
fn build_devices(
    topology: &Topology,
    plans: &[FlowPlan],
    config: &ExperimentConfig,
    defaults: &SimulationDefaults,
) -> Result<Vec<Device>, EngineError> {
    let rts_threshold = defaults.rts_threshold(config.handshake_enabled);
    let alive = seconds(defaults.arp_alive_timeout_s);
    let mut devices: Vec<Device> = topology
        .stations()
        .iter()
        .map(|s| Device::new(s.id, s.address, rts_threshold, defaults.mtu, alive))
        .collect();
    for plan in plans {
        devices[plan.flow.receiver].listen(plan.flow.port);
        let sender = &devices[plan.flow.sender];
        sender.check_payload(plan.params.packet_size)?;
        sender.check_payload(defaults.probe_payload)?;
    }
    Ok(devices)
}

struct Scenario {
    flows: Vec<Flow>,
    devices: Vec<Device>,
    sources: Vec<OnOffSource>,
    probes: Vec<Probe>,
    stats: StatsCollector,
}

impl Scenario {
    fn install(
        devices: Vec<Device>,
        plans: &[FlowPlan],
        config: &ExperimentConfig,
        defaults: &SimulationDefaults,
        seed: u64,
        stats_prefix: &Path,
        scheduler: &mut Scheduler,
    ) -> Result<Scenario, EngineError> {
        let run_end = seconds(config.duration_s);
        let mut sources = Vec::with_capacity(plans.len());
        let mut probes = Vec::with_capacity(plans.len());
        for plan in plans {
            let probe = Probe::new(plan.flow.index, plan.probe_start, defaults.probe_port, defaults.probe_payload);
            probe.install(scheduler)?;
            probes.push(probe);

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(plan.flow.index as u64);
            let source = OnOffSource::new(plan.flow.index, plan.params, rng);
            source.install(scheduler, run_end)?;
            sources.push(source);
        }

        let stats = StatsCollector::enable(stats_prefix, &devices, seconds(defaults.stats_interval_s), scheduler)?;
        Ok(Scenario {
            flows: plans.iter().map(|p| p.flow).collect(),
            devices,
            sources,
            probes,
            stats,
        })
    }

    fn flow(&self, index: usize) -> Result<Flow, EngineError> {
        self.flows.get(index).copied().ok_or(EngineError::UnknownFlow(index))
    }

    fn source(&mut self, index: usize) -> Result<&mut OnOffSource, EngineError> {
        self.sources.get_mut(index).ok_or(EngineError::UnknownFlow(index))
    }

    fn send_probe(&mut self, index: usize, now: Time) -> Result<(), EngineError> {
        let flow = self.flow(index)?;
        let probe = self.probes.get_mut(index).ok_or(EngineError::UnknownFlow(index))?;
        if !probe.fire() {
            return Ok(());
        }
        let (port, payload) = (probe.port, probe.payload);
        let dst = self.devices[flow.receiver].address();
        let frame = self.devices[flow.sender].send(now, dst, port, payload);
        let delivery = self.devices[flow.receiver].receive(now, &frame);
        debug!(flow = index, at = to_seconds(now), %delivery, "reachability probe sent");
        Ok(())
    }

    fn transmit(&mut self, index: usize, now: Time) -> Result<(), EngineError> {
        let flow = self.flow(index)?;
        let size = self.sources[index].params().packet_size;
        let dst = self.devices[flow.receiver].address();
        if !self.devices[flow.sender].is_resolved(now, dst) {
            warn!(flow = index, at = to_seconds(now), "traffic started before address resolution");
        }
        let frame = self.devices[flow.sender].send(now, dst, flow.port, size);
        match self.devices[flow.receiver].receive(now, &frame) {
            DeliveryType::Delivered => Ok(()),
            other => Err(EngineError::UnsupportedConfiguration(format!(
                "flow {index}: receiver reported {other}"
            ))),
        }
    }

    fn print_stats(&self) {
        for device in &self.devices {
            let (node, _) = device.get_id();
            let totals = device.totals();
            info!(
                node,
                tx = totals.tx_packets,
                rx = totals.rx_packets,
                handshakes = totals.handshakes,
                resolutions = totals.resolutions,
                "station totals"
            );
        }
        for (index, source) in self.sources.iter().enumerate() {
            debug!(flow = index, packets = source.packets_sent(), "flow totals");
        }
        for probe in self.probes.iter().filter(|p| !p.was_sent()) {
            warn!(flow = probe.flow, "reachability probe was never sent");
        }
    }
}

impl EventHandler for Scenario {
    fn handle(&mut self, event: Event, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        let index = event.target;
        match event.event_type {
            EventType::Probe => self.send_probe(index, scheduler.now())?,
            EventType::AppStart => self.source(index)?.start_application(scheduler)?,
            EventType::AppStop => self.source(index)?.stop_application(scheduler),
            EventType::StartSending { epoch } => self.source(index)?.start_sending(epoch, scheduler)?,
            EventType::StopSending { epoch } => self.source(index)?.stop_sending(epoch, scheduler)?,
            EventType::SendPacket { epoch } => {
                if self.source(index)?.send_packet(epoch, scheduler)? {
                    self.transmit(index, scheduler.now())?;
                }
            }
            EventType::StatsSample => self.stats.sample(&mut self.devices, scheduler)?,
        }
        Ok(())
    }
}

/// Runs one experiment to completion and returns where its statistics went.
///
/// Configuration and output-directory errors are raised before any event is
/// scheduled. Each call builds its own engine, devices and sources, so consecutive
/// runs share nothing but the output root.
pub fn run_experiment(
    config: &ExperimentConfig,
    defaults: &SimulationDefaults,
    seed: u64,
) -> Result<RunOutput, CdosError> {
    let span = info_span!(
        "experiment",
        u_0 = config.attacking_flow_utilization,
        rho = config.ordinary_flow_utilization,
        packet_length = config.packet_length
    );
    let _enter = span.enter();

    config.validate()?;
    defaults.validate()?;
    let topology = Topology::linear(config.station_count, defaults)?;
    for station in topology.stations() {
        debug!(
            id = station.id,
            role = %station.role,
            address = %station.address,
            x = station.position.x,
            y = station.position.y,
            z = station.position.z,
            "station placed"
        );
    }
    let plans = plan_flows(config, defaults, &topology)?;
    let devices = build_devices(&topology, &plans, config, defaults)?;
    let dir = prepare_output(&defaults.output_root, config)?;
    let stats_prefix = dir.join("nodes");

    let mut scheduler = Scheduler::new();
    let mut scenario = Scenario::install(devices, &plans, config, defaults, seed, &stats_prefix, &mut scheduler)?;
    info!(
        stations = config.station_count,
        flows = plans.len(),
        attacking_flow = ?topology.attacking_flow().map(|f| f.index),
        handshake = config.handshake_enabled,
        duration_s = config.duration_s,
        pending = scheduler.pending(),
        "experiment started"
    );

    scheduler.run_until(seconds(config.duration_s), &mut scenario)?;
    let now = scheduler.now();
    scenario.stats.flush(&mut scenario.devices, now);
    let events_handled = scheduler.handled();
    let discarded = scheduler.destroy();
    debug!(events_handled, discarded, "engine destroyed");

    let artifacts = scenario.stats.write_all()?;
    scenario.print_stats();
    info!(dir = %dir.display(), "experiment finished");

    Ok(RunOutput {
        config: config.clone(),
        dir,
        stats_prefix,
        artifacts,
        totals: scenario.devices.iter().map(Device::totals).collect(),
        events_handled,
    })
}
