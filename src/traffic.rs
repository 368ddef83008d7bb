//! Traffic generators attached to sender stations.
//!
//! `OnOffSource` alternates random "off" and "on" periods and emits fixed-size
//! packets at the data-rate cap while on. Bits of a packet that did not fit into an
//! on period carry over to the next one. Every (re)start bumps `epoch`; events that
//! carry an older epoch were cancelled and are ignored.
//!
//! `Probe` sends a single datagram ahead of the real traffic so that address
//! resolution is already done when the flow starts.

use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::calibration::TrafficParams;
use crate::error::EngineError;
use crate::scheduler::{seconds, to_seconds, EventType, Scheduler, Time};

#[derive(Debug)]
pub struct OnOffSource {
    flow: usize,
    params: TrafficParams,
    rng: ChaCha8Rng,
    epoch: u64,
    running: bool,
    sending: bool,
    last_start: Time,
    residual_bits: f64,
    packets_sent: u64,
}

impl OnOffSource {
    pub fn new(flow: usize, params: TrafficParams, rng: ChaCha8Rng) -> OnOffSource {
        OnOffSource {
            flow,
            params,
            rng,
            epoch: 0,
            running: false,
            sending: false,
            last_start: 0,
            residual_bits: 0.0,
            packets_sent: 0,
        }
    }

    pub fn params(&self) -> &TrafficParams {
        &self.params
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Schedules the start and, if bounded, the stop of the activity window.
    pub fn install(&self, scheduler: &mut Scheduler, run_end: Time) -> Result<(), EngineError> {
        let start = seconds(self.params.window.start);
        if start >= run_end {
            trace!(flow = self.flow, "activity window starts after the run ends");
            return Ok(());
        }
        scheduler.schedule_in(start, EventType::AppStart, self.flow)?;
        if let Some(stop) = self.params.window.stop {
            let stop = seconds(stop);
            if stop < run_end {
                scheduler.schedule_in(stop, EventType::AppStop, self.flow)?;
            }
        }
        Ok(())
    }

    pub fn start_application(&mut self, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        self.running = true;
        self.cancel_events(scheduler.now());
        self.schedule_start_event(scheduler)
    }

    pub fn stop_application(&mut self, scheduler: &mut Scheduler) {
        self.cancel_events(scheduler.now());
        self.running = false;
    }

    pub fn start_sending(&mut self, epoch: u64, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        if !self.is_current(epoch) {
            return Ok(());
        }
        self.sending = true;
        self.last_start = scheduler.now();
        // A packet cut short by the end of the previous on period left its elapsed
        // bits in `residual_bits`, so it goes out right away here.
        self.schedule_next_tx(scheduler)?;
        let on = self.params.on.sample(&mut self.rng);
        scheduler.schedule_in(seconds(on), EventType::StopSending { epoch: self.epoch }, self.flow)
    }

    /// Returns `true` when a packet has to be handed to the device.
    pub fn send_packet(&mut self, epoch: u64, scheduler: &mut Scheduler) -> Result<bool, EngineError> {
        if !self.is_current(epoch) || !self.sending {
            return Ok(false);
        }
        self.packets_sent += 1;
        self.residual_bits = 0.0;
        self.last_start = scheduler.now();
        self.schedule_next_tx(scheduler)?;
        Ok(true)
    }

    pub fn stop_sending(&mut self, epoch: u64, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        if !self.is_current(epoch) {
            return Ok(());
        }
        self.cancel_events(scheduler.now());
        self.schedule_start_event(scheduler)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.running && epoch == self.epoch
    }

    fn cancel_events(&mut self, now: Time) {
        if self.sending {
            let elapsed = to_seconds(now.saturating_sub(self.last_start));
            self.residual_bits += self.params.data_rate_bps * elapsed;
        }
        self.sending = false;
        self.epoch += 1;
    }

    fn schedule_start_event(&mut self, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        let off = self.params.off.sample(&mut self.rng);
        if !off.is_finite() {
            trace!(flow = self.flow, "off period never ends");
            return Ok(());
        }
        scheduler.schedule_in(seconds(off), EventType::StartSending { epoch: self.epoch }, self.flow)
    }

    fn schedule_next_tx(&mut self, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        let bits = (f64::from(self.params.packet_size) * 8.0 - self.residual_bits).max(0.0);
        let next = bits / self.params.data_rate_bps;
        scheduler.schedule_in(seconds(next), EventType::SendPacket { epoch: self.epoch }, self.flow)
    }
}

/// One-shot datagram that warms the sender's address cache before traffic starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub flow: usize,
    pub start: f64,
    pub port: u16,
    pub payload: u32,
    sent: bool,
}

impl Probe {
    pub fn new(flow: usize, start: f64, port: u16, payload: u32) -> Probe {
        Probe {
            flow,
            start,
            port,
            payload,
            sent: false,
        }
    }

    pub fn install(&self, scheduler: &mut Scheduler) -> Result<(), EngineError> {
        scheduler.schedule_in(seconds(self.start), EventType::Probe, self.flow)
    }

    /// Marks the probe as sent; returns `false` if it already was.
    pub fn fire(&mut self) -> bool {
        !std::mem::replace(&mut self.sent, true)
    }

    pub fn was_sent(&self) -> bool {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{derive_traffic_params, ActivityWindow, LoadSpec};
    use crate::scheduler::{Event, EventHandler};
    use crate::topology::FlowKind;
    use rand::SeedableRng;

    const RATE: f64 = 6_000_000.0;

    struct Harness {
        source: OnOffSource,
        sends: Vec<Time>,
    }

    impl EventHandler for Harness {
        fn handle(&mut self, event: Event, scheduler: &mut Scheduler) -> Result<(), EngineError> {
            match event.event_type {
                EventType::AppStart => self.source.start_application(scheduler)?,
                EventType::AppStop => self.source.stop_application(scheduler),
                EventType::StartSending { epoch } => self.source.start_sending(epoch, scheduler)?,
                EventType::StopSending { epoch } => self.source.stop_sending(epoch, scheduler)?,
                EventType::SendPacket { epoch } => {
                    if self.source.send_packet(epoch, scheduler)? {
                        self.sends.push(scheduler.now());
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn run(utilization: f64, kind: FlowKind, packet_length: u32, window: ActivityWindow, until: f64) -> Harness {
        let params = derive_traffic_params(&LoadSpec {
            flow: 0,
            packet_length,
            link_rate_bps: RATE,
            target_utilization: utilization,
            kind,
        })
        .unwrap()
        .with_window(window);
        let mut harness = Harness {
            source: OnOffSource::new(0, params, ChaCha8Rng::seed_from_u64(1)),
            sends: Vec::new(),
        };
        let mut scheduler = Scheduler::new();
        let end = seconds(until);
        harness.source.install(&mut scheduler, end).unwrap();
        scheduler.run_until(end, &mut harness).unwrap();
        harness
    }

    #[test]
    fn saturating_source_sends_at_line_rate() {
        let window = ActivityWindow { start: 1.0, stop: Some(2.0) };
        let h = run(1.0, FlowKind::Attacking, 1500, window, 3.0);
        // one 1500 byte packet every 2 ms for one second
        assert!((499..=501).contains(&h.sends.len()), "sent {}", h.sends.len());
        assert!(h.sends.iter().all(|&t| t >= seconds(1.0) && t <= seconds(2.0)));
        let gaps: Vec<Time> = h.sends.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().all(|&g| g <= seconds(0.002)));
    }

    #[test]
    fn idle_attacker_never_sends() {
        let window = ActivityWindow { start: 0.5, stop: Some(2.5) };
        let h = run(0.0, FlowKind::Attacking, 1500, window, 3.0);
        assert!(h.sends.is_empty());
    }

    #[test]
    fn idle_ordinary_flow_never_sends() {
        let h = run(0.0, FlowKind::Ordinary, 1500, ActivityWindow::whole_run(), 3.0);
        assert!(h.sends.is_empty());
    }

    #[test]
    fn one_packet_per_on_period_matches_utilization() {
        let h = run(0.14, FlowKind::Ordinary, 1500, ActivityWindow::whole_run(), 60.0);
        let busy = h.sends.len() as f64 * 0.002;
        let utilization = busy / 60.0;
        assert!((utilization - 0.14).abs() < 0.01, "utilization {utilization}");
    }

    #[test]
    fn smaller_packets_send_more_often_at_equal_load() {
        let big = run(0.14, FlowKind::Ordinary, 1500, ActivityWindow::whole_run(), 20.0);
        let small = run(0.14, FlowKind::Ordinary, 200, ActivityWindow::whole_run(), 20.0);
        assert!(small.sends.len() > 5 * big.sends.len());
    }

    #[test]
    fn window_starting_after_the_run_is_not_installed() {
        let window = ActivityWindow { start: 10.0, stop: None };
        let h = run(1.0, FlowKind::Attacking, 1500, window, 5.0);
        assert!(h.sends.is_empty());
        assert_eq!(h.source.packets_sent(), 0);
    }

    #[test]
    fn probe_fires_once() {
        let mut probe = Probe::new(1, 0.002, 9, 10);
        assert!(!probe.was_sent());
        assert!(probe.fire());
        assert!(!probe.fire());
        assert!(probe.was_sent());
    }
}
