//! Per-device statistics capture.
//!
//! Once enabled for a set of devices, every sampling interval appends one line of
//! that interval's counters per device. Lines stay in memory until `write_all`, which
//! produces one file per device named `<prefix>_<nodeId>_<deviceId>`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{EngineError, ResourceError};
use crate::node::{Device, DeviceCounters};
use crate::scheduler::{EventType, Scheduler, Time};

/// Column order of every line.
pub const COLUMNS: [&str; 7] = [
    "tx", "rx", "tx_bytes", "rx_bytes", "handshake", "resolve", "rx_drop",
];

pub fn format_line(counters: &DeviceCounters) -> String {
    format!(
        "{:8} {:8} {:10} {:10} {:7} {:7} {:7}\n",
        counters.tx_packets,
        counters.rx_packets,
        counters.tx_bytes,
        counters.rx_bytes,
        counters.handshakes,
        counters.resolutions,
        counters.rx_undeliverable,
    )
}

struct Trace {
    path: PathBuf,
    lines: String,
}

pub struct StatsCollector {
    interval: Time,
    last_sample: Time,
    traces: Vec<Trace>,
}

impl StatsCollector {
    /// Registers one trace per device under `prefix` and schedules the first sample.
    pub fn enable(
        prefix: &Path,
        devices: &[Device],
        interval: Time,
        scheduler: &mut Scheduler,
    ) -> Result<StatsCollector, EngineError> {
        let base = prefix
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let traces = devices
            .iter()
            .map(|device| {
                let (node, dev) = device.get_id();
                Trace {
                    path: prefix.with_file_name(format!("{base}_{node}_{dev}")),
                    lines: String::new(),
                }
            })
            .collect();
        scheduler.schedule_in(interval, EventType::StatsSample, 0)?;
        debug!(prefix = %prefix.display(), devices = devices.len(), columns = ?COLUMNS, "statistics enabled");
        Ok(StatsCollector {
            interval,
            last_sample: scheduler.now(),
            traces,
        })
    }

    pub fn sample(&mut self, devices: &mut [Device], scheduler: &mut Scheduler) -> Result<(), EngineError> {
        self.record(devices, scheduler.now());
        scheduler.schedule_in(self.interval, EventType::StatsSample, 0)
    }

    /// Records the partial interval since the last sample, if any.
    pub fn flush(&mut self, devices: &mut [Device], now: Time) {
        if now > self.last_sample {
            self.record(devices, now);
        }
    }

    fn record(&mut self, devices: &mut [Device], now: Time) {
        for (trace, device) in self.traces.iter_mut().zip(devices.iter_mut()) {
            trace.lines.push_str(&format_line(&device.take_interval()));
        }
        self.last_sample = now;
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.traces.iter().map(|t| t.path.clone()).collect()
    }

    pub fn write_all(&self) -> Result<Vec<PathBuf>, ResourceError> {
        for trace in &self.traces {
            fs::write(&trace.path, &trace.lines).map_err(|source| ResourceError::Write {
                path: trace.path.clone(),
                source,
            })?;
        }
        info!(files = self.traces.len(), "statistics written");
        Ok(self.paths())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{seconds, Event, EventHandler};
    use std::net::Ipv4Addr;

    struct Net {
        devices: Vec<Device>,
        stats: Option<StatsCollector>,
    }

    impl EventHandler for Net {
        fn handle(&mut self, event: Event, scheduler: &mut Scheduler) -> Result<(), EngineError> {
            match event.event_type {
                EventType::StatsSample => {
                    if let Some(stats) = self.stats.as_mut() {
                        stats.sample(&mut self.devices, scheduler)?;
                    }
                }
                EventType::Probe => {
                    let dst = self.devices[1].address();
                    let frame = self.devices[0].send(scheduler.now(), dst, 9, 10);
                    self.devices[1].receive(scheduler.now(), &frame);
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn devices() -> Vec<Device> {
        (0..2)
            .map(|i| Device::new(i, Ipv4Addr::new(10, 0, 0, i as u8 + 1), 10_000_000, 2296, Time::MAX))
            .collect()
    }

    #[test]
    fn line_has_fixed_columns() {
        let line = format_line(&DeviceCounters {
            tx_packets: 3,
            tx_bytes: 4500,
            ..DeviceCounters::default()
        });
        assert!(line.ends_with('\n'));
        assert_eq!(line.split_whitespace().count(), COLUMNS.len());
        assert_eq!(line.split_whitespace().next(), Some("3"));
    }

    #[test]
    fn one_file_per_device_with_one_line_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("nodes");
        let mut scheduler = Scheduler::new();
        let mut net = Net {
            devices: devices(),
            stats: None,
        };
        net.stats = Some(StatsCollector::enable(&prefix, &net.devices, seconds(1.0), &mut scheduler).unwrap());
        scheduler.schedule(Event::new(EventType::Probe, 0, seconds(0.5))).unwrap();

        let end = seconds(3.5);
        scheduler.run_until(end, &mut net).unwrap();
        let stats = net.stats.as_mut().unwrap();
        stats.flush(&mut net.devices, end);
        let paths = stats.write_all().unwrap();

        assert_eq!(paths, vec![dir.path().join("nodes_0_0"), dir.path().join("nodes_1_0")]);
        let sender = fs::read_to_string(&paths[0]).unwrap();
        let lines: Vec<&str> = sender.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].split_whitespace().next(), Some("1"));
        assert!(lines[1..].iter().all(|l| l.split_whitespace().all(|c| c == "0")));

        let receiver = fs::read_to_string(&paths[1]).unwrap();
        let first: Vec<&str> = receiver.lines().next().unwrap().split_whitespace().collect();
        assert_eq!(first[1], "1");
        assert_eq!(first[6], "1");
    }

    #[test]
    fn flush_without_elapsed_time_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new();
        let mut devs = devices();
        let mut stats = StatsCollector::enable(&dir.path().join("nodes"), &devs, seconds(1.0), &mut scheduler).unwrap();
        stats.flush(&mut devs, 0);
        let paths = stats.write_all().unwrap();
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "");
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new();
        let devs = devices();
        let prefix = dir.path().join("absent").join("nodes");
        let stats = StatsCollector::enable(&prefix, &devs, seconds(1.0), &mut scheduler).unwrap();
        assert!(matches!(stats.write_all(), Err(ResourceError::Write { .. })));
    }
}
