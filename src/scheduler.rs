use std::fmt;

use tracing::trace;

use crate::error::EngineError;

/// Simulated time in nanoseconds.
pub type Time = u64;

pub const NS_PER_SEC: f64 = 1e9;

/// Converts seconds to simulated time. Non-finite or out-of-range values saturate.
pub fn seconds(s: f64) -> Time {
    if s.is_nan() || s <= 0.0 {
        return 0;
    }
    (s * NS_PER_SEC).round() as Time
}

pub fn to_seconds(t: Time) -> f64 {
    t as f64 / NS_PER_SEC
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventType {
    Probe,
    AppStart,
    AppStop,
    StartSending { epoch: u64 },
    SendPacket { epoch: u64 },
    StopSending { epoch: u64 },
    StatsSample,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Probe => write!(f, "Probe"),
            EventType::AppStart => write!(f, "App Start"),
            EventType::AppStop => write!(f, "App Stop"),
            EventType::StartSending { .. } => write!(f, "Start Sending"),
            EventType::SendPacket { .. } => write!(f, "Send Packet"),
            EventType::StopSending { .. } => write!(f, "Stop Sending"),
            EventType::StatsSample => write!(f, "Stats Sample"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    /// Flow index for traffic and probe events, unused for statistics.
    pub target: usize,
    pub time: Time,
}

impl Event {
    pub fn new(event_type: EventType, target: usize, time: Time) -> Event {
        Event {
            event_type,
            target,
            time,
        }
    }
}

/// Receives events in time order from `Scheduler::run_until`.
pub trait EventHandler {
    fn handle(&mut self, event: Event, scheduler: &mut Scheduler) -> Result<(), EngineError>;
}

/// Single-timeline event list. Events with equal time fire in the order they were scheduled.
#[derive(Default)]
pub struct Scheduler {
    event_list: Vec<Event>,
    now: Time,
    handled: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn pending(&self) -> usize {
        self.event_list.len()
    }

    pub fn schedule(&mut self, event: Event) -> Result<(), EngineError> {
        if event.time < self.now {
            return Err(EngineError::EventInPast {
                now: self.now,
                at: event.time,
            });
        }
        self.event_list.push(event);
        Ok(())
    }

    /// Schedules `event_type` `delay` after the current time.
    pub fn schedule_in(&mut self, delay: Time, event_type: EventType, target: usize) -> Result<(), EngineError> {
        let time = self.now.saturating_add(delay);
        self.schedule(Event::new(event_type, target, time))
    }

    fn next_index(&self) -> Option<usize> {
        let mut min_index = None;
        let mut min_time = Time::MAX;
        for (pos, e) in self.event_list.iter().enumerate() {
            if min_index.is_none() || e.time < min_time {
                min_index = Some(pos);
                min_time = e.time;
            }
        }
        min_index
    }

    /// Hands every event with `time <= deadline` to `handler`, then parks the clock at
    /// `deadline`. Events past the deadline stay in the list.
    pub fn run_until<H: EventHandler>(&mut self, deadline: Time, handler: &mut H) -> Result<(), EngineError> {
        while let Some(index) = self.next_index() {
            if self.event_list[index].time > deadline {
                break;
            }
            let event = self.event_list.remove(index);
            self.now = event.time;
            self.handled += 1;
            trace!(time = event.time, target = event.target, "{}", event.event_type);
            handler.handle(event, self)?;
        }
        self.now = self.now.max(deadline);
        Ok(())
    }

    /// Drops all remaining events and returns how many were discarded.
    pub fn destroy(self) -> usize {
        self.event_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(Time, usize)>,
        reschedule: bool,
    }

    impl EventHandler for Recorder {
        fn handle(&mut self, event: Event, scheduler: &mut Scheduler) -> Result<(), EngineError> {
            self.seen.push((event.time, event.target));
            if self.reschedule && event.target == 0 {
                scheduler.schedule_in(10, EventType::Probe, 0)?;
            }
            Ok(())
        }
    }

    #[test]
    fn events_fire_in_time_order_with_fifo_ties() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Event::new(EventType::Probe, 3, 30)).unwrap();
        scheduler.schedule(Event::new(EventType::Probe, 1, 10)).unwrap();
        scheduler.schedule(Event::new(EventType::Probe, 2, 10)).unwrap();

        let mut recorder = Recorder::default();
        scheduler.run_until(100, &mut recorder).unwrap();
        assert_eq!(recorder.seen, vec![(10, 1), (10, 2), (30, 3)]);
        assert_eq!(scheduler.now(), 100);
        assert_eq!(scheduler.handled(), 3);
    }

    #[test]
    fn run_until_stops_at_the_deadline() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Event::new(EventType::Probe, 0, 0)).unwrap();
        let mut recorder = Recorder {
            reschedule: true,
            ..Recorder::default()
        };
        scheduler.run_until(35, &mut recorder).unwrap();
        let times: Vec<Time> = recorder.seen.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 10, 20, 30]);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.destroy(), 1);
    }

    #[test]
    fn scheduling_in_the_past_is_an_error() {
        let mut scheduler = Scheduler::new();
        scheduler.run_until(50, &mut Recorder::default()).unwrap();
        let err = scheduler.schedule(Event::new(EventType::AppStart, 0, 10)).unwrap_err();
        assert!(matches!(err, EngineError::EventInPast { now: 50, at: 10 }));
    }

    #[test]
    fn seconds_conversion_saturates() {
        assert_eq!(seconds(0.002), 2_000_000);
        assert_eq!(seconds(-1.0), 0);
        assert_eq!(seconds(f64::INFINITY), Time::MAX);
        assert!((to_seconds(seconds(3.12)) - 3.12).abs() < 1e-9);
    }
}
