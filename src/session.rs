use crate::constants::timing;
use crate::gpio::Gpio;
use crate::lamp::StatusLamp;
use crate::settings::{self, Settings};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Anything that takes a picture when told to.
pub trait Shutter: Send {
    fn trigger(&mut self) -> Result<()>;
    /// `Ok(false)` once the capture process has closed cleanly.
    fn is_alive(&mut self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Finished,
    Stopped,
    RecorderClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub shots: u64,
    pub elapsed: Duration,
    pub end: SessionEnd,
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let how = match self.end {
            SessionEnd::Finished => "finished",
            SessionEnd::Stopped => "stopped",
            SessionEnd::RecorderClosed => "capture process closed",
        };
        write!(
            f,
            "{}: {} shot{} in {}",
            how,
            self.shots,
            if self.shots == 1 { "" } else { "s" },
            settings::format_duration(self.elapsed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    WarmingUp,
    Capturing {
        shots: u64,
        planned: Option<u64>,
        next_in: Duration,
    },
    Completed(SessionReport),
    Error(String),
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::WarmingUp | SessionStatus::Capturing { .. })
    }
}

pub fn publish(status: &Mutex<SessionStatus>, next: SessionStatus) {
    if let Ok(mut s) = status.lock() {
        *s = next;
    }
}

fn stop_requested(should_stop: &Mutex<bool>) -> bool {
    should_stop.lock().map(|s| *s).unwrap_or(true)
}

/// Sleeps until `deadline`; false if a stop was requested first.
fn wait_until(deadline: Instant, should_stop: &Mutex<bool>) -> bool {
    loop {
        if stop_requested(should_stop) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(timing::STOP_POLL_MS)));
    }
}

/// The repeating capture timer.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    pub interval: Duration,
    /// `None` runs until stopped.
    pub total: Option<Duration>,
    pub flash: Duration,
    pub warmup: Duration,
}

impl CaptureSession {
    pub fn new(interval: Duration, total: Option<Duration>, flash: Duration, warmup: Duration) -> Self {
        Self {
            interval,
            total,
            flash,
            warmup,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.interval(),
            settings.total_time(),
            Duration::from_millis(settings.flash_ms),
            Duration::from_millis(settings.warmup_ms),
        )
    }

    pub fn planned_shots(&self) -> Option<u64> {
        let total = self.total?;
        settings::planned_shots(self.interval.as_millis() as u64, total.as_millis() as u64)
    }

    fn is_done(&self, shots: u64) -> bool {
        match self.total {
            Some(total) => self.interval * shots as u32 >= total,
            None => false,
        }
    }

    /// Runs until the total time is used up, a stop is requested, or something fails.
    /// The lamp is off when this returns.
    pub fn run(
        &self,
        gpio: &mut dyn Gpio,
        lamp: &mut StatusLamp,
        shutter: &mut dyn Shutter,
        should_stop: &Arc<Mutex<bool>>,
        status: &Arc<Mutex<SessionStatus>>,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        let mut shots = 0;

        let result = self.run_ticks(gpio, lamp, shutter, should_stop, status, &mut shots);

        if let Err(e) = lamp.switch_off(gpio) {
            log::warn!("Lamp left in unknown state: {}", e);
        }

        let end = result?;
        let report = SessionReport {
            shots,
            elapsed: started.elapsed(),
            end,
        };
        log::info!("Session {}", report);
        Ok(report)
    }

    fn run_ticks(
        &self,
        gpio: &mut dyn Gpio,
        lamp: &mut StatusLamp,
        shutter: &mut dyn Shutter,
        should_stop: &Mutex<bool>,
        status: &Mutex<SessionStatus>,
        shots: &mut u64,
    ) -> Result<SessionEnd> {
        let planned = self.planned_shots();

        publish(status, SessionStatus::WarmingUp);
        if !wait_until(Instant::now() + self.warmup, should_stop) {
            return Ok(SessionEnd::Stopped);
        }

        let first_tick = Instant::now();
        loop {
            if !shutter.is_alive()? {
                return Ok(SessionEnd::RecorderClosed);
            }

            self.take_shot(gpio, lamp, shutter)?;
            *shots += 1;
            log::info!(
                "[{}] shot {}{}",
                chrono::Local::now().format("%H:%M:%S"),
                shots,
                planned.map(|p| format!("/{}", p)).unwrap_or_default()
            );

            if self.is_done(*shots) {
                return Ok(SessionEnd::Finished);
            }

            // Ticks are counted from the first shot so delays do not add up
            let next_tick = first_tick + self.interval * *shots as u32;
            publish(
                status,
                SessionStatus::Capturing {
                    shots: *shots,
                    planned,
                    next_in: next_tick.saturating_duration_since(Instant::now()),
                },
            );

            if !wait_until(next_tick, should_stop) {
                return Ok(SessionEnd::Stopped);
            }
        }
    }

    fn take_shot(
        &self,
        gpio: &mut dyn Gpio,
        lamp: &mut StatusLamp,
        shutter: &mut dyn Shutter,
    ) -> Result<()> {
        lamp.switch_on(gpio)?;

        let fired = shutter.trigger();
        if fired.is_ok() {
            thread::sleep(self.flash);
        }

        let off = lamp.switch_off(gpio);
        fired?;
        off?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::mock::RecordingGpio;
    use crate::lamp::LampState;

    struct MockShutter {
        events: Arc<Mutex<Vec<String>>>,
        alive_for: Option<u64>,
        fail_on: Option<u64>,
        fired: u64,
    }

    impl MockShutter {
        fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                events,
                alive_for: None,
                fail_on: None,
                fired: 0,
            }
        }
    }

    impl Shutter for MockShutter {
        fn trigger(&mut self) -> Result<()> {
            self.fired += 1;
            if self.fail_on == Some(self.fired) {
                anyhow::bail!("signal lost");
            }
            self.events.lock().unwrap().push("trigger".to_string());
            Ok(())
        }

        fn is_alive(&mut self) -> Result<bool> {
            Ok(self.alive_for.is_none_or(|n| self.fired < n))
        }
    }

    fn quick(interval_ms: u64, total_ms: Option<u64>) -> CaptureSession {
        CaptureSession::new(
            Duration::from_millis(interval_ms),
            total_ms.map(Duration::from_millis),
            Duration::from_millis(5),
            Duration::ZERO,
        )
    }

    fn rig() -> (Arc<Mutex<Vec<String>>>, RecordingGpio, StatusLamp) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut gpio = RecordingGpio::with_log(events.clone());
        let lamp = StatusLamp::init(&mut gpio, 23).unwrap();
        events.lock().unwrap().clear();
        (events, gpio, lamp)
    }

    fn flags() -> (Arc<Mutex<bool>>, Arc<Mutex<SessionStatus>>) {
        (
            Arc::new(Mutex::new(false)),
            Arc::new(Mutex::new(SessionStatus::Idle)),
        )
    }

    #[test]
    fn lamp_brackets_every_trigger() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events.clone());
        let (stop, status) = flags();

        let report = quick(40, Some(120))
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();

        assert_eq!(report.shots, 3);
        assert_eq!(report.end, SessionEnd::Finished);

        let mut expected = Vec::new();
        for _ in 0..3 {
            expected.extend(["write 23 1", "trigger", "write 23 0"]);
        }
        // Final switch-off after the loop
        expected.push("write 23 0");
        assert_eq!(*events.lock().unwrap(), expected);
        assert_eq!(lamp.state(), LampState::Dark);
    }

    #[test]
    fn ticks_do_not_drift() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events);
        let (stop, status) = flags();

        // 5 shots at 0, 50, ..., 200 ms; the flash time must not push them later
        let session = CaptureSession::new(
            Duration::from_millis(50),
            Some(Duration::from_millis(250)),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        let report = session
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();

        assert_eq!(report.shots, 5);
        assert!(report.elapsed < Duration::from_millis(400), "{:?}", report.elapsed);
    }

    #[test]
    fn stop_request_ends_unbounded_session() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events);
        let (stop, status) = flags();

        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                *stop.lock().unwrap() = true;
            })
        };

        let report = quick(1000, None)
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();
        stopper.join().unwrap();

        assert_eq!(report.end, SessionEnd::Stopped);
        assert_eq!(report.shots, 1);
        assert!(report.elapsed < Duration::from_millis(900));
    }

    #[test]
    fn stop_during_warmup_takes_no_shots() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events.clone());
        let (stop, status) = flags();
        *stop.lock().unwrap() = true;

        let session = CaptureSession::new(
            Duration::from_millis(1000),
            None,
            Duration::from_millis(5),
            Duration::from_secs(5),
        );
        let report = session
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();

        assert_eq!(report.shots, 0);
        assert_eq!(report.end, SessionEnd::Stopped);
        assert!(!events.lock().unwrap().contains(&"trigger".to_string()));
    }

    #[test]
    fn closed_recorder_ends_session() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events);
        shutter.alive_for = Some(2);
        let (stop, status) = flags();

        let report = quick(20, None)
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();

        assert_eq!(report.end, SessionEnd::RecorderClosed);
        assert_eq!(report.shots, 2);
    }

    #[test]
    fn failed_trigger_still_turns_lamp_off() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events.clone());
        shutter.fail_on = Some(2);
        let (stop, status) = flags();

        let err = quick(20, None)
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap_err();

        assert!(err.to_string().contains("signal lost"));
        let log = events.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("write 23 0"));
        assert_eq!(lamp.state(), LampState::Dark);
    }

    #[test]
    fn publishes_progress() {
        let (events, mut gpio, mut lamp) = rig();
        let mut shutter = MockShutter::new(events);
        let (stop, status) = flags();

        let stopper = {
            let stop = stop.clone();
            let status = status.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                let seen = status.lock().unwrap().clone();
                *stop.lock().unwrap() = true;
                seen
            })
        };

        quick(1000, Some(10_000))
            .run(&mut gpio, &mut lamp, &mut shutter, &stop, &status)
            .unwrap();

        match stopper.join().unwrap() {
            SessionStatus::Capturing { shots, planned, .. } => {
                assert_eq!(shots, 1);
                assert_eq!(planned, Some(10));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn report_reads_well() {
        let report = SessionReport {
            shots: 1,
            elapsed: Duration::from_secs(61),
            end: SessionEnd::Stopped,
        };
        assert_eq!(report.to_string(), "stopped: 1 shot in 1m 01s");
    }
}
