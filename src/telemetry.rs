//! Fixed-rate transmit loop
//!
//! Every tick reads the latest sample, publishes it, and writes one wire line
//! when the link is open. Ticks keep running while the link is closed so the
//! displayed speed stays live.

use crate::domain::models::AppEvent;
use crate::domain::speed::SpeedProvider;
use crate::infrastructure::bluetooth::manager::WriteOutcome;
use crate::infrastructure::bluetooth::protocol::format_speed_line;
use crate::infrastructure::bluetooth::LinkManager;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link not open, sample published only
    Idle,
    Sent(String),
    /// Write failed and the link was closed
    Failed,
}

pub struct TelemetryLoop {
    provider: Box<dyn SpeedProvider>,
    link: LinkManager,
    events: mpsc::UnboundedSender<AppEvent>,
    interval: Duration,
}

impl TelemetryLoop {
    pub fn new(
        provider: Box<dyn SpeedProvider>,
        link: LinkManager,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            provider,
            link,
            events,
            interval: TICK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn tick(&mut self) -> TickOutcome {
        let sample = self.provider.latest();
        let _ = self.events.send(AppEvent::Speed(sample));

        if !self.link.is_open() {
            return TickOutcome::Idle;
        }

        let line = format_speed_line(sample.speed_mph);
        match self.link.write(line.as_bytes()) {
            Ok(WriteOutcome::Written(_)) => {
                debug!(target: "tx", "{}", line.trim_end());
                let _ = self.events.send(AppEvent::Transmitted(line.clone()));
                TickOutcome::Sent(line)
            }
            Ok(WriteOutcome::Skipped) => TickOutcome::Idle,
            // Already reported and torn down by the link manager
            Err(_) => TickOutcome::Failed,
        }
    }

    /// Tick until `shutdown` flips to true or its sender goes away. The
    /// provider is stopped on exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Telemetry loop started ({:?} period)", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.provider.stop();
        info!("Telemetry loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionState, ErrorKind, PeerDescriptor};
    use crate::infrastructure::speed::{SimulatedSpeedProvider, SpeedFeed};
    use crate::infrastructure::bluetooth::manager::LinkTimeouts;
    use crate::test_utils::{relaxed_timeouts, ConnectPlan, CountingKeepAlive, MockConnector};
    use std::sync::Arc;
    use std::time::Instant;

    struct Rig {
        telemetry: TelemetryLoop,
        feed: SpeedFeed,
        link: LinkManager,
        connector: Arc<MockConnector>,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn rig() -> Rig {
        rig_with(relaxed_timeouts())
    }

    fn rig_with(timeouts: LinkTimeouts) -> Rig {
        let connector = Arc::new(MockConnector::new());
        let (tx, events) = mpsc::unbounded_channel();
        let link = LinkManager::with_timeouts(
            connector.clone(),
            Arc::new(CountingKeepAlive::default()),
            tx.clone(),
            timeouts,
        );
        let mut provider = SimulatedSpeedProvider::new(0.0);
        provider.start().unwrap();
        let feed = provider.feed();
        Rig {
            telemetry: TelemetryLoop::new(Box::new(provider), link.clone(), tx),
            feed,
            link,
            connector,
            events,
        }
    }

    async fn open(rig: &Rig) {
        rig.link
            .open(Some(&PeerDescriptor::new("peer-a", "Dash")))
            .unwrap();
        rig.link.wait_for_connect().await;
        assert_eq!(rig.link.state(), ConnectionState::Open);
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn open_link_receives_formatted_line() {
        let mut rig = rig();
        open(&rig).await;
        rig.feed.push_mph(5.0);

        assert_eq!(
            rig.telemetry.tick(),
            TickOutcome::Sent("SPEED_MPH:5.00\r\n".to_string())
        );
        assert_eq!(rig.connector.stats().written_text(), "SPEED_MPH:5.00\r\n");

        let events = drain(&mut rig.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::Transmitted(line) if line == "SPEED_MPH:5.00\r\n")));
    }

    #[tokio::test]
    async fn creeping_speed_is_sent_as_zero() {
        let mut rig = rig();
        open(&rig).await;
        rig.feed.push_mph(0.3);

        assert_eq!(
            rig.telemetry.tick(),
            TickOutcome::Sent("SPEED_MPH:0.00\r\n".to_string())
        );
    }

    #[tokio::test]
    async fn closed_link_still_publishes_speed() {
        let mut rig = rig();
        rig.feed.push_mph(12.0);

        assert_eq!(rig.telemetry.tick(), TickOutcome::Idle);
        assert_eq!(rig.telemetry.tick(), TickOutcome::Idle);
        assert_eq!(rig.connector.stats().written_text(), "");

        let speeds: Vec<f64> = drain(&mut rig.events)
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Speed(sample) => Some(sample.speed_mph),
                _ => None,
            })
            .collect();
        assert_eq!(speeds, vec![12.0, 12.0]);
    }

    #[tokio::test]
    async fn peer_disappearing_closes_link_and_ticks_continue() {
        let mut rig = rig();
        rig.connector.push_plan(ConnectPlan::FailOnWrite(2));
        open(&rig).await;
        rig.feed.push_mph(20.0);

        assert!(matches!(rig.telemetry.tick(), TickOutcome::Sent(_)));
        assert_eq!(rig.telemetry.tick(), TickOutcome::Failed);
        assert_eq!(rig.link.state(), ConnectionState::Closed);
        assert_eq!(rig.connector.stats().live(), 0);

        assert_eq!(rig.telemetry.tick(), TickOutcome::Idle);
        let events = drain(&mut rig.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::Error(report) if report.kind == ErrorKind::WriteFailed)));
        assert!(matches!(events.last(), Some(AppEvent::Speed(_))));
    }

    #[tokio::test]
    async fn stalled_peer_fails_the_tick_instead_of_hanging_it() {
        let mut rig = rig_with(LinkTimeouts {
            write: Duration::from_millis(50),
            retire: Duration::from_secs(5),
        });
        let (release, hold) = std::sync::mpsc::channel();
        rig.connector.push_plan(ConnectPlan::StallOnWrite(2, hold));
        open(&rig).await;
        rig.feed.push_mph(20.0);

        assert!(matches!(rig.telemetry.tick(), TickOutcome::Sent(_)));
        let started = Instant::now();
        assert_eq!(rig.telemetry.tick(), TickOutcome::Failed);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(rig.link.state(), ConnectionState::Closed);
        assert_eq!(rig.telemetry.tick(), TickOutcome::Idle);

        let events = drain(&mut rig.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::Error(report) if report.kind == ErrorKind::WriteFailed)));
        drop(release);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn undrained_device_fails_the_tick_within_the_write_deadline() {
        use crate::infrastructure::bluetooth::device_file::DeviceFileConnector;
        use std::fs::{self, File};
        use std::process::Command;

        let path = std::env::temp_dir().join(format!("spp_relay_fifo_{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let status = Command::new("mkfifo").arg(&path).status().unwrap();
        assert!(status.success());

        // Opening a FIFO blocks until both ends are present; the read end is
        // then held open and never read
        let reader_path = path.clone();
        let reader = std::thread::spawn(move || File::open(reader_path).unwrap());

        let (tx, _events) = mpsc::unbounded_channel();
        let link = LinkManager::with_timeouts(
            Arc::new(DeviceFileConnector),
            Arc::new(CountingKeepAlive::default()),
            tx.clone(),
            LinkTimeouts {
                write: Duration::from_millis(100),
                retire: Duration::from_secs(5),
            },
        );
        let mut provider = SimulatedSpeedProvider::new(42.0);
        provider.start().unwrap();
        let mut telemetry = TelemetryLoop::new(Box::new(provider), link.clone(), tx);

        link.open(Some(&PeerDescriptor::new(path.to_string_lossy(), "stuck tty")))
            .unwrap();
        link.wait_for_connect().await;
        assert_eq!(link.state(), ConnectionState::Open);
        let read_end = reader.join().unwrap();

        let started = Instant::now();
        let mut failed = false;
        for _ in 0..20_000 {
            match telemetry.tick() {
                TickOutcome::Sent(_) => {}
                TickOutcome::Failed => {
                    failed = true;
                    break;
                }
                TickOutcome::Idle => panic!("link closed without a failed write"),
            }
        }

        assert!(failed, "pipe never filled up");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(link.state(), ConnectionState::Closed);
        assert_eq!(telemetry.tick(), TickOutcome::Idle);

        // Unblocks the stuck writer with a broken pipe
        drop(read_end);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn run_streams_until_shutdown_then_stops_provider() {
        let rig = rig();
        open(&rig).await;
        rig.feed.push_mph(8.0);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            rig.telemetry
                .with_interval(Duration::from_millis(5))
                .run(stop_rx),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let written = rig.connector.stats().written_text();
        assert!(written.starts_with("SPEED_MPH:8.00\r\n"));
        assert!(written.lines().count() >= 2);
        assert!(!rig.feed.push_mph(9.0));
    }
}
