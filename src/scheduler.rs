//! # Scheduler Loop
//!
//! The single cooperative loop of a telemetry node. Each tick runs, in order:
//!
//! 1. pending operator commands,
//! 2. link status, bringing the link up if it is down,
//! 3. the broker session,
//! 4. a time sync refresh when one is due,
//! 5. the sensor read and publisher cycle (or a skipped cycle when offline),
//! 6. the keepalive liveness check.
//!
//! Every step is a single bounded attempt, so the worst-case tick latency is the
//! sum of the configured timeouts. [`Scheduler::run`] then sleeps until the next
//! tick boundary.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;

use crate::config::{DeviceConfig, NetworkCredentials};
use crate::error::{ConfigError, LinkError, SessionError};
use crate::link::{LinkDriver, LinkState, Radio};
use crate::publisher::{CycleReport, MAX_METRICS, Publisher};
use crate::sensor::{Metric, Reading, Sensor};
use crate::session::{SessionManager, SessionState};
use crate::time_sync::{TimeSource, TimeSyncClient};
use crate::transport::MqttTransport;

/// Queue depth of the operator command channel.
pub const CONTROL_DEPTH: usize = 4;

/// Operator commands applied at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Clears a held broker session fault.
    ResetSession,
    /// Clears a held link fault.
    ResetLink,
    /// Ends the broker session with DISCONNECT, so the will is not published.
    /// The same tick then opens a fresh session.
    Disconnect,
}

pub type ControlChannel = Channel<CriticalSectionRawMutex, Command, CONTROL_DEPTH>;

pub type ControlSender<'a> = Sender<'a, CriticalSectionRawMutex, Command, CONTROL_DEPTH>;

pub type ControlReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, Command, CONTROL_DEPTH>;

/// Fixed-rate tick boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval: Duration,
    next: Instant,
}

impl Cadence {
    /// A cadence whose first boundary is `start`.
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            next: start,
        }
    }

    /// Advances to the next boundary after `now`.
    ///
    /// Boundaries are anchored to the start, so step latency does not
    /// accumulate. Boundaries that already passed are skipped, not replayed.
    pub fn next_deadline(&mut self, now: Instant) -> Instant {
        self.next += self.interval;
        if self.next <= now {
            let interval = self.interval.as_ticks().max(1);
            let behind = now.saturating_duration_since(self.next).as_ticks();
            let missed = behind / interval + 1;
            warn!("tick overran, skipping {} boundary(ies)", missed);
            self.next += Duration::from_ticks(interval * missed);
        }
        self.next
    }
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// 1-based tick index.
    pub tick: u32,
    pub link: LinkState,
    pub link_error: Option<LinkError>,
    pub session: SessionState,
    pub session_error: Option<SessionError>,
    pub attempts: CycleReport,
    /// A time sync query was made this tick.
    pub time_sync_ran: bool,
    /// A PINGREQ went out this tick.
    pub liveness_sent: bool,
}

/// Owns every component of a node and drives them tick by tick.
pub struct Scheduler<'a, R, T, S, Sn, const BUF_SIZE: usize> {
    network: NetworkCredentials<'a>,
    link: LinkDriver<R>,
    session: SessionManager<'a, T, BUF_SIZE>,
    time_sync: TimeSyncClient<S>,
    publisher: Publisher<'a>,
    sensor: Sn,
    tick_interval: Duration,
    control: Option<ControlReceiver<'a>>,
    ticks: u32,
}

impl<'a, R, T, S, Sn, const BUF_SIZE: usize> Scheduler<'a, R, T, S, Sn, BUF_SIZE>
where
    R: Radio,
    T: MqttTransport,
    S: TimeSource,
    Sn: Sensor,
{
    /// Builds a node from a validated configuration.
    pub fn new(
        config: &DeviceConfig<'a>,
        radio: R,
        transport: T,
        time_source: S,
        sensor: Sn,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            network: config.network,
            link: LinkDriver::new(radio, config.backoff, config.attempt_timeout),
            session: SessionManager::new(transport, config),
            time_sync: TimeSyncClient::new(time_source, config.time_sync),
            publisher: Publisher::from_config(config),
            sensor,
            tick_interval: config.tick_interval,
            control: None,
            ticks: 0,
        })
    }

    /// Accepts operator commands from `receiver`.
    pub fn with_control(mut self, receiver: ControlReceiver<'a>) -> Self {
        self.control = Some(receiver);
        self
    }

    /// Runs one tick at `now`.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        self.ticks = self.ticks.saturating_add(1);
        self.apply_commands().await;
        self.session.begin_cycle();

        let mut link_error = None;
        let mut link = self.link.status();
        if link != LinkState::Up {
            match self.link.bring_up(&self.network, now).await {
                Ok(()) => {}
                Err(e) => {
                    if e.is_fatal() {
                        error!("link held down: {}", e);
                    }
                    link_error = Some(e);
                }
            }
            link = self.link.status();
        }

        let session_error = match self.session.ensure_connected(link, now).await {
            Ok(()) => None,
            Err(e) => {
                if e.is_fatal() {
                    error!("session held down: {}", e);
                }
                Some(e)
            }
        };

        let time_sync_ran = link == LinkState::Up && self.time_sync.refresh_if_due(now).await.is_some();

        let metrics: Vec<Metric, MAX_METRICS> = self
            .sensor
            .metrics()
            .iter()
            .copied()
            .take(MAX_METRICS)
            .collect();

        let attempts = if self.session.is_connected() {
            let readings: Vec<Reading, MAX_METRICS> = metrics
                .iter()
                .map(|&metric| Reading::new(metric, self.sensor.read(metric)))
                .collect();
            let epoch = self.time_sync.epoch_at(now);
            self.publisher
                .run_cycle(&readings, epoch, &mut self.session, now)
                .await
        } else {
            self.publisher.skip_cycle(&metrics)
        };

        let liveness_sent = match self.session.ping_or_publish_within_keepalive(now).await {
            Ok(sent) => sent,
            Err(SessionError::NotConnected) => false,
            Err(e) => {
                debug!("liveness check: {}", e);
                false
            }
        };

        TickReport {
            tick: self.ticks,
            link,
            link_error,
            session: self.session.state(),
            session_error,
            attempts,
            time_sync_ran,
            liveness_sent,
        }
    }

    /// Ticks forever at the configured cadence.
    pub async fn run(&mut self) -> ! {
        info!("scheduler started, tick every {} ms", self.tick_interval.as_millis());
        let mut cadence = Cadence::new(self.tick_interval, Instant::now());
        loop {
            let report = self.tick(Instant::now()).await;
            trace!(
                "tick {}: link {:?}, session {:?}, {} message(s)",
                report.tick,
                report.link,
                report.session,
                report.attempts.len()
            );
            Timer::at(cadence.next_deadline(Instant::now())).await;
        }
    }

    pub fn link(&self) -> &LinkDriver<R> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkDriver<R> {
        &mut self.link
    }

    pub fn session(&self) -> &SessionManager<'a, T, BUF_SIZE> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<'a, T, BUF_SIZE> {
        &mut self.session
    }

    pub fn time_sync(&self) -> &TimeSyncClient<S> {
        &self.time_sync
    }

    pub fn sensor_mut(&mut self) -> &mut Sn {
        &mut self.sensor
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    async fn apply_commands(&mut self) {
        let Some(control) = self.control else {
            return;
        };
        while let Ok(command) = control.try_receive() {
            info!("operator command: {:?}", command);
            match command {
                Command::ResetSession => self.session.reset(),
                Command::ResetLink => self.link.reset(),
                Command::Disconnect => self.session.disconnect().await,
            }
        }
    }
}
