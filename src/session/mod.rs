//! Session state machine.
//!
//! A [`Session`] owns everything that changes during a run: the phase, the
//! deadline of the current timed phase, the target record, the list-mode
//! directory and the final report. It consumes controller [`Event`]s one at a
//! time and answers with [`Command`]s through a [`Controller`].
//!
//! Phase graph:
//!
//! ```text
//! reset ─┬─> observing ──────────────────────────────────────────────> done
//!        └─> searching ─┬────────────────────────────────────────────> done
//!                       └─> watching-app ─┬──────────────────────────> done
//!                                         └─> connecting -> connected
//!   -> discovering-services -> discovering-ota-characteristics
//!   -> writing-ota-control -> expecting-close -> watching-ota -> done
//! ```
//!
//! Any event that does not fit the current phase, and any missing piece of
//! state needed to go on, parks the session in `confused`. Neither `done`
//! nor `confused` is ever left.
//!
//! Deadlines are plain clock comparisons made after every event and on
//! every idle poll; there are no timers.


use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::ble::adv_parser;
use crate::ble::directory::{Directory, DirectoryLine};
use crate::ble::gatt::GattTree;
use crate::ble::selector::Selector;
use crate::ble::{Address, AddressType, Advertisement, BootInfo, Command, Event, ScanMode};
use crate::config::{DEFAULT_DURATION_SECS, IDLE_POLL_MS, OTA_CONTROL_VALUE, SCAN_PHY_1M};
use crate::rssi::{RssiAccumulator, RssiSamples, RssiStats};
use crate::Error;

// ═══════════════════════════════════════════════════════════════════════════
// Seams: clock and controller
// ═══════════════════════════════════════════════════════════════════════════

/// Monotonic time source. Only differences between readings matter.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Outbound half of the controller link.
pub trait Controller {
    type Error;

    /// Issue a command. Its outcome, if any, arrives later as an event.
    fn send(&mut self, command: Command) -> Result<(), Self::Error>;
}

/// A controller link that also yields events.
pub trait Transport: Controller {
    /// Wait up to `timeout` for the next event; `Ok(None)` when idle.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>, Self::Error>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// What the run is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Print every advertiser seen during one window.
    List,
    /// Track the advertiser picked by the selector; optionally trigger OTA.
    Match { ota: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub mode: Mode,
    pub selector: Selector,
    /// Length of every timed phase.
    pub duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Match { ota: false },
            selector: Selector::default(),
            duration: Duration::from_secs_f64(DEFAULT_DURATION_SECS),
        }
    }
}

impl SessionConfig {
    fn ota(&self) -> bool {
        matches!(self.mode, Mode::Match { ota: true })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Phase
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Reset,
    Observing,
    Searching,
    WatchingApp,
    Connecting,
    Connected,
    DiscoveringServices,
    DiscoveringOtaCharacteristics,
    WritingOtaControl,
    ExpectingClose,
    WatchingOta,
    Done,
    Confused,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Reset => "reset",
            Phase::Observing => "observing",
            Phase::Searching => "searching",
            Phase::WatchingApp => "watching-app",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::DiscoveringServices => "discovering-services",
            Phase::DiscoveringOtaCharacteristics => "discovering-ota-characteristics",
            Phase::WritingOtaControl => "writing-ota-control",
            Phase::ExpectingClose => "expecting-close",
            Phase::WatchingOta => "watching-ota",
            Phase::Done => "done",
            Phase::Confused => "confused",
        }
    }

    /// Phases bounded by a deadline.
    pub fn is_timed(self) -> bool {
        matches!(
            self,
            Phase::Observing | Phase::Searching | Phase::WatchingApp | Phase::WatchingOta
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Confused)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Target and report
// ═══════════════════════════════════════════════════════════════════════════

/// The device under observation, created on the first matching advertisement.
#[derive(Clone, Debug)]
pub struct Target {
    pub address: Address,
    pub address_type: AddressType,
    pub rssi: RssiAccumulator,
    pub gatt: GattTree,
}

impl Target {
    fn new(address: Address, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
            rssi: RssiAccumulator::new(),
            gatt: GattTree::new(),
        }
    }
}

/// Final output of a successful run.
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    /// List mode: every advertiser, first-seen order.
    Directory(Vec<DirectoryLine>),
    /// Match mode without OTA.
    Rssi { duration: Duration, stats: RssiStats },
    /// OTA mode: application image vs. bootloader.
    Ota {
        duration: Duration,
        app: RssiStats,
        bootloader: RssiStats,
    },
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Directory(lines) => {
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", line)?;
                }
                Ok(())
            }
            Report::Rssi { duration, stats } => {
                write!(f, "{} second duration: {}", duration.as_secs_f64(), stats)
            }
            Report::Ota {
                duration,
                app,
                bootloader,
            } => write!(
                f,
                "{} second duration: application {}, AppLoader {} (delta: {:.1} dB)",
                duration.as_secs_f64(),
                app,
                bootloader,
                bootloader.mean - app.mean
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════

/// Why handling stopped short: a protocol fault is absorbed into
/// `confused`, a transport fault is handed back to the caller.
enum Fault<E> {
    Protocol(Error),
    Transport(E),
}

impl<E> From<Error> for Fault<E> {
    fn from(e: Error) -> Self {
        Fault::Protocol(e)
    }
}

fn send<C: Controller>(ctl: &mut C, command: Command) -> Result<(), Fault<C::Error>> {
    ctl.send(command).map_err(Fault::Transport)
}

pub struct Session<K: Clock> {
    config: SessionConfig,
    clock: K,
    phase: Phase,
    deadline: Option<Duration>,
    target: Option<Target>,
    directory: Directory,
    app_rssi: Option<RssiSamples>,
    report: Option<Report>,
}

impl<K: Clock> Session<K> {
    pub fn new(config: SessionConfig, clock: K) -> Self {
        Self {
            config,
            clock,
            phase: Phase::Reset,
            deadline: None,
            target: None,
            directory: Directory::new(),
            app_rssi: None,
            report: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// RSSI of the application image, captured before the OTA reconnect.
    pub fn app_rssi(&self) -> Option<&RssiSamples> {
        self.app_rssi.as_ref()
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn take_report(&mut self) -> Option<Report> {
        self.report.take()
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Reset the controller. The session waits in `reset` for the boot event.
    pub fn start<C: Controller>(&mut self, ctl: &mut C) -> Result<(), C::Error> {
        info!("resetting controller");
        ctl.send(Command::Reset)
    }

    /// Process one event to completion, then re-check the deadline.
    pub fn handle<C: Controller>(&mut self, event: &Event, ctl: &mut C) -> Result<Phase, C::Error> {
        if self.phase.is_terminal() {
            return Ok(self.phase);
        }
        let result = self.dispatch(event, ctl);
        self.settle(result)?;
        self.poll(ctl)
    }

    /// Re-check the deadline without an event (idle tick).
    pub fn poll<C: Controller>(&mut self, ctl: &mut C) -> Result<Phase, C::Error> {
        if !self.phase.is_terminal() {
            let result = self.check_deadline(ctl);
            self.settle(result)?;
        }
        Ok(self.phase)
    }

    fn settle<E>(&mut self, result: Result<(), Fault<E>>) -> Result<(), E> {
        match result {
            Ok(()) => Ok(()),
            Err(Fault::Protocol(err)) => {
                error!("{}", err);
                self.set_phase(Phase::Confused);
                Ok(())
            }
            Err(Fault::Transport(err)) => Err(err),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        info!("set_state: {} -> {}", self.phase, phase);
        self.phase = phase;
        if !phase.is_timed() {
            self.deadline = None;
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(self.clock.now() + self.config.duration);
    }

    fn require_phase(&self, phase: Phase, event: &Event) -> Result<(), Error> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(self.unexpected(event))
        }
    }

    fn unexpected(&self, event: &Event) -> Error {
        Error::UnexpectedEvent {
            phase: self.phase,
            event: event.name(),
        }
    }

    fn target_mut(&mut self) -> Result<&mut Target, Error> {
        self.target.as_mut().ok_or(Error::NoTarget)
    }

    fn dispatch<C: Controller>(&mut self, event: &Event, ctl: &mut C) -> Result<(), Fault<C::Error>> {
        match event {
            Event::Boot(info) => self.on_boot(info, event, ctl),
            Event::Advertisement(adv) => self.on_advertisement(adv),
            Event::ConnectionOpened { connection, .. } => {
                self.require_phase(Phase::Connecting, event)?;
                debug!("connection {} opened", connection);
                self.set_phase(Phase::Connected);
                Ok(())
            }
            Event::MtuExchanged { connection, mtu } => {
                self.require_phase(Phase::Connected, event)?;
                debug!("connection {} mtu {}", connection, mtu);
                send(
                    ctl,
                    Command::DiscoverPrimaryServices {
                        connection: *connection,
                    },
                )?;
                self.set_phase(Phase::DiscoveringServices);
                Ok(())
            }
            Event::Service { handle, uuid, .. } => {
                self.require_phase(Phase::DiscoveringServices, event)?;
                self.target_mut()?.gatt.add_service(*handle, *uuid);
                Ok(())
            }
            Event::Characteristic { handle, uuid, .. } => {
                self.require_phase(Phase::DiscoveringOtaCharacteristics, event)?;
                self.target_mut()?.gatt.add_characteristic(*handle, *uuid)?;
                Ok(())
            }
            Event::ProcedureCompleted { connection, .. } => {
                self.on_procedure_completed(*connection, event, ctl)
            }
            Event::ConnectionClosed { reason, .. } => self.on_connection_closed(*reason, event, ctl),
            Event::Ignored(_) => {
                trace!("ignoring {}", event.name());
                Ok(())
            }
            Event::Unknown { class, method } => {
                warn!("unhandled event: class 0x{:02x} method 0x{:02x}", class, method);
                Ok(())
            }
        }
    }

    fn on_boot<C: Controller>(
        &mut self,
        info: &BootInfo,
        event: &Event,
        ctl: &mut C,
    ) -> Result<(), Fault<C::Error>> {
        self.require_phase(Phase::Reset, event)?;
        info!(
            "system-boot: BLE SDK {}v{}p{}b{}",
            info.major,
            info.minor,
            info.patch,
            info.build
        );
        send(ctl, Command::StartScan(ScanMode::default()))?;
        match self.config.mode {
            Mode::List => self.set_phase(Phase::Observing),
            Mode::Match { .. } => {
                info!("searching for {}", self.config.selector);
                self.set_phase(Phase::Searching);
            }
        }
        self.arm_deadline();
        Ok(())
    }

    fn on_advertisement<E>(&mut self, adv: &Advertisement) -> Result<(), Fault<E>> {
        match self.phase {
            Phase::Observing => {
                if !self.directory.contains(&adv.address) {
                    self.directory
                        .observe(adv.address, adv_parser::decode(&adv.data));
                }
            }
            Phase::Searching => {
                let fields = adv_parser::decode(&adv.data);
                if self.config.selector.matches(&adv.address, &fields) {
                    debug!("matched {} rssi {}", adv.address, adv.rssi);
                    self.acquire_target(adv)?;
                } else {
                    trace!("skipping {}", adv.address);
                }
            }
            Phase::WatchingApp | Phase::WatchingOta => {
                let target = self.target_mut()?;
                if target.address == adv.address {
                    target.rssi.record(adv.rssi, adv.channel)?;
                    trace!("sample {} from {}", adv.rssi, adv.address);
                }
            }
            // Scanning is stopped or irrelevant in every other phase.
            _ => {}
        }
        Ok(())
    }

    fn acquire_target(&mut self, adv: &Advertisement) -> Result<(), Error> {
        info!("Target address: {}", adv.address);
        let mut target = Target::new(adv.address, adv.address_type);
        target.rssi.record(adv.rssi, adv.channel)?;
        self.target = Some(target);
        self.set_phase(Phase::WatchingApp);
        self.arm_deadline();
        Ok(())
    }

    fn on_procedure_completed<C: Controller>(
        &mut self,
        connection: u8,
        event: &Event,
        ctl: &mut C,
    ) -> Result<(), Fault<C::Error>> {
        match self.phase {
            Phase::DiscoveringServices => {
                let service = self.target_mut()?.gatt.select_ota_service()?;
                send(
                    ctl,
                    Command::DiscoverCharacteristics {
                        connection,
                        service,
                    },
                )?;
                self.set_phase(Phase::DiscoveringOtaCharacteristics);
            }
            Phase::DiscoveringOtaCharacteristics => {
                let characteristic = self.target_mut()?.gatt.ota_control_handle()?;
                let value = heapless::Vec::from_slice(&OTA_CONTROL_VALUE)
                    .map_err(|()| Error::WriteTooLong(OTA_CONTROL_VALUE.len()))?;
                send(
                    ctl,
                    Command::WriteCharacteristic {
                        connection,
                        characteristic,
                        value,
                    },
                )?;
                self.set_phase(Phase::WritingOtaControl);
            }
            Phase::WritingOtaControl => self.set_phase(Phase::ExpectingClose),
            _ => return Err(self.unexpected(event).into()),
        }
        Ok(())
    }

    fn on_connection_closed<C: Controller>(
        &mut self,
        reason: u16,
        event: &Event,
        ctl: &mut C,
    ) -> Result<(), Fault<C::Error>> {
        self.require_phase(Phase::ExpectingClose, event)?;
        debug!("connection closed, reason 0x{:04x}", reason);
        let target = self.target_mut()?;
        let snapshot = target.rssi.samples().cloned();
        target.rssi.reset()?;
        self.app_rssi = snapshot;
        send(ctl, Command::StartScan(ScanMode::default()))?;
        self.set_phase(Phase::WatchingOta);
        self.arm_deadline();
        Ok(())
    }

    fn check_deadline<C: Controller>(&mut self, ctl: &mut C) -> Result<(), Fault<C::Error>> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        if self.clock.now() <= deadline {
            return Ok(());
        }

        match self.phase {
            Phase::Observing => {
                send(ctl, Command::StopScan)?;
                info!("{} devices seen", self.directory.len());
                self.report = Some(Report::Directory(self.directory.report()));
                self.set_phase(Phase::Done);
            }
            Phase::Searching => {
                send(ctl, Command::StopScan)?;
                info!("no advertiser matched {}", self.config.selector);
                self.set_phase(Phase::Done);
            }
            Phase::WatchingApp if self.config.ota() => {
                send(ctl, Command::StopScan)?;
                let target = self.target_mut()?;
                let command = Command::OpenConnection {
                    address: target.address,
                    address_type: target.address_type,
                    phy: SCAN_PHY_1M,
                };
                send(ctl, command)?;
                self.set_phase(Phase::Connecting);
            }
            Phase::WatchingApp | Phase::WatchingOta => {
                send(ctl, Command::StopScan)?;
                self.report = Some(self.rssi_report()?);
                self.set_phase(Phase::Done);
            }
            _ => {}
        }
        Ok(())
    }

    fn rssi_report(&self) -> Result<Report, Error> {
        let target = self.target.as_ref().ok_or(Error::NoTarget)?;
        let stats = target.rssi.stats()?;
        let duration = self.config.duration;
        if self.phase == Phase::WatchingOta {
            let app = self.app_rssi.as_ref().ok_or(Error::NoSamples)?.stats()?;
            Ok(Report::Ota {
                duration,
                app,
                bootloader: stats,
            })
        } else {
            Ok(Report::Rssi { duration, stats })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Driving loop
// ═══════════════════════════════════════════════════════════════════════════

/// How a [`run`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exit {
    Done,
    Confused,
    Interrupted,
}

/// Reset the controller and process events until the session finishes or
/// `cancel` is raised.
///
/// Idle periods of [`IDLE_POLL_MS`] re-check the deadline so a target that
/// stops advertising cannot stall a timed phase.
pub fn run<K: Clock, T: Transport>(
    session: &mut Session<K>,
    transport: &mut T,
    cancel: &AtomicBool,
) -> Result<Exit, T::Error> {
    session.start(transport)?;
    let idle = Duration::from_millis(IDLE_POLL_MS);

    loop {
        if cancel.load(Ordering::Relaxed) {
            warn!("interrupted in phase {}", session.phase());
            return Ok(Exit::Interrupted);
        }

        let phase = match transport.next_event(idle)? {
            Some(event) => session.handle(&event, transport)?,
            None => session.poll(transport)?,
        };

        match phase {
            Phase::Done => return Ok(Exit::Done),
            Phase::Confused => return Ok(Exit::Confused),
            _ => {}
        }
    }
}
