//! Force calibration: a retrying state machine around the firmware's
//! calibrate command.

use bitfield_struct::bitfield;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::reg::{HostCommand, Query, CALIB_MAX_I2C_FAIL_CNT, CALIB_POLL_MS};
use crate::{Error, Ist40xx};

mod miscal;

pub use miscal::*;

const SIGNATURE_LOW: u16 = 0xCAB;
const SIGNATURE_HIGH: u8 = 0x8;

/// Result word the firmware posts when a calibration finishes.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct CalibMessage {
  #[bits(12)]
  signature_low: u16,
  /// Zero on success.
  #[bits(4)]
  pub status: u8,
  /// Largest node gap seen by the firmware.
  #[bits(12)]
  pub gap: u16,
  #[bits(4)]
  signature_high: u8,
}

impl CalibMessage {
  pub const fn is_posted(&self) -> bool {
    self.into_bits() != 0
  }

  pub const fn has_signature(&self) -> bool {
    self.signature_low() == SIGNATURE_LOW && self.signature_high() == SIGNATURE_HIGH
  }

  pub const fn passed(&self) -> bool {
    self.status() == 0
  }

  /// Signed by the firmware and reporting success.
  pub const fn is_good(&self) -> bool {
    self.has_signature() && self.passed()
  }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CalibMessage {
  fn format(&self, f: defmt::Formatter) {
    defmt::write!(f, "CalibMessage({=u32:#x})", self.into_bits())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalState {
  Idle,
  CommandSent,
  AwaitingCompletion,
  Retry,
  Success,
  Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalEvent {
  /// Send (or resend) the calibrate command.
  Issue,
  /// The command reached the controller.
  BusOk,
  /// The command write failed on the bus.
  BusError,
  /// Both result words are non-zero.
  Posted { self_msg: CalibMessage, mutual_msg: CalibMessage },
  /// A posted result word lacks the firmware signature.
  Unsigned,
  /// The poll budget ran out without a result.
  TimedOut,
  /// Leave [`CalState::Retry`], spending one attempt.
  Backoff,
}

/// Why a calibration ended in [`CalState::Fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureCause {
  Bus,
  Timeout,
  Rejected { self_status: u8, mutual_status: u8 },
  /// The controller posted a malformed result; never retried.
  Protocol,
}

/// Pure calibration state machine. The driver feeds it events and performs
/// the side effect each state asks for.
#[derive(Debug, Clone)]
pub struct CalibrationAttempt {
  state: CalState,
  i2c_budget: u8,
  attempts_left: u8,
  attempts: u8,
  bus_errors: u8,
  cause: Option<FailureCause>,
  result: Option<(CalibMessage, CalibMessage)>,
}

impl CalibrationAttempt {
  /// `attempts` full tries; each may absorb up to `CALIB_MAX_I2C_FAIL_CNT - 1`
  /// failed command writes.
  pub const fn new(attempts: u8) -> Self {
    Self {
      state: CalState::Idle,
      i2c_budget: CALIB_MAX_I2C_FAIL_CNT,
      attempts_left: if attempts == 0 { 1 } else { attempts },
      attempts: 0,
      bus_errors: 0,
      cause: None,
      result: None,
    }
  }

  pub const fn state(&self) -> CalState {
    self.state
  }

  /// Commands that reached the controller.
  pub const fn attempts(&self) -> u8 {
    self.attempts
  }

  pub const fn bus_errors(&self) -> u8 {
    self.bus_errors
  }

  pub const fn cause(&self) -> Option<FailureCause> {
    self.cause
  }

  pub fn step(&mut self, event: CalEvent) -> CalState {
    use CalEvent::*;
    use CalState::*;

    self.state = match (self.state, event) {
      (Idle, Issue) => CommandSent,
      (CommandSent, BusOk) => {
        self.attempts += 1;
        AwaitingCompletion
      }
      (CommandSent, BusError) => {
        self.bus_errors = self.bus_errors.saturating_add(1);
        self.i2c_budget -= 1;
        if self.i2c_budget == 0 {
          self.i2c_budget = CALIB_MAX_I2C_FAIL_CNT;
          self.cause = Some(FailureCause::Bus);
          Retry
        } else {
          CommandSent
        }
      }
      (AwaitingCompletion, Posted { self_msg, mutual_msg }) => {
        self.result = Some((self_msg, mutual_msg));
        if self_msg.passed() && mutual_msg.passed() {
          self.cause = None;
          Success
        } else {
          self.cause = Some(FailureCause::Rejected { self_status: self_msg.status(), mutual_status: mutual_msg.status() });
          Retry
        }
      }
      (AwaitingCompletion, Unsigned) => {
        self.cause = Some(FailureCause::Protocol);
        Fatal
      }
      (AwaitingCompletion, TimedOut) => {
        self.cause = Some(FailureCause::Timeout);
        Retry
      }
      (Retry, Backoff) => {
        self.attempts_left -= 1;
        if self.attempts_left == 0 {
          Fatal
        } else {
          Idle
        }
      }
      (state, _) => state,
    };
    self.state
  }

  /// Outcome of a machine that reached a terminal state.
  pub fn report(&self) -> Result<CalibrationReport, FailureCause> {
    match (self.state, self.result) {
      (CalState::Success, Some((self_msg, mutual_msg))) => {
        Ok(CalibrationReport { attempts: self.attempts, bus_errors: self.bus_errors, self_msg, mutual_msg })
      }
      _ => Err(self.cause.unwrap_or(FailureCause::Timeout)),
    }
  }
}

/// Successful calibration summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationReport {
  pub attempts: u8,
  pub bus_errors: u8,
  pub self_msg: CalibMessage,
  pub mutual_msg: CalibMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CalibrationKind {
  Force,
  Miscal,
}

impl CalibrationKind {
  const fn command(self) -> HostCommand {
    match self {
      CalibrationKind::Force => HostCommand::Calibrate,
      CalibrationKind::Miscal => HostCommand::Miscalibrate,
    }
  }

  const fn results(self) -> (Query, Query) {
    match self {
      CalibrationKind::Force => (Query::SelfCalResult, Query::CalResult),
      CalibrationKind::Miscal => (Query::SelfMiscalResult, Query::MiscalResult),
    }
  }
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Run the firmware calibration, then reset and resume the controller
  /// whatever the outcome.
  pub async fn force_calibrate(&mut self) -> Result<CalibrationReport, Error<E>> {
    self.ensure_powered()?;
    info!("calibrate, wait up to {} polls", self.config.calib_wait_count);

    let result = self.run_calibration(CalibrationKind::Force).await;
    self.resume().await?;
    result
  }

  /// Read back the result words of the last calibration, `(self, mutual)`.
  pub async fn calibration_status(&mut self) -> Result<(CalibMessage, CalibMessage), Error<E>> {
    self.ensure_powered()?;
    let self_msg = CalibMessage::from_bits(self.read_query(Query::SelfCalResult).await?);
    let mutual_msg = CalibMessage::from_bits(self.read_query(Query::CalResult).await?);
    Ok((self_msg, mutual_msg))
  }

  /// Drive a [`CalibrationAttempt`] to a terminal state. Leaves interrupts
  /// disabled; the caller resumes the controller.
  pub(crate) async fn run_calibration(&mut self, kind: CalibrationKind) -> Result<CalibrationReport, Error<E>> {
    let mut machine = CalibrationAttempt::new(self.config.calib_attempts);
    let mut last_bus_error = None;
    self.disable_irq();

    loop {
      match machine.state() {
        CalState::Idle => {
          machine.step(CalEvent::Issue);
        }
        CalState::CommandSent => match self.command(kind.command(), 0).await {
          Ok(()) => {
            machine.step(CalEvent::BusOk);
          }
          Err(Error::I2c(e)) => {
            warn!("calibrate command failed on the bus");
            last_bus_error = Some(e);
            machine.step(CalEvent::BusError);
          }
          Err(e) => return Err(e),
        },
        CalState::AwaitingCompletion => {
          let event = self.wait_calibration(kind).await;
          machine.step(event);
        }
        CalState::Retry => {
          if machine.step(CalEvent::Backoff) == CalState::Idle {
            warn!("calibration failed, retry after reset");
            self.reset().await?;
          }
        }
        CalState::Success | CalState::Fatal => break,
      }
    }

    match machine.report() {
      Ok(report) => {
        info!(
          "calibration ok: attempts {}, self {:x}, mutual {:x}",
          report.attempts,
          report.self_msg.into_bits(),
          report.mutual_msg.into_bits()
        );
        Ok(report)
      }
      Err(FailureCause::Bus) => {
        error!("calibration gave up after bus errors");
        Err(last_bus_error.map_or(Error::Protocol, Error::I2c))
      }
      Err(FailureCause::Timeout) => {
        error!("calibration timed out");
        Err(Error::CalibrationTimeout)
      }
      Err(FailureCause::Rejected { self_status, mutual_status }) => {
        error!("calibration rejected: self {}, mutual {}", self_status, mutual_status);
        Err(Error::CalibrationRejected { self_status, mutual_status })
      }
      Err(FailureCause::Protocol) => {
        error!("calibration result is not signed by the firmware");
        Err(Error::Protocol)
      }
    }
  }

  async fn wait_calibration(&mut self, kind: CalibrationKind) -> CalEvent {
    let (self_query, mutual_query) = kind.results();

    for _ in 0..self.config.calib_wait_count {
      self.delay.delay_ms(CALIB_POLL_MS).await;

      let self_word = self.read_query(self_query).await;
      let mutual_word = self.read_query(mutual_query).await;
      let (Ok(self_word), Ok(mutual_word)) = (self_word, mutual_word) else {
        debug!("calibration poll read failed");
        continue;
      };

      let self_msg = CalibMessage::from_bits(self_word);
      let mutual_msg = CalibMessage::from_bits(mutual_word);
      if self_msg.is_posted() && mutual_msg.is_posted() {
        if !self_msg.has_signature() || !mutual_msg.has_signature() {
          warn!("calibration result without signature: {:x} {:x}", self_word, mutual_word);
          return CalEvent::Unsigned;
        }
        return CalEvent::Posted { self_msg, mutual_msg };
      }
    }

    CalEvent::TimedOut
  }
}
