use alloc::format;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::{CommandResult, Factory, Params};
use crate::calib::MiscalStatus;
use crate::cmcs::CmcsSource;
use crate::reg::nvm;
use crate::tclm::{CalPosition, CommitMode, TclmLevel};
use crate::test_result::{TestOutcome, TestStage};

impl<I, E, RST, D, C> Factory<I, RST, D, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  /// Where a harness-requested calibration is recorded as coming from.
  fn root_of_calibration(&self, param: i32) -> CalPosition {
    let lockdown = self.dev.config().tclm_level == TclmLevel::Lockdown;
    let line = if lockdown { CalPosition::Lcia } else { CalPosition::Factory };
    match u8::try_from(param).map(char::from) {
      Ok('\0') if self.external_factory => CalPosition::Outside,
      Ok('\0' | 'L' | 'l') => line,
      Ok('C' | 'c') => CalPosition::ServiceCenter,
      Ok('O' | 'o') => CalPosition::Outside,
      _ => CalPosition::Abnormal,
    }
  }

  /// Calibrate and record the calibration in NVM. Refused while the panel is
  /// touched.
  pub(super) async fn run_force_calibration(&mut self, p: Params<'_>) -> CommandResult {
    if !self.dev.is_powered_on() {
      return CommandResult::powered_off();
    }
    if self.dev.active_touches() != 0 {
      error!("force calibration refused, {} touches", self.dev.active_touches());
      return CommandResult::ng();
    }

    if let Err(e) = self.dev.resume().await {
      return CommandResult::from_error(&e);
    }
    let mut snapshot = match self.dev.load_calibration(true).await {
      Ok(snapshot) => snapshot,
      Err(_) => {
        error!("failed to load calibration record");
        Default::default()
      }
    };
    info!(
      "tclm level {}, count {}, tune {:x}",
      self.dev.config().tclm_level as u8,
      snapshot.record.count,
      snapshot.record.tune_fix_version
    );

    if let Err(e) = self.dev.force_calibrate().await {
      return CommandResult::from_error(&e);
    }

    self.root = self.root_of_calibration(p.get(0));
    self.external_factory = false;
    info!("calibration root {}", self.root.long_name());

    let committed = self.dev.commit_calibration(&mut snapshot, self.root, CommitMode::Factory).await;
    self.root = CalPosition::None;
    match committed {
      Ok(()) => CommandResult::ok("OK"),
      Err(e) => {
        error!("calibration record not saved");
        CommandResult::from_error(&e)
      }
    }
  }

  /// OK when both result words of the last calibration report a pass.
  pub(super) async fn get_force_calibration(&mut self) -> CommandResult {
    if !self.dev.is_powered_on() {
      return CommandResult::powered_off();
    }
    match self.dev.calibration_status().await {
      Ok((self_msg, mutual_msg)) if self_msg.is_good() && mutual_msg.is_good() => CommandResult::ok("OK"),
      Ok((self_msg, mutual_msg)) => {
        error!("calibration status {:x} {:x}", self_msg.into_bits(), mutual_msg.into_bits());
        CommandResult::ng()
      }
      Err(_) => {
        if self.dev.resume().await.is_err() {
          warn!("resume after status read failed");
        }
        CommandResult::ng()
      }
    }
  }

  /// `<status>,<max gap>,0,0`; OK only when the gap is within spec.
  pub(super) async fn run_mis_cal_read(&mut self) -> CommandResult {
    let report = match self.dev.run_miscalibration().await {
      Ok(report) => report,
      Err(e) => return CommandResult::from_error(&e),
    };
    self.cache.miscal = report.gap;

    let text = format!("{:02X},{},0,0", report.status.code(), report.max_gap);
    if report.status == MiscalStatus::Pass {
      CommandResult::ok(text)
    } else {
      CommandResult::fail(text)
    }
  }

  pub(super) fn mis_cal_value(&self, p: Params<'_>) -> CommandResult {
    let Some(gap) = self.cache.miscal.as_ref() else {
      return CommandResult::ng();
    };
    match self.dev.geometry().screen_index(p.get(0), p.get(1)) {
      Ok(idx) => gap.mutual.get(idx).map_or_else(CommandResult::ng, |v| CommandResult::ok(format!("{}", v))),
      Err(_) => CommandResult::ng(),
    }
  }

  /// The next calibration is done off the factory line.
  pub(super) fn set_external_factory(&mut self) -> CommandResult {
    self.external_factory = true;
    CommandResult::ok("OK")
  }

  /// `P<count>T<tune version>.<position><lockdown>`.
  pub(super) async fn pat_information(&mut self) -> CommandResult {
    let snapshot = match self.dev.load_calibration(true).await {
      Ok(snapshot) => snapshot,
      Err(e) => return CommandResult::from_error(&e),
    };
    info!("calibration history {}", snapshot.history.render().as_str());

    let lockdown = if self.dev.config().tclm_level == TclmLevel::Lockdown { ".L" } else { " " };
    let record = snapshot.record;
    CommandResult::ok(format!(
      "P{:02X}T{:04X}.{:>4}{}",
      record.count,
      record.tune_fix_version,
      record.position.long_name(),
      lockdown
    ))
  }

  pub(super) async fn tsp_test_result(&mut self) -> CommandResult {
    if let Err(e) = self.dev.ensure_powered() {
      return CommandResult::from_error(&e);
    }
    match self.dev.read_test_result().await {
      Ok(result) => CommandResult::ok(result.describe()),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// `[stage, outcome]`: stage 1 is the module, 2 the assembly.
  pub(super) async fn set_tsp_test_result(&mut self, p: Params<'_>) -> CommandResult {
    let (Some(stage), Ok(raw)) = (TestStage::from_param(p.get(0)), u8::try_from(p.get(1))) else {
      return CommandResult::ng();
    };
    match self.dev.record_test_result(stage, TestOutcome::from_bits(raw)).await {
      Ok(result) => {
        info!("test result now {}", result.describe().as_str());
        CommandResult::ok("OK")
      }
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// Dump every sec-info NVM slot to the log.
  pub(super) async fn ium_read(&mut self) -> CommandResult {
    if let Err(e) = self.dev.ensure_powered() {
      return CommandResult::from_error(&e);
    }
    let mut slots = [0u32; nvm::SLOTS];
    if let Err(e) = self.dev.read_sec_info(0, &mut slots).await {
      return CommandResult::from_error(&e);
    }
    for (i, slot) in slots.iter().enumerate() {
      info!("nvm[{}] = {:08x}", i, slot);
    }
    CommandResult::ok("OK")
  }
}
