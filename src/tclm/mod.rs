//! TCLM: tracking where and how often the panel was calibrated, kept in the
//! controller's sec-info NVM.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::reg::nvm;
use crate::test_result::TestResult;
use crate::{Error, Ist40xx};

mod history;

pub use history::*;

/// Where a calibration was performed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalPosition {
  #[default]
  None = 0,
  Initial = 1,
  Factory = 2,
  Outside = 3,
  Lcia = 4,
  ServiceCenter = 5,
  Abnormal = 6,
  FirstBoot = 7,
  TestMode = 8,
  TuneUp = 9,
}

impl CalPosition {
  /// First raw value that is not a position.
  pub const MAX: u8 = 10;

  pub const fn from_bits(raw: u8) -> Option<Self> {
    Some(match raw {
      0 => Self::None,
      1 => Self::Initial,
      2 => Self::Factory,
      3 => Self::Outside,
      4 => Self::Lcia,
      5 => Self::ServiceCenter,
      6 => Self::Abnormal,
      7 => Self::FirstBoot,
      8 => Self::TestMode,
      9 => Self::TuneUp,
      _ => return None,
    })
  }

  pub const fn long_name(self) -> &'static str {
    match self {
      Self::None => "NONE",
      Self::Initial => "INIT",
      Self::Factory => "FACT",
      Self::Outside => "OUTS",
      Self::Lcia => "LCIA",
      Self::ServiceCenter => "CENT",
      Self::Abnormal => "ABNO",
      Self::FirstBoot => "FIRS",
      Self::TestMode => "TEST",
      Self::TuneUp => "TUNE",
    }
  }

  pub const fn short_name(self) -> char {
    match self {
      Self::None => 'N',
      Self::Initial => 'I',
      Self::Factory => 'F',
      Self::Outside => 'O',
      Self::Lcia => 'L',
      Self::ServiceCenter => 'C',
      Self::Abnormal => 'A',
      Self::FirstBoot => 'Z',
      Self::TestMode => 'T',
      Self::TuneUp => 'V',
    }
  }
}

/// Recalibration policy.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TclmLevel {
  #[default]
  None = 0,
  ClearNv = 1,
  Lockdown = 2,
  Everytime = 5,
}

/// Whether a calibration requested from `origin` may run given the position
/// of the last stored calibration.
pub const fn is_eligible(level: TclmLevel, origin: CalPosition, current: CalPosition) -> bool {
  match level {
    TclmLevel::Lockdown => match origin {
      CalPosition::TuneUp | CalPosition::Initial => true,
      CalPosition::TestMode => !matches!(current, CalPosition::Lcia | CalPosition::ServiceCenter),
      _ => false,
    },
    TclmLevel::ClearNv | TclmLevel::Everytime => true,
    TclmLevel::None => matches!(origin, CalPosition::TestMode | CalPosition::Initial),
  }
}

/// Current calibration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
  pub position: CalPosition,
  pub count: u8,
  /// Low 16 bits of the firmware version the calibration was made with.
  pub tune_fix_version: u16,
}

/// Everything TCLM knows, as loaded from NVM.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CalibrationSnapshot {
  pub test_result: TestResult,
  pub record: CalibrationRecord,
  pub history: HistoryQueue,
  /// NVM held uninitialized or corrupt data and was treated as empty.
  pub recovered: bool,
}

/// How [`Ist40xx::commit_calibration`] treats the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitMode {
  /// Check eligibility and run a force calibration before recording.
  Checked,
  /// The caller already calibrated; only record.
  Factory,
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Load the calibration snapshot. `extended` also loads the tune version
  /// and history ring.
  pub async fn load_calibration(&mut self, extended: bool) -> Result<CalibrationSnapshot, Error<E>> {
    self.ensure_powered()?;
    let mut snapshot = CalibrationSnapshot { test_result: self.read_test_result().await?, ..Default::default() };

    let count = self.read_slot(nvm::CAL_COUNT).await? & 0xFF;
    let position = self.read_slot(nvm::CAL_POSITION).await? & 0xFF;

    match CalPosition::from_bits(position as u8) {
      Some(position) if count != 0xFF => {
        snapshot.record.count = count as u8;
        snapshot.record.position = position;
      }
      _ => {
        warn!("tclm: nvm uninitialized (count {:x}, position {:x})", count, position);
        snapshot.recovered = true;
        return Ok(snapshot);
      }
    }

    if extended {
      snapshot.record.tune_fix_version = (self.read_slot(nvm::TUNE_VERSION).await? & 0xFFFF) as u16;

      let hist_count = self.read_slot(nvm::HISTORY_COUNT).await?;
      let hist_last = self.read_slot(nvm::HISTORY_LAST).await?;
      if HistoryQueue::meta_valid(hist_count, hist_last) {
        snapshot.history = HistoryQueue::from_meta(hist_count, hist_last);
        for slot in 0..hist_count as u8 {
          let word = self.read_slot(nvm::HISTORY_ZERO + slot).await?;
          snapshot.history.set_slot(slot as usize, HistoryEntry::unpack(word));
        }
      } else {
        warn!("tclm: history metadata invalid ({}, {})", hist_count, hist_last);
        snapshot.history.clear();
      }
    }

    info!(
      "tclm: {} x{}, tune {:x}, history {}",
      snapshot.record.position.long_name(),
      snapshot.record.count,
      snapshot.record.tune_fix_version,
      snapshot.history.render().as_str()
    );
    Ok(snapshot)
  }

  /// Record a calibration from `origin` in NVM.
  ///
  /// A new origin pushes the previous (position, count) onto the history ring
  /// and restarts the count. The NVM update spans several slot writes and is
  /// not atomic: a failure part way leaves the earlier writes in place.
  pub async fn commit_calibration(
    &mut self,
    snapshot: &mut CalibrationSnapshot,
    origin: CalPosition,
    mode: CommitMode,
  ) -> Result<(), Error<E>> {
    self.ensure_powered()?;

    if mode == CommitMode::Checked {
      let level = self.config.tclm_level;
      if !is_eligible(level, origin, snapshot.record.position) {
        info!("tclm: {} not allowed from {}", origin.long_name(), snapshot.record.position.long_name());
        return Err(Error::Ineligible);
      }
      self.force_calibrate().await?;
    }

    let mut count = self.read_slot(nvm::CAL_COUNT).await? & 0xFF;
    let raw_position = (self.read_slot(nvm::CAL_POSITION).await? & 0xFF) as u8;
    let mut position = CalPosition::from_bits(raw_position).unwrap_or_default();

    if count < 1 || count >= 0xFF || CalPosition::from_bits(raw_position).is_none() {
      count = 0;
      snapshot.history.clear();
      self.write_sec_info(nvm::HISTORY_COUNT, 0).await?;
      self.write_sec_info(nvm::HISTORY_LAST, 0).await?;
    } else if origin != position {
      let hist_count = self.read_slot(nvm::HISTORY_COUNT).await?;
      let hist_last = self.read_slot(nvm::HISTORY_LAST).await?;
      let in_sync = snapshot.history.len() as u32 == hist_count && snapshot.history.last_pointer() as u32 == hist_last;
      let mut history =
        if in_sync { snapshot.history.clone() } else { HistoryQueue::from_meta(hist_count, hist_last) };

      let entry = HistoryEntry { position, count: count as u8 };
      let slot = history.push(entry);
      self.write_sec_info(nvm::HISTORY_COUNT, history.len() as u32).await?;
      self.write_sec_info(nvm::HISTORY_LAST, history.last_pointer() as u32).await?;
      self.write_sec_info(nvm::HISTORY_ZERO + slot as u8, entry.pack()).await?;
      snapshot.history = history;
      count = 0;
    }

    if count == 0 {
      self.write_sec_info(nvm::CAL_POSITION, origin as u32).await?;
      position = origin;
    }

    count += 1;
    self.write_sec_info(nvm::CAL_COUNT, count).await?;

    let tune = (self.fw_version().await? & 0xFFFF) as u16;
    self.write_sec_info(nvm::TUNE_VERSION, tune as u32).await?;

    snapshot.record = CalibrationRecord { position, count: count as u8, tune_fix_version: tune };
    snapshot.recovered = false;
    info!("tclm: committed {} x{}", position.long_name(), count);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::{self, FW_VERSION};
  use crate::reg::HostCommand;
  use embassy_futures::block_on;

  #[test]
  fn lockdown_policy() {
    use CalPosition::*;
    let lock = TclmLevel::Lockdown;
    assert!(is_eligible(lock, TuneUp, Lcia));
    assert!(is_eligible(lock, Initial, ServiceCenter));
    assert!(is_eligible(lock, TestMode, Factory));
    assert!(!is_eligible(lock, TestMode, Lcia));
    assert!(!is_eligible(lock, TestMode, ServiceCenter));
    assert!(!is_eligible(lock, Factory, None));
    assert!(!is_eligible(lock, Outside, None));
  }

  #[test]
  fn other_policies() {
    use CalPosition::*;
    assert!(is_eligible(TclmLevel::ClearNv, Abnormal, Lcia));
    assert!(is_eligible(TclmLevel::Everytime, Outside, Factory));
    assert!(is_eligible(TclmLevel::None, TestMode, Lcia));
    assert!(is_eligible(TclmLevel::None, Initial, Lcia));
    assert!(!is_eligible(TclmLevel::None, Factory, None));
  }

  #[test]
  fn position_names() {
    assert_eq!(CalPosition::from_bits(7), Some(CalPosition::FirstBoot));
    assert_eq!(CalPosition::from_bits(CalPosition::MAX), Option::None);
    assert_eq!(CalPosition::FirstBoot.short_name(), 'Z');
    assert_eq!(CalPosition::TuneUp.long_name(), "TUNE");
  }

  #[test]
  fn uninitialized_nvm_recovers() {
    let mut dev = mock::powered();
    dev.i2c.nvm[nvm::CAL_COUNT as usize] = 0xFF;
    dev.i2c.nvm[nvm::CAL_POSITION as usize] = 0xFF;
    let snap = block_on(dev.load_calibration(true)).unwrap();
    assert!(snap.recovered);
    assert_eq!(snap.record, CalibrationRecord::default());
    assert!(snap.history.is_empty());
  }

  #[test]
  fn factory_commit_round_trips() {
    let mut dev = mock::powered();
    let mut snap = block_on(dev.load_calibration(true)).unwrap();

    block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Factory)).unwrap();
    assert_eq!(dev.i2c.sent(HostCommand::Calibrate), 0);

    let loaded = block_on(dev.load_calibration(true)).unwrap();
    assert_eq!(loaded.record.count, 1);
    assert_eq!(loaded.record.position, CalPosition::Factory);
    assert_eq!(loaded.record.tune_fix_version, (FW_VERSION & 0xFFFF) as u16);
    assert_eq!(loaded.record, snap.record);
    assert!(loaded.history.is_empty());
  }

  #[test]
  fn new_origin_pushes_history() {
    let mut dev = mock::powered();
    let mut snap = CalibrationSnapshot::default();

    block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Factory)).unwrap();
    block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Factory)).unwrap();
    assert_eq!(snap.record.count, 2);

    block_on(dev.commit_calibration(&mut snap, CalPosition::Lcia, CommitMode::Factory)).unwrap();
    assert_eq!(snap.record, CalibrationRecord { position: CalPosition::Lcia, count: 1, tune_fix_version: 0x3456 });

    let loaded = block_on(dev.load_calibration(true)).unwrap();
    assert_eq!(loaded.history.len(), 1);
    assert_eq!(loaded.history.render().as_str(), "F2");
    assert_eq!(loaded.record.position, CalPosition::Lcia);
  }

  #[test]
  fn corrupt_position_resets_record_on_commit() {
    let mut dev = mock::powered();
    dev.i2c.nvm[nvm::CAL_POSITION as usize] = 0x33;
    dev.i2c.nvm[nvm::HISTORY_COUNT as usize] = 4;
    dev.i2c.nvm[nvm::HISTORY_LAST as usize] = 2;
    dev.i2c.nvm[nvm::CAL_COUNT as usize] = 5;
    let mut snap = CalibrationSnapshot::default();

    block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Factory)).unwrap();
    assert_eq!(dev.i2c.nvm[nvm::HISTORY_COUNT as usize], 0);
    assert_eq!(dev.i2c.nvm[nvm::HISTORY_LAST as usize], 0);
    assert_eq!(dev.i2c.nvm[nvm::CAL_COUNT as usize], 1);
    assert_eq!(dev.i2c.nvm[nvm::CAL_POSITION as usize], CalPosition::Factory as u32);
    assert_eq!(snap.record.count, 1);
    assert!(snap.history.is_empty());
  }

  #[test]
  fn checked_commit_refuses_ineligible_origin() {
    let mut dev = mock::powered();
    dev.config.tclm_level = TclmLevel::Lockdown;
    let mut snap = CalibrationSnapshot::default();
    let before = dev.i2c.transactions;

    let res = block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Checked));
    assert_eq!(res, Err(Error::Ineligible));
    assert_eq!(dev.i2c.transactions, before);
  }

  #[test]
  fn checked_commit_calibrates_first() {
    let mut dev = mock::powered();
    let mut snap = CalibrationSnapshot::default();
    block_on(dev.commit_calibration(&mut snap, CalPosition::TestMode, CommitMode::Checked)).unwrap();
    assert_eq!(dev.i2c.sent(HostCommand::Calibrate), 1);
    assert_eq!(snap.record.position, CalPosition::TestMode);
  }

  #[test]
  fn failed_nvm_write_surfaces() {
    let mut dev = mock::powered();
    dev.i2c.fail_nvm_writes = true;
    let mut snap = CalibrationSnapshot::default();
    let res = block_on(dev.commit_calibration(&mut snap, CalPosition::Factory, CommitMode::Factory));
    assert!(matches!(res, Err(Error::I2c(_))));
  }
}
