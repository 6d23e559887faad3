/******************************************************************************
 * Imagis IST40xx host interface as used by the factory test firmware.        *
 * ========================================================================== *
 *                   IST40xx - Host Interface Block & Memory Map              *
*******************************************************************************/

use bitfield_struct::bitfield;

pub(crate) const DEFAULT_I2C_ADDR: u8 = 0x50;

// Host interface block (HIB)
pub(crate) const HIB_BASE: u32 = 0x3000_0100;
pub(crate) const HIB_TOUCH_STATUS: u32 = HIB_BASE;
pub(crate) const HIB_CMD: u32 = HIB_BASE + 0x04;
pub(crate) const HIB_SEC_INFO: u32 = HIB_BASE + 0x10;

// Node frames: rx*tx mutual words followed by tx+rx self words
pub(crate) const CDC_FRAME_ADDR: u32 = 0x2000_0000;
pub(crate) const CAL_CP_FRAME_ADDR: u32 = 0x2000_4000;
pub(crate) const MISCAL_CP_FRAME_ADDR: u32 = 0x2000_8000;

/// Largest single I²C read the controller accepts, in 32-bit words.
pub(crate) const MAX_BURST_WORDS: usize = 64;

pub(crate) const EXCEPT_INTEGRITY: u32 = 0xAA55_AA55;

// Timing (ms)
pub(crate) const RESET_HOLD_MS: u32 = 10;
pub(crate) const RESET_SETTLE_MS: u32 = 60;
pub(crate) const CALIB_POLL_MS: u32 = 100;
pub(crate) const NODE_READY_MS: u32 = 30;
pub(crate) const SEC_INFO_MS: u32 = 5;

/// Bus failures tolerated while issuing a calibration command before the
/// attempt is given up and the device is reset.
pub(crate) const CALIB_MAX_I2C_FAIL_CNT: u8 = 10;

/// Read-only words served at a fixed address.
#[allow(dead_code)]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Query {
  ChipId = 0x01,
  MainVersion = 0x02,
  FwVersion = 0x03,
  CoreVersion = 0x04,
  TestVersion = 0x05,
  Crc32 = 0x0C,
  TouchThreshold = 0x0D,
  CalResult = 0x10,
  SelfCalResult = 0x11,
  MiscalResult = 0x12,
  SelfMiscalResult = 0x13,
  FwIntegrity = 0x14,
}

impl From<Query> for u32 {
  #[inline]
  fn from(q: Query) -> Self {
    q as u32
  }
}

/// Commands written to [`HIB_CMD`] as `(command << 16) | param`.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HostCommand {
  FwStart = 0x01,
  Calibrate = 0x11,
  Miscalibrate = 0x12,
  NodeRequest = 0x20,
  SecInfoRead = 0x30,
  SecInfoWrite = 0x31,
}

impl HostCommand {
  #[inline]
  pub(crate) const fn word(self, param: u16) -> u32 {
    ((self as u32) << 16) | param as u32
  }
}

/// Node request parameter selecting which frame the firmware latches.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeRequest {
  Release = 0,
  Cdc = 1,
  CalibratedCp = 2,
  MiscalibratedCp = 3,
}

/// Logical slots of the on-chip "sec info" NVM area. Each slot is one 32-bit cell.
pub(crate) mod nvm {
  pub(crate) const SLOTS: usize = 32;
  pub(crate) const TEST_RESULT: u8 = 0;
  pub(crate) const CAL_COUNT: u8 = 1;
  pub(crate) const TUNE_VERSION: u8 = 2;
  pub(crate) const CAL_POSITION: u8 = 3;
  pub(crate) const HISTORY_COUNT: u8 = 4;
  pub(crate) const HISTORY_LAST: u8 = 5;
  pub(crate) const HISTORY_ZERO: u8 = 6;
}

const TOUCH_STATUS_MAGIC: u8 = 0x75;

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct TouchStatus {
  magic: u8,
  pub(crate) noise: bool,
  __: bool,
  pub(crate) wet: bool,
  #[bits(21)]
  ___: u32,
}

impl TouchStatus {
  pub(crate) const fn is_valid(&self) -> bool {
    self.magic() == TOUCH_STATUS_MAGIC
  }
}
