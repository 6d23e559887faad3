//! In-memory controller used by the unit tests.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::convert::Infallible;

use embassy_futures::block_on;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{ErrorKind, Operation};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::geometry::{Channels, Keys, SensorGeometry};
use crate::reg::*;
use crate::{Config, Ist40xx};

/// Calibration message with a valid signature and status 0.
pub(crate) const CALIB_PASS: u32 = 0x8000_0CAB;
/// Same signature, status 1.
pub(crate) const CALIB_FAIL: u32 = 0x8000_1CAB;

pub(crate) const FW_VERSION: u32 = 0x0012_3456;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BusFault;

impl embedded_hal::i2c::Error for BusFault {
  fn kind(&self) -> ErrorKind {
    ErrorKind::Other
  }
}

struct PendingResult {
  self_addr: u32,
  mutual_addr: u32,
  self_msg: u32,
  mutual_msg: u32,
  polls: u32,
}

pub(crate) struct FakeChip {
  pub mem: BTreeMap<u32, u32>,
  pub nvm: [u32; nvm::SLOTS],
  /// Every I²C transaction, failed or not.
  pub transactions: usize,
  /// Fail this many upcoming transactions.
  pub fail_next: usize,
  /// Fail every write to the sec-info window.
  pub fail_nvm_writes: bool,
  pub commands: Vec<(u16, u16)>,
  /// `(self, mutual)` posted after a calibrate command, `None` never posts.
  pub cal_result: Option<(u32, u32)>,
  pub miscal_result: Option<(u32, u32)>,
  /// Polls that read zero before the result is posted.
  pub result_delay: u32,
  /// CP frame produced by the next mis-calibration.
  pub miscal_frame: Option<Vec<u32>>,
  sec_read: usize,
  sec_write: usize,
  pending: Option<PendingResult>,
}

impl FakeChip {
  pub(crate) fn new() -> Self {
    let mut mem = BTreeMap::new();
    mem.insert(Query::ChipId as u32, 0x40);
    mem.insert(Query::FwVersion as u32, FW_VERSION);
    mem.insert(Query::TestVersion as u32, 0);
    mem.insert(Query::Crc32 as u32, 0x00AB_CDEF);
    mem.insert(Query::TouchThreshold as u32, 0x1F);
    mem.insert(Query::FwIntegrity as u32, EXCEPT_INTEGRITY);
    mem.insert(HIB_TOUCH_STATUS, 0x75);

    let mut chip = Self {
      mem,
      nvm: [0; nvm::SLOTS],
      transactions: 0,
      fail_next: 0,
      fail_nvm_writes: false,
      commands: Vec::new(),
      cal_result: Some((CALIB_PASS, CALIB_PASS)),
      miscal_result: Some((CALIB_PASS, CALIB_PASS)),
      result_delay: 0,
      miscal_frame: None,
      sec_read: 0,
      sec_write: 0,
      pending: None,
    };

    let len = frame_len();
    chip.set_frame(CDC_FRAME_ADDR, &alloc::vec![1000; len]);
    chip.set_frame(CAL_CP_FRAME_ADDR, &alloc::vec![10; len]);
    chip.set_frame(MISCAL_CP_FRAME_ADDR, &alloc::vec![10; len]);
    chip
  }

  pub(crate) fn set_frame(&mut self, addr: u32, words: &[u32]) {
    for (i, &w) in words.iter().enumerate() {
      self.mem.insert(addr + 4 * i as u32, w);
    }
  }

  pub(crate) fn sent(&self, cmd: HostCommand) -> usize {
    self.commands.iter().filter(|(c, _)| *c == cmd as u16).count()
  }

  fn read_word(&mut self, base: u32, k: usize) -> u32 {
    if base == HIB_SEC_INFO {
      return self.nvm.get(self.sec_read + k).copied().unwrap_or(0);
    }

    let addr = base + 4 * k as u32;
    if let Some(p) = self.pending.as_mut() {
      if addr == p.self_addr {
        if p.polls == 0 {
          let (s, m, sa, ma) = (p.self_msg, p.mutual_msg, p.self_addr, p.mutual_addr);
          self.mem.insert(sa, s);
          self.mem.insert(ma, m);
          self.pending = None;
        } else {
          p.polls -= 1;
        }
      }
    }
    self.mem.get(&addr).copied().unwrap_or(0)
  }

  fn write_word(&mut self, addr: u32, value: u32) -> Result<(), BusFault> {
    match addr {
      HIB_CMD => self.handle_command((value >> 16) as u16, value as u16),
      HIB_SEC_INFO => {
        if self.fail_nvm_writes {
          return Err(BusFault);
        }
        self.nvm[self.sec_write] = value;
      }
      _ => {
        self.mem.insert(addr, value);
      }
    }
    Ok(())
  }

  fn handle_command(&mut self, cmd: u16, param: u16) {
    self.commands.push((cmd, param));
    let (self_addr, mutual_addr, result) = match cmd {
      c if c == HostCommand::Calibrate as u16 => (Query::SelfCalResult as u32, Query::CalResult as u32, self.cal_result),
      c if c == HostCommand::Miscalibrate as u16 => {
        if let Some(frame) = self.miscal_frame.clone() {
          self.set_frame(MISCAL_CP_FRAME_ADDR, &frame);
        }
        (Query::SelfMiscalResult as u32, Query::MiscalResult as u32, self.miscal_result)
      }
      c if c == HostCommand::SecInfoRead as u16 => {
        self.sec_read = (param & 0xFF) as usize;
        return;
      }
      c if c == HostCommand::SecInfoWrite as u16 => {
        self.sec_write = (param & 0xFF) as usize;
        return;
      }
      _ => return,
    };

    self.mem.insert(self_addr, 0);
    self.mem.insert(mutual_addr, 0);
    self.pending = result.map(|(self_msg, mutual_msg)| PendingResult {
      self_addr,
      mutual_addr,
      self_msg,
      mutual_msg,
      polls: self.result_delay,
    });
  }
}

impl embedded_hal_async::i2c::ErrorType for FakeChip {
  type Error = BusFault;
}

impl I2c for FakeChip {
  async fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
    self.transactions += 1;
    if self.fail_next > 0 {
      self.fail_next -= 1;
      return Err(BusFault);
    }

    let mut addr = None;
    for op in operations.iter_mut() {
      match op {
        Operation::Write(bytes) if bytes.len() == 4 => addr = Some(be(bytes)),
        Operation::Write(bytes) if bytes.len() == 8 => self.write_word(be(&bytes[..4]), be(&bytes[4..]))?,
        Operation::Read(buf) => {
          let base = addr.ok_or(BusFault)?;
          for (k, chunk) in buf.chunks_mut(4).enumerate() {
            let word = self.read_word(base, k).to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
          }
        }
        _ => return Err(BusFault),
      }
    }
    Ok(())
  }
}

fn be(bytes: &[u8]) -> u32 {
  u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Debug, Default)]
pub(crate) struct FakePin {
  pub pulses: usize,
  pub high: bool,
}

impl embedded_hal::digital::ErrorType for FakePin {
  type Error = Infallible;
}

impl OutputPin for FakePin {
  fn set_low(&mut self) -> Result<(), Self::Error> {
    self.pulses += 1;
    self.high = false;
    Ok(())
  }

  fn set_high(&mut self) -> Result<(), Self::Error> {
    self.high = true;
    Ok(())
  }
}

#[derive(Debug, Default)]
pub(crate) struct NoDelay {
  pub elapsed_ns: u64,
}

impl DelayNs for NoDelay {
  async fn delay_ns(&mut self, ns: u32) {
    self.elapsed_ns += ns as u64;
  }
}

pub(crate) type FakeDevice = Ist40xx<FakeChip, FakePin, NoDelay>;

/// 4 Rx x 3 Tx grid: 2x2 screen, two keys on Tx 2.
pub(crate) fn geometry() -> SensorGeometry {
  SensorGeometry::new(Channels::new(4, 3), Channels::new(2, 2)).with_keys(Keys { count: 2, tx: 2 })
}

pub(crate) fn frame_len() -> usize {
  let ch = geometry().channels;
  ch.nodes() + ch.self_nodes()
}

pub(crate) fn device() -> FakeDevice {
  Ist40xx::new(FakeChip::new(), FakePin::default(), NoDelay::default(), Config::new(geometry()))
}

pub(crate) fn powered() -> FakeDevice {
  let mut dev = device();
  block_on(dev.power_on()).unwrap();
  dev
}
