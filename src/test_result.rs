use alloc::format;
use alloc::string::String;

use bitfield_struct::bitfield;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::reg::nvm;
use crate::{Error, Ist40xx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestOutcome {
  None,
  Fail,
  Pass,
}

impl TestOutcome {
  pub const fn from_bits(raw: u8) -> Self {
    match raw {
      0 => TestOutcome::None,
      1 => TestOutcome::Fail,
      _ => TestOutcome::Pass,
    }
  }

  pub const fn into_bits(self) -> u8 {
    match self {
      TestOutcome::None => 0,
      TestOutcome::Fail => 1,
      TestOutcome::Pass => 2,
    }
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      TestOutcome::None => "NONE",
      TestOutcome::Fail => "FAIL",
      TestOutcome::Pass => "PASS",
    }
  }
}

/// Which production stage a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestStage {
  Module,
  Assembly,
}

impl TestStage {
  pub const fn from_param(param: i32) -> Option<Self> {
    match param {
      1 => Some(TestStage::Module),
      2 => Some(TestStage::Assembly),
      _ => None,
    }
  }
}

/// Production test result byte stored in NVM slot 0.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct TestResult {
  #[bits(2)]
  pub assy_count: u8,
  #[bits(2)]
  pub assy_result: TestOutcome,
  #[bits(2)]
  pub module_count: u8,
  #[bits(2)]
  pub module_result: TestOutcome,
}

impl TestResult {
  /// Decode a raw NVM word. An erased cell (`0xFF`) reads as no result.
  pub const fn from_nvm(word: u32) -> Self {
    let raw = (word & 0xFF) as u8;
    Self::from_bits(if raw == 0xFF { 0 } else { raw })
  }

  /// Store `outcome` for `stage` and bump its counter, saturating at 3.
  pub fn record(self, stage: TestStage, outcome: TestOutcome) -> Self {
    match stage {
      TestStage::Module => {
        let count = (self.module_count() + 1).min(3);
        self.with_module_result(outcome).with_module_count(count)
      }
      TestStage::Assembly => {
        let count = (self.assy_count() + 1).min(3);
        self.with_assy_result(outcome).with_assy_count(count)
      }
    }
  }

  /// `M:<result>, M:<count>, A:<result>, A:<count>`
  pub fn describe(&self) -> String {
    format!(
      "M:{}, M:{}, A:{}, A:{}",
      self.module_result().as_str(),
      self.module_count(),
      self.assy_result().as_str(),
      self.assy_count()
    )
  }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TestResult {
  fn format(&self, f: defmt::Formatter) {
    defmt::write!(f, "TestResult({=u8:#x})", self.into_bits())
  }
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  pub async fn read_test_result(&mut self) -> Result<TestResult, Error<E>> {
    let word = self.read_slot(nvm::TEST_RESULT).await?;
    Ok(TestResult::from_nvm(word))
  }

  /// Read-modify-write the test result byte.
  pub async fn record_test_result(&mut self, stage: TestStage, outcome: TestOutcome) -> Result<TestResult, Error<E>> {
    self.ensure_powered()?;
    let result = self.read_test_result().await?.record(stage, outcome);
    self.write_sec_info(nvm::TEST_RESULT, result.into_bits() as u32).await?;
    debug!("test result {:x}", result.into_bits());
    Ok(result)
  }
}
