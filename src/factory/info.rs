use alloc::format;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::{CommandResult, Factory};
use crate::cmcs::CmcsSource;
use crate::reg::{Query, TouchStatus, EXCEPT_INTEGRITY, HIB_TOUCH_STATUS};
use crate::Error;

const MODE_NOISE: u8 = 1 << 0;
const MODE_WET: u8 = 1 << 1;

impl<I, E, RST, D, C> Factory<I, RST, D, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  pub(super) fn chip_vendor(&self) -> CommandResult {
    CommandResult::ok(self.dev.config().vendor)
  }

  pub(super) fn chip_name(&self) -> CommandResult {
    CommandResult::ok(self.dev.config().chip_name)
  }

  pub(super) fn config_ver(&self) -> CommandResult {
    let config = self.dev.config();
    CommandResult::ok(format!("{}_{}", config.vendor, config.chip_name))
  }

  pub(super) fn axis_count(&self, count: u8) -> CommandResult {
    CommandResult::ok(format!("{}", count))
  }

  pub(super) async fn chip_id(&mut self) -> CommandResult {
    if let Err(e) = self.dev.ensure_powered() {
      return CommandResult::from_error(&e);
    }
    match self.dev.chip_id().await {
      Ok(id) => CommandResult::ok(format!("{:#04x}", id & 0xFF)),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// `IM<version>`, followed by `(T<test version>)` for test builds.
  pub(super) async fn fw_ver_ic(&mut self) -> CommandResult {
    if let Err(e) = self.dev.ensure_powered() {
      return CommandResult::from_error(&e);
    }
    let version = match self.dev.fw_version().await {
      Ok(v) => v,
      Err(e) => return CommandResult::from_error(&e),
    };
    let mut text = format!("IM{:06X}", version & 0x00FF_FFFF);
    if let Ok(test) = self.dev.test_version().await {
      if test != 0 {
        text.push_str(&format!("(T{:X})", test));
      }
    }
    CommandResult::ok(text)
  }

  pub(super) async fn threshold(&mut self) -> CommandResult {
    if let Err(e) = self.dev.ensure_powered() {
      return CommandResult::from_error(&e);
    }
    match self.dev.touch_threshold().await {
      Ok(value) => CommandResult::ok(format!("{}", value)),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// Firmware CRC as `0x%06X`. NG while off or when the firmware reports
  /// no checksum.
  pub(super) async fn checksum_data(&mut self) -> CommandResult {
    if !self.dev.is_powered_on() {
      return CommandResult::ng();
    }
    match self.dev.fw_checksum().await {
      Ok(0) => {
        error!("firmware checksum is zero");
        CommandResult::ng()
      }
      Ok(crc) => CommandResult::ok(format!("0x{:06X}", crc)),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// Reset, check the firmware integrity word and report the checksum.
  pub(super) async fn fw_integrity(&mut self) -> CommandResult {
    if !self.dev.is_powered_on() {
      return CommandResult::ng();
    }

    let checked = self.integrity_checksum().await;
    if let Err(e) = self.dev.start().await {
      warn!("restart after integrity check failed");
      return CommandResult::from_error(&e);
    }

    match checked {
      Ok(Some(crc)) => CommandResult::ok(format!("{:08x}", crc)),
      Ok(None) => CommandResult::ng(),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  async fn integrity_checksum(&mut self) -> Result<Option<u32>, Error<E>> {
    self.dev.reset().await?;
    let integrity = self.dev.read_query(Query::FwIntegrity).await?;
    if integrity != EXCEPT_INTEGRITY {
      error!("fw integrity broken: {:x}", integrity);
      return Ok(None);
    }
    let crc = self.dev.fw_checksum().await?;
    Ok(Some(crc).filter(|&c| c != 0))
  }

  /// Decimal bitmask of the firmware's noise / wet modes. With `wet_only`
  /// the answer is just the wet flag.
  pub(super) async fn ic_mode(&mut self, wet_only: bool) -> CommandResult {
    if !self.dev.is_powered_on() {
      return CommandResult::ng();
    }
    let status = match self.dev.read_reg(HIB_TOUCH_STATUS).await {
      Ok(word) => TouchStatus::from_bits(word),
      Err(_) => return CommandResult::ng(),
    };
    if !status.is_valid() {
      error!("invalid touch status {:x}", status.into_bits());
      return CommandResult::ng();
    }

    let mode = if wet_only {
      status.wet() as u8
    } else {
      let mut mode = 0;
      if status.noise() {
        mode |= MODE_NOISE;
      }
      if status.wet() {
        mode |= MODE_WET;
      }
      mode
    };
    CommandResult::ok(format!("{}", mode))
  }
}

#[cfg(test)]
mod tests {
  use crate::factory::tests::{factory, run};
  use crate::factory::CommandStatus;
  use crate::reg::{Query, HIB_TOUCH_STATUS};

  #[test]
  fn identity_strings() {
    let mut f = factory();
    assert_eq!(run(&mut f, "get_chip_vendor", &[]).text, "IMAGIS");
    assert_eq!(run(&mut f, "get_chip_name", &[]).text, "IST40XX");
    assert_eq!(run(&mut f, "get_config_ver", &[]).text, "IMAGIS_IST40XX");
    assert_eq!(run(&mut f, "get_chip_id", &[]).text, "0x40");
    assert_eq!(run(&mut f, "get_x_num", &[]).text, "2");
    assert_eq!(run(&mut f, "get_all_x_num", &[]).text, "4");
    assert_eq!(run(&mut f, "get_all_y_num", &[]).text, "3");
  }

  #[test]
  fn firmware_version_and_checksum() {
    let mut f = factory();
    assert_eq!(run(&mut f, "get_fw_ver_ic", &[]).text, "IM123456");
    f.dev.i2c.mem.insert(Query::TestVersion as u32, 0x1A);
    assert_eq!(run(&mut f, "get_fw_ver_ic", &[]).text, "IM123456(T1A)");
    assert_eq!(run(&mut f, "get_checksum_data", &[]).text, "0xABCDEF");
    assert_eq!(run(&mut f, "get_threshold", &[]).text, "31");
  }

  #[test]
  fn zero_checksum_is_ng() {
    let mut f = factory();
    f.dev.i2c.mem.insert(Query::Crc32 as u32, 0);
    let r = run(&mut f, "get_checksum_data", &[]);
    assert_eq!(r.status, CommandStatus::Fail);
    assert_eq!(r.text, "NG");
  }

  #[test]
  fn integrity_reports_checksum() {
    let mut f = factory();
    let r = run(&mut f, "run_fw_integrity", &[]);
    assert_eq!(r.status, CommandStatus::Ok);
    assert_eq!(r.text, "00abcdef");

    f.dev.i2c.mem.insert(Query::FwIntegrity as u32, 0xDEAD_BEEF);
    assert_eq!(run(&mut f, "run_fw_integrity", &[]).text, "NG");
  }

  #[test]
  fn ic_modes() {
    let mut f = factory();
    assert_eq!(run(&mut f, "check_ic_mode", &[]).text, "0");
    f.dev.i2c.mem.insert(HIB_TOUCH_STATUS, 0x0000_0575);
    assert_eq!(run(&mut f, "check_ic_mode", &[]).text, "3");
    assert_eq!(run(&mut f, "get_wet_mode", &[]).text, "1");
    f.dev.i2c.mem.insert(HIB_TOUCH_STATUS, 0x0000_0500);
    assert_eq!(run(&mut f, "check_ic_mode", &[]).status, CommandStatus::Fail);
  }

  #[test]
  fn powered_off_answers_without_bus_traffic() {
    let mut f = factory();
    f.power_off().unwrap();
    let before = f.dev.i2c.transactions;
    assert_eq!(run(&mut f, "get_fw_ver_ic", &[]).text, "TSP turned off");
    assert_eq!(run(&mut f, "get_chip_id", &[]).text, "TSP turned off");
    assert_eq!(run(&mut f, "get_checksum_data", &[]).text, "NG");
    assert_eq!(run(&mut f, "check_ic_mode", &[]).text, "NG");
    assert_eq!(f.dev.i2c.transactions, before);
  }
}
