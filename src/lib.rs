#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` factory self-test and calibration driver for the Imagis
//! IST40xx family of capacitive touch controllers.
//!
//! The crate covers the production-line side of the controller rather than
//! touch reporting:
//!
//! - Running the firmware's force calibration and judging the result
//! - Mis-calibration checks that compare CP data across two calibrations
//! - Raw CDC / CP node acquisition and reduction to screen and key arrays
//! - Calibration tracking in on-chip NVM (TCLM): position, count, history
//! - A string-keyed factory command table with the classic `OK` / `NG` /
//!   `NA` replies a test harness expects
//!
//! The driver builds on the `embedded-hal` / `embedded-hal-async` 1.0 traits.
//!
//! ```no_run
//! use embedded_hal::digital::OutputPin;
//! use embedded_hal_async::{delay::DelayNs, i2c::{I2c, SevenBitAddress}};
//! use ist40xx::{Channels, Config, Factory, Ist40xx, SensorGeometry};
//!
//! async fn example<I2C, RST, D, E>(i2c: I2C, rst: RST, delay: D) -> Result<(), ist40xx::Error<E>>
//! where
//!   I2C: I2c<SevenBitAddress, Error = E>,
//!   RST: OutputPin,
//!   D: DelayNs,
//! {
//!   let geometry = SensorGeometry::new(Channels::new(18, 32), Channels::new(16, 30));
//!   let mut device = Ist40xx::new(i2c, rst, delay, Config::new(geometry));
//!   device.power_on().await?;
//!
//!   let mut factory = Factory::new(device);
//!   let reply = factory.invoke("run_force_calibration", &[0]).await;
//!   assert_eq!(reply.text.as_str(), "OK");
//!   Ok(())
//! }
//! ```
extern crate alloc;

mod fmt;

mod calib;
mod cmcs;
mod config;
mod factory;
mod geometry;
#[cfg(test)]
mod mock;
mod node;
mod reg;
mod rw;
mod shared;
mod tclm;
mod test_result;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

pub use calib::*;
pub use cmcs::*;
pub use config::*;
pub use factory::*;
pub use geometry::*;
pub use node::*;
pub use shared::*;
pub use tclm::*;
pub use test_result::*;

/// Errors that can occur while interacting with the controller.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// I²C bus transaction failed with the underlying driver error.
  I2c(E),
  /// The reset line could not be driven.
  Reset,
  /// The firmware answered with a word that makes no sense for the request.
  Protocol,
  /// A node frame did not match the configured channel grid.
  InvalidLength { expected: usize, actual: usize },
  /// The controller is powered off.
  PoweredOff,
  /// NVM calibration metadata could not be trusted.
  NvmCorrupted,
  /// No calibration result was posted within the wait budget.
  CalibrationTimeout,
  /// Calibration finished but the firmware reported a failure status.
  CalibrationRejected { self_status: u8, mutual_status: u8 },
  /// The TCLM policy does not allow recalibration from this origin.
  Ineligible,
  /// Coordinate or NVM slot out of range.
  OutOfRange,
  /// A result was requested before the producing test ran.
  NoData,
  /// The CM/CS test source failed.
  Cmcs,
}

impl<E> From<CoordinateOutOfRange> for Error<E> {
  fn from(_: CoordinateOutOfRange) -> Self {
    Error::OutOfRange
  }
}

impl<E> From<InvalidLength> for Error<E> {
  fn from(e: InvalidLength) -> Self {
    Error::InvalidLength { expected: e.expected, actual: e.actual }
  }
}

/// Controller power state as tracked by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
  Off,
  On,
  LowPower,
}

/// Low-level IST40xx driver.
///
/// Owns the I²C bus, the reset line and a delay source. Everything that needs
/// the controller, from NVM access to calibration, is a method on this type;
/// [`Factory`] layers the string command table on top.
pub struct Ist40xx<I, RST, D> {
  i2c: I,
  reset: RST,
  delay: D,
  config: Config,
  power: PowerState,
  irq_enabled: bool,
  touches: u8,
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Create a driver instance. The controller is assumed to be off until
  /// [`Ist40xx::power_on`] is called.
  pub fn new(i2c: I, reset: RST, delay: D, config: Config) -> Self {
    Self { i2c, reset, delay, config, power: PowerState::Off, irq_enabled: false, touches: 0 }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn geometry(&self) -> &SensorGeometry {
    &self.config.geometry
  }

  pub fn power_state(&self) -> PowerState {
    self.power
  }

  /// Fully on. Low-power mode does not accept test commands.
  pub fn is_powered_on(&self) -> bool {
    self.power == PowerState::On
  }

  /// Reset the controller, start scanning and enable interrupts.
  pub async fn power_on(&mut self) -> Result<(), Error<E>> {
    self.reset().await?;
    self.start().await?;
    self.power = PowerState::On;
    self.enable_irq();
    info!("power on");
    Ok(())
  }

  /// Hold the controller in reset. No bus traffic is issued.
  pub fn power_off(&mut self) -> Result<(), Error<E>> {
    self.disable_irq();
    self.reset.set_low().map_err(|_| Error::Reset)?;
    self.power = PowerState::Off;
    self.touches = 0;
    info!("power off");
    Ok(())
  }

  pub fn set_low_power(&mut self, low_power: bool) {
    if self.power != PowerState::Off {
      self.power = if low_power { PowerState::LowPower } else { PowerState::On };
    }
  }

  /// Record the number of fingers currently reported by the touch path.
  pub fn set_active_touches(&mut self, touches: u8) {
    self.touches = touches;
  }

  pub fn active_touches(&self) -> u8 {
    self.touches
  }

  pub fn irq_enabled(&self) -> bool {
    self.irq_enabled
  }

  pub(crate) fn enable_irq(&mut self) {
    self.irq_enabled = true;
  }

  pub(crate) fn disable_irq(&mut self) {
    self.irq_enabled = false;
  }

  pub(crate) fn ensure_powered(&self) -> Result<(), Error<E>> {
    if self.is_powered_on() {
      Ok(())
    } else {
      Err(Error::PoweredOff)
    }
  }

  pub async fn fw_version(&mut self) -> Result<u32, Error<E>> {
    self.read_query(reg::Query::FwVersion).await
  }

  pub async fn test_version(&mut self) -> Result<u32, Error<E>> {
    self.read_query(reg::Query::TestVersion).await
  }

  /// CRC32 of the running firmware image.
  pub async fn fw_checksum(&mut self) -> Result<u32, Error<E>> {
    self.read_query(reg::Query::Crc32).await
  }

  pub async fn touch_threshold(&mut self) -> Result<u16, Error<E>> {
    Ok((self.read_query(reg::Query::TouchThreshold).await? & 0xFFFF) as u16)
  }

  pub async fn chip_id(&mut self) -> Result<u32, Error<E>> {
    self.read_query(reg::Query::ChipId).await
  }

  /// Give back the owned peripherals.
  pub fn release(self) -> (I, RST, D) {
    (self.i2c, self.reset, self.delay)
  }
}
