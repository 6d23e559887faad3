use crate::geometry::{Channels, SensorGeometry};
use crate::reg::DEFAULT_I2C_ADDR;
use crate::tclm::TclmLevel;

/// Board-level driver configuration.
///
/// Everything here is fixed for a given panel and firmware build; none of it
/// is written to the controller.
///
/// # Example
/// ```no_run
/// use ist40xx::{Channels, Config, Keys, SensorGeometry, TclmLevel};
///
/// let geometry = SensorGeometry::new(Channels::new(18, 32), Channels::new(16, 30))
///   .with_swap_xy(true)
///   .with_keys(Keys { count: 2, tx: 31 })
///   .with_ground_tx(&[30]);
/// let config = Config::new(geometry)
///   .with_tclm_level(TclmLevel::Lockdown)
///   .with_miscal_spec(12);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  /// 7-bit I²C address.
  pub address: u8,
  pub geometry: SensorGeometry,
  pub tclm_level: TclmLevel,
  /// Polls (100 ms apart) to wait for a calibration result before retrying.
  pub calib_wait_count: u16,
  /// Full calibration attempts, each followed by a device reset on failure.
  pub calib_attempts: u8,
  /// Largest acceptable CP gap between calibration and mis-calibration.
  pub miscal_spec: u16,
  pub vendor: &'static str,
  pub chip_name: &'static str,
}

impl Config {
  pub fn new(geometry: SensorGeometry) -> Self {
    Self {
      address: DEFAULT_I2C_ADDR,
      geometry,
      tclm_level: TclmLevel::None,
      calib_wait_count: 30,
      calib_attempts: 1,
      miscal_spec: 10,
      vendor: "IMAGIS",
      chip_name: "IST40XX",
    }
  }

  pub fn with_address(mut self, address: u8) -> Self {
    self.address = address;
    self
  }

  pub fn with_tclm_level(mut self, level: TclmLevel) -> Self {
    self.tclm_level = level;
    self
  }

  /// Wait up to `polls * 100 ms` per calibration attempt, `attempts` times.
  pub fn with_calibration_budget(mut self, polls: u16, attempts: u8) -> Self {
    self.calib_wait_count = polls;
    self.calib_attempts = attempts.max(1);
    self
  }

  pub fn with_miscal_spec(mut self, spec: u16) -> Self {
    self.miscal_spec = spec;
    self
  }

  pub fn with_chip_strings(mut self, vendor: &'static str, chip_name: &'static str) -> Self {
    self.vendor = vendor;
    self.chip_name = chip_name;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new(SensorGeometry::new(Channels::default(), Channels::default()))
  }
}
