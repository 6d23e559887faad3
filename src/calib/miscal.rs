//! Mis-calibration check: calibrate a second time with the firmware's
//! miscal routine and compare CP values against the regular calibration.

use alloc::vec::Vec;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::calib::CalibrationKind;
use crate::node::{reduce, CpSource, NodeValues, Selection};
use crate::{Error, Ist40xx};

/// Result byte reported to the test harness. Non-pass values name the stage
/// that failed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MiscalStatus {
  Pass = 0x00,
  CpReadFail = 0xF1,
  CpParseFail = 0xF2,
  MiscalFail = 0xF3,
  MiscalCpReadFail = 0xF4,
  MiscalParseFail = 0xF5,
  SpecOut = 0xFD,
}

impl MiscalStatus {
  pub const fn judge(max_gap: u16, spec: u16) -> Self {
    if max_gap > spec {
      MiscalStatus::SpecOut
    } else {
      MiscalStatus::Pass
    }
  }

  pub const fn code(self) -> u8 {
    self as u8
  }
}

/// Absolute CP differences, screen-compact mutual and full self. `max` is
/// taken over the mutual gaps; self gaps are kept for the dump only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MiscalGap {
  pub mutual: Vec<u16>,
  pub self_cap: Vec<u16>,
  pub max: u16,
}

impl MiscalGap {
  pub fn between(calibrated: &NodeValues, miscalibrated: &NodeValues) -> Self {
    let diff = |a: &[u16], b: &[u16]| a.iter().zip(b).map(|(x, y)| x.abs_diff(*y)).collect::<Vec<u16>>();
    let mutual = diff(&calibrated.mutual, &miscalibrated.mutual);
    let self_cap = diff(&calibrated.self_cap, &miscalibrated.self_cap);
    let max = mutual.iter().copied().max().unwrap_or(0);
    Self { mutual, self_cap, max }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiscalReport {
  pub status: MiscalStatus,
  pub max_gap: u16,
  pub gap: Option<MiscalGap>,
}

impl MiscalReport {
  fn failed(status: MiscalStatus) -> Self {
    Self { status, max_gap: 0, gap: None }
  }
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Run the mis-calibration check. Stage failures are folded into the
  /// report status; only a powered-off controller is an error.
  pub async fn run_miscalibration(&mut self) -> Result<MiscalReport, Error<E>> {
    self.ensure_powered()?;
    let geometry = self.config.geometry.clone();

    let calibrated = match self.read_cp_frame(CpSource::Calibrated).await {
      Ok(frame) => frame,
      Err(_) => {
        error!("miscal: calibrated CP read failed");
        return Ok(MiscalReport::failed(MiscalStatus::CpReadFail));
      }
    };
    let Ok(calibrated) = reduce(&calibrated, &geometry, Selection::Screen) else {
      error!("miscal: calibrated CP frame malformed");
      return Ok(MiscalReport::failed(MiscalStatus::CpParseFail));
    };

    let calibration = match self.reset().await {
      Ok(()) => self.run_calibration(CalibrationKind::Miscal).await,
      Err(e) => Err(e),
    };
    if calibration.is_err() {
      error!("miscal: calibration failed");
      self.resume().await?;
      return Ok(MiscalReport::failed(MiscalStatus::MiscalFail));
    }

    let miscalibrated = self.read_cp_frame(CpSource::Miscalibrated).await;
    self.resume().await?;

    let Ok(miscalibrated) = miscalibrated else {
      error!("miscal: CP read failed");
      return Ok(MiscalReport::failed(MiscalStatus::MiscalCpReadFail));
    };
    let Ok(miscalibrated) = reduce(&miscalibrated, &geometry, Selection::Screen) else {
      error!("miscal: CP frame malformed");
      return Ok(MiscalReport::failed(MiscalStatus::MiscalParseFail));
    };

    let gap = MiscalGap::between(&calibrated, &miscalibrated);
    let status = MiscalStatus::judge(gap.max, self.config.miscal_spec);
    info!("miscal max gap {}, spec {}, status {:x}", gap.max, self.config.miscal_spec, status.code());

    Ok(MiscalReport { status, max_gap: gap.max, gap: Some(gap) })
  }
}
