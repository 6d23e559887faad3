use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::node::NodeFrame;
use crate::reg::{NodeRequest, CAL_CP_FRAME_ADDR, CDC_FRAME_ADDR, MISCAL_CP_FRAME_ADDR};
use crate::{Error, Ist40xx};

/// Which calibration produced the CP frame being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CpSource {
  Calibrated,
  Miscalibrated,
}

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Read one frame of live CDC data.
  pub async fn read_cdc_frame(&mut self) -> Result<NodeFrame, Error<E>> {
    self.ensure_powered()?;
    let words = self.read_node_words(NodeRequest::Cdc, CDC_FRAME_ADDR).await?;
    Ok(NodeFrame::from_words(&words))
  }

  /// Read the CP values left behind by a calibration run.
  pub async fn read_cp_frame(&mut self, source: CpSource) -> Result<NodeFrame, Error<E>> {
    self.ensure_powered()?;
    let (request, addr) = match source {
      CpSource::Calibrated => (NodeRequest::CalibratedCp, CAL_CP_FRAME_ADDR),
      CpSource::Miscalibrated => (NodeRequest::MiscalibratedCp, MISCAL_CP_FRAME_ADDR),
    };
    let words = self.read_node_words(request, addr).await?;
    Ok(NodeFrame::from_words(&words))
  }
}
