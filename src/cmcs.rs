//! CM/CS production tests. The test engine itself is opaque: firmware images
//! ship their own CMCS binary, so the driver only consumes its buffers.

use alloc::vec::Vec;

use crate::geometry::{ChannelType, SensorGeometry};
use crate::node::{cm_summary, gap_map, mask_unused, summarize, GapAxis, Summary};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CmcsTest {
  Cm,
  CmJitter,
  Cs,
  /// Every test the engine supports.
  All,
}

/// Node buffers produced by a CMCS run. Each array covers the full channel
/// grid, tx-major.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmcsBuffer {
  pub cm: Vec<u16>,
  pub cm_jit: Vec<u16>,
  pub cs: Vec<u16>,
  pub slope0: Vec<u16>,
  pub slope1: Vec<u16>,
}

/// The CMCS engine failed or is not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CmcsError;

/// Runs a CMCS test and hands back its buffers.
#[allow(async_fn_in_trait)]
pub trait CmcsSource {
  async fn run(&mut self, test: CmcsTest) -> Result<CmcsBuffer, CmcsError>;
}

/// Placeholder source for boards without a CMCS binary; every run fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCmcs;

impl CmcsSource for NoCmcs {
  async fn run(&mut self, _test: CmcsTest) -> Result<CmcsBuffer, CmcsError> {
    Err(CmcsError)
  }
}

/// Tx/Rx percent gaps of the CM buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmGaps {
  pub tx: Vec<u16>,
  pub rx: Vec<u16>,
}

impl CmGaps {
  /// Largest Tx gap and largest Rx gap.
  pub fn max(&self) -> (u16, u16) {
    (self.tx.iter().copied().max().unwrap_or(0), self.rx.iter().copied().max().unwrap_or(0))
  }
}

impl CmcsBuffer {
  pub fn cm_summary(&self, geometry: &SensorGeometry) -> Summary {
    cm_summary(&self.cm, geometry)
  }

  /// CM of the first two key nodes in node order; a missing key reads 0.
  pub fn key_cm(&self, geometry: &SensorGeometry) -> (u16, u16) {
    let rx = geometry.channels.rx as usize;
    let start = geometry.keys.tx as usize * rx + geometry.screen.rx as usize;
    let key = |i: usize| {
      if i < geometry.keys.count as usize {
        self.cm.get(start + i).copied().unwrap_or(0)
      } else {
        0
      }
    };
    (key(0), key(1))
  }

  /// Jitter min/max over screen and ground nodes.
  pub fn jitter_range(&self, geometry: &SensorGeometry) -> (u16, u16) {
    let s = summarize(&self.cm_jit, geometry, ChannelType::is_measured);
    (s.min, s.max)
  }

  pub fn cm_gaps(&self, geometry: &SensorGeometry) -> CmGaps {
    CmGaps { tx: gap_map(&self.cm, geometry.channels, GapAxis::Tx), rx: gap_map(&self.cm, geometry.channels, GapAxis::Rx) }
  }

  pub fn masked(values: &[u16], geometry: &SensorGeometry) -> Vec<u16> {
    mask_unused(values, geometry)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::mock;
  use alloc::vec;

  /// Serves a fixed buffer for every test.
  pub(crate) struct FixedCmcs(pub CmcsBuffer);

  impl CmcsSource for FixedCmcs {
    async fn run(&mut self, _test: CmcsTest) -> Result<CmcsBuffer, CmcsError> {
      Ok(self.0.clone())
    }
  }

  pub(crate) fn buffer() -> CmcsBuffer {
    // 4x3 grid: screen (0..2, 0..2), keys at tx 2 rx 2..4
    CmcsBuffer {
      cm: vec![100, 110, 7, 7, 90, 100, 7, 7, 1, 1, 50, 60],
      cm_jit: vec![3, 1, 0, 0, 4, 2, 0, 0, 0, 0, 5, 0],
      cs: vec![9; 12],
      slope0: vec![0; 12],
      slope1: vec![0; 12],
    }
  }

  #[test]
  fn cm_statistics() {
    let g = mock::geometry();
    let b = buffer();
    assert_eq!(b.cm_summary(&g), Summary { min: 90, max: 110, avg: 100 });
    assert_eq!(b.key_cm(&g), (50, 60));
    assert_eq!(b.jitter_range(&g), (1, 4));
  }

  #[test]
  fn key_cm_keeps_node_order() {
    let mut g = mock::geometry();
    let mut b = buffer();
    b.cm[10] = 60;
    b.cm[11] = 50;
    assert_eq!(b.key_cm(&g), (60, 50));

    g.keys.count = 1;
    assert_eq!(b.key_cm(&g), (60, 0));
    g.keys.count = 0;
    assert_eq!(b.key_cm(&g), (0, 0));
  }

  #[test]
  fn masking_hides_unused_nodes() {
    let g = mock::geometry();
    let masked = CmcsBuffer::masked(&buffer().cm, &g);
    assert_eq!(masked, vec![100, 110, 0, 0, 90, 100, 0, 0, 0, 0, 50, 60]);
  }

  #[test]
  fn gaps_cover_grid() {
    let g = mock::geometry();
    let gaps = buffer().cm_gaps(&g);
    assert_eq!(gaps.tx.len(), 12);
    assert_eq!(gaps.tx[0], 10);
    assert_eq!(gaps.rx[0], 10);
    assert_eq!(gaps.rx[3], 0);
    assert_eq!(gaps.max(), (757, 4900));
  }
}
