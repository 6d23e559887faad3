//! Raw node frames and their reduction to mutual / self / key arrays.

use alloc::vec::Vec;

use crate::geometry::SensorGeometry;

mod read;
mod stats;

pub use read::*;
pub use stats::*;

/// One frame of raw node data as produced by the controller.
///
/// Layout: `rx * tx` mutual values (tx-major), then `tx` Tx self values, then
/// `rx` Rx self values. Only the low 16 bits of every word carry data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeFrame {
  values: Vec<u16>,
}

impl NodeFrame {
  pub fn new(values: Vec<u16>) -> Self {
    Self { values }
  }

  pub fn from_words(words: &[u32]) -> Self {
    Self { values: words.iter().map(|&w| (w & 0xFFFF) as u16).collect() }
  }

  pub fn as_slice(&self) -> &[u16] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Frame length did not match `rx * tx + rx + tx` for the configured grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength {
  pub expected: usize,
  pub actual: usize,
}

/// Which mutual nodes a reduction keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Selection {
  /// Full channel grid, tx-major.
  All,
  /// Screen sub-grid compacted to `screen.tx * screen.rx`.
  Screen,
  /// Key nodes only.
  Keys,
}

/// Reduced node data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeValues {
  pub mutual: Vec<u16>,
  /// `tx` Tx self values followed by `rx` Rx self values.
  pub self_cap: Vec<u16>,
}

impl NodeValues {
  /// Self value of Rx line `rx`.
  pub fn rx_self(&self, geometry: &SensorGeometry, rx: usize) -> Option<u16> {
    self.self_cap.get(geometry.channels.tx as usize + rx).copied()
  }

  /// Self value of Tx line `tx`.
  pub fn tx_self(&self, tx: usize) -> Option<u16> {
    self.self_cap.get(tx).copied()
  }
}

/// Split a frame into mutual and self arrays.
pub fn reduce(frame: &NodeFrame, geometry: &SensorGeometry, selection: Selection) -> Result<NodeValues, InvalidLength> {
  let ch = geometry.channels;
  let expected = ch.nodes() + ch.self_nodes();
  if frame.len() != expected {
    return Err(InvalidLength { expected, actual: frame.len() });
  }

  let (mutual_raw, self_raw) = frame.as_slice().split_at(ch.nodes());
  let rx = ch.rx as usize;

  let mutual = match selection {
    Selection::All => mutual_raw.to_vec(),
    Selection::Screen => {
      let scr = geometry.screen;
      mutual_raw
        .chunks(rx)
        .take(scr.tx as usize)
        .flat_map(|row| row.iter().take(scr.rx as usize).copied())
        .collect()
    }
    Selection::Keys => {
      let keys = geometry.keys;
      let start = keys.tx as usize * rx + geometry.screen.rx as usize;
      (start..start + keys.count as usize).filter_map(|i| mutual_raw.get(i).copied()).collect()
    }
  };

  Ok(NodeValues { mutual, self_cap: self_raw.to_vec() })
}

/// Zero out nodes that are neither screen, ground, nor key.
pub fn mask_unused(values: &[u16], geometry: &SensorGeometry) -> Vec<u16> {
  values.iter().enumerate().map(|(i, &v)| if geometry.node_type(i).is_used() { v } else { 0 }).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::{Channels, Keys};
  use alloc::vec;

  fn panel() -> SensorGeometry {
    SensorGeometry::new(Channels::new(4, 3), Channels::new(3, 2)).with_keys(Keys { count: 1, tx: 2 })
  }

  fn frame() -> NodeFrame {
    // 12 mutual values 0..12, then 3 tx self (100..) and 4 rx self (200..)
    let mut words: Vec<u32> = (0..12).map(|v| 0xABCD_0000 | v).collect();
    words.extend([100, 101, 102, 200, 201, 202, 203]);
    NodeFrame::from_words(&words)
  }

  #[test]
  fn keeps_low_half_of_words() {
    assert_eq!(frame().as_slice()[1], 1);
  }

  #[test]
  fn rejects_wrong_length() {
    let short = NodeFrame::new(vec![0; 10]);
    assert_eq!(reduce(&short, &panel(), Selection::All), Err(InvalidLength { expected: 19, actual: 10 }));
  }

  #[test]
  fn reduces_screen_and_keys() {
    let g = panel();
    let all = reduce(&frame(), &g, Selection::All).unwrap();
    assert_eq!(all.mutual.len(), 12);

    let screen = reduce(&frame(), &g, Selection::Screen).unwrap();
    assert_eq!(screen.mutual, vec![0, 1, 2, 4, 5, 6]);
    assert_eq!(screen.tx_self(1), Some(101));
    assert_eq!(screen.rx_self(&g, 0), Some(200));

    let keys = reduce(&frame(), &g, Selection::Keys).unwrap();
    assert_eq!(keys.mutual, vec![11]);
  }

  #[test]
  fn masks_unused_nodes() {
    let g = panel();
    let values: Vec<u16> = (1..=12).collect();
    // tx 2 holds only the key at rx 3, tx 0..2 rx 3 are unused
    assert_eq!(mask_unused(&values, &g), vec![1, 2, 3, 0, 5, 6, 7, 0, 0, 0, 0, 12]);
  }
}
