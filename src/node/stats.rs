use alloc::vec::Vec;

use crate::geometry::{Channels, ChannelType, SensorGeometry};

/// Min, max and integer mean over a set of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Summary {
  pub min: u16,
  pub max: u16,
  pub avg: u16,
}

pub fn min_max(values: &[u16]) -> Option<(u16, u16)> {
  let (&first, rest) = values.split_first()?;
  Some(rest.iter().fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))))
}

/// Summarize the full-grid `values` whose node type passes `filter`.
///
/// Min and max are seeded from the first qualifying node. With no qualifying
/// node every field is zero.
pub fn summarize(values: &[u16], geometry: &SensorGeometry, filter: impl Fn(ChannelType) -> bool) -> Summary {
  let mut picked = values.iter().enumerate().filter(|(i, _)| filter(geometry.node_type(*i))).map(|(_, &v)| v);

  let Some(first) = picked.next() else {
    return Summary::default();
  };

  let (mut min, mut max, mut sum, mut count) = (first, first, first as u32, 1u32);
  for v in picked {
    min = min.min(v);
    max = max.max(v);
    sum += v as u32;
    count += 1;
  }
  Summary { min, max, avg: (sum / count) as u16 }
}

/// CM statistics over screen and ground nodes.
pub fn cm_summary(values: &[u16], geometry: &SensorGeometry) -> Summary {
  summarize(values, geometry, ChannelType::is_measured)
}

/// `round(100 * |a - b| / a)`, saturating at `u16::MAX`; zero when `a` is zero.
pub const fn percent_gap(a: u16, b: u16) -> u16 {
  if a == 0 {
    return 0;
  }
  let diff = a.abs_diff(b) as u32 * 100;
  let a = a as u32;
  let gap = (diff + a / 2) / a;
  if gap > u16::MAX as u32 {
    u16::MAX
  } else {
    gap as u16
  }
}

/// Direction along which neighbouring nodes are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapAxis {
  /// Node against the node one Tx row further (`i + rx`).
  Tx,
  /// Node against the next Rx node on the same row; the last column is skipped.
  Rx,
}

/// Percent gaps over a full tx-major grid. Nodes without a neighbour read 0.
pub fn gap_map(values: &[u16], channels: Channels, axis: GapAxis) -> Vec<u16> {
  let (rx, tx) = (channels.rx as usize, channels.tx as usize);
  let mut out = alloc::vec![0u16; values.len()];

  for (i, slot) in out.iter_mut().enumerate() {
    let (row, col) = (i / rx.max(1), i % rx.max(1));
    let next = match axis {
      GapAxis::Tx if row + 1 < tx => i + rx,
      GapAxis::Rx if col + 1 < rx => i + 1,
      _ => continue,
    };
    if let (Some(&a), Some(&b)) = (values.get(i), values.get(next)) {
      *slot = percent_gap(a, b);
    }
  }
  out
}
