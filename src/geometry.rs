//! Sensor channel layout and node classification.
//!
//! Node storage is tx-major: the value for `(tx, rx)` lives at `tx * rx_count + rx`.

use heapless::Vec;

/// Maximum number of Tx rows that can be routed to ground.
pub const MAX_GROUND_TX: usize = 4;

/// Number of receive and transmit lines of a channel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channels {
  pub rx: u8,
  pub tx: u8,
}

impl Channels {
  pub const fn new(rx: u8, tx: u8) -> Self {
    Self { rx, tx }
  }

  /// Mutual-capacitance node count.
  pub const fn nodes(&self) -> usize {
    self.rx as usize * self.tx as usize
  }

  /// Self-capacitance node count (one per line).
  pub const fn self_nodes(&self) -> usize {
    self.rx as usize + self.tx as usize
  }
}

/// Touch keys sharing a single Tx row, placed right of the screen area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Keys {
  pub count: u8,
  pub tx: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelType {
  Unused,
  Screen,
  GroundTx,
  Key,
  /// Coordinates fall outside the channel grid.
  Unknown,
}

impl ChannelType {
  /// Nodes that contribute to CM statistics.
  pub const fn is_measured(self) -> bool {
    matches!(self, ChannelType::Screen | ChannelType::GroundTx)
  }

  /// Nodes whose values are reported rather than masked.
  pub const fn is_used(self) -> bool {
    !matches!(self, ChannelType::Unused | ChannelType::Unknown)
  }
}

/// Coordinates given to [`channel_index`] fall outside the addressed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoordinateOutOfRange {
  pub x: i32,
  pub y: i32,
}

/// Map display coordinates to a linear node index in a `width * height` grid.
///
/// With `swap` set, `x` runs along the height: valid when `x < height` and
/// `y < width`, index `y + x * width`. Otherwise `x < width`, `y < height`,
/// index `x + y * width`.
pub fn channel_index(x: i32, y: i32, width: usize, height: usize, swap: bool) -> Result<usize, CoordinateOutOfRange> {
  let err = CoordinateOutOfRange { x, y };
  let (ux, uy) = match (usize::try_from(x), usize::try_from(y)) {
    (Ok(ux), Ok(uy)) => (ux, uy),
    _ => return Err(err),
  };

  if swap {
    if ux < height && uy < width {
      return Ok(uy + ux * width);
    }
  } else if ux < width && uy < height {
    return Ok(ux + uy * width);
  }
  Err(err)
}

/// Physical description of the sensor panel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorGeometry {
  /// Full channel grid wired to the controller.
  pub channels: Channels,
  /// Sub-grid covering the active screen, anchored at (0, 0).
  pub screen: Channels,
  /// Display X runs along Tx instead of Rx.
  pub swap_xy: bool,
  pub keys: Keys,
  pub ground_tx: Vec<u8, MAX_GROUND_TX>,
}

impl SensorGeometry {
  pub fn new(channels: Channels, screen: Channels) -> Self {
    Self { channels, screen, swap_xy: false, keys: Keys::default(), ground_tx: Vec::new() }
  }

  pub fn with_swap_xy(mut self, swap: bool) -> Self {
    self.swap_xy = swap;
    self
  }

  pub fn with_keys(mut self, keys: Keys) -> Self {
    self.keys = keys;
    self
  }

  /// Rows beyond [`MAX_GROUND_TX`] are dropped.
  pub fn with_ground_tx(mut self, rows: &[u8]) -> Self {
    self.ground_tx.clear();
    for &row in rows.iter().take(MAX_GROUND_TX) {
      _ = self.ground_tx.push(row);
    }
    self
  }

  /// Classify the node at storage coordinates `(tx, rx)`.
  pub fn channel_type(&self, tx: usize, rx: usize) -> ChannelType {
    let ch = self.channels;
    let scr = self.screen;
    if tx >= ch.tx as usize || rx >= ch.rx as usize {
      return ChannelType::Unknown;
    }

    if tx < scr.tx as usize && rx < scr.rx as usize {
      return ChannelType::Screen;
    }

    if rx < scr.rx as usize && self.ground_tx.iter().any(|&g| g as usize == tx) {
      return ChannelType::GroundTx;
    }

    let key_start = scr.rx as usize;
    let key_end = key_start + self.keys.count as usize;
    if tx == self.keys.tx as usize && (key_start..key_end).contains(&rx) {
      return ChannelType::Key;
    }

    ChannelType::Unused
  }

  /// Classify a node addressed in display orientation.
  pub fn classify(&self, row: usize, col: usize) -> ChannelType {
    if self.swap_xy {
      self.channel_type(col, row)
    } else {
      self.channel_type(row, col)
    }
  }

  /// Classify the node at a tx-major linear index of the full grid.
  pub fn node_type(&self, index: usize) -> ChannelType {
    let rx = self.channels.rx as usize;
    if rx == 0 {
      return ChannelType::Unknown;
    }
    self.channel_type(index / rx, index % rx)
  }

  /// Node index inside the compacted screen array.
  pub fn screen_index(&self, x: i32, y: i32) -> Result<usize, CoordinateOutOfRange> {
    channel_index(x, y, self.screen.rx as usize, self.screen.tx as usize, self.swap_xy)
  }

  /// Node index inside the full channel array.
  pub fn grid_index(&self, x: i32, y: i32) -> Result<usize, CoordinateOutOfRange> {
    channel_index(x, y, self.channels.rx as usize, self.channels.tx as usize, self.swap_xy)
  }

  /// Screen nodes along display X.
  pub const fn x_count(&self) -> u8 {
    if self.swap_xy {
      self.screen.tx
    } else {
      self.screen.rx
    }
  }

  /// Screen nodes along display Y.
  pub const fn y_count(&self) -> u8 {
    if self.swap_xy {
      self.screen.rx
    } else {
      self.screen.tx
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn panel() -> SensorGeometry {
    SensorGeometry::new(Channels::new(6, 5), Channels::new(4, 3))
      .with_keys(Keys { count: 2, tx: 4 })
      .with_ground_tx(&[3])
  }

  #[test]
  fn index_unswapped_covers_grid() {
    let (w, h) = (4, 3);
    for y in 0..h as i32 {
      for x in 0..w as i32 {
        let idx = channel_index(x, y, w, h, false).unwrap();
        assert_eq!(idx, x as usize + y as usize * w);
        assert!(idx < w * h);
      }
    }
  }

  #[test]
  fn index_swapped_transposes() {
    let (w, h) = (4, 3);
    for x in 0..h as i32 {
      for y in 0..w as i32 {
        let idx = channel_index(x, y, w, h, true).unwrap();
        assert_eq!(idx, y as usize + x as usize * w);
        assert!(idx < w * h);
      }
    }
    assert!(channel_index(3, 0, w, h, true).is_err());
  }

  #[test]
  fn index_rejects_out_of_range() {
    assert_eq!(channel_index(4, 0, 4, 3, false), Err(CoordinateOutOfRange { x: 4, y: 0 }));
    assert!(channel_index(0, 3, 4, 3, false).is_err());
    assert!(channel_index(-1, 0, 4, 3, false).is_err());
    assert!(channel_index(0, -1, 4, 3, true).is_err());
  }

  #[test]
  fn classifies_regions() {
    let g = panel();
    assert_eq!(g.channel_type(0, 0), ChannelType::Screen);
    assert_eq!(g.channel_type(2, 3), ChannelType::Screen);
    assert_eq!(g.channel_type(3, 1), ChannelType::GroundTx);
    assert_eq!(g.channel_type(3, 4), ChannelType::Unused);
    assert_eq!(g.channel_type(4, 4), ChannelType::Key);
    assert_eq!(g.channel_type(4, 5), ChannelType::Key);
    assert_eq!(g.channel_type(4, 0), ChannelType::Unused);
    assert_eq!(g.channel_type(5, 0), ChannelType::Unknown);
    assert_eq!(g.channel_type(0, 6), ChannelType::Unknown);
  }

  #[test]
  fn classify_honours_swap() {
    let g = panel().with_swap_xy(true);
    assert_eq!(g.classify(4, 4), ChannelType::Key);
    assert_eq!(g.classify(1, 3), ChannelType::GroundTx);
    assert_eq!(g.classify(3, 1), ChannelType::Screen);
    assert_eq!(g.node_type(4 * 6 + 5), ChannelType::Key);
  }

  #[test]
  fn ground_rows_are_capped() {
    let g = panel().with_ground_tx(&[0, 1, 2, 3, 4, 5]);
    assert_eq!(g.ground_tx.len(), MAX_GROUND_TX);
  }
}
