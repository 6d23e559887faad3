use heapless::String;

use crate::tclm::CalPosition;

/// Entries kept in the NVM history ring.
pub const CAL_HISTORY_QUEUE_MAX: usize = 6;
/// Entries shown by the short history rendering.
pub const CAL_HISTORY_QUEUE_SHORT_DISPLAY: usize = 3;

/// A past calibration: where it happened and how many times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HistoryEntry {
  pub position: CalPosition,
  pub count: u8,
}

impl HistoryEntry {
  /// NVM word: count in bits 16..24, position in bits 0..8.
  pub const fn pack(self) -> u32 {
    ((self.count as u32) << 16) | self.position as u32
  }

  pub const fn unpack(word: u32) -> Self {
    Self {
      position: match CalPosition::from_bits((word & 0xFF) as u8) {
        Some(p) => p,
        None => CalPosition::None,
      },
      count: ((word >> 16) & 0xFF) as u8,
    }
  }
}

/// Fixed-capacity ring of past calibrations.
///
/// `last` points at the newest entry. After `n` pushes the ring holds
/// `min(n, CAL_HISTORY_QUEUE_MAX)` entries and `last == (n - 1) % CAL_HISTORY_QUEUE_MAX`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryQueue {
  entries: [HistoryEntry; CAL_HISTORY_QUEUE_MAX],
  count: u8,
  last: u8,
}

impl HistoryQueue {
  pub const fn new() -> Self {
    Self { entries: [HistoryEntry { position: CalPosition::None, count: 0 }; CAL_HISTORY_QUEUE_MAX], count: 0, last: 0 }
  }

  /// Restore ring metadata read from NVM. Out-of-range values yield an empty ring.
  pub fn from_meta(count: u32, last: u32) -> Self {
    let mut queue = Self::new();
    if Self::meta_valid(count, last) {
      queue.count = count as u8;
      queue.last = last as u8;
    }
    queue
  }

  pub(crate) const fn meta_valid(count: u32, last: u32) -> bool {
    count <= CAL_HISTORY_QUEUE_MAX as u32 && last < CAL_HISTORY_QUEUE_MAX as u32
  }

  pub const fn len(&self) -> usize {
    self.count as usize
  }

  pub const fn is_empty(&self) -> bool {
    self.count == 0
  }

  pub const fn last_pointer(&self) -> u8 {
    self.last
  }

  pub fn clear(&mut self) {
    *self = Self::new();
  }

  /// Append an entry, overwriting the oldest when full. Returns the slot written.
  pub fn push(&mut self, entry: HistoryEntry) -> usize {
    self.last = if self.count == 0 || self.last as usize >= CAL_HISTORY_QUEUE_MAX - 1 { 0 } else { self.last + 1 };
    self.count = (self.count + 1).min(CAL_HISTORY_QUEUE_MAX as u8);
    self.entries[self.last as usize] = entry;
    self.last as usize
  }

  pub(crate) fn set_slot(&mut self, slot: usize, entry: HistoryEntry) {
    if let Some(e) = self.entries.get_mut(slot) {
      *e = entry;
    }
  }

  /// Entries newest first.
  pub fn recent(&self) -> impl Iterator<Item = HistoryEntry> + '_ {
    let last = self.last as usize;
    (0..self.len()).map(move |i| self.entries[(last + CAL_HISTORY_QUEUE_MAX - i) % CAL_HISTORY_QUEUE_MAX])
  }

  /// Every entry newest first as `<short name><count>` pairs, e.g. `F1T2`.
  pub fn render(&self) -> String<{ CAL_HISTORY_QUEUE_MAX * 2 }> {
    self.render_n(CAL_HISTORY_QUEUE_MAX)
  }

  /// The newest [`CAL_HISTORY_QUEUE_SHORT_DISPLAY`] entries.
  pub fn render_short(&self) -> String<{ CAL_HISTORY_QUEUE_MAX * 2 }> {
    self.render_n(CAL_HISTORY_QUEUE_SHORT_DISPLAY)
  }

  fn render_n(&self, n: usize) -> String<{ CAL_HISTORY_QUEUE_MAX * 2 }> {
    let mut out = String::new();
    for entry in self.recent().take(n) {
      _ = out.push(entry.position.short_name());
      _ = out.push(char::from_digit(entry.count as u32, 10).unwrap_or('+'));
    }
    out
  }
}
