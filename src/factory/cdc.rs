use alloc::format;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::{join, CommandResult, Factory, Params};
use crate::cmcs::CmcsSource;
use crate::node::{min_max, reduce, CpSource, NodeValues, Selection};
use crate::Error;

impl<I, E, RST, D, C> Factory<I, RST, D, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  /// Read a fresh CDC frame, cache it and reduce it.
  async fn fresh_cdc(&mut self, selection: Selection) -> Result<NodeValues, Error<E>> {
    let frame = self.dev.read_cdc_frame().await?;
    let values = reduce(&frame, self.dev.geometry(), selection)?;
    self.cache.cdc = Some(frame);
    Ok(values)
  }

  /// Reduce the cached CDC frame.
  fn cached_cdc(&self, selection: Selection) -> Option<NodeValues> {
    let frame = self.cache.cdc.as_ref()?;
    reduce(frame, self.dev.geometry(), selection).ok()
  }

  pub(super) async fn cp_array(&mut self, self_only: bool) -> CommandResult {
    let read = async {
      let frame = self.dev.read_cp_frame(CpSource::Calibrated).await?;
      let values = reduce(&frame, self.dev.geometry(), Selection::All)?;
      self.cache.cp = Some(frame);
      Ok::<_, Error<E>>(values)
    };
    match read.await {
      Ok(v) if self_only => CommandResult::ok(join(v.self_cap)),
      Ok(v) => CommandResult::ok(join(v.mutual)),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  pub(super) async fn run_cdc_read(&mut self) -> CommandResult {
    match self.fresh_cdc(Selection::Screen).await {
      Ok(v) => range(&v.mutual),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  pub(super) async fn run_self_cdc_read(&mut self) -> CommandResult {
    match self.fresh_cdc(Selection::All).await {
      Ok(v) => range(&v.self_cap),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  pub(super) async fn run_cdc_read_key(&mut self) -> CommandResult {
    match self.fresh_cdc(Selection::Keys).await {
      Ok(v) => CommandResult::ok(join(v.mutual)),
      Err(e) => CommandResult::from_error(&e),
    }
  }

  /// Screen CDC value at display `(x, y)` from the last read.
  pub(super) fn cdc_value(&self, p: Params<'_>) -> CommandResult {
    let Some(values) = self.cached_cdc(Selection::Screen) else {
      return CommandResult::ng();
    };
    match self.dev.geometry().screen_index(p.get(0), p.get(1)) {
      Ok(idx) => values.mutual.get(idx).map_or_else(CommandResult::ng, |v| CommandResult::ok(format!("{}", v))),
      Err(e) => {
        error!("cdc index out of range ({}, {})", e.x, e.y);
        CommandResult::ng()
      }
    }
  }

  /// Self CDC value at `idx` of the concatenated Tx then Rx self array,
  /// shifted by `offset`.
  pub(super) fn self_cdc_value(&self, idx: i32, offset: usize) -> CommandResult {
    let Some(values) = self.cached_cdc(Selection::All) else {
      return CommandResult::ng();
    };
    let Ok(idx) = usize::try_from(idx) else {
      return CommandResult::ng();
    };
    values.self_cap.get(idx + offset).map_or_else(CommandResult::ng, |v| CommandResult::ok(format!("{}", v)))
  }

  pub(super) fn rx_self_cdc_value(&self, p: Params<'_>) -> CommandResult {
    let ch = self.dev.geometry().channels;
    if p.get(1) < 0 || p.get(1) >= ch.rx as i32 {
      return CommandResult::ng();
    }
    self.self_cdc_value(p.get(1), ch.tx as usize)
  }

  pub(super) fn tx_self_cdc_value(&self, p: Params<'_>) -> CommandResult {
    let ch = self.dev.geometry().channels;
    if p.get(0) < 0 || p.get(0) >= ch.tx as i32 {
      return CommandResult::ng();
    }
    self.self_cdc_value(p.get(0), 0)
  }

  /// Fresh CDC dump. `screen_all_data` restricts the mutual array to the
  /// screen; `self_cap` dumps the self array instead.
  pub(super) async fn cdc_dump(&mut self, self_cap: bool, screen_all_data: bool) -> CommandResult {
    let selection = if screen_all_data { Selection::Screen } else { Selection::All };
    match self.fresh_cdc(selection).await {
      Ok(v) if self_cap => CommandResult::ok(join(v.self_cap)),
      Ok(v) => CommandResult::ok(join(v.mutual)),
      Err(e) => CommandResult::from_error(&e),
    }
  }
}

/// `min,max`, or `0,0` for an empty set.
fn range(values: &[u16]) -> CommandResult {
  let (min, max) = min_max(values).unwrap_or((0, 0));
  CommandResult::ok(format!("{},{}", min, max))
}
