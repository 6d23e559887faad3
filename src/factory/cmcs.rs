use alloc::format;
use alloc::vec::Vec;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::{join, CommandResult, Factory, Params};
use crate::cmcs::{CmcsBuffer, CmcsSource, CmcsTest};
use crate::geometry::SensorGeometry;

/// CMCS buffer addressed by the array dump commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CmcsArray {
  Cm,
  Slope0,
  Slope1,
  Cs,
}

impl CmcsArray {
  const fn test(self) -> CmcsTest {
    match self {
      CmcsArray::Cs => CmcsTest::Cs,
      _ => CmcsTest::Cm,
    }
  }

  /// CM and CS are masked to used nodes, slopes are dumped raw.
  fn select(self, buf: &CmcsBuffer, geometry: &SensorGeometry) -> Vec<u16> {
    match self {
      CmcsArray::Cm => CmcsBuffer::masked(&buf.cm, geometry),
      CmcsArray::Cs => CmcsBuffer::masked(&buf.cs, geometry),
      CmcsArray::Slope0 => buf.slope0.clone(),
      CmcsArray::Slope1 => buf.slope1.clone(),
    }
  }
}

impl<I, E, RST, D, C> Factory<I, RST, D, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  async fn run_cmcs(&mut self, test: CmcsTest) -> Result<CmcsBuffer, CommandResult> {
    if let Err(e) = self.dev.ensure_powered() {
      return Err(CommandResult::from_error(&e));
    }
    self.cmcs.run(test).await.map_err(|_| {
      error!("cmcs test {} failed", test as u8);
      CommandResult::ng()
    })
  }

  pub(super) async fn cmcs_all_data(&mut self, array: CmcsArray) -> CommandResult {
    let buf = match self.run_cmcs(array.test()).await {
      Ok(buf) => buf,
      Err(r) => return r,
    };
    let text = join(array.select(&buf, self.dev.geometry()));
    self.cache.cmcs = Some(buf);
    CommandResult::ok(text)
  }

  /// `min,max,avg` of CM over screen and ground nodes.
  pub(super) async fn run_cm_test(&mut self) -> CommandResult {
    let buf = match self.run_cmcs(CmcsTest::Cm).await {
      Ok(buf) => buf,
      Err(r) => return r,
    };
    let geometry = self.dev.geometry();
    let summary = buf.cm_summary(geometry);
    self.cache.cm_gaps = Some(buf.cm_gaps(geometry));
    self.cache.cmcs = Some(buf);
    CommandResult::ok(format!("{},{},{}", summary.min, summary.max, summary.avg))
  }

  pub(super) async fn run_cm_test_key(&mut self) -> CommandResult {
    let buf = match self.run_cmcs(CmcsTest::Cm).await {
      Ok(buf) => buf,
      Err(r) => return r,
    };
    let (first, second) = buf.key_cm(self.dev.geometry());
    self.cache.cmcs = Some(buf);
    CommandResult::ok(format!("{},{}", first, second))
  }

  pub(super) async fn run_jitter_read(&mut self) -> CommandResult {
    let buf = match self.run_cmcs(CmcsTest::CmJitter).await {
      Ok(buf) => buf,
      Err(r) => return r,
    };
    let (min, max) = buf.jitter_range(self.dev.geometry());
    self.cache.cmcs = Some(buf);
    CommandResult::ok(format!("{},{}", min, max))
  }

  pub(super) async fn run_cmcs_test(&mut self) -> CommandResult {
    let buf = match self.run_cmcs(CmcsTest::All).await {
      Ok(buf) => buf,
      Err(r) => return r,
    };
    self.cache.cm_gaps = Some(buf.cm_gaps(self.dev.geometry()));
    self.cache.cmcs = Some(buf);
    CommandResult::ok("OK")
  }

  /// CM (or CM jitter) at display `(x, y)` of the full grid.
  pub(super) fn cm_value(&self, p: Params<'_>, jitter: bool) -> CommandResult {
    let Some(buf) = self.cache.cmcs.as_ref() else {
      return CommandResult::ng();
    };
    let values = if jitter { &buf.cm_jit } else { &buf.cm };
    match self.dev.geometry().grid_index(p.get(0), p.get(1)) {
      Ok(idx) => values.get(idx).map_or_else(CommandResult::ng, |v| CommandResult::ok(format!("{}", v))),
      Err(_) => CommandResult::ng(),
    }
  }

  /// Largest Tx and Rx CM gap of the last CM test.
  pub(super) fn cm_maxgap(&self) -> CommandResult {
    match self.cache.cm_gaps.as_ref() {
      Some(gaps) => {
        let (tx, rx) = gaps.max();
        CommandResult::ok(format!("{},{}", tx, rx))
      }
      None => CommandResult::ng(),
    }
  }

  pub(super) fn cm_gap_value(&self, p: Params<'_>, tx: bool) -> CommandResult {
    let Some(gaps) = self.cache.cm_gaps.as_ref() else {
      return CommandResult::ng();
    };
    let values = if tx { &gaps.tx } else { &gaps.rx };
    match self.dev.geometry().grid_index(p.get(0), p.get(1)) {
      Ok(idx) => values.get(idx).map_or_else(CommandResult::ng, |v| CommandResult::ok(format!("{}", v))),
      Err(_) => CommandResult::ng(),
    }
  }

  pub(super) fn cmcs_array(&self, array: CmcsArray) -> CommandResult {
    match self.cache.cmcs.as_ref() {
      Some(buf) => CommandResult::ok(join(array.select(buf, self.dev.geometry()))),
      None => CommandResult::ng(),
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::cmcs::tests::{buffer, FixedCmcs};
  use crate::factory::tests::{factory, run};
  use crate::factory::{CommandStatus, Factory};
  use crate::geometry::Keys;
  use crate::mock;

  #[test]
  fn cm_test_reports_statistics() {
    let mut f = factory();
    assert_eq!(run(&mut f, "run_cm_test", &[]).text, "90,110,100");
    assert_eq!(run(&mut f, "get_cm_value", &[1, 0]).text, "110");
    assert_eq!(run(&mut f, "get_cm_value", &[0, 1]).text, "90");
    assert_eq!(run(&mut f, "get_cm_value", &[4, 0]).text, "NG");
    assert_eq!(run(&mut f, "get_cm_maxgap_value", &[]).text, "757,4900");
    assert_eq!(run(&mut f, "get_tx_cm_gap_value", &[0, 0]).text, "10");
    assert_eq!(run(&mut f, "get_rx_cm_gap_value", &[3, 0]).text, "0");
  }

  #[test]
  fn key_and_jitter() {
    let mut f = factory();
    assert_eq!(run(&mut f, "run_cm_test_key", &[]).text, "50,60");
    assert_eq!(run(&mut f, "run_jitter_read", &[]).text, "1,4");
    assert_eq!(run(&mut f, "get_jitter", &[0, 1]).text, "4");
  }

  #[test]
  fn key_test_answers_in_node_order() {
    let mut buf = buffer();
    buf.cm[10] = 60;
    buf.cm[11] = 50;
    let mut f = Factory::with_cmcs(mock::powered(), FixedCmcs(buf));
    let r = run(&mut f, "run_cm_test_key", &[]);
    assert_eq!(r.status, CommandStatus::Ok);
    assert_eq!(r.text, "60,50");
  }

  #[test]
  fn key_test_without_keys_is_zero() {
    let mut f = factory();
    f.dev.config.geometry.keys = Keys::default();
    let r = run(&mut f, "run_cm_test_key", &[]);
    assert_eq!(r.status, CommandStatus::Ok);
    assert_eq!(r.text, "0,0");
  }

  #[test]
  fn array_dumps_mask_unused_nodes() {
    let mut f = factory();
    assert_eq!(run(&mut f, "get_cm_array", &[]).text, "NG");
    assert_eq!(run(&mut f, "run_cmcs_test", &[]).text, "OK");
    assert_eq!(run(&mut f, "get_cm_array", &[]).text, "100,110,0,0,90,100,0,0,0,0,50,60");
    assert_eq!(run(&mut f, "get_cs1_array", &[]).text, "9,9,0,0,9,9,0,0,0,0,9,9");
    assert_eq!(run(&mut f, "get_slope0_array", &[]).text, "0,0,0,0,0,0,0,0,0,0,0,0");
    assert_eq!(run(&mut f, "get_cm_all_data", &[]).text, "100,110,0,0,90,100,0,0,0,0,50,60");
  }

  #[test]
  fn getters_need_a_run() {
    let mut f = factory();
    assert_eq!(run(&mut f, "get_cm_value", &[0, 0]).text, "NG");
    assert_eq!(run(&mut f, "get_cm_maxgap_value", &[]).text, "NG");
  }

  #[test]
  fn missing_engine_is_ng() {
    let mut f = Factory::new(mock::powered());
    let r = embassy_futures::block_on(f.invoke("run_cm_test", &[]));
    assert_eq!(r.status, CommandStatus::Fail);
    assert_eq!(r.text, "NG");
  }

  #[test]
  fn powered_off_skips_engine() {
    let mut f = factory();
    f.power_off().unwrap();
    assert_eq!(run(&mut f, "run_cmcs_test", &[]).text, "TSP turned off");
  }
}
