use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::cmcs::{CmcsSource, NoCmcs};
use crate::factory::{CommandResult, Factory};

/// [`Factory`] behind a device-wide async lock, so that harness commands from
/// several tasks never interleave on the bus.
///
/// ```ignore
/// static TSP: SharedFactory<CriticalSectionRawMutex, Bus, Pin, Delay> = SharedFactory::new(...);
/// let result = TSP.invoke("get_pat_information", &[]).await;
/// ```
pub struct SharedFactory<M: RawMutex, I, RST, D, C = NoCmcs> {
  inner: Mutex<M, Factory<I, RST, D, C>>,
}

impl<M: RawMutex, I, RST, D, C> SharedFactory<M, I, RST, D, C> {
  pub const fn new(factory: Factory<I, RST, D, C>) -> Self {
    Self { inner: Mutex::new(factory) }
  }

  /// Exclusive access for sequences of calls, e.g. power management around
  /// a batch of commands.
  pub async fn lock(&self) -> MutexGuard<'_, M, Factory<I, RST, D, C>> {
    self.inner.lock().await
  }

  pub fn into_inner(self) -> Factory<I, RST, D, C> {
    self.inner.into_inner()
  }
}

impl<M, I, E, RST, D, C> SharedFactory<M, I, RST, D, C>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  pub async fn invoke(&self, name: &str, params: &[i32]) -> CommandResult {
    self.inner.lock().await.invoke(name, params).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::factory::tests::factory;
  use crate::factory::CommandStatus;
  use embassy_futures::block_on;
  use embassy_sync::blocking_mutex::raw::NoopRawMutex;

  #[test]
  fn invokes_through_the_lock() {
    let shared: SharedFactory<NoopRawMutex, _, _, _, _> = SharedFactory::new(factory());
    assert_eq!(block_on(shared.invoke("get_chip_name", &[])).text, "IST40XX");

    block_on(async {
      let mut f = shared.lock().await;
      f.power_off().unwrap();
    });
    let r = block_on(shared.invoke("run_cdc_read", &[]));
    assert_eq!(r.text, "TSP turned off");
    assert_eq!(shared.into_inner().status(), CommandStatus::Fail);
  }
}
