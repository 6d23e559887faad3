use alloc::vec;
use alloc::vec::Vec;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::reg::*;
use crate::{Error, Ist40xx};

impl<I, E, RST, D> Ist40xx<I, RST, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  /// Read one 32-bit word. The address goes out big-endian, the word comes back big-endian.
  pub(crate) async fn read_reg(&mut self, addr: u32) -> Result<u32, Error<E>> {
    let mut buf = [0u8; 4];
    self.i2c.write_read(self.config.address, &addr.to_be_bytes(), &mut buf).await.map_err(Error::I2c)?;
    Ok(u32::from_be_bytes(buf))
  }

  pub(crate) async fn write_reg(&mut self, addr: u32, value: u32) -> Result<(), Error<E>> {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&addr.to_be_bytes());
    buf[4..].copy_from_slice(&value.to_be_bytes());
    self.i2c.write(self.config.address, &buf).await.map_err(Error::I2c)
  }

  pub(crate) async fn read_query(&mut self, query: Query) -> Result<u32, Error<E>> {
    self.read_reg(query.into()).await
  }

  /// Read `words.len()` consecutive words starting at `addr`, split into
  /// transfers of at most [`MAX_BURST_WORDS`].
  pub(crate) async fn burst_read(&mut self, addr: u32, words: &mut [u32]) -> Result<(), Error<E>> {
    let mut raw = [0u8; MAX_BURST_WORDS * 4];
    for (i, chunk) in words.chunks_mut(MAX_BURST_WORDS).enumerate() {
      let chunk_addr = addr + (i * MAX_BURST_WORDS * 4) as u32;
      let bytes = &mut raw[..chunk.len() * 4];
      self.i2c.write_read(self.config.address, &chunk_addr.to_be_bytes(), bytes).await.map_err(Error::I2c)?;
      for (word, b) in chunk.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
      }
    }
    Ok(())
  }

  pub(crate) async fn command(&mut self, cmd: HostCommand, param: u16) -> Result<(), Error<E>> {
    trace!("cmd {:x} param {:x}", cmd as u16, param);
    self.write_reg(HIB_CMD, cmd.word(param)).await
  }

  /// Read `buf.len()` slots of the sec-info NVM area starting at `offset`.
  pub async fn read_sec_info(&mut self, offset: u8, buf: &mut [u32]) -> Result<(), Error<E>> {
    if buf.is_empty() || offset as usize + buf.len() > nvm::SLOTS {
      return Err(Error::OutOfRange);
    }
    self.command(HostCommand::SecInfoRead, ((buf.len() as u16) << 8) | offset as u16).await?;
    self.delay.delay_ms(SEC_INFO_MS).await;
    self.burst_read(HIB_SEC_INFO, buf).await
  }

  /// Write a single sec-info NVM slot.
  pub async fn write_sec_info(&mut self, offset: u8, value: u32) -> Result<(), Error<E>> {
    if offset as usize >= nvm::SLOTS {
      return Err(Error::OutOfRange);
    }
    self.command(HostCommand::SecInfoWrite, offset as u16).await?;
    self.write_reg(HIB_SEC_INFO, value).await?;
    self.delay.delay_ms(SEC_INFO_MS).await;
    Ok(())
  }

  pub(crate) async fn read_slot(&mut self, offset: u8) -> Result<u32, Error<E>> {
    let mut buf = [0u32; 1];
    self.read_sec_info(offset, &mut buf).await?;
    Ok(buf[0])
  }

  /// Latch one node frame on the controller and read it back in one pass.
  pub(crate) async fn read_node_words(&mut self, request: NodeRequest, addr: u32) -> Result<Vec<u32>, Error<E>> {
    let ch = self.config.geometry.channels;
    let mut words = vec![0u32; ch.nodes() + ch.self_nodes()];

    self.command(HostCommand::NodeRequest, request as u16).await?;
    self.delay.delay_ms(NODE_READY_MS).await;
    let read = self.burst_read(addr, &mut words).await;
    let release = self.command(HostCommand::NodeRequest, NodeRequest::Release as u16).await;
    read?;
    release?;

    Ok(words)
  }

  /// Pulse the reset line and wait for the firmware to boot.
  pub async fn reset(&mut self) -> Result<(), Error<E>> {
    debug!("reset");
    self.reset.set_low().map_err(|_| Error::Reset)?;
    self.delay.delay_ms(RESET_HOLD_MS).await;
    self.reset.set_high().map_err(|_| Error::Reset)?;
    self.delay.delay_ms(RESET_SETTLE_MS).await;
    Ok(())
  }

  /// Let the firmware resume scanning and reporting.
  pub async fn start(&mut self) -> Result<(), Error<E>> {
    self.command(HostCommand::FwStart, 1).await
  }

  /// Reset, restart scanning and re-enable interrupts. Used after any test that
  /// leaves the firmware in a special mode.
  pub(crate) async fn resume(&mut self) -> Result<(), Error<E>> {
    self.disable_irq();
    self.reset().await?;
    self.start().await?;
    self.enable_irq();
    Ok(())
  }
}
