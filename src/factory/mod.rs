//! String-keyed factory command table on top of [`Ist40xx`].
//!
//! Every command answers with a short text and a [`CommandStatus`]; errors
//! never cross this boundary.

use alloc::string::String;
use core::fmt::Write as _;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::calib::MiscalGap;
use crate::cmcs::{CmGaps, CmcsBuffer, CmcsSource, NoCmcs};
use crate::node::NodeFrame;
use crate::tclm::CalPosition;
use crate::{Error, Ist40xx};

mod calibration;
mod cdc;
mod cmcs;
mod info;

pub use cmcs::CmcsArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
  Waiting,
  Running,
  Ok,
  Fail,
  NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
  pub status: CommandStatus,
  pub text: String,
}

impl CommandResult {
  pub fn ok(text: impl Into<String>) -> Self {
    Self { status: CommandStatus::Ok, text: text.into() }
  }

  pub fn fail(text: impl Into<String>) -> Self {
    Self { status: CommandStatus::Fail, text: text.into() }
  }

  pub fn ng() -> Self {
    Self::fail("NG")
  }

  pub fn not_applicable() -> Self {
    Self { status: CommandStatus::NotApplicable, text: String::from("NA") }
  }

  pub fn powered_off() -> Self {
    Self::fail("TSP turned off")
  }

  pub(crate) fn from_error<E>(err: &Error<E>) -> Self {
    match err {
      Error::PoweredOff => Self::powered_off(),
      _ => Self::ng(),
    }
  }
}

/// Every command the table knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
  GetChipVendor,
  GetChipName,
  GetChipId,
  GetFwVerIc,
  GetConfigVer,
  GetThreshold,
  GetChecksumData,
  RunFwIntegrity,
  GetXNum,
  GetYNum,
  GetAllXNum,
  GetAllYNum,
  GetCpArray,
  GetSelfCpArray,
  RunCdcRead,
  RunSelfCdcRead,
  RunCdcReadKey,
  GetCdcValue,
  GetSelfCdcValue,
  GetRxSelfCdcValue,
  GetTxSelfCdcValue,
  GetCdcAllData,
  GetSelfCdcAllData,
  GetCdcArray,
  GetSelfCdcArray,
  RunCmcsAllData(CmcsArray),
  RunCmTest,
  GetCmValue,
  GetCmMaxgapValue,
  GetTxCmGapValue,
  GetRxCmGapValue,
  RunCmTestKey,
  RunJitterRead,
  GetJitter,
  RunCmcsTest,
  GetCmcsArray(CmcsArray),
  RunForceCalibration,
  GetForceCalibration,
  RunMisCalRead,
  GetMisCal,
  SetExternalFactory,
  GetPatInformation,
  GetTspTestResult,
  SetTspTestResult,
  IumRead,
  CheckIcMode,
  GetWetMode,
  NotSupported,
}

const COMMANDS: &[(&str, Command)] = &[
  ("get_chip_vendor", Command::GetChipVendor),
  ("get_chip_name", Command::GetChipName),
  ("get_chip_id", Command::GetChipId),
  ("get_fw_ver_ic", Command::GetFwVerIc),
  ("get_config_ver", Command::GetConfigVer),
  ("get_threshold", Command::GetThreshold),
  ("get_checksum_data", Command::GetChecksumData),
  ("get_fw_integrity", Command::GetChecksumData),
  ("run_fw_integrity", Command::RunFwIntegrity),
  ("get_x_num", Command::GetXNum),
  ("get_y_num", Command::GetYNum),
  ("get_all_x_num", Command::GetAllXNum),
  ("get_all_y_num", Command::GetAllYNum),
  ("get_cp_array", Command::GetCpArray),
  ("get_self_cp_array", Command::GetSelfCpArray),
  ("run_reference_read", Command::RunCdcRead),
  ("get_reference", Command::GetCdcValue),
  ("run_self_reference_read", Command::RunSelfCdcRead),
  ("get_self_reference", Command::GetSelfCdcValue),
  ("get_rx_self_reference", Command::GetRxSelfCdcValue),
  ("get_tx_self_reference", Command::GetTxSelfCdcValue),
  ("run_reference_read_key", Command::RunCdcReadKey),
  ("run_cdc_read", Command::RunCdcRead),
  ("run_self_cdc_read", Command::RunSelfCdcRead),
  ("run_cdc_read_key", Command::RunCdcReadKey),
  ("get_cdc_value", Command::GetCdcValue),
  ("get_self_cdc_value", Command::GetSelfCdcValue),
  ("get_rx_self_cdc_value", Command::GetRxSelfCdcValue),
  ("get_tx_self_cdc_value", Command::GetTxSelfCdcValue),
  ("get_cdc_all_data", Command::GetCdcAllData),
  ("get_self_cdc_all_data", Command::GetSelfCdcAllData),
  ("get_cdc_array", Command::GetCdcArray),
  ("get_self_cdc_array", Command::GetSelfCdcArray),
  ("get_cm_all_data", Command::RunCmcsAllData(CmcsArray::Cm)),
  ("get_slope0_all_data", Command::RunCmcsAllData(CmcsArray::Slope0)),
  ("get_slope1_all_data", Command::RunCmcsAllData(CmcsArray::Slope1)),
  ("get_cs_all_data", Command::RunCmcsAllData(CmcsArray::Cs)),
  ("run_cm_test", Command::RunCmTest),
  ("get_cm_value", Command::GetCmValue),
  ("get_cm_maxgap_value", Command::GetCmMaxgapValue),
  ("get_tx_cm_gap_value", Command::GetTxCmGapValue),
  ("get_rx_cm_gap_value", Command::GetRxCmGapValue),
  ("run_cm_test_key", Command::RunCmTestKey),
  ("run_jitter_read", Command::RunJitterRead),
  ("get_jitter", Command::GetJitter),
  ("run_cmcs_test", Command::RunCmcsTest),
  ("get_cm_array", Command::GetCmcsArray(CmcsArray::Cm)),
  ("get_slope0_array", Command::GetCmcsArray(CmcsArray::Slope0)),
  ("get_slope1_array", Command::GetCmcsArray(CmcsArray::Slope1)),
  ("get_cs_array", Command::GetCmcsArray(CmcsArray::Cs)),
  ("get_cs0_array", Command::GetCmcsArray(CmcsArray::Cs)),
  ("get_cs1_array", Command::GetCmcsArray(CmcsArray::Cs)),
  ("run_force_calibration", Command::RunForceCalibration),
  ("get_force_calibration", Command::GetForceCalibration),
  ("run_mis_cal_read", Command::RunMisCalRead),
  ("get_mis_cal", Command::GetMisCal),
  ("set_external_factory", Command::SetExternalFactory),
  ("get_pat_information", Command::GetPatInformation),
  ("get_tsp_test_result", Command::GetTspTestResult),
  ("set_tsp_test_result", Command::SetTspTestResult),
  ("ium_read", Command::IumRead),
  ("check_ic_mode", Command::CheckIcMode),
  ("get_wet_mode", Command::GetWetMode),
  ("not_support_cmd", Command::NotSupported),
];

impl Command {
  pub fn from_name(name: &str) -> Option<Self> {
    COMMANDS.iter().find(|(n, _)| *n == name).map(|&(_, cmd)| cmd)
  }

  /// All registered command names, aliases included.
  pub fn names() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|&(name, _)| name)
  }
}

/// Harness parameters; missing entries read as zero.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params<'a>(&'a [i32]);

impl Params<'_> {
  pub(crate) fn get(&self, i: usize) -> i32 {
    self.0.get(i).copied().unwrap_or(0)
  }
}

/// Outputs of producer commands, read back by getter commands.
#[derive(Debug, Default)]
pub(crate) struct ResultCache {
  pub(crate) cdc: Option<NodeFrame>,
  pub(crate) cp: Option<NodeFrame>,
  pub(crate) miscal: Option<MiscalGap>,
  pub(crate) cmcs: Option<CmcsBuffer>,
  pub(crate) cm_gaps: Option<CmGaps>,
}

impl ResultCache {
  pub(crate) fn clear(&mut self) {
    *self = Self::default();
  }
}

/// Comma separated decimal values.
pub(crate) fn join(values: impl IntoIterator<Item = u16>) -> String {
  let mut out = String::new();
  for (i, v) in values.into_iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    _ = write!(out, "{}", v);
  }
  out
}

/// Factory command façade.
///
/// Owns the driver, a CMCS engine and the cache that links producer commands
/// ("run_*") to their getters. Wrap it in [`crate::SharedFactory`] to share it
/// between tasks.
pub struct Factory<I, RST, D, C = NoCmcs> {
  dev: Ist40xx<I, RST, D>,
  cmcs: C,
  cache: ResultCache,
  external_factory: bool,
  root: CalPosition,
  status: CommandStatus,
}

impl<I, E, RST, D> Factory<I, RST, D, NoCmcs>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
{
  pub fn new(dev: Ist40xx<I, RST, D>) -> Self {
    Self::with_cmcs(dev, NoCmcs)
  }
}

impl<I, E, RST, D, C> Factory<I, RST, D, C>
where
  I: I2c<SevenBitAddress, Error = E>,
  RST: OutputPin,
  D: DelayNs,
  C: CmcsSource,
{
  pub fn with_cmcs(dev: Ist40xx<I, RST, D>, cmcs: C) -> Self {
    Self {
      dev,
      cmcs,
      cache: ResultCache::default(),
      external_factory: false,
      root: CalPosition::None,
      status: CommandStatus::Waiting,
    }
  }

  pub fn device(&self) -> &Ist40xx<I, RST, D> {
    &self.dev
  }

  pub fn device_mut(&mut self) -> &mut Ist40xx<I, RST, D> {
    &mut self.dev
  }

  /// Status of the last command.
  pub fn status(&self) -> CommandStatus {
    self.status
  }

  pub async fn power_on(&mut self) -> Result<(), Error<E>> {
    self.dev.power_on().await
  }

  /// Power the controller off and drop every cached result.
  pub fn power_off(&mut self) -> Result<(), Error<E>> {
    self.cache.clear();
    self.dev.power_off()
  }

  /// Run the command registered as `name`.
  pub async fn invoke(&mut self, name: &str, params: &[i32]) -> CommandResult {
    self.status = CommandStatus::Running;
    let result = match Command::from_name(name) {
      Some(cmd) => self.dispatch(cmd, Params(params)).await,
      None => CommandResult::not_applicable(),
    };
    info!("{}: {}", name, result.text.as_str());
    self.status = result.status;
    result
  }

  async fn dispatch(&mut self, cmd: Command, p: Params<'_>) -> CommandResult {
    match cmd {
      Command::GetChipVendor => self.chip_vendor(),
      Command::GetChipName => self.chip_name(),
      Command::GetChipId => self.chip_id().await,
      Command::GetFwVerIc => self.fw_ver_ic().await,
      Command::GetConfigVer => self.config_ver(),
      Command::GetThreshold => self.threshold().await,
      Command::GetChecksumData => self.checksum_data().await,
      Command::RunFwIntegrity => self.fw_integrity().await,
      Command::GetXNum => self.axis_count(self.dev.geometry().x_count()),
      Command::GetYNum => self.axis_count(self.dev.geometry().y_count()),
      Command::GetAllXNum => self.axis_count(self.dev.geometry().channels.rx),
      Command::GetAllYNum => self.axis_count(self.dev.geometry().channels.tx),
      Command::GetCpArray => self.cp_array(false).await,
      Command::GetSelfCpArray => self.cp_array(true).await,
      Command::RunCdcRead => self.run_cdc_read().await,
      Command::RunSelfCdcRead => self.run_self_cdc_read().await,
      Command::RunCdcReadKey => self.run_cdc_read_key().await,
      Command::GetCdcValue => self.cdc_value(p),
      Command::GetSelfCdcValue => self.self_cdc_value(p.get(0), 0),
      Command::GetRxSelfCdcValue => self.rx_self_cdc_value(p),
      Command::GetTxSelfCdcValue => self.tx_self_cdc_value(p),
      Command::GetCdcAllData => self.cdc_dump(false, true).await,
      Command::GetSelfCdcAllData => self.cdc_dump(true, true).await,
      Command::GetCdcArray => self.cdc_dump(false, false).await,
      Command::GetSelfCdcArray => self.cdc_dump(true, false).await,
      Command::RunCmcsAllData(array) => self.cmcs_all_data(array).await,
      Command::RunCmTest => self.run_cm_test().await,
      Command::GetCmValue => self.cm_value(p, false),
      Command::GetCmMaxgapValue => self.cm_maxgap(),
      Command::GetTxCmGapValue => self.cm_gap_value(p, true),
      Command::GetRxCmGapValue => self.cm_gap_value(p, false),
      Command::RunCmTestKey => self.run_cm_test_key().await,
      Command::RunJitterRead => self.run_jitter_read().await,
      Command::GetJitter => self.cm_value(p, true),
      Command::RunCmcsTest => self.run_cmcs_test().await,
      Command::GetCmcsArray(array) => self.cmcs_array(array),
      Command::RunForceCalibration => self.run_force_calibration(p).await,
      Command::GetForceCalibration => self.get_force_calibration().await,
      Command::RunMisCalRead => self.run_mis_cal_read().await,
      Command::GetMisCal => self.mis_cal_value(p),
      Command::SetExternalFactory => self.set_external_factory(),
      Command::GetPatInformation => self.pat_information().await,
      Command::GetTspTestResult => self.tsp_test_result().await,
      Command::SetTspTestResult => self.set_tsp_test_result(p).await,
      Command::IumRead => self.ium_read().await,
      Command::CheckIcMode => self.ic_mode(false).await,
      Command::GetWetMode => self.ic_mode(true).await,
      Command::NotSupported => CommandResult::not_applicable(),
    }
  }
}
