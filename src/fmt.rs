//! Logging shim: `defmt` when the `defmt` feature is enabled, the `log` facade otherwise.
//!
//! Format strings must stay within the subset both backends accept (`{}`, `{:x}`).
#![macro_use]
#![allow(unused_macros)]

macro_rules! trace {
  ($($arg:tt)*) => {{
    #[cfg(feature = "defmt")]
    ::defmt::trace!($($arg)*);
    #[cfg(not(feature = "defmt"))]
    ::log::trace!($($arg)*);
  }};
}

macro_rules! debug {
  ($($arg:tt)*) => {{
    #[cfg(feature = "defmt")]
    ::defmt::debug!($($arg)*);
    #[cfg(not(feature = "defmt"))]
    ::log::debug!($($arg)*);
  }};
}

macro_rules! info {
  ($($arg:tt)*) => {{
    #[cfg(feature = "defmt")]
    ::defmt::info!($($arg)*);
    #[cfg(not(feature = "defmt"))]
    ::log::info!($($arg)*);
  }};
}

macro_rules! warn {
  ($($arg:tt)*) => {{
    #[cfg(feature = "defmt")]
    ::defmt::warn!($($arg)*);
    #[cfg(not(feature = "defmt"))]
    ::log::warn!($($arg)*);
  }};
}

macro_rules! error {
  ($($arg:tt)*) => {{
    #[cfg(feature = "defmt")]
    ::defmt::error!($($arg)*);
    #[cfg(not(feature = "defmt"))]
    ::log::error!($($arg)*);
  }};
}
