//! Crate-internal logging. Forwards to `defmt` when the `defmt` feature is on.

#[cfg(feature = "defmt")]
macro_rules! ring_warn {
    ($($arg:tt)*) => {
        ::defmt::warn!($($arg)*)
    };
}

#[cfg(not(feature = "defmt"))]
macro_rules! ring_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "defmt")]
macro_rules! ring_debug {
    ($($arg:tt)*) => {
        ::defmt::debug!($($arg)*)
    };
}

#[cfg(not(feature = "defmt"))]
macro_rules! ring_debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "defmt")]
macro_rules! ring_trace {
    ($($arg:tt)*) => {
        ::defmt::trace!($($arg)*)
    };
}

#[cfg(not(feature = "defmt"))]
macro_rules! ring_trace {
    ($($arg:tt)*) => {};
}

pub(crate) use {ring_debug, ring_trace, ring_warn};
