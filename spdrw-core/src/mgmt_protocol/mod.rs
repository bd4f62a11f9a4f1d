//! Management protocols spoken to external adapters.
//!
//! `spd_proxy` drives a serial-attached microcontroller that performs I2C
//! transactions against module EEPROMs on the host's behalf.

pub mod spd_proxy;
