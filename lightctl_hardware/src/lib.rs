#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Line links to stimulus controllers: a simulated board for tests and
//! offline runs, and a serial-port link behind the `hardware` feature.

pub mod error;
pub mod sim;
pub mod util;

#[cfg(feature = "hardware")]
pub mod serial;

pub use error::HwError;
pub use sim::{SimConfig, SimulatedDevice};

#[cfg(feature = "hardware")]
pub use serial::{SerialLink, list_ports};
