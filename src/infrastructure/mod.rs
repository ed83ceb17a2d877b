//! Infrastructure layer - adapters for the modem, tones, addressing and
//! metrics

pub mod address;
pub mod metrics;
pub mod modem;
pub mod tones;

pub use address::{GsmAddressPlan, HandleRepository};
pub use modem::{ModemRequest, SimulatedModem};
pub use tones::ToneGenerator;
