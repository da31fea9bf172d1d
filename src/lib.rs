//! Driver for RockBLOCK / Iridium 9602 and 9603 satellite modems.
//!
//! The modem speaks Hayes AT commands over a UART, with the vendor
//! Short Burst Data (SBD) extension for exchanging binary messages of up
//! to [`MAX_OUTBOUND_LEN`] bytes through the Iridium network.
//!
//! ```ignore
//! let port = SerialPort::new(tx, rx, 19200);
//! let mut modem = ModemSession::new(port, delay, Config::default())?;
//! modem.set_outbound_text("hello")?;
//! if let Query::Answered(status) = modem.satellite_transfer(None)? {
//!     log::info!("mo status {}", status.mo_status);
//! }
//! ```
#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod command;
pub mod error;
pub mod modem;
pub mod serial;
pub mod status;

#[cfg(test)]
mod testutils;

/// Capacity of the modem's outbound (mobile originated) buffer.
pub const MAX_OUTBOUND_LEN: usize = 340;
/// Longest text message, in characters.
pub const MAX_TEXT_LEN: usize = 120;

pub trait Encode {
    type Error;

    /// Write the wire form into `buffer`, returning the bytes used.
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Decode<'a>
where
    Self: Sized,
{
    type Error;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error>;
}

pub use command::{Command, Response, sbd_checksum};
pub use error::{Buffer, ModemError, ProtocolError, UsageError};
pub use modem::{Config, ModemSession};
pub use serial::{SerialError, SerialPort, Transport};
pub use status::{Geolocation, Query, RingIndication, SbdStatus, SystemTime, TransferStatus};
