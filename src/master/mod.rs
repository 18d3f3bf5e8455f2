/*!
    implement the BSMP master side in `std` environment

    The central resource is the [Bus] struct which owns the serial port and serializes exchanges on it, the chain being half-duplex.

    For communicating with one specific device, use the [Client] struct which is a lightweight handle on the bus holding the device address and its catalog.
*/

/// implementation of the bus exchanges
mod networking;
/// protocol operations on one device
mod accessing;
/// installation of model groups on devices
mod mapping;


pub use networking::*;
pub use accessing::*;


use crate::command::{Ack, MAX_PAYLOAD};
use thiserror::Error;

/// error regarding communication with devices
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with serial bus")]
    Bus(std::io::Error),
    #[error("no answer arrived in expected time")]
    Timeout,
    #[error("garbled answer: {0}")]
    Garbled(&'static str),
    #[error("request refused by device: {0:?}")]
    Nack(Ack),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("operation discarded before execution")]
    Discarded,
}
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Bus(error)
    }
}
impl Error {
    /// whether the device did not answer properly, meaning it must be considered disconnected
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Bus(_) | Self::Timeout | Self::Garbled(_))
    }
}


fn check_payload(size: usize) -> Result<(), Error> {
    if size <= MAX_PAYLOAD  {Ok(())}
    else {Err(Error::Config(format!("payload of {} bytes is longer than maximum allowed message", size)))}
}
