/*!
    BSMP message framing on the serial bus

    every exchange is one request frame from the master followed by one answer frame from the addressed device:

    ```text
    [address u8] [command u8] [size u16 big endian] [payload ...] [checksum u8]
    ```

    the checksum is chosen so that the sum of all bytes of the frame is 0 modulo 256. Values inside payloads are little endian.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};
use tokio::io::{AsyncRead, AsyncReadExt};


/// maximum payload accepted in a frame, curve blocks are the biggest messages
pub const MAX_PAYLOAD: usize = 4096;
/// size of [Header] on the wire
pub const HEADER: usize = <Header as FromBytes>::Bytes::SIZE;

pub const READ_VARIABLE: u8 = 0x10;
pub const VARIABLE_VALUE: u8 = 0x11;
pub const READ_GROUP: u8 = 0x12;
pub const GROUP_VALUES: u8 = 0x13;
pub const WRITE_VARIABLE: u8 = 0x20;
pub const CREATE_GROUP: u8 = 0x30;
pub const REMOVE_GROUPS: u8 = 0x32;
pub const CURVE_BLOCK_REQUEST: u8 = 0x40;
pub const CURVE_BLOCK: u8 = 0x41;
pub const EXECUTE_FUNCTION: u8 = 0x50;
pub const FUNCTION_RETURN: u8 = 0x51;
pub const FUNCTION_ERROR: u8 = 0x53;

/// frame header
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default, PartialEq)]
pub struct Header {
    /// device address on the chain, requests and answers carry the same
    pub address: u8,
    /// command code, or acknowledgement code for answers
    pub command: u8,
    /// number of payload bytes following this header
    pub size: u16,
}

/// acknowledgement codes answered by a device that could not execute a request
#[bitsize(8)]
#[derive(Copy, Clone, Default, FromBits, Debug, PartialEq)]
pub enum Ack {
    #[default]
    Ok = 0xe0,
    #[fallback]
    Unknown = 0xff,

    /// request is not a valid message
    Malformed = 0xe1,
    /// command is not implemented by the device
    NotSupported = 0xe2,
    /// variable, group, function or curve does not exist
    InvalidId = 0xe3,
    /// value is out of range for this entity
    InvalidValue = 0xe4,
    /// payload size does not match the entity
    InvalidLength = 0xe5,
    /// entity cannot be written
    ReadOnly = 0xe6,
    /// device cannot allocate the requested group
    InsufficientMemory = 0xe7,
    /// device cannot process the request now
    Busy = 0xe8,
    /// function was executed but reported a failure
    FunctionError = 0x53,
}

/// a command or answer with its payload, without addressing
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub command: u8,
    pub payload: Vec<u8>,
}
impl Message {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self {command, payload}
    }
    pub fn empty(command: u8) -> Self {
        Self::new(command, Vec::new())
    }
    /// serialize into a complete frame for the given address
    ///
    /// payload size must have been checked against [MAX_PAYLOAD] by the caller
    pub fn frame(&self, address: u8) -> Vec<u8> {
        let header = Header {
            address,
            command: self.command,
            size: self.payload.len() as u16,
        };
        let mut frame = Vec::with_capacity(HEADER + self.payload.len() + 1);
        frame.extend_from_slice(header.to_be_bytes().as_ref());
        frame.extend_from_slice(&self.payload);
        frame.push(checksum(&frame));
        frame
    }
}

/// frame received from the bus
#[derive(Clone, Debug)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
    /// whether the checksum was correct
    pub valid: bool,
}
impl Frame {
    pub fn message(self) -> Message {
        Message::new(self.header.command, self.payload)
    }
}

/// value of the last byte making the frame sum zero
pub fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

/// receive one complete frame
///
/// a wrong checksum still consumes the whole frame so the stream stays aligned, and is reported in [Frame::valid]
pub async fn read_frame<R>(stream: &mut R) -> std::io::Result<Frame>
where R: AsyncRead + Unpin + ?Sized
{
    let mut raw = <Header as FromBytes>::Bytes::zeroed();
    stream.read_exact(raw.as_mut()).await?;
    let header = Header::from_be_bytes(raw);
    let size = usize::from(header.size);
    if size > MAX_PAYLOAD {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame payload exceeds maximum size"));
    }
    // payload followed by checksum
    let mut payload = vec![0; size + 1];
    stream.read_exact(&mut payload).await?;
    let valid = checksum(raw.as_ref()).wrapping_add(checksum(&payload)) == 0;
    payload.truncate(size);
    Ok(Frame {header, payload, valid})
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sums_to_zero() {
        let frame = Message::new(READ_VARIABLE, vec![3]).frame(2);
        assert_eq!(frame, [2, READ_VARIABLE, 0, 1, 3, checksum(&[2, READ_VARIABLE, 0, 1, 3])]);
        assert_eq!(frame.iter().fold(0u8, |s, b| s.wrapping_add(*b)), 0);
    }

    #[test]
    fn ack_codes() {
        assert_eq!(Ack::from(0xe0), Ack::Ok);
        assert_eq!(Ack::from(0xe3), Ack::InvalidId);
        assert_eq!(Ack::from(0x53), Ack::FunctionError);
        assert_eq!(Ack::from(0x12), Ack::Unknown);
    }

    #[tokio::test]
    async fn read_back_frame() {
        let bytes = Message::new(GROUP_VALUES, vec![1, 2, 3, 4]).frame(5);
        let frame = read_frame(&mut bytes.as_slice()).await.unwrap();
        assert!(frame.valid);
        assert_eq!(frame.header, Header {address: 5, command: GROUP_VALUES, size: 4});
        assert_eq!(frame.payload, [1, 2, 3, 4]);

        let mut corrupted = bytes.clone();
        corrupted[5] ^= 0x10;
        let frame = read_frame(&mut corrupted.as_slice()).await.unwrap();
        assert!(! frame.valid);
    }
}
