use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
    };
#[cfg(feature = "serial")]
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};

use crate::command::{Message, read_frame};
use super::{Error, check_payload};


/// byte stream a [Bus] can run on
pub trait Port: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Port for T {}

/**
    BSMP master bus

    the chain is half-duplex: only one request can be on the line at a time, so exchanges are serialized here. Each exchange is bounded by the bus timeout, a device that does not answer in time is a transport failure.
*/
pub struct Bus {
    line: Mutex<Line>,
    timeout: Duration,
}
struct Line {
    /// uart RX/TX stream
    port: Box<dyn Port>,
    /// a previous exchange failed, late bytes may still arrive
    stale: bool,
}

impl Bus {
    /// run the bus on any byte stream
    pub fn new(port: impl Port + 'static, timeout: Duration) -> Self {
        Self {
            line: Mutex::new(Line {
                port: Box::new(port),
                stale: false,
                }),
            timeout,
        }
    }
    /// initialize a bus on the given serial port file and with the given baud rate
    #[cfg(feature = "serial")]
    pub fn open(path: impl AsRef<std::path::Path>, rate: u32, timeout: Duration) -> Result<Self, std::io::Error> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::Even);
                Ok(settings)
                })?;
        Ok(Self::new(port, timeout))
    }
    pub fn timeout(&self) -> Duration  {self.timeout}

    /// send a request to the device at `address` and wait for its answer
    pub async fn exchange(&self, address: u8, request: &Message) -> Result<Message, Error> {
        check_payload(request.payload.len())?;
        let mut line = self.line.lock().await;
        if line.stale {
            line.discard().await;
        }
        let result = line.exchange(address, request, self.timeout).await;
        line.stale = result.is_err();
        result
    }
}

impl Line {
    async fn exchange(&mut self, address: u8, request: &Message, timeout: Duration) -> Result<Message, Error> {
        self.port.write_all(&request.frame(address)).await?;
        self.port.flush().await?;
        let answer = tokio::time::timeout(timeout, read_frame(&mut self.port)).await
            .map_err(|_| Error::Timeout)??;
        if ! answer.valid {
            return Err(Error::Garbled("checksum mismatch"));
        }
        if answer.header.address != address {
            return Err(Error::Garbled("answer from another device"));
        }
        Ok(answer.message())
    }
    /// drop bytes already received, remains of an answer that arrived too late
    async fn discard(&mut self) {
        let mut buffer = [0u8; 256];
        let mut dropped = 0;
        while let Ok(Ok(received)) = tokio::time::timeout(Duration::ZERO, self.port.read(&mut buffer)).await {
            if received == 0
                {break}
            dropped += received;
        }
        if dropped != 0 {
            log::debug!("discarded {} stale bytes", dropped);
        }
        self.stale = false;
    }
}
