use alloc::collections::VecDeque;
use alloc::vec::Vec;
use embedded_hal_nb::serial::{Error, ErrorType, Read, Write};
use log::trace;

/// Byte channel the modem session drives. Owned exclusively by one
/// session for its whole life.
pub trait Transport {
    type Error: core::fmt::Debug;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error>;

    /// Discard every byte received but not yet read.
    fn reset_input_buffer(&mut self) -> Result<(), Self::Error>;

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Bytes up to and including the next `\n`. A shorter (possibly
    /// empty) line means the read budget ran out first.
    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error>;
}

#[derive(Debug)]
pub struct BufferedRx<Rx: Read> {
    pub rx: Rx,
    pub buf: VecDeque<u8>,
}

impl<Rx: Read> BufferedRx<Rx> {
    pub fn new(rx: Rx) -> BufferedRx<Rx> {
        BufferedRx {
            rx,
            buf: VecDeque::new(),
        }
    }

    /// Load as much as we can from rx into the internal buf.
    /// Only ever returns `Err(WouldBlock)` or a read error.
    pub fn buffer(&mut self) -> nb::Result<(), Rx::Error> {
        loop {
            let c = self.rx.read()?;
            self.buf.push_back(c);
        }
    }

    /// Position one past the first `\n` in the queue.
    fn line_end(&self) -> Option<usize> {
        self.buf.iter().position(|c| *c == b'\n').map(|p| p + 1)
    }

    /// Pulls a complete line out of the queue, or `WouldBlock` if no
    /// line terminator has arrived yet.
    pub fn read_line(&mut self) -> nb::Result<Vec<u8>, Rx::Error> {
        if let Some(end) = self.line_end() {
            return Ok(self.buf.drain(0..end).collect());
        }
        match self.buffer() {
            Err(nb::Error::Other(e)) => return Err(nb::Error::Other(e)),
            Err(nb::Error::WouldBlock) | Ok(()) => {}
        }
        match self.line_end() {
            Some(end) => Ok(self.buf.drain(0..end).collect()),
            None => Err(nb::Error::WouldBlock),
        }
    }

    /// Hand back whatever partial line is queued.
    pub fn take_partial(&mut self) -> Vec<u8> {
        self.buf.drain(..).collect()
    }

    /// Drop everything queued locally and everything the UART holds.
    pub fn clear(&mut self) -> Result<(), Rx::Error> {
        self.buf.clear();
        loop {
            match self.rx.read() {
                Ok(_) => continue,
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }
}

impl<Rx: Read> ErrorType for BufferedRx<Rx> {
    type Error = Rx::Error;
}

impl<Rx: Read> Read for BufferedRx<Rx> {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        match self.buffer() {
            Err(nb::Error::Other(e)) => return Err(nb::Error::Other(e)),
            Err(nb::Error::WouldBlock) | Ok(()) => {}
        }
        self.buf.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

#[derive(Debug)]
pub struct BufferedTx<Tx: Write> {
    tx: Tx,
    pub buf: VecDeque<u8>,
}

impl<Tx: Write> BufferedTx<Tx> {
    pub fn new(tx: Tx) -> BufferedTx<Tx> {
        BufferedTx {
            tx,
            buf: VecDeque::new(),
        }
    }

    pub fn queue(&mut self, data: &[u8]) {
        self.buf.extend(data.iter().copied());
    }
}

impl<Tx: Write> ErrorType for BufferedTx<Tx> {
    type Error = Tx::Error;
}

#[derive(Debug)]
pub struct ErrorShim<T: Error>(pub T);

impl<T: Error> embedded_io::Error for ErrorShim<T> {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind::*;
        match self.0.kind() {
            Overrun => embedded_io::ErrorKind::OutOfMemory,
            FrameFormat => embedded_io::ErrorKind::InvalidData,
            Parity => embedded_io::ErrorKind::InvalidData,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl<T: Error> From<T> for ErrorShim<T> {
    fn from(value: T) -> Self {
        ErrorShim(value)
    }
}

impl<Tx: Write> embedded_io::ErrorType for BufferedTx<Tx> {
    type Error = ErrorShim<Tx::Error>;
}

impl<Tx: Write> Write for BufferedTx<Tx> {
    fn write(&mut self, word: u8) -> nb::Result<(), Tx::Error> {
        self.buf.push_back(word);
        Ok(())
    }

    /// Push queued bytes into the UART. A byte is only dequeued once the
    /// UART accepted it.
    fn flush(&mut self) -> nb::Result<(), Tx::Error> {
        while let Some(x) = self.buf.front().copied() {
            self.tx.write(x)?;
            self.buf.pop_front();
        }
        self.tx.flush()
    }
}

impl<Tx: Write> embedded_io::Write for BufferedTx<Tx> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorShim<Tx::Error>> {
        self.queue(buf);
        nb::block!(Write::flush(self)).map_err(ErrorShim)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), ErrorShim<Tx::Error>> {
        nb::block!(Write::flush(self)).map_err(ErrorShim)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SerialError<WriteError, ReadError> {
    Write(WriteError),
    Read(ReadError),
    /// The HAL fixed the UART at `configured` baud; it cannot be changed
    /// to `requested` through the byte-level traits.
    BaudMismatch { configured: u32, requested: u32 },
}

/// [`Transport`] over a pair of `embedded-hal-nb` UART halves that the
/// HAL has already configured.
#[derive(Debug)]
pub struct SerialPort<Tx: Write, Rx: Read> {
    tx: BufferedTx<Tx>,
    rx: BufferedRx<Rx>,
    baud_rate: u32,
    poll_limit: Option<u32>,
}

impl<Tx: Write, Rx: Read> SerialPort<Tx, Rx> {
    pub fn new(tx: Tx, rx: Rx, baud_rate: u32) -> SerialPort<Tx, Rx> {
        SerialPort {
            tx: BufferedTx::new(tx),
            rx: BufferedRx::new(rx),
            baud_rate,
            poll_limit: None,
        }
    }

    /// Give up on a line after `polls` consecutive empty polls of the
    /// UART, returning what arrived so far.
    pub fn with_poll_limit(mut self, polls: u32) -> SerialPort<Tx, Rx> {
        self.poll_limit = Some(polls);
        self
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn split(self) -> (Tx, Rx) {
        (self.tx.tx, self.rx.rx)
    }
}

impl<Tx: Write, Rx: Read> Transport for SerialPort<Tx, Rx> {
    type Error = SerialError<Tx::Error, Rx::Error>;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        if baud != self.baud_rate {
            return Err(SerialError::BaudMismatch {
                configured: self.baud_rate,
                requested: baud,
            });
        }
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), Self::Error> {
        self.rx.clear().map_err(SerialError::Read)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        trace!("tx {} bytes", data.len());
        embedded_io::Write::write_all(&mut self.tx, data).map_err(|ErrorShim(e)| SerialError::Write(e))
    }

    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error> {
        let mut idle = 0u32;
        loop {
            match self.rx.read_line() {
                Ok(line) => return Ok(line),
                Err(nb::Error::Other(e)) => return Err(SerialError::Read(e)),
                Err(nb::Error::WouldBlock) => {
                    idle += 1;
                    if let Some(limit) = self.poll_limit {
                        if idle >= limit {
                            return Ok(self.rx.take_partial());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ReadBuffer, TxBuffer};

    #[test]
    fn lines_include_terminator() {
        let rx = ReadBuffer::from_iter(b"READY\r\n0\r\n".iter().copied());
        let mut port = SerialPort::new(TxBuffer::new(), rx, 19200);
        assert_eq!(port.read_line().unwrap(), b"READY\r\n");
        assert_eq!(port.read_line().unwrap(), b"0\r\n");
    }

    #[test]
    fn partial_line_returned_when_budget_runs_out() {
        let rx = ReadBuffer::from_iter(b"+CSQ:".iter().copied());
        let mut port = SerialPort::new(TxBuffer::new(), rx, 19200).with_poll_limit(3);
        assert_eq!(port.read_line().unwrap(), b"+CSQ:");
        assert_eq!(port.read_line().unwrap(), b"");
    }

    #[test]
    fn reset_input_discards_queued_and_pending_bytes() {
        let rx = ReadBuffer::from_iter(b"stale\r\nmore".iter().copied());
        let mut port = SerialPort::new(TxBuffer::new(), rx, 19200).with_poll_limit(1);
        port.reset_input_buffer().unwrap();
        assert_eq!(port.read_line().unwrap(), b"");
    }

    #[test]
    fn write_reaches_uart_in_order() {
        let mut port = SerialPort::new(TxBuffer::new(), ReadBuffer::from_iter(core::iter::empty()), 19200);
        port.write(b"AT+GMM\r").unwrap();
        let (tx, _) = port.split();
        assert_eq!(tx.0, b"AT+GMM\r");
    }

    #[test]
    fn baud_rate_must_match_hal_configuration() {
        let mut port = SerialPort::new(TxBuffer::new(), ReadBuffer::from_iter(core::iter::empty()), 19200);
        assert!(port.set_baud_rate(19200).is_ok());
        assert_eq!(
            port.set_baud_rate(115200),
            Err(SerialError::BaudMismatch {
                configured: 19200,
                requested: 115200
            })
        );
    }
}
