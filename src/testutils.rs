use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Once;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::{ErrorType, Read, Write};

use crate::serial::Transport;

static INIT: Once = Once::new();

pub fn setup_log() {
    INIT.call_once(|| {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Trace)
            .init();
    });
}

#[derive(Debug)]
enum Event {
    Data(VecDeque<u8>),
    Stall(u32),
}

/// Empty reads in a row before the script is considered exhausted.
const RUNAWAY_READS: u32 = 10_000;

/// Stand-in for the modem: every `write` releases the next scripted
/// reply into the receive queue.
#[derive(Debug, Default)]
pub struct ScriptedModem {
    replies: VecDeque<Vec<Event>>,
    rx: VecDeque<Event>,
    written: Vec<Vec<u8>>,
    baud_rates: Vec<u32>,
    empty_reads: u32,
}

impl ScriptedModem {
    pub fn new() -> Self {
        Default::default()
    }

    /// Reply released by the next unanswered write.
    pub fn reply(&mut self, data: &[u8]) {
        self.replies
            .push_back(vec![Event::Data(data.iter().copied().collect())]);
    }

    /// Replies released before any already scripted ones.
    pub fn prepend(&mut self, replies: &[&[u8]]) {
        for data in replies.iter().rev() {
            self.replies
                .push_front(vec![Event::Data(data.iter().copied().collect())]);
        }
    }

    /// Append `reads` empty reads to the last scripted reply.
    pub fn stall(&mut self, reads: u32) {
        if let Some(last) = self.replies.back_mut() {
            last.push(Event::Stall(reads));
        }
    }

    /// More bytes for the last scripted reply, after any stall.
    pub fn push_later(&mut self, data: &[u8]) {
        if let Some(last) = self.replies.back_mut() {
            last.push(Event::Data(data.iter().copied().collect()));
        }
    }

    /// Bytes already waiting on the line before the next write.
    pub fn push_unsolicited(&mut self, data: &[u8]) {
        self.rx.push_back(Event::Data(data.iter().copied().collect()));
    }

    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    pub fn baud_rates(&self) -> &[u32] {
        &self.baud_rates
    }

    /// Unread bytes in the receive queue.
    pub fn pending(&self) -> usize {
        self.rx
            .iter()
            .map(|e| match e {
                Event::Data(d) => d.len(),
                Event::Stall(_) => 0,
            })
            .sum()
    }

    fn idle(&mut self) -> Vec<u8> {
        self.empty_reads += 1;
        if self.empty_reads > RUNAWAY_READS {
            panic!("modem script exhausted, written so far: {:?}", self.written);
        }
        Vec::new()
    }
}

impl Transport for ScriptedModem {
    type Error = Infallible;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        self.baud_rates.push(baud);
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), Self::Error> {
        self.rx.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.written.push(data.to_vec());
        if let Some(events) = self.replies.pop_front() {
            self.rx.extend(events);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, Self::Error> {
        let line = match self.rx.front_mut() {
            None => return Ok(self.idle()),
            Some(Event::Stall(n)) => {
                if *n <= 1 {
                    self.rx.pop_front();
                } else {
                    *n -= 1;
                }
                return Ok(self.idle());
            }
            Some(Event::Data(data)) => {
                let end = data
                    .iter()
                    .position(|c| *c == b'\n')
                    .map_or(data.len(), |p| p + 1);
                let line: Vec<u8> = data.drain(0..end).collect();
                if data.is_empty() {
                    self.rx.pop_front();
                }
                line
            }
        };
        self.empty_reads = 0;
        Ok(line)
    }
}

/// Delay that only keeps count.
#[derive(Debug, Default)]
pub struct NoDelay {
    total_ns: u64,
}

impl NoDelay {
    pub fn total_ms(&self) -> u32 {
        (self.total_ns / 1_000_000) as u32
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

#[derive(Debug)]
pub struct TxBuffer(pub Vec<u8>);

impl TxBuffer {
    pub fn new() -> TxBuffer {
        TxBuffer(Vec::new())
    }
}

impl ErrorType for TxBuffer {
    type Error = Infallible;
}

impl Write for TxBuffer {
    fn write(&mut self, c: u8) -> nb::Result<(), Self::Error> {
        self.0.push(c);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct ReadBuffer(pub VecDeque<u8>);

impl ReadBuffer {
    pub fn from_iter(data: impl Iterator<Item = u8>) -> ReadBuffer {
        let q = VecDeque::from_iter(data);
        ReadBuffer(q)
    }
}

impl ErrorType for ReadBuffer {
    type Error = Infallible;
}

impl Read for ReadBuffer {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.0.pop_front().ok_or(nb::Error::WouldBlock)
    }
}
