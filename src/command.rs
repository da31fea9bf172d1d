//! AT command framing and the two request/response primitives every
//! modem operation goes through.
//!
//! A plain command is written as `AT<mnemonic>\r`; the modem echoes it
//! and answers with zero or more lines closed by `OK\r\n` or
//! `ERROR\r\n`:
//!
//! ```text
//! AT+SBDSX\r\r\n+SBDSX: 0, 0, 0, 0, 0, 0\r\n\r\nOK\r\n
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use log::{debug, trace};

use crate::error::{ModemError, ProtocolError, UsageError};
use crate::serial::Transport;
use crate::{Encode, MAX_OUTBOUND_LEN};

pub const COMMAND_CAPACITY: usize = 64;
/// `AT` + mnemonic + `\r`
pub const MAX_COMMAND_FRAME: usize = COMMAND_CAPACITY + 3;

pub const OK: &[u8] = b"OK\r\n";
pub const ERROR: &[u8] = b"ERROR\r\n";
pub const READY: &[u8] = b"READY\r\n";

/// Mnemonic of one AT command, without the `AT` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    mnemonic: heapless::String<COMMAND_CAPACITY>,
}

impl Command {
    pub fn new(mnemonic: &str) -> Result<Command, UsageError> {
        let mut m = heapless::String::new();
        m.push_str(mnemonic).map_err(|_| UsageError::CommandTooLong {
            max: COMMAND_CAPACITY,
            found: mnemonic.len(),
        })?;
        Ok(Command { mnemonic: m })
    }

    /// `<mnemonic>=<arg>`, e.g. `+SBDWB=12`.
    pub fn with_arg(mnemonic: &str, arg: impl core::fmt::Display) -> Result<Command, UsageError> {
        let mut m = heapless::String::<COMMAND_CAPACITY>::new();
        if write!(m, "{}={}", mnemonic, arg).is_err() {
            let mut full = String::new();
            let _ = write!(full, "{}={}", mnemonic, arg);
            return Err(UsageError::CommandTooLong {
                max: COMMAND_CAPACITY,
                found: full.len(),
            });
        }
        Ok(Command { mnemonic: m })
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Size of the encoded frame.
    pub fn len(&self) -> usize {
        self.mnemonic.len() + 3
    }

    pub fn is_empty(&self) -> bool {
        self.mnemonic.is_empty()
    }

    /// Bytes the modem echoes back for this command.
    fn echo(&self) -> Vec<u8> {
        let mut e = Vec::with_capacity(self.len());
        e.extend_from_slice(b"AT");
        e.extend_from_slice(self.mnemonic.as_bytes());
        e
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct EncodeBufferTooSmall {
    pub expected: usize,
    pub found: usize,
}

impl Encode for Command {
    type Error = EncodeBufferTooSmall;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let size = self.len();
        if buffer.len() < size {
            return Err(EncodeBufferTooSmall {
                expected: size,
                found: buffer.len(),
            });
        }
        // AT: 2, MNEMONIC: n, CR: 1
        buffer[0..2].copy_from_slice(b"AT");
        buffer[2..size - 1].copy_from_slice(self.mnemonic.as_bytes());
        buffer[size - 1] = b'\r';
        Ok(size)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|c| c.is_ascii_whitespace())
}

pub(crate) fn trim(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

/// Lossy text of a line, for error reports and logs.
pub(crate) fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(trim(line)).into_owned()
}

/// Raw lines collected during one command transfer, terminal line
/// included, each still carrying its own line ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    lines: Vec<Vec<u8>>,
}

impl Response {
    pub fn new(lines: Vec<Vec<u8>>) -> Response {
        Response { lines }
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    pub fn terminal(&self) -> Option<&[u8]> {
        self.lines.last().map(|l| l.as_slice())
    }

    pub fn is_ok(&self) -> bool {
        self.terminal().is_some_and(|l| contains(l, OK))
    }

    /// Lines between the command echo and the terminal line, with blank
    /// lines dropped.
    pub fn body(&self) -> impl Iterator<Item = &[u8]> {
        let end = self.lines.len().saturating_sub(1);
        self.lines[..end]
            .iter()
            .map(|l| l.as_slice())
            .filter(|l| !is_blank(l) && !trim(l).starts_with(b"AT"))
    }

    /// The last non-blank line before the terminal line.
    pub fn last_value_line(&self) -> Option<&[u8]> {
        self.body().last()
    }

    /// The last line whose trimmed text starts with `prefix`, e.g.
    /// `+SBDSX:`.
    pub fn find_prefixed(&self, prefix: &[u8]) -> Option<&[u8]> {
        self.body().filter(|l| trim(l).starts_with(prefix)).last()
    }

    /// Every line glued back into the byte stream it came from.
    pub fn concat(&self) -> Vec<u8> {
        self.lines.concat()
    }
}

fn timeout<E>(command: &Command) -> ModemError<E> {
    ModemError::Timeout {
        command: String::from(command.mnemonic()),
    }
}

/// Read one complete line. Short reads are joined until the `\n`
/// arrives; only empty reads count against `idle_limit`.
fn next_line<T: Transport>(
    transport: &mut T,
    command: &Command,
    idle: &mut u32,
    idle_limit: Option<u32>,
) -> Result<Vec<u8>, ModemError<T::Error>> {
    let mut line = Vec::new();
    loop {
        let chunk = transport.read_line().map_err(ModemError::Transport)?;
        if chunk.is_empty() {
            *idle += 1;
            if idle_limit.is_some_and(|limit| *idle >= limit) {
                return Err(timeout(command));
            }
            continue;
        }
        *idle = 0;
        line.extend_from_slice(&chunk);
        if line.ends_with(b"\n") {
            trace!("rx {:?}", String::from_utf8_lossy(&line));
            return Ok(line);
        }
    }
}

/// Flush input, then write `AT<command>\r`.
fn send<T: Transport>(transport: &mut T, command: &Command) -> Result<(), ModemError<T::Error>> {
    let mut frame = [0; MAX_COMMAND_FRAME];
    let size = command
        .encode(&mut frame)
        .map_err(|e| UsageError::CommandTooLong {
            max: MAX_COMMAND_FRAME,
            found: e.expected,
        })?;

    debug!("AT{}", command.mnemonic());
    transport.reset_input_buffer().map_err(ModemError::Transport)?;
    transport.write(&frame[0..size]).map_err(ModemError::Transport)
}

/// Send `AT<command>\r` and collect every line up to and including the
/// one that carries `OK\r\n` or `ERROR\r\n`.
///
/// Input is flushed before the write and again after the terminal line.
/// With no `idle_limit` this blocks until a terminator shows up.
pub fn transfer<T: Transport>(
    transport: &mut T,
    command: &Command,
    idle_limit: Option<u32>,
) -> Result<Response, ModemError<T::Error>> {
    send(transport, command)?;

    let mut lines = Vec::new();
    let mut idle = 0;
    loop {
        let line = next_line(transport, command, &mut idle, idle_limit)?;
        let done = contains(&line, OK) || contains(&line, ERROR);
        lines.push(line);
        if done {
            break;
        }
    }

    transport.reset_input_buffer().map_err(ModemError::Transport)?;
    Ok(Response::new(lines))
}

/// Offset of the length field in a binary reply, past the echo and the
/// CR that closes it.
fn frame_start(stream: &[u8], echo: &[u8]) -> usize {
    match stream.strip_prefix(echo) {
        Some(rest) if rest.starts_with(b"\r") => echo.len() + 1,
        Some(_) => echo.len(),
        None => 0,
    }
}

/// Like [`transfer`], for a reply carrying a length-prefixed binary
/// frame (`+SBDRB`). Terminators are only looked for after the frame,
/// so payload bytes that spell `OK\r\n` do not end the reply.
pub fn transfer_binary<T: Transport>(
    transport: &mut T,
    command: &Command,
    idle_limit: Option<u32>,
) -> Result<Response, ModemError<T::Error>> {
    send(transport, command)?;

    let echo = command.echo();
    let mut lines = Vec::new();
    let mut stream = Vec::new();
    let mut idle = 0;
    loop {
        let line = next_line(transport, command, &mut idle, idle_limit)?;
        stream.extend_from_slice(&line);
        let start = frame_start(&stream, &echo);
        let done = match stream.get(start..start + 2) {
            Some(len) => {
                let length = u16::from_be_bytes([len[0], len[1]]) as usize;
                if length > MAX_OUTBOUND_LEN {
                    // not a frame, e.g. `ERROR`
                    contains(&line, OK) || contains(&line, ERROR)
                } else {
                    let end = start + length + 4;
                    stream
                        .get(end..)
                        .is_some_and(|tail| contains(tail, OK) || contains(tail, ERROR))
                }
            }
            None => contains(&line, ERROR),
        };
        lines.push(line);
        if done {
            break;
        }
    }

    transport.reset_input_buffer().map_err(ModemError::Transport)?;
    Ok(Response::new(lines))
}

/// Standard SBD checksum: the low 16 bits of the byte sum, big-endian.
pub fn sbd_checksum(payload: &[u8]) -> [u8; 2] {
    payload
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
        .to_be_bytes()
}

/// Upload `payload` into the outbound buffer with `+SBDWB`.
///
/// The modem answers `READY`, takes the payload plus checksum, then
/// reports a single status digit where `0` is success.
pub fn write_binary<T: Transport>(
    transport: &mut T,
    payload: &[u8],
    idle_limit: Option<u32>,
) -> Result<(), ModemError<T::Error>> {
    if payload.len() > MAX_OUTBOUND_LEN {
        return Err(UsageError::MessageTooLong {
            max: MAX_OUTBOUND_LEN,
            found: payload.len(),
        }
        .into());
    }
    let command = Command::with_arg("+SBDWB", payload.len())?;
    send(transport, &command)?;

    let mut idle = 0;
    loop {
        let line = next_line(transport, &command, &mut idle, idle_limit)?;
        if line == READY {
            break;
        }
    }

    let mut upload = Vec::with_capacity(payload.len() + 2);
    upload.extend_from_slice(payload);
    upload.extend_from_slice(&sbd_checksum(payload));
    transport.write(&upload).map_err(ModemError::Transport)?;

    // blank line, then the status
    let status = loop {
        let line = next_line(transport, &command, &mut idle, idle_limit)?;
        if !is_blank(&line) {
            break line;
        }
    };
    let status: u8 = core::str::from_utf8(trim(&status))
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::Malformed {
            command: String::from(command.mnemonic()),
            line: lossy(&status),
        })?;
    if status != 0 {
        return Err(ProtocolError::WriteFailed { status }.into());
    }
    Ok(())
}

/// Pull the message out of a `+SBDRB` reply: optional echo, 2-byte
/// length, payload, 2-byte checksum.
pub fn unframe_binary(command: &Command, response: &Response) -> Result<Vec<u8>, ProtocolError> {
    let raw = response.concat();
    let echo = command.echo();
    let mut data = raw.as_slice();
    if data.starts_with(&echo) {
        data = &data[echo.len()..];
        // echo is closed by the modem's CR
        if let Some(rest) = data.strip_prefix(b"\r") {
            data = rest;
        }
    }

    let malformed = || ProtocolError::Malformed {
        command: String::from(command.mnemonic()),
        line: lossy(&raw),
    };
    if data.len() < 4 {
        return Err(malformed());
    }
    let length = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() < length + 4 {
        return Err(malformed());
    }
    let payload = &data[2..length + 2];
    let found = u16::from_be_bytes([data[length + 2], data[length + 3]]);
    let calculated = u16::from_be_bytes(sbd_checksum(payload));
    if found != calculated {
        return Err(ProtocolError::ChecksumMismatch { calculated, found });
    }
    Ok(payload.to_vec())
}
