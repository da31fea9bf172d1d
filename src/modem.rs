use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::command::{self, Command, Response, lossy, trim};
use crate::error::{Buffer, ModemError, ProtocolError, UsageError};
use crate::serial::Transport;
use crate::status::{
    DecodeError, Geolocation, Query, RingIndication, SbdStatus, SystemTime, TransferStatus,
    decode_number,
};
use crate::{Decode, MAX_OUTBOUND_LEN, MAX_TEXT_LEN};

pub const DEFAULT_BAUD_RATE: u32 = 19200;
/// Settling time the firmware needs after a binary upload.
pub const WRITE_SETTLE_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub baud_rate: u32,
    /// Consecutive empty reads tolerated while waiting for a reply.
    /// `None` waits forever, like the modem protocol itself.
    pub idle_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baud_rate: DEFAULT_BAUD_RATE,
            idle_limit: None,
        }
    }
}

impl Config {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Config {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_idle_limit(mut self, reads: u32) -> Config {
        self.idle_limit = Some(reads);
        self
    }
}

pub type OutboundBuffer = heapless::Vec<u8, MAX_OUTBOUND_LEN>;

/// One RockBLOCK / Iridium 9602/9603 modem behind a serial transport.
///
/// Every operation is a complete request/response exchange; `&mut self`
/// keeps two of them from interleaving on the wire.
pub struct ModemSession<T: Transport, D: DelayNs> {
    transport: T,
    delay: D,
    config: Config,
    data_out: Option<OutboundBuffer>,
}

impl<T: Transport, D: DelayNs> ModemSession<T, D> {
    /// Configure the baud rate and bring the modem to a known state.
    pub fn new(transport: T, delay: D, config: Config) -> Result<Self, ModemError<T::Error>> {
        let mut session = ModemSession {
            transport,
            delay,
            config,
            data_out: None,
        };
        session
            .transport
            .set_baud_rate(config.baud_rate)
            .map_err(ModemError::Transport)?;
        session.reset()?;
        Ok(session)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }

    fn xfer(&mut self, mnemonic: &str) -> Result<Response, ModemError<T::Error>> {
        let cmd = Command::new(mnemonic)?;
        command::transfer(&mut self.transport, &cmd, self.config.idle_limit)
    }

    fn xfer_arg(
        &mut self,
        mnemonic: &str,
        arg: impl core::fmt::Display,
    ) -> Result<Response, ModemError<T::Error>> {
        let cmd = Command::with_arg(mnemonic, arg)?;
        command::transfer(&mut self.transport, &cmd, self.config.idle_limit)
    }

    /// Restore factory defaults, then turn off flow control. Replies are
    /// not inspected.
    pub fn reset(&mut self) -> Result<(), ModemError<T::Error>> {
        info!("resetting modem");
        self.xfer("&F0")?;
        self.xfer("&K0")?;
        Ok(())
    }

    /// Last bytes written to the outbound buffer, `None` once cleared or
    /// sent.
    pub fn outbound_data(&self) -> Option<&[u8]> {
        self.data_out.as_deref()
    }

    pub fn set_outbound_data(&mut self, data: &[u8]) -> Result<(), ModemError<T::Error>> {
        let cached = OutboundBuffer::from_slice(data).map_err(|_| UsageError::MessageTooLong {
            max: MAX_OUTBOUND_LEN,
            found: data.len(),
        })?;
        command::write_binary(&mut self.transport, data, self.config.idle_limit)?;
        self.data_out = Some(cached);
        self.delay.delay_ms(WRITE_SETTLE_MS);
        Ok(())
    }

    pub fn clear_outbound(&mut self) -> Result<(), ModemError<T::Error>> {
        self.clear(Buffer::Outbound)?;
        self.data_out = None;
        Ok(())
    }

    /// The outbound buffer read as UTF-8, `None` if it is empty or not
    /// text.
    pub fn outbound_text(&self) -> Option<&str> {
        self.outbound_data().and_then(|d| core::str::from_utf8(d).ok())
    }

    /// Write `text` as the outbound message. The limit is
    /// [`MAX_TEXT_LEN`] characters, not bytes; the UTF-8 encoding must
    /// still fit the outbound buffer.
    pub fn set_outbound_text(&mut self, text: &str) -> Result<(), ModemError<T::Error>> {
        let found = text.chars().count();
        if found > MAX_TEXT_LEN {
            return Err(UsageError::TextTooLong {
                max: MAX_TEXT_LEN,
                found,
            }
            .into());
        }
        self.set_outbound_data(text.as_bytes())
    }

    fn clear(&mut self, buffer: Buffer) -> Result<(), ModemError<T::Error>> {
        let mnemonic = match buffer {
            Buffer::Outbound => "+SBDD0",
            Buffer::Inbound => "+SBDD1",
        };
        let resp = self.xfer(mnemonic)?;
        if !resp.is_ok() {
            warn!("{} rejected", mnemonic);
            return Err(ProtocolError::ClearFailed { buffer }.into());
        }
        let line = resp
            .last_value_line()
            .ok_or_else(|| malformed(mnemonic, &resp))?;
        match trim(line) {
            b"0" => Ok(()),
            b"1" => {
                warn!("{} reported a clear failure", mnemonic);
                Err(ProtocolError::ClearFailed { buffer }.into())
            }
            _ => Err(malformed(mnemonic, &resp).into()),
        }
    }

    /// Message in the inbound buffer, if the modem reports one. Nothing
    /// is read when the buffer is empty.
    pub fn inbound_data(&mut self) -> Result<Option<Vec<u8>>, ModemError<T::Error>> {
        if !self.has_inbound()? {
            return Ok(None);
        }
        let cmd = Command::new("+SBDRB")?;
        let resp = command::transfer_binary(&mut self.transport, &cmd, self.config.idle_limit)?;
        if !resp.is_ok() {
            warn!("+SBDRB rejected");
            return Ok(None);
        }
        Ok(Some(command::unframe_binary(&cmd, &resp)?))
    }

    /// Inbound message as text. Binary content that is not UTF-8 reads
    /// as `None`.
    pub fn inbound_text(&mut self) -> Result<Option<String>, ModemError<T::Error>> {
        if !self.has_inbound()? {
            return Ok(None);
        }
        let resp = self.xfer("+SBDRT")?;
        if !resp.is_ok() {
            warn!("+SBDRT rejected");
            return Ok(None);
        }
        Ok(read_text(&resp))
    }

    pub fn clear_inbound(&mut self) -> Result<(), ModemError<T::Error>> {
        self.clear(Buffer::Inbound)
    }

    fn has_inbound(&mut self) -> Result<bool, ModemError<T::Error>> {
        Ok(self.status()?.ok().is_some_and(|s| s.has_inbound()))
    }

    /// Start an SBD session with the satellite network. `location` is
    /// passed through verbatim, e.g. `4043.9,-07400.3`; an empty one is
    /// the same as none.
    ///
    /// A delivered outbound message empties the outbound cache, as the
    /// modem empties its own buffer.
    pub fn satellite_transfer(
        &mut self,
        location: Option<&str>,
    ) -> Result<Query<TransferStatus>, ModemError<T::Error>> {
        let resp = match location {
            Some(loc) if !loc.is_empty() => self.xfer_arg("+SBDIX", loc)?,
            _ => self.xfer("+SBDIX")?,
        };
        let status = decode_query::<TransferStatus, _>("+SBDIX", &resp)?;
        match status {
            Query::Answered(s) => {
                if s.mo_accepted() {
                    info!("SBD session sent MSN {}", s.mo_msn);
                    self.data_out = None;
                } else {
                    warn!("SBD session failed with status {}", s.mo_status);
                }
            }
            Query::Failed => warn!("+SBDIX rejected"),
        }
        Ok(status)
    }

    pub fn status(&mut self) -> Result<Query<SbdStatus>, ModemError<T::Error>> {
        let resp = self.xfer("+SBDSX")?;
        decode_query::<SbdStatus, _>("+SBDSX", &resp)
    }

    pub fn model(&mut self) -> Result<Query<String>, ModemError<T::Error>> {
        self.text_query("+GMM", b"+GMM:")
    }

    /// Loop the outbound buffer into the inbound buffer. For exercising
    /// the receive path without a satellite.
    pub fn transfer_buffer(&mut self) -> Result<(), ModemError<T::Error>> {
        self.xfer("+SBDTC")?;
        Ok(())
    }

    /// Received signal strength in bars, 0 to 5.
    pub fn signal_quality(&mut self) -> Result<Query<u8>, ModemError<T::Error>> {
        let resp = self.xfer("+CSQ")?;
        number_query("+CSQ", b"+CSQ:", &resp)
    }

    /// Firmware revision report, one entry per line.
    pub fn revision(&mut self) -> Result<Query<Vec<String>>, ModemError<T::Error>> {
        let resp = self.xfer("+CGMR")?;
        if !resp.is_ok() {
            return Ok(Query::Failed);
        }
        Ok(Query::Answered(resp.body().map(lossy).collect()))
    }

    /// IMEI of the modem.
    pub fn serial_number(&mut self) -> Result<Query<String>, ModemError<T::Error>> {
        self.text_query("+CGSN", b"+CGSN:")
    }

    pub fn ring_alert(&mut self) -> Result<Query<bool>, ModemError<T::Error>> {
        let resp = self.xfer("+SBDMTA?")?;
        Ok(number_query::<u8, _>("+SBDMTA?", b"+SBDMTA:", &resp)?.map(|v| v == 1))
    }

    pub fn set_ring_alert(&mut self, enabled: bool) -> Result<(), ModemError<T::Error>> {
        let resp = self.xfer_arg("+SBDMTA", enabled as u8)?;
        expect_ok("+SBDMTA", &resp)
    }

    pub fn ring_indication(&mut self) -> Result<Query<RingIndication>, ModemError<T::Error>> {
        let resp = self.xfer("+CRIS")?;
        decode_query::<RingIndication, _>("+CRIS", &resp)
    }

    /// Iridium network time. `Failed` as well when the modem has not
    /// seen the network yet.
    pub fn system_time(&mut self) -> Result<Query<SystemTime>, ModemError<T::Error>> {
        let resp = self.xfer("-MSSTM")?;
        if let Some(line) = resp.find_prefixed(SystemTime::PREFIX) {
            if line.windows(10).any(|w| w == b"no network") {
                debug!("no network time available");
                return Ok(Query::Failed);
            }
        }
        decode_query::<SystemTime, _>("-MSSTM", &resp)
    }

    pub fn geolocation(&mut self) -> Result<Query<Geolocation>, ModemError<T::Error>> {
        let resp = self.xfer("-MSGEO")?;
        decode_query::<Geolocation, _>("-MSGEO", &resp)
    }

    /// Accumulated energy use in microamp-hours.
    pub fn energy_monitor(&mut self) -> Result<Query<u32>, ModemError<T::Error>> {
        let resp = self.xfer("+GEMON")?;
        number_query("+GEMON", b"+GEMON:", &resp)
    }

    pub fn set_energy_monitor(&mut self, microamp_hours: u32) -> Result<(), ModemError<T::Error>> {
        let resp = self.xfer_arg("+GEMON", microamp_hours)?;
        expect_ok("+GEMON", &resp)
    }

    /// Trimmed last value line, minus an optional `prefix`.
    fn text_query(
        &mut self,
        mnemonic: &str,
        prefix: &[u8],
    ) -> Result<Query<String>, ModemError<T::Error>> {
        let resp = self.xfer(mnemonic)?;
        if !resp.is_ok() {
            warn!("{} rejected", mnemonic);
            return Ok(Query::Failed);
        }
        let line = resp
            .last_value_line()
            .ok_or_else(|| malformed(mnemonic, &resp))?;
        let line = trim(line);
        let text = line.strip_prefix(prefix).unwrap_or(line);
        Ok(Query::Answered(lossy(text)))
    }
}

fn malformed(mnemonic: &str, resp: &Response) -> ProtocolError {
    ProtocolError::Malformed {
        command: String::from(mnemonic),
        line: lossy(&resp.concat()),
    }
}

fn expect_ok<E>(mnemonic: &str, resp: &Response) -> Result<(), ModemError<E>> {
    if resp.is_ok() {
        Ok(())
    } else {
        warn!("{} rejected", mnemonic);
        Err(ProtocolError::Rejected {
            command: String::from(mnemonic),
        }
        .into())
    }
}

fn decode_query<S, E>(mnemonic: &str, resp: &Response) -> Result<Query<S>, ModemError<E>>
where
    S: for<'a> Decode<'a, Error = DecodeError>,
{
    if !resp.is_ok() {
        debug!("{} answered {:?}", mnemonic, resp.terminal().map(lossy));
        return Ok(Query::Failed);
    }
    let line = resp
        .last_value_line()
        .ok_or_else(|| malformed(mnemonic, resp))?;
    let value = S::decode(line).map_err(|e| {
        warn!("{} reply not understood: {:?}", mnemonic, e);
        ProtocolError::Malformed {
            command: String::from(mnemonic),
            line: lossy(line),
        }
    })?;
    Ok(Query::Answered(value))
}

fn number_query<N, E>(mnemonic: &str, prefix: &[u8], resp: &Response) -> Result<Query<N>, ModemError<E>>
where
    N: core::str::FromStr,
{
    if !resp.is_ok() {
        return Ok(Query::Failed);
    }
    let line = resp
        .find_prefixed(prefix)
        .ok_or_else(|| malformed(mnemonic, resp))?;
    let value = decode_number(line, prefix).map_err(|_| ProtocolError::Malformed {
        command: String::from(mnemonic),
        line: lossy(line),
    })?;
    Ok(Query::Answered(value))
}

/// Text after `+SBDRT:` up to the closing `OK`.
fn read_text(resp: &Response) -> Option<String> {
    let raw = resp.concat();
    let marker = b"+SBDRT:";
    let start = raw.windows(marker.len()).position(|w| w == marker)? + marker.len();
    let end = raw.len() - resp.terminal().map_or(0, |t| t.len());
    let body = raw.get(start..end)?;
    core::str::from_utf8(trim(body)).ok().map(String::from)
}
