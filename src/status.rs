//! Typed answers decoded from single response lines such as
//! `+SBDSX: 1, 23, 0, 0, 0, 0`.

use crate::Decode;
use crate::command::trim;

/// Outcome of a query that is allowed to fail softly: a modem on a
/// flaky link answering `ERROR` is expected, not exceptional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query<T> {
    Answered(T),
    /// Terminal line was not `OK`.
    Failed,
}

impl<T> Query<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Query::Answered(v) => Some(v),
            Query::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Query::Failed)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Query<U> {
        match self {
            Query::Answered(v) => Query::Answered(f(v)),
            Query::Failed => Query::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingPrefix,
    NotText,
    FieldCount { expected: usize, found: usize },
    BadField { index: usize },
}

/// Text after `prefix`, e.g. ` 0, 0` for `+SBDSX: 0, 0`.
fn value_text<'a>(data: &'a [u8], prefix: &[u8]) -> Result<&'a str, DecodeError> {
    let data = trim(data);
    let rest = data.strip_prefix(prefix).ok_or(DecodeError::MissingPrefix)?;
    core::str::from_utf8(rest).map(str::trim).map_err(|_| DecodeError::NotText)
}

fn decimal_fields<const N: usize>(data: &[u8], prefix: &[u8]) -> Result<[u16; N], DecodeError> {
    let text = value_text(data, prefix)?;
    let found = text.split(',').count();
    if found != N {
        return Err(DecodeError::FieldCount { expected: N, found });
    }
    let mut out = [0; N];
    for (index, (slot, field)) in out.iter_mut().zip(text.split(',')).enumerate() {
        *slot = field.trim().parse().map_err(|_| DecodeError::BadField { index })?;
    }
    Ok(out)
}

/// `+SBDSX` buffer occupancy and message sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbdStatus {
    /// 1 when the outbound buffer holds a message.
    pub mo_flag: u16,
    pub mo_msn: u16,
    /// 1 when the inbound buffer holds a message.
    pub mt_flag: u16,
    pub mt_msn: u16,
    pub ra_flag: u16,
    /// Messages queued at the gateway, as of the last session.
    pub msg_waiting: u16,
}

impl SbdStatus {
    pub const PREFIX: &'static [u8] = b"+SBDSX:";

    pub fn has_inbound(&self) -> bool {
        self.mt_flag == 1
    }

    pub fn as_tuple(&self) -> (u16, u16, u16, u16, u16, u16) {
        (
            self.mo_flag,
            self.mo_msn,
            self.mt_flag,
            self.mt_msn,
            self.ra_flag,
            self.msg_waiting,
        )
    }
}

impl<'a> Decode<'a> for SbdStatus {
    type Error = DecodeError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        let [mo_flag, mo_msn, mt_flag, mt_msn, ra_flag, msg_waiting] =
            decimal_fields(data, Self::PREFIX)?;
        Ok(SbdStatus {
            mo_flag,
            mo_msn,
            mt_flag,
            mt_msn,
            ra_flag,
            msg_waiting,
        })
    }
}

/// Highest `mo_status` that still means the outbound message went up.
pub const MO_ACCEPTED_MAX: u16 = 8;

/// `+SBDIX` outcome of one satellite session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub mo_status: u16,
    pub mo_msn: u16,
    /// 0 nothing to receive, 1 received, 2 mailbox check failed.
    pub mt_status: u16,
    pub mt_msn: u16,
    pub mt_length: u16,
    pub mt_queued: u16,
}

impl TransferStatus {
    pub const PREFIX: &'static [u8] = b"+SBDIX:";

    pub fn mo_accepted(&self) -> bool {
        self.mo_status <= MO_ACCEPTED_MAX
    }

    pub fn mt_received(&self) -> bool {
        self.mt_status == 1
    }

    pub fn as_tuple(&self) -> (u16, u16, u16, u16, u16, u16) {
        (
            self.mo_status,
            self.mo_msn,
            self.mt_status,
            self.mt_msn,
            self.mt_length,
            self.mt_queued,
        )
    }
}

impl<'a> Decode<'a> for TransferStatus {
    type Error = DecodeError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        let [mo_status, mo_msn, mt_status, mt_msn, mt_length, mt_queued] =
            decimal_fields(data, Self::PREFIX)?;
        Ok(TransferStatus {
            mo_status,
            mo_msn,
            mt_status,
            mt_msn,
            mt_length,
            mt_queued,
        })
    }
}

/// Unix time of the start of the current Iridium era,
/// 2014-05-11 14:23:55 UTC.
pub const IRIDIUM_EPOCH_UNIX_SECS: u64 = 1_399_818_235;
/// Length of one network time tick.
pub const TICK_MILLIS: u64 = 90;

/// Iridium network time from `-MSSTM`, in 90 ms ticks since the
/// Iridium epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTime {
    pub ticks: u32,
}

impl SystemTime {
    pub const PREFIX: &'static [u8] = b"-MSSTM:";

    pub fn millis_since_epoch(&self) -> u64 {
        self.ticks as u64 * TICK_MILLIS
    }

    pub fn unix_millis(&self) -> u64 {
        IRIDIUM_EPOCH_UNIX_SECS * 1000 + self.millis_since_epoch()
    }
}

impl<'a> Decode<'a> for SystemTime {
    type Error = DecodeError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        let text = value_text(data, Self::PREFIX)?;
        let ticks = u32::from_str_radix(text, 16).map_err(|_| DecodeError::BadField { index: 0 })?;
        Ok(SystemTime { ticks })
    }
}

/// `-MSGEO` rough position of the modem, earth-centred coordinates in
/// kilometres, plus the network time the fix was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geolocation {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub timestamp: SystemTime,
}

impl Geolocation {
    pub const PREFIX: &'static [u8] = b"-MSGEO:";
}

impl<'a> Decode<'a> for Geolocation {
    type Error = DecodeError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        let text = value_text(data, Self::PREFIX)?;
        let mut fields = [""; 4];
        let found = text.split(',').count();
        if found != fields.len() {
            return Err(DecodeError::FieldCount { expected: 4, found });
        }
        for (slot, field) in fields.iter_mut().zip(text.split(',')) {
            *slot = field.trim();
        }
        let coord = |index: usize| {
            fields[index]
                .parse::<i32>()
                .map_err(|_| DecodeError::BadField { index })
        };
        let ticks = u32::from_str_radix(fields[3], 16).map_err(|_| DecodeError::BadField { index: 3 })?;
        Ok(Geolocation {
            x: coord(0)?,
            y: coord(1)?,
            z: coord(2)?,
            timestamp: SystemTime { ticks },
        })
    }
}

/// `+CRIS` ring indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndication {
    /// Telephony ring indication.
    pub tri: u16,
    /// SBD ring indication, 1 when a ring alert was received.
    pub sri: u16,
}

impl RingIndication {
    pub const PREFIX: &'static [u8] = b"+CRIS:";

    pub fn sbd_ring(&self) -> bool {
        self.sri == 1
    }
}

impl<'a> Decode<'a> for RingIndication {
    type Error = DecodeError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        let [tri, sri] = decimal_fields(data, Self::PREFIX)?;
        Ok(RingIndication { tri, sri })
    }
}

/// Single decimal after `prefix`, e.g. `+CSQ:4`.
pub fn decode_number<T: core::str::FromStr>(data: &[u8], prefix: &[u8]) -> Result<T, DecodeError> {
    value_text(data, prefix)?
        .parse()
        .map_err(|_| DecodeError::BadField { index: 0 })
}
