use alloc::string::String;

/// Which of the two modem-side SBD buffers an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    /// Mobile originated, the message waiting to go up.
    Outbound,
    /// Mobile terminated, the last message that came down.
    Inbound,
}

/// The caller broke a precondition. Always reported before any byte is
/// written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    MessageTooLong { max: usize, found: usize },
    TextTooLong { max: usize, found: usize },
    CommandTooLong { max: usize, found: usize },
}

/// The modem answered, but the answer says the operation failed or
/// could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    ClearFailed { buffer: Buffer },
    WriteFailed { status: u8 },
    /// Terminal line was `ERROR` on a command that has no soft-fail path.
    Rejected { command: String },
    Malformed { command: String, line: String },
    ChecksumMismatch { calculated: u16, found: u16 },
}

#[derive(Debug)]
pub enum ModemError<E> {
    Usage(UsageError),
    Protocol(ProtocolError),
    Transport(E),
    /// The configured number of consecutive empty reads elapsed while
    /// waiting for the reply to `command`.
    Timeout { command: String },
}

impl<E> From<UsageError> for ModemError<E> {
    fn from(value: UsageError) -> Self {
        ModemError::Usage(value)
    }
}

impl<E> From<ProtocolError> for ModemError<E> {
    fn from(value: ProtocolError) -> Self {
        ModemError::Protocol(value)
    }
}

impl<E> ModemError<E> {
    pub fn is_usage(&self) -> bool {
        matches!(self, ModemError::Usage(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ModemError::Protocol(_))
    }
}
