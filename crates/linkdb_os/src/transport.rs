#![forbid(unsafe_code)]

use std::fmt;

use linkdb_kernel_contracts::db_write::DbWriteRequest;

pub const DB_TRANSPORT_ERROR_MAX_LEN: usize = 256;

/// How the device answered the write currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Ack,
    Nak,
    Timeout,
}

impl WriteOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak => "device NAK",
            Self::Timeout => "device did not answer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTransportError {
    pub message: String,
}

impl DbTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        let msg = message.into();
        let bounded_msg = if msg.len() > DB_TRANSPORT_ERROR_MAX_LEN {
            msg.chars().take(DB_TRANSPORT_ERROR_MAX_LEN).collect::<String>()
        } else {
            msg
        };
        Self {
            message: bounded_msg,
        }
    }
}

impl fmt::Display for DbTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl std::error::Error for DbTransportError {}

/// Outbound half of the device link. `send` only queues the request; the
/// device's answer comes back later through
/// [`crate::device_db_sync::DeviceDbSyncRuntime::handle_write_outcome`].
/// Retries and timeouts are the transport's business.
pub trait DbWriteTransport {
    fn send(&mut self, request: &DbWriteRequest) -> Result<(), DbTransportError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoopbackMode {
    #[default]
    Recording,
    AlwaysFail {
        message: String,
    },
}

/// In-process transport that records every request. Useful for simulation
/// and for driving the sync runtime without hardware.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    mode: LoopbackMode,
    sent: Vec<DbWriteRequest>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_fail(message: &str) -> Self {
        Self {
            mode: LoopbackMode::AlwaysFail {
                message: message.to_string(),
            },
            sent: Vec::new(),
        }
    }

    pub fn set_mode(&mut self, mode: LoopbackMode) {
        self.mode = mode;
    }

    pub fn sent(&self) -> &[DbWriteRequest] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<DbWriteRequest> {
        std::mem::take(&mut self.sent)
    }
}

impl DbWriteTransport for LoopbackTransport {
    fn send(&mut self, request: &DbWriteRequest) -> Result<(), DbTransportError> {
        match &self.mode {
            LoopbackMode::Recording => {
                self.sent.push(request.clone());
                Ok(())
            }
            LoopbackMode::AlwaysFail { message } => Err(DbTransportError::new(message.clone())),
        }
    }
}
