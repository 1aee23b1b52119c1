//! Wire protocol of the exploration fleet.
//!
//! Every message is a single tag byte followed by an opaque payload. The
//! payload only carries meaning for `START_PREFIX_TASK` (the prefix bytes)
//! and `OFFLOAD_RESP` (the stolen prefix, or a short sentinel); all other
//! tags are pure signals padded with one byte so no frame is ever empty.
//!
//! Tag values are part of the protocol and must not be reordered.

use thiserror::Error;

pub const TAG_START_PREFIX_TASK: u8 = 0;
pub const TAG_KILL: u8 = 1;
pub const TAG_FINISH: u8 = 2;
pub const TAG_OFFLOAD: u8 = 3;
pub const TAG_OFFLOAD_RESP: u8 = 4;
pub const TAG_BUG_FOUND: u8 = 5;
pub const TAG_TIMEOUT: u8 = 6;
pub const TAG_NORMAL_TASK: u8 = 7;
pub const TAG_KILL_COMP: u8 = 8;
pub const TAG_READY_TO_OFFLOAD: u8 = 9;
pub const TAG_NOT_READY_TO_OFFLOAD: u8 = 10;

/// Pad byte carried by tag-only messages.
pub const PAD_BYTE: u8 = b'x';

/// An `OFFLOAD_RESP` payload at or below this length means the donor had
/// nothing useful to release. Protocol constant; the exact value is
/// historical but both sides must agree on it.
pub const OFFLOAD_EMPTY_THRESHOLD: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty message frame")]
    EmptyFrame,
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
}

/// The fixed message set exchanged between master, workers and timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// M→W: begin exploration constrained to the given prefix.
    StartPrefixTask { prefix: Vec<u8> },
    /// M→W: terminate cleanly.
    Kill,
    /// W→M: task finished without finding a bug.
    Finish,
    /// M→W: request the worker to emit a sub-prefix.
    Offload,
    /// W→M: reply to an `Offload`; short payloads are the empty sentinel.
    OffloadResp { payload: Vec<u8> },
    /// W→M: a reportable error was found.
    BugFound,
    /// T→M: the global deadline elapsed.
    Timeout,
    /// M→W: begin unbounded exploration (degenerate mode).
    NormalTask,
    /// W→M: acknowledges kill completion.
    KillComp,
    /// W→M: the worker has harvestable sub-work.
    ReadyToOffload,
    /// W→M: retraction of a prior ready signal.
    NotReadyToOffload,
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::StartPrefixTask { .. } => TAG_START_PREFIX_TASK,
            Message::Kill => TAG_KILL,
            Message::Finish => TAG_FINISH,
            Message::Offload => TAG_OFFLOAD,
            Message::OffloadResp { .. } => TAG_OFFLOAD_RESP,
            Message::BugFound => TAG_BUG_FOUND,
            Message::Timeout => TAG_TIMEOUT,
            Message::NormalTask => TAG_NORMAL_TASK,
            Message::KillComp => TAG_KILL_COMP,
            Message::ReadyToOffload => TAG_READY_TO_OFFLOAD,
            Message::NotReadyToOffload => TAG_NOT_READY_TO_OFFLOAD,
        }
    }

    /// Short tag name used in traces and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::StartPrefixTask { .. } => "START_PREFIX_TASK",
            Message::Kill => "KILL",
            Message::Finish => "FINISH",
            Message::Offload => "OFFLOAD",
            Message::OffloadResp { .. } => "OFFLOAD_RESP",
            Message::BugFound => "BUG_FOUND",
            Message::Timeout => "TIMEOUT",
            Message::NormalTask => "NORMAL_TASK",
            Message::KillComp => "KILL_COMP",
            Message::ReadyToOffload => "READY_TO_OFFLOAD",
            Message::NotReadyToOffload => "NOT_READY_TO_OFFLOAD",
        }
    }

    /// Builds an offload reply: the harvested prefix, or the one-byte
    /// sentinel when the donor has nothing to give.
    pub fn offload_resp(prefix: Option<Vec<u8>>) -> Message {
        match prefix {
            Some(payload) if payload.len() > OFFLOAD_EMPTY_THRESHOLD => {
                Message::OffloadResp { payload }
            }
            // A harvested prefix at or below the threshold is
            // indistinguishable from the sentinel, so send the sentinel.
            _ => Message::OffloadResp {
                payload: vec![PAD_BYTE],
            },
        }
    }

    /// Interprets an `OffloadResp` payload: `Some(prefix)` for real work,
    /// `None` for the empty sentinel.
    pub fn offload_payload(payload: &[u8]) -> Option<&[u8]> {
        if payload.len() > OFFLOAD_EMPTY_THRESHOLD {
            Some(payload)
        } else {
            None
        }
    }

    /// Serializes to a frame body: `[tag][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![self.tag()];
        match self {
            Message::StartPrefixTask { prefix } => body.extend_from_slice(prefix),
            Message::OffloadResp { payload } => body.extend_from_slice(payload),
            _ => body.push(PAD_BYTE),
        }
        body
    }

    /// Parses a frame body produced by [`Message::encode`].
    pub fn decode(body: &[u8]) -> Result<Message, ProtocolError> {
        let (&tag, payload) = body.split_first().ok_or(ProtocolError::EmptyFrame)?;
        let msg = match tag {
            TAG_START_PREFIX_TASK => Message::StartPrefixTask {
                prefix: payload.to_vec(),
            },
            TAG_OFFLOAD_RESP => Message::OffloadResp {
                payload: payload.to_vec(),
            },
            TAG_KILL => Message::Kill,
            TAG_FINISH => Message::Finish,
            TAG_OFFLOAD => Message::Offload,
            TAG_BUG_FOUND => Message::BugFound,
            TAG_TIMEOUT => Message::Timeout,
            TAG_NORMAL_TASK => Message::NormalTask,
            TAG_KILL_COMP => Message::KillComp,
            TAG_READY_TO_OFFLOAD => Message::ReadyToOffload,
            TAG_NOT_READY_TO_OFFLOAD => Message::NotReadyToOffload,
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(msg)
    }
}
