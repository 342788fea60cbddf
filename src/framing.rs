//! Length-prefixed message framing shared by both transports and the client channel.
//!
//! A logical message travels as one or more parts. Each part carries a header: a 4-byte magic,
//! a `u32` protocol version and a `u32` total header size (that much is the fixed minimum), then,
//! for version 1, a `u32` part payload size and a one-byte more-data flag. All integers are
//! big-endian. Headers larger than the fields known to this version are tolerated; the surplus
//! bytes are skipped. The assembler joins parts until one arrives with the more-data flag clear.

#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use {
    crate::{error::Error, transport::MAX_MESSAGE_SIZE},
    std::{collections::VecDeque, fmt, mem::take},
};

const MAGIC: [u8; 4] = *b"MPIP";
pub(crate) const PROTOCOL_VERSION: u32 = 1;
/// Bytes needed before the total header size is known.
pub(crate) const MIN_HEADER_SIZE: usize = 12;
/// Size of a header this version emits.
pub(crate) const HEADER_SIZE_V1: usize = 17;
const MAX_HEADER_SIZE: usize = 64;
/// Largest payload one part may carry. Equal to the whole-message limit, so writers always emit
/// a single part; the reader nonetheless accepts multi-part messages within the total limit.
pub(crate) const MAX_PART_SIZE: usize = MAX_MESSAGE_SIZE;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameError {
    BadMagic,
    BadVersion(u32),
    BadHeaderSize(usize),
    BadPartSize(usize),
    MessageTooBig(usize),
    Corrupted,
}
impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => f.write_str("bad magic number"),
            Self::BadVersion(v) => write!(f, "unsupported protocol version {v}"),
            Self::BadHeaderSize(n) => write!(f, "invalid header size {n}"),
            Self::BadPartSize(n) => write!(f, "invalid part size {n}"),
            Self::MessageTooBig(n) => {
                write!(f, "message of {n} bytes exceeds the {MAX_MESSAGE_SIZE}-byte limit")
            }
            Self::Corrupted => f.write_str("reader state corrupted by previous fatal error"),
        }
    }
}
impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BadPartSize(size) if size > MAX_PART_SIZE => {
                Error::TooBig { size, max: MAX_PART_SIZE }
            }
            FrameError::MessageTooBig(size) => Error::TooBig { size, max: MAX_MESSAGE_SIZE },
            els => Error::Malformed(els.to_string()),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct MessageHeader {
    version: u32,
    header_size: usize,
    part_size: usize,
    more_data: bool,
}
impl MessageHeader {
    pub fn new(part_size: usize, more_data: bool) -> Self {
        Self { version: PROTOCOL_VERSION, header_size: HEADER_SIZE_V1, part_size, more_data }
    }
    pub fn part_size(&self) -> usize { self.part_size }
    pub fn more_data(&self) -> bool { self.more_data }
    /// Bytes of header left to read once the fixed minimum has been parsed.
    pub fn rest_len(&self) -> usize { self.header_size - MIN_HEADER_SIZE }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE_V1] {
        let mut buf = [0; HEADER_SIZE_V1];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..12].copy_from_slice(&(self.header_size as u32).to_be_bytes());
        buf[12..16].copy_from_slice(&(self.part_size as u32).to_be_bytes());
        buf[16] = self.more_data as u8;
        buf
    }

    /// Parses the fixed minimum. Part fields stay at their defaults until [`parse_rest`].
    ///
    /// [`parse_rest`]: MessageHeader::parse_rest
    pub fn parse_min(buf: &[u8; MIN_HEADER_SIZE]) -> Result<Self, FrameError> {
        if buf[0..4] != MAGIC {
            return Err(FrameError::BadMagic);
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if version < 1 {
            return Err(FrameError::BadVersion(version));
        }
        let header_size = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;
        if !(HEADER_SIZE_V1..=MAX_HEADER_SIZE).contains(&header_size) {
            return Err(FrameError::BadHeaderSize(header_size));
        }
        Ok(Self { version, header_size, part_size: 0, more_data: false })
    }

    /// Fills in the version-1 fields from the remainder of the header. `rest` must be exactly
    /// [`rest_len`](MessageHeader::rest_len) bytes; bytes past the known fields are ignored.
    pub fn parse_rest(&mut self, rest: &[u8]) -> Result<(), FrameError> {
        debug_assert_eq!(rest.len(), self.rest_len(), "caller must buffer the whole header");
        let size_bytes: [u8; 4] =
            rest.get(0..4).and_then(|s| s.try_into().ok()).ok_or(FrameError::Corrupted)?;
        let part_size = u32::from_be_bytes(size_bytes) as usize;
        if part_size == 0 || part_size > MAX_PART_SIZE {
            return Err(FrameError::BadPartSize(part_size));
        }
        self.part_size = part_size;
        self.more_data = *rest.get(4).ok_or(FrameError::Corrupted)? != 0;
        Ok(())
    }
}

/// Frames a whole payload as a single part.
pub(crate) fn encode_message(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::TooBig { size: payload.len(), max: MAX_MESSAGE_SIZE });
    }
    if payload.is_empty() {
        return Err(Error::Malformed("empty message".into()));
    }
    let mut framed = Vec::with_capacity(HEADER_SIZE_V1 + payload.len());
    framed.extend_from_slice(&MessageHeader::new(payload.len(), false).to_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReadState {
    NewMessage,
    MinHeaderRead,
    FullHeaderRead,
    Error,
}

/// Incremental message assembler. Bytes go in via [`consume`] in arbitrarily sized chunks;
/// completed logical messages come out of [`next_message`]. Once a frame error has been reported
/// the reader refuses all further input until [`reset`].
///
/// [`consume`]: MessageReader::consume
/// [`next_message`]: MessageReader::next_message
/// [`reset`]: MessageReader::reset
#[derive(Debug)]
pub(crate) struct MessageReader {
    state: ReadState,
    min_buf: Vec<u8>,
    rest_buf: Vec<u8>,
    header: Option<MessageHeader>,
    part_buf: Vec<u8>,
    parts: Vec<Vec<u8>>,
    assembled: usize,
    complete: VecDeque<Vec<u8>>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self {
            state: ReadState::NewMessage,
            min_buf: Vec::with_capacity(MIN_HEADER_SIZE),
            rest_buf: Vec::new(),
            header: None,
            part_buf: Vec::new(),
            parts: Vec::new(),
            assembled: 0,
            complete: VecDeque::new(),
        }
    }

    /// Discards all partial state, including undelivered completed messages.
    pub fn reset(&mut self) { *self = Self::new(); }

    pub fn next_message(&mut self) -> Option<Vec<u8>> { self.complete.pop_front() }

    pub fn consume(&mut self, data: &[u8]) -> Result<(), FrameError> {
        let r = self.consume_inner(data);
        if r.is_err() {
            self.state = ReadState::Error;
        }
        r
    }

    fn consume_inner(&mut self, mut data: &[u8]) -> Result<(), FrameError> {
        while !data.is_empty() {
            match self.state {
                ReadState::NewMessage => {
                    fill(&mut self.min_buf, MIN_HEADER_SIZE, &mut data);
                    if self.min_buf.len() == MIN_HEADER_SIZE {
                        let min: &[u8; MIN_HEADER_SIZE] =
                            self.min_buf.as_slice().try_into().unwrap();
                        self.header = Some(MessageHeader::parse_min(min)?);
                        self.min_buf.clear();
                        self.rest_buf.clear();
                        self.state = ReadState::MinHeaderRead;
                    }
                }
                ReadState::MinHeaderRead => {
                    let header = self.header.as_mut().ok_or(FrameError::Corrupted)?;
                    fill(&mut self.rest_buf, header.rest_len(), &mut data);
                    if self.rest_buf.len() == header.rest_len() {
                        header.parse_rest(&self.rest_buf)?;
                        let total = self.assembled + header.part_size();
                        if total > MAX_MESSAGE_SIZE {
                            return Err(FrameError::MessageTooBig(total));
                        }
                        self.part_buf = Vec::with_capacity(header.part_size());
                        self.state = ReadState::FullHeaderRead;
                    }
                }
                ReadState::FullHeaderRead => {
                    let header = self.header.ok_or(FrameError::Corrupted)?;
                    fill(&mut self.part_buf, header.part_size(), &mut data);
                    if self.part_buf.len() == header.part_size() {
                        self.assembled += self.part_buf.len();
                        self.parts.push(take(&mut self.part_buf));
                        if !header.more_data() {
                            self.complete.push_back(join_parts(take(&mut self.parts)));
                            self.assembled = 0;
                        }
                        self.header = None;
                        self.state = ReadState::NewMessage;
                    }
                }
                ReadState::Error => return Err(FrameError::Corrupted),
            }
        }
        Ok(())
    }
}

/// Moves bytes from the front of `data` into `buf` until `buf` holds `target` bytes or `data`
/// runs out, advancing `data` past what was taken.
fn fill(buf: &mut Vec<u8>, target: usize, data: &mut &[u8]) {
    let n = (target - buf.len()).min(data.len());
    let (taken, rest) = data.split_at(n);
    buf.extend_from_slice(taken);
    *data = rest;
}

fn join_parts(mut parts: Vec<Vec<u8>>) -> Vec<u8> {
    if parts.len() == 1 {
        return parts.pop().unwrap();
    }
    let mut joined = Vec::with_capacity(parts.iter().map(Vec::len).sum());
    for part in parts {
        joined.extend_from_slice(&part);
    }
    joined
}
