use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::checksum::crc16_ccitt_false;
use super::commands::Command;


pub const FRAME_MARKER: [u8; 2] = *b"@@";
pub const FRAME_TERMINATOR: [u8; 2] = *b"\r\n";

pub const RAW_ID_SIZE: usize = 7;

/// marker, length, id, command
const HEADER_SIZE: usize = 2 + 2 + RAW_ID_SIZE + 2;

/// checksum, terminator
const TRAILER_SIZE: usize = 2 + 2;

pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// The length field is 16 bits wide and covers the whole frame.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

pub type RawId = [u8; RAW_ID_SIZE];


#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated (needed {needed} bytes, {available} available)")]
    Truncated {
        needed: usize,
        available: usize,
    },
    #[error("frame marker not found")]
    BadMarker,
    #[error("frame terminator not found")]
    BadTerminator,
    #[error("invalid frame length {0}")]
    BadLength(usize),
    #[error("invalid checksum (expected {expected:04x}, actual: {actual:04x})")]
    InvalidChecksum {
        expected: u16,
        actual: u16,
    },
}


/// One message on the wire:
/// `@@ | length:u16 | id:7 | command:u16 | payload | crc16:u16 | \r\n`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Packed device identifier, echoed verbatim in replies.
    pub id: RawId,

    pub command: u16,

    /// Everything between the command and the checksum.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: RawId, command: impl Into<u16>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// The known command this frame carries, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_repr(self.command)
    }

    /// Split a complete frame buffer into its header fields and payload.
    ///
    /// Neither the marker, the length field nor the checksum are validated here;
    /// [`MeiligaoCodec`] has already done so for frames read off a stream.
    pub fn parse(mut buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(FrameError::Truncated { needed: MIN_FRAME_SIZE, available: buf.len() });
        }

        buf.advance(FRAME_MARKER.len());
        buf.get_u16(); // length

        let mut id = [0; RAW_ID_SIZE];
        buf.copy_to_slice(&mut id);

        let command = buf.get_u16();

        let payload = Bytes::copy_from_slice(&buf[..buf.len() - TRAILER_SIZE]);

        Ok(Self { id, command, payload })
    }

    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    /// Append the wire representation of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = self.encoded_len();
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::BadLength(len));
        }

        dst.reserve(len);

        let start = dst.len();

        dst.put_slice(&FRAME_MARKER);
        dst.put_u16(len as u16);
        dst.put_slice(&self.id);
        dst.put_u16(self.command);
        dst.put_slice(&self.payload);

        let checksum = crc16_ccitt_false(&dst[start..]);
        dst.put_u16(checksum);
        dst.put_slice(&FRAME_TERMINATOR);

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}


/// Decode bytes as US-ASCII. Bytes outside the ASCII range become U+FFFD.
pub fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect()
}


/// Splits a device's TCP byte stream into [`Frame`]s and writes reply frames.
#[derive(Debug, Default)]
pub struct MeiligaoCodec {
    /// junk bytes skipped since the last good frame
    skipped: usize,
}

impl MeiligaoCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

enum Framing {
    NeedMoreData,
    Resync(FrameError),
    Corrupted {
        len: usize,
        error: FrameError,
    },
}

fn try_read_frame(src: &mut BytesMut) -> Result<Frame, Framing> {
    let seen = src.len().min(FRAME_MARKER.len());
    if src[..seen] != FRAME_MARKER[..seen] {
        return Err(Framing::Resync(FrameError::BadMarker));
    }

    if src.len() < 4 {
        return Err(Framing::NeedMoreData);
    }

    let len = u16::from_be_bytes([src[2], src[3]]) as usize;
    if len < MIN_FRAME_SIZE {
        return Err(Framing::Resync(FrameError::BadLength(len)));
    }

    if src.len() < len {
        src.reserve(len - src.len());
        return Err(Framing::NeedMoreData);
    }

    if src[len - 2..len] != FRAME_TERMINATOR {
        return Err(Framing::Resync(FrameError::BadTerminator));
    }

    let expected = crc16_ccitt_false(&src[..len - TRAILER_SIZE]);
    let actual = u16::from_be_bytes([src[len - 4], src[len - 3]]);
    if expected != actual {
        return Err(Framing::Corrupted {
            len,
            error: FrameError::InvalidChecksum { expected, actual },
        });
    }

    let frame = src.split_to(len);

    Frame::parse(&frame).map_err(Framing::Resync)
}

impl Decoder for MeiligaoCodec {
    type Item = Frame;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match try_read_frame(src) {
                Ok(frame) => {
                    if self.skipped > 0 {
                        tracing::warn!(skipped = self.skipped, "resynchronized on frame marker");
                        self.skipped = 0;
                    }

                    return Ok(Some(frame));
                }

                Err(Framing::NeedMoreData) => return Ok(None),

                // not at a frame start, or a marker inside junk: skip a byte and look again
                Err(Framing::Resync(error)) => {
                    tracing::trace!(%error, "skipping byte");
                    src.advance(1);
                    self.skipped += 1;
                }

                Err(Framing::Corrupted { len, error }) => {
                    tracing::warn!(%error, len, "dropping corrupted frame");
                    src.advance(len);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if !src.is_empty() {
            tracing::warn!(len = src.len(), "discarding incomplete frame at end of stream");
            src.clear();
        }

        Ok(None)
    }
}

impl Encoder<Frame> for MeiligaoCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame
            .encode(dst)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidInput, error))
    }
}
