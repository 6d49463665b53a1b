//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding
//!
//! Each chunk is a hex size line (extensions after `;` are ignored), the data and a
//! CRLF. A zero sized chunk starts the trailer section, which is read and dropped up
//! to its terminating empty line.

use std::cmp;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

/// Longest size or trailer line accepted
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Waiting for a chunk size line
    Size,
    /// Inside chunk data, with this many bytes left
    Data(u64),
    /// Waiting for the CRLF closing chunk data
    DataEnd,
    /// Reading trailer lines after the last chunk
    Trailer,
    /// The terminating empty line was read
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkedState::Size }
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { ChunkedState::Trailer } else { ChunkedState::Data(size) };
                }

                ChunkedState::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = cmp::min(remaining, src.len() as u64);
                    let bytes = src.split_to(len as usize).freeze();

                    let remaining = remaining - len;
                    self.state = if remaining == 0 { ChunkedState::DataEnd } else { ChunkedState::Data(remaining) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                ChunkedState::DataEnd => {
                    match src.first() {
                        None => return Ok(None),
                        Some(b'\n') => src.advance(1),
                        Some(b'\r') => match src.get(1) {
                            None => return Ok(None),
                            Some(b'\n') => src.advance(2),
                            Some(_) => return Err(ParseError::invalid_body("chunk data not followed by CRLF")),
                        },
                        Some(_) => return Err(ParseError::invalid_body("chunk data longer than its declared size")),
                    }
                    self.state = ChunkedState::Size;
                }

                ChunkedState::Trailer => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkedState::End;
                    }
                }

                ChunkedState::End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
            }
        }
    }
}

/// Takes one line off `src` without its line ending, `None` if no full line is buffered.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    let Some(lf) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > MAX_LINE_BYTES {
            return Err(ParseError::invalid_body("chunk line too long"));
        }
        return Ok(None);
    };

    let mut line = src.split_to(lf + 1);
    line.truncate(lf);
    if line.last() == Some(&b'\r') {
        line.truncate(lf - 1);
    }
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let size = match line.iter().position(|b| *b == b';') {
        Some(extension) => &line[..extension],
        None => line,
    };
    let size = size.trim_ascii();

    if size.is_empty() {
        return Err(ParseError::invalid_body("missing chunk size"));
    }

    size.iter().try_fold(0u64, |acc, b| {
        let digit = (*b as char).to_digit(16).ok_or_else(|| ParseError::invalid_body("invalid chunk size"))?;
        acc.checked_mul(16)
            .and_then(|acc| acc.checked_add(digit as u64))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))
    })
}
