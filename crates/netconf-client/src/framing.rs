// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Codec to split a NETCONF byte stream into messages.
//!
//! Two framings are supported:
//! * End-of-message framing of NETCONF 1.0, every message is terminated by
//!   `]]>]]>`. This framing is always used for the `<hello>` exchange.
//! * Chunked framing of [RFC 6242](https://datatracker.ietf.org/doc/html/rfc6242),
//!   used once both peers advertised `urn:ietf:params:netconf:base:1.1`.

use tokio_util::{
    bytes::{Buf, BytesMut},
    codec::{Decoder, Encoder},
};

pub const END_OF_MESSAGE: &str = "]]>]]>";
const CHUNK_START: &str = "\n#";
const MESSAGE_TERMINATOR: &str = "\n##\n";

/// Maximum chunk size as per RFC 6242
const MAX_CHUNK_SIZE: usize = 4294967295;

/// Maximum length of chunk size in characters
const MAX_CHUNK_SIZE_LEN: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, strum_macros::Display)]
pub enum Framing {
    #[default]
    #[strum(to_string = "end-of-message")]
    EndOfMessage,

    #[strum(to_string = "chunked")]
    Chunked,
}

#[derive(Debug, strum_macros::Display)]
pub enum CodecError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    IO(std::io::Error),

    #[strum(to_string = "UTF decoding error: `{0}`")]
    Utf(std::string::FromUtf8Error),

    #[strum(to_string = "Invalid chunk header: `{0}`")]
    InvalidChunkHeader(String),

    #[strum(to_string = "Chunked message without any chunk")]
    EmptyChunkedMessage,
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> CodecError {
        CodecError::IO(err)
    }
}

impl From<std::string::FromUtf8Error> for CodecError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Utf(value)
    }
}

impl PartialEq for CodecError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IO(_), Self::IO(_)) => true,
            (Self::Utf(v1), Self::Utf(v2)) => v1.eq(v2),
            (Self::InvalidChunkHeader(v1), Self::InvalidChunkHeader(v2)) => v1.eq(v2),
            (Self::EmptyChunkedMessage, Self::EmptyChunkedMessage) => true,
            _ => false,
        }
    }
}

/// NetconfCodec turns a byte stream into complete NETCONF messages and
/// frames outgoing messages according to the active [Framing].
#[derive(Debug, Default)]
pub struct NetconfCodec {
    framing: Framing,
    /// Data of the chunks received so far for the current message
    buf: BytesMut,
    /// Offset where the next search for the end-of-message marker starts
    scan_offset: usize,
}

impl NetconfCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_framing(framing: Framing) -> Self {
        Self {
            framing,
            buf: BytesMut::new(),
            scan_offset: 0,
        }
    }

    pub const fn framing(&self) -> Framing {
        self.framing
    }

    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
        self.scan_offset = 0;
    }

    fn decode_end_of_message(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let marker = END_OF_MESSAGE.as_bytes();
        if src.len() < marker.len() {
            return Ok(None);
        }
        let start = self.scan_offset.min(src.len());
        let pos = src[start..]
            .windows(marker.len())
            .position(|w| w == marker)
            .map(|pos| pos + start);
        match pos {
            Some(pos) => {
                let data = src.split_to(pos);
                src.advance(marker.len());
                self.scan_offset = 0;
                let message = String::from_utf8(data.to_vec())?;
                if tracing::enabled!(tracing::Level::TRACE) {
                    tracing::trace!("Decoded end-of-message framed message: `{message}`");
                }
                Ok(Some(message))
            }
            None => {
                // The tail may hold the beginning of a marker, so rescan it
                // once more data has arrived
                self.scan_offset = src.len().saturating_sub(marker.len() - 1);
                Ok(None)
            }
        }
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        loop {
            if src.len() < CHUNK_START.len() + 1 {
                return Ok(None);
            }
            if !src.starts_with(CHUNK_START.as_bytes()) {
                return Err(CodecError::InvalidChunkHeader(
                    String::from_utf8_lossy(&src[..CHUNK_START.len()]).to_string(),
                ));
            }

            // End of chunks
            if src[CHUNK_START.len()] == b'#' {
                if src.len() < MESSAGE_TERMINATOR.len() {
                    return Ok(None);
                }
                if !src.starts_with(MESSAGE_TERMINATOR.as_bytes()) {
                    return Err(CodecError::InvalidChunkHeader(
                        String::from_utf8_lossy(&src[..MESSAGE_TERMINATOR.len()]).to_string(),
                    ));
                }
                src.advance(MESSAGE_TERMINATOR.len());
                if self.buf.is_empty() {
                    return Err(CodecError::EmptyChunkedMessage);
                }
                let data = self.buf.split();
                let message = String::from_utf8(data.to_vec())?;
                if tracing::enabled!(tracing::Level::TRACE) {
                    tracing::trace!("Decoded chunked message: `{message}`");
                }
                return Ok(Some(message));
            }

            // Find the end of chunk size field
            let size_start = CHUNK_START.len();
            let search_end = src.len().min(size_start + MAX_CHUNK_SIZE_LEN + 1);
            let size_end = match src[size_start..search_end].iter().position(|&b| b == b'\n') {
                Some(pos) => size_start + pos,
                None if search_end - size_start > MAX_CHUNK_SIZE_LEN => {
                    return Err(CodecError::InvalidChunkHeader(
                        String::from_utf8_lossy(&src[..search_end]).to_string(),
                    ));
                }
                None => return Ok(None),
            };

            let size_field = &src[size_start..size_end];
            let valid = size_field.first().is_some_and(|b| (b'1'..=b'9').contains(b))
                && size_field.iter().all(u8::is_ascii_digit);
            let chunk_size = if valid {
                std::str::from_utf8(size_field)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .filter(|size| *size <= MAX_CHUNK_SIZE)
            } else {
                None
            };
            let chunk_size = match chunk_size {
                Some(size) => size,
                None => {
                    return Err(CodecError::InvalidChunkHeader(
                        String::from_utf8_lossy(&src[..=size_end]).to_string(),
                    ))
                }
            };

            let chunk_start_pos = size_end + 1;
            if src.len() < chunk_start_pos + chunk_size {
                return Ok(None);
            }
            self.buf
                .extend_from_slice(&src[chunk_start_pos..chunk_start_pos + chunk_size]);
            src.advance(chunk_start_pos + chunk_size);
        }
    }
}

impl Decoder for NetconfCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::EndOfMessage => self.decode_end_of_message(src),
            Framing::Chunked => self.decode_chunked(src),
        }
    }
}

impl Encoder<String> for NetconfCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.framing {
            Framing::EndOfMessage => {
                dst.reserve(item.len() + END_OF_MESSAGE.len());
                dst.extend_from_slice(item.as_bytes());
                dst.extend_from_slice(END_OF_MESSAGE.as_bytes());
            }
            Framing::Chunked => {
                if item.is_empty() {
                    return Err(CodecError::EmptyChunkedMessage);
                }
                let size = item.len();
                dst.extend_from_slice(format!("{CHUNK_START}{size}\n").as_bytes());
                dst.extend_from_slice(item.as_bytes());
                dst.extend_from_slice(MESSAGE_TERMINATOR.as_bytes());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn encode(codec: &mut NetconfCodec, message: &str) -> BytesMut {
        let mut dst = BytesMut::new();
        codec
            .encode(message.to_string(), &mut dst)
            .expect("failed to encode");
        dst
    }

    #[test]
    fn test_end_of_message_ok() {
        let mut codec = NetconfCodec::new();
        let mut src = BytesMut::from("<ok/>]]>]]>");
        assert_eq!(codec.decode(&mut src), Ok(Some("<ok/>".to_string())));
        assert!(src.is_empty());
        assert_eq!(codec.decode(&mut src), Ok(None));
    }

    #[test]
    fn test_end_of_message_encode() {
        let mut codec = NetconfCodec::new();
        assert_eq!(&encode(&mut codec, "a frame")[..], b"a frame]]>]]>");
    }

    #[test]
    fn test_chunked_encode() {
        let mut codec = NetconfCodec::with_framing(Framing::Chunked);
        assert_eq!(&encode(&mut codec, "a frame")[..], b"\n#7\na frame\n##\n");
        // size counts bytes rather than characters
        assert_eq!(
            &encode(&mut codec, "r\u{e4}ksm\u{f6}rg\u{e5}s")[..],
            "\n#13\nr\u{e4}ksm\u{f6}rg\u{e5}s\n##\n".as_bytes()
        );
        let mut dst = BytesMut::new();
        assert_eq!(
            codec.encode(String::new(), &mut dst),
            Err(CodecError::EmptyChunkedMessage)
        );
    }

    #[test]
    fn test_partial_marker_in_payload() {
        let mut codec = NetconfCodec::new();
        let mut src = BytesMut::from("<a>]]>]</a>]]");
        assert_eq!(codec.decode(&mut src), Ok(None));
        src.extend_from_slice(b">]]>rest");
        assert_eq!(codec.decode(&mut src), Ok(Some("<a>]]>]</a>".to_string())));
        assert_eq!(&src[..], b"rest");
    }

    #[test]
    fn test_chunked_multiple_chunks() {
        let mut codec = NetconfCodec::with_framing(Framing::Chunked);
        let mut src = BytesMut::from("\n#4\n<rpc\n#18\n message-id=\"102\"\n\n#3\n/>\n\n##\n");
        assert_eq!(
            codec.decode(&mut src),
            Ok(Some("<rpc message-id=\"102\"\n/>\n".to_string()))
        );
        assert_eq!(codec.decode(&mut src), Ok(None));
    }

    #[rstest]
    #[case(Framing::EndOfMessage, "first]]>]]>second]]>]]>")]
    #[case(Framing::Chunked, "\n#5\nfirst\n##\n\n#3\nsec\n#3\nond\n##\n")]
    fn test_two_frames_split_at_every_point(#[case] framing: Framing, #[case] wire: &str) {
        for split in 0..=wire.len() {
            let mut codec = NetconfCodec::with_framing(framing);
            let mut src = BytesMut::new();
            let mut decoded = vec![];
            for part in [&wire[..split], &wire[split..]] {
                src.extend_from_slice(part.as_bytes());
                while let Some(message) = codec.decode(&mut src).expect("valid framing") {
                    decoded.push(message);
                }
            }
            assert_eq!(decoded, vec!["first", "second"], "split at {split}");
            assert!(src.is_empty());
        }
    }

    #[rstest]
    #[case("\n#0\nx\n##\n")]
    #[case("\n#01\nx\n##\n")]
    #[case("\n#a\nx\n##\n")]
    #[case("\n#12345678901\n")]
    #[case("xx#1\nx\n##\n")]
    fn test_invalid_chunk_header(#[case] wire: &str) {
        let mut codec = NetconfCodec::with_framing(Framing::Chunked);
        let mut src = BytesMut::from(wire);
        assert!(matches!(
            codec.decode(&mut src),
            Err(CodecError::InvalidChunkHeader(_))
        ));
    }

    #[test]
    fn test_chunked_without_chunks() {
        let mut codec = NetconfCodec::with_framing(Framing::Chunked);
        let mut src = BytesMut::from("\n##\n");
        assert_eq!(codec.decode(&mut src), Err(CodecError::EmptyChunkedMessage));
    }

    #[rstest]
    #[case(Framing::EndOfMessage, "<ok/>]]>]]>")]
    #[case(Framing::Chunked, "\n#5\n<ok/>\n##\n")]
    fn test_with_framing(#[case] framing: Framing, #[case] wire: &str) {
        let mut codec = NetconfCodec::with_framing(framing);
        assert_eq!(codec.framing(), framing);
        assert_eq!(&encode(&mut codec, "<ok/>")[..], wire.as_bytes());
        let mut src = BytesMut::from(wire);
        assert_eq!(codec.decode(&mut src), Ok(Some("<ok/>".to_string())));
        assert!(src.is_empty());
    }
}
