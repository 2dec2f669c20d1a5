//! STOMP 1.2 framing.
//!
//! A frame is a command line, header lines, a blank line, the body and a NUL byte.
//! Lines end with `\n` or `\r\n`. Bare end-of-lines between frames are heart-beats and
//! are dropped. When a `content-length` header is present the body is read by length,
//! otherwise it runs up to the first NUL.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;
use crate::stomp::frame::{Command, Frame};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_bytes: usize,
}

impl StompCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        skip_heartbeats(src);
        if src.is_empty() {
            return Ok(None);
        }

        let Some((header_end, body_start)) = find_blank_line(src) else {
            self.check_size(src.len())?;
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..header_end])
            .map_err(|_| TransportError::Protocol("frame headers are not UTF-8".to_owned()))?;
        let mut lines = head
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line)
            .ok_or_else(|| TransportError::Protocol(format!("unknown command {command_line:?}")))?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::Protocol(format!("invalid header line {line:?}")))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value.trim().parse::<usize>().map_err(|_| {
                    TransportError::Protocol(format!("invalid content-length {value:?}"))
                })
            })
            .transpose()?;

        let body_end = match content_length {
            Some(length) => {
                let body_end = body_start
                    .checked_add(length)
                    .filter(|end| *end < usize::MAX)
                    .ok_or(TransportError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    })?;
                self.check_size(body_end + 1)?;
                if src.len() <= body_end {
                    src.reserve(body_end + 1 - src.len());
                    return Ok(None);
                }
                if src[body_end] != 0 {
                    return Err(TransportError::Protocol(
                        "frame body is not terminated by NUL".to_owned(),
                    ));
                }
                body_end
            }
            None => match src[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            },
        };
        self.check_size(body_end + 1)?;

        let raw = src.split_to(body_end + 1).freeze();
        Ok(Some(Frame {
            command,
            headers,
            body: raw.slice(body_start..body_end),
        }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        for (name, value) in &frame.headers {
            if frame.command.escapes_headers() {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.header("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }

        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

fn skip_heartbeats(src: &mut BytesMut) {
    loop {
        if src.starts_with(b"\n") {
            src.advance(1);
        } else if src.starts_with(b"\r\n") {
            src.advance(2);
        } else {
            return;
        }
    }
}

/// Position of the newline ending the header section, and of the first body byte.
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = buf[from..].iter().position(|b| *b == b'\n') {
        let newline = from + offset;
        match &buf[newline + 1..] {
            [b'\n', ..] => return Some((newline, newline + 2)),
            [b'\r', b'\n', ..] => return Some((newline, newline + 3)),
            _ => from = newline + 1,
        }
    }
    None
}

fn unescape(s: &str) -> Result<String, TransportError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(TransportError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}
