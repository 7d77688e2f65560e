//! Interleaved TCP framing
//!
//! RTSP control messages and RTP/RTCP packets share one TCP connection.
//! Binary packets are prefixed with a 4-byte header:
//! ```text
//! +------+---------+-----------------+
//! | 0x24 | channel | length (u16 BE) | payload...
//! +------+---------+-----------------+
//! ```
//! Anything else on the wire is a text RTSP message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};

/// `$`
pub const INTERLEAVED_MAGIC: u8 = 0x24;

/// Upper bound on a message head
pub const MAX_HEAD_SIZE: usize = 16 * 1024;
/// Largest `Content-Length` accepted from a peer
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// One unit read off an RTSP connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text message: head (start line and headers) plus body
    Message { head: String, body: Bytes },
    /// Binary packet on an interleaved channel
    Interleaved { channel: u8, payload: Bytes },
}

/// Build the 4-byte header for an interleaved packet
pub fn interleaved_header(channel: u8, len: usize) -> Result<[u8; 4]> {
    let len = u16::try_from(len).map_err(|_| ProtocolError::InvalidInterleaved)?;
    let [hi, lo] = len.to_be_bytes();
    Ok([INTERLEAVED_MAGIC, channel, hi, lo])
}

/// Header plus payload as one buffer
pub fn encode_interleaved(channel: u8, payload: &[u8]) -> Result<Bytes> {
    let header = interleaved_header(channel, payload.len())?;
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.put_slice(&header);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Try to take one complete frame from the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    // Stray line endings between messages
    while matches!(buf.first(), Some(b'\r') | Some(b'\n')) {
        buf.advance(1);
    }
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] == INTERLEAVED_MAGIC {
        if buf.len() < 4 {
            return Ok(None);
        }
        let channel = buf[1];
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        let payload = buf.split_to(len).freeze();
        return Ok(Some(Frame::Interleaved { channel, payload }));
    }

    let Some((head_len, sep_len)) = find_head_end(buf) else {
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ProtocolError::HeadTooLarge(buf.len()).into());
        }
        return Ok(None);
    };

    let head = String::from_utf8_lossy(&buf[..head_len]).into_owned();
    let content_length = content_length(&head);
    if content_length > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(content_length).into());
    }
    if buf.len() < head_len + sep_len + content_length {
        return Ok(None);
    }

    buf.advance(head_len + sep_len);
    let body = buf.split_to(content_length).freeze();
    Ok(Some(Frame::Message { head, body }))
}

/// Position of the blank line ending a head, and the separator length
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Buffered frame reader over any byte stream
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Read the next frame; `Ok(None)` on clean end of stream
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf)? {
                return Ok(Some(frame));
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                return Err(ProtocolError::ConnectionClosed.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_interleaved_header() {
        assert_eq!(interleaved_header(0, 0x0102).unwrap(), [0x24, 0x00, 0x01, 0x02]);
        assert!(interleaved_header(1, 70_000).is_err());

        let framed = encode_interleaved(2, &[0xAA, 0xBB]).unwrap();
        assert_eq!(&framed[..], &[0x24, 0x02, 0x00, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_interleaved_partial_then_complete() {
        let mut buf = BytesMut::from(&[0x24, 0x01, 0x00, 0x03, 0x01][..]);
        assert_eq!(decode_frame(&mut buf).unwrap(), None);

        buf.put_slice(&[0x02, 0x03]);
        assert_eq!(
            decode_frame(&mut buf).unwrap(),
            Some(Frame::Interleaved {
                channel: 1,
                payload: Bytes::from_static(&[0x01, 0x02, 0x03])
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_message_with_body() {
        let mut buf = BytesMut::from(
            &b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n$\x00\x00\x00"[..],
        );
        match decode_frame(&mut buf).unwrap() {
            Some(Frame::Message { head, body }) => {
                assert!(head.starts_with("RTSP/1.0 200 OK"));
                assert_eq!(&body[..], b"v=0\r\n");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(
            decode_frame(&mut buf).unwrap(),
            Some(Frame::Interleaved {
                channel: 0,
                payload: Bytes::new()
            })
        );
    }

    #[test]
    fn test_decode_waits_for_body() {
        let mut buf = BytesMut::from(&b"ANNOUNCE /x RTSP/1.0\r\nContent-Length: 10\r\n\r\nabc"[..]);
        assert_eq!(decode_frame(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_bare_lf() {
        let mut buf = BytesMut::from(&b"OPTIONS * RTSP/1.0\nCSeq: 9\n\n"[..]);
        match decode_frame(&mut buf).unwrap() {
            Some(Frame::Message { head, .. }) => assert!(head.contains("CSeq: 9")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_head_too_large() {
        let mut buf = BytesMut::from(&vec![b'A'; MAX_HEAD_SIZE + 1][..]);
        assert!(decode_frame(&mut buf).is_err());
    }

    #[test]
    fn test_body_too_large() {
        let head = format!("SET_PARAMETER * RTSP/1.0\r\nContent-Length: {}\r\n\r\n", 4_000_000_000u64);
        let mut buf = BytesMut::from(head.as_bytes());
        assert!(matches!(
            decode_frame(&mut buf),
            Err(Error::Protocol(ProtocolError::BodyTooLarge(4_000_000_000)))
        ));

        let head = format!("ANNOUNCE * RTSP/1.0\r\nContent-Length: {}\r\n\r\n", MAX_BODY_SIZE);
        let mut buf = BytesMut::from(head.as_bytes());
        assert_eq!(decode_frame(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_reader_over_stream() {
        let data: &[u8] = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n$\x01\x00\x02hiDESCRIBE /a RTSP/1.0\r\n\r\n";
        let mut reader = FrameReader::new(data);

        assert!(matches!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Message { .. })
        ));
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Interleaved {
                channel: 1,
                payload: Bytes::from_static(b"hi")
            })
        );
        match reader.next_frame().await.unwrap() {
            Some(Frame::Message { head, .. }) => assert!(head.starts_with("DESCRIBE")),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_reader_split_reads() {
        // Head, body and an interleaved frame arrive in arbitrary chunks
        let mock = tokio_test::io::Builder::new()
            .read(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-")
            .read(b"Length: 3\r\n\r\nv=")
            .read(b"0$\x00\x00")
            .read(b"\x01\x7F")
            .build();
        let mut reader = FrameReader::new(mock);

        match reader.next_frame().await.unwrap() {
            Some(Frame::Message { head, body }) => {
                assert!(head.contains("CSeq: 2"));
                assert_eq!(&body[..], b"v=0");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Interleaved {
                channel: 0,
                payload: Bytes::from_static(&[0x7F])
            })
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_reader_truncated() {
        let data: &[u8] = b"OPTIONS * RTSP/1.0\r\nCSeq";
        let mut reader = FrameReader::new(data);
        assert!(reader.next_frame().await.is_err());
    }
}
