use crate::frame;
use crate::types::ThinkingEvent;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

/// Splits a byte stream into SSE blocks: runs of lines terminated by a blank
/// line. Accepts both bare and CRLF line endings; partial trailing data stays
/// buffered until its delimiter arrives or the stream ends.
pub struct BlockCodec;

fn to_block_text(block: &[u8]) -> String {
    String::from_utf8_lossy(block).replace("\r\n", "\n")
}

impl Decoder for BlockCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        let hay = &src[..];
        let mut i = 0;
        while i + 1 < hay.len() {
            if hay[i] == b'\n' {
                // "\n\n"
                if hay[i + 1] == b'\n' {
                    let block = src.split_to(i);
                    src.advance(2);
                    return Ok(Some(to_block_text(&block)));
                }
                // "\n\r\n"; a trailing "\n\r" waits for the next read
                if hay[i + 1] == b'\r' && i + 2 < hay.len() && hay[i + 2] == b'\n' {
                    let block = src.split_to(i);
                    src.advance(3);
                    return Ok(Some(to_block_text(&block)));
                }
            }
            i += 1;
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        if let Some(block) = self.decode(src)? {
            return Ok(Some(block));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Final block without a trailing blank line.
        let rest = src.split_to(src.len());
        Ok(Some(to_block_text(&rest)))
    }
}

/// Lazy, single-pass event sequence over a streaming response body.
///
/// Heartbeat events are yielded here so the session controller can reset its
/// liveness timer; it swallows them before dispatching to consumers. Malformed
/// blocks are dropped by the frame parser and the stream continues.
pub fn events<S>(
    body: S,
    preview_max: usize,
) -> impl Stream<Item = std::io::Result<ThinkingEvent>>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    FramedRead::new(StreamReader::new(body), BlockCodec).filter_map(move |res| {
        futures_util::future::ready(match res {
            Ok(block) => {
                if block.trim().is_empty() {
                    None
                } else {
                    frame::parse_block(&block, preview_max).map(Ok)
                }
            }
            Err(e) => Some(Err(e)),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(codec: &mut BlockCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Some(block)) = codec.decode(buf) {
            out.push(block);
        }
        out
    }

    #[test]
    fn splits_on_blank_lines() {
        let mut codec = BlockCodec;
        let mut buf = BytesMut::from("event: a\ndata: 1\n\nevent: b\ndata: 2\n\n");
        let blocks = drain(&mut codec, &mut buf);
        assert_eq!(blocks, vec!["event: a\ndata: 1", "event: b\ndata: 2"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn keeps_partial_block_buffered() {
        let mut codec = BlockCodec;
        let mut buf = BytesMut::from("data: first\n\ndata: par");
        let blocks = drain(&mut codec, &mut buf);
        assert_eq!(blocks, vec!["data: first"]);
        assert_eq!(&buf[..], b"data: par");

        buf.extend_from_slice(b"tial\n\n");
        let blocks = drain(&mut codec, &mut buf);
        assert_eq!(blocks, vec!["data: partial"]);
    }

    #[test]
    fn accepts_crlf_delimiters() {
        let mut codec = BlockCodec;
        let mut buf = BytesMut::from("event: a\r\ndata: 1\r\n\r\ndata: 2\n\n");
        let blocks = drain(&mut codec, &mut buf);
        assert_eq!(blocks, vec!["event: a\ndata: 1", "data: 2"]);
    }

    #[test]
    fn trailing_cr_waits_for_more_data() {
        let mut codec = BlockCodec;
        let mut buf = BytesMut::from("data: 1\n\r");
        assert!(drain(&mut codec, &mut buf).is_empty());
        buf.extend_from_slice(b"\n");
        let blocks = drain(&mut codec, &mut buf);
        assert_eq!(blocks, vec!["data: 1"]);
    }

    #[test]
    fn eof_flushes_unterminated_block() {
        let mut codec = BlockCodec;
        let mut buf = BytesMut::from("data: last");
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        let block = codec.decode_eof(&mut buf).expect("decode_eof");
        assert_eq!(block.as_deref(), Some("data: last"));
        assert!(codec.decode_eof(&mut buf).expect("empty eof").is_none());
    }
}
