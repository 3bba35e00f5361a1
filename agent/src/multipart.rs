//! Multipart Preamble Parser (spec §4.C).
//!
//! Deliberately unbuffered, reading one byte at a time so the reader never
//! pulls payload bytes it cannot give back — the same tradeoff
//! `other_examples`'s raw HTTP readers make (`cbiffle-httpd1`'s line scanner)
//! over pulling in a `BufReader`. The one exception is the hijacker's
//! `pre_buffered` carry-in (spec §9 "Parser/relay cursor hand-off"): those
//! bytes are already off the wire and unrecoverable, so [`ChainedSource`]
//! drains them first and reports whatever it never touched back to the
//! caller as `leftover`, to be stored on [`crate::pending::PendingShare`] and
//! drained to the downloader ahead of the first splice.
//!
//! Header-parameter parsing follows the `Content-Disposition` walk in
//! `examples/other_examples/13234c5a_mikedilger-mime-multipart__src-lib.rs.rs`'s
//! `get_content_disposition_filename`: split on `;`, then split each
//! parameter on the first `=`, stripping a surrounding quote pair.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::RelayError;

const FILE_FIELD_NAME: &str = "file_to_upload";

/// Chains already-buffered bytes ahead of further single-byte socket reads,
/// tracking exactly how much of the buffered bytes it consumed.
struct ChainedSource<'a> {
    pre_buffered: Bytes,
    pos: usize,
    socket: &'a mut TcpStream,
}

impl<'a> ChainedSource<'a> {
    fn new(pre_buffered: Bytes, socket: &'a mut TcpStream) -> Self {
        Self {
            pre_buffered,
            pos: 0,
            socket,
        }
    }

    async fn read_byte(&mut self) -> Result<u8, RelayError> {
        if self.pos < self.pre_buffered.len() {
            let b = self.pre_buffered[self.pos];
            self.pos += 1;
            return Ok(b);
        }
        let mut byte = [0u8; 1];
        let n = self
            .socket
            .read(&mut byte)
            .await
            .map_err(RelayError::Io)?;
        if n == 0 {
            return Err(RelayError::BadRequest(
                "connection closed before multipart preamble was complete".into(),
            ));
        }
        Ok(byte[0])
    }

    /// Reads one CRLF-terminated line, returning it without the terminator.
    async fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>, RelayError> {
        let mut line = Vec::new();
        loop {
            let b = self.read_byte().await?;
            if b == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            line.push(b);
            if line.len() > max_len {
                return Err(RelayError::BadRequest(
                    "multipart preamble line exceeded maximum size".into(),
                ));
            }
        }
    }

    /// Bytes of `pre_buffered` never consumed — payload that already arrived
    /// on the wire and must not be discarded.
    fn into_leftover(self) -> Bytes {
        if self.pos < self.pre_buffered.len() {
            self.pre_buffered.slice(self.pos..)
        } else {
            Bytes::new()
        }
    }
}

/// Result of a successful preamble parse: the filename from the part's
/// `Content-Disposition` header, and any bytes read off the wire that
/// already belong to the file body.
pub struct Preamble {
    pub file_name: String,
    pub leftover: Bytes,
}

/// Consumes the boundary line and part headers of a single-part multipart
/// body, leaving `socket`'s read cursor at the first body byte (modulo
/// `pre_buffered`, reported back via [`Preamble::leftover`]).
pub async fn parse_preamble(
    socket: &mut TcpStream,
    pre_buffered: Bytes,
    boundary: &str,
    max_preamble_bytes: usize,
) -> Result<Preamble, RelayError> {
    let mut source = ChainedSource::new(pre_buffered, socket);
    let mut budget = max_preamble_bytes;

    let boundary_line = source.read_line(budget).await?;
    budget = budget.saturating_sub(boundary_line.len());
    let expected = format!("--{boundary}");
    if boundary_line != expected.as_bytes() {
        return Err(RelayError::BadRequest(format!(
            "expected boundary line \"{expected}\""
        )));
    }

    let mut header_block = Vec::new();
    loop {
        let line = source.read_line(budget).await?;
        budget = budget.saturating_sub(line.len());
        if line.is_empty() {
            break;
        }
        header_block.extend_from_slice(&line);
        header_block.push(b'\n');
        if header_block.len() > max_preamble_bytes {
            return Err(RelayError::BadRequest(
                "multipart part headers exceeded maximum size".into(),
            ));
        }
    }

    let headers = parse_header_block(&header_block)?;
    let content_disposition = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-disposition"))
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| RelayError::BadRequest("missing Content-Disposition header".into()))?;

    let params = parse_disposition_params(content_disposition);
    match params.get("name").map(String::as_str) {
        Some(FILE_FIELD_NAME) => {}
        _ => {
            return Err(RelayError::BadRequest(format!(
                "Content-Disposition name parameter must be \"{FILE_FIELD_NAME}\""
            )))
        }
    }
    let file_name = params
        .get("filename")
        .cloned()
        .ok_or_else(|| RelayError::BadRequest("missing filename parameter".into()))?;

    Ok(Preamble {
        file_name,
        leftover: source.into_leftover(),
    })
}

fn parse_header_block(block: &[u8]) -> Result<Vec<(String, String)>, RelayError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| RelayError::BadRequest("part headers were not valid UTF-8".into()))?;
    let mut headers = Vec::new();
    for line in text.lines() {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RelayError::BadRequest(format!("malformed part header: {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

/// Parses `form-data; name="file_to_upload"; filename="hi.bin"` style
/// header values into a parameter map, lower-casing keys and stripping one
/// layer of surrounding quotes from values.
fn parse_disposition_params(value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for segment in value.split(';').skip(1) {
        let Some((key, raw_value)) = segment.trim().split_once('=') else {
            continue;
        };
        let trimmed = raw_value.trim();
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);
        params.insert(key.trim().to_ascii_lowercase(), unquoted.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        (accepted.unwrap().0, connected.unwrap())
    }

    #[test]
    fn parses_quoted_disposition_parameters() {
        let params =
            parse_disposition_params(r#"form-data; name="file_to_upload"; filename="hi.bin""#);
        assert_eq!(params.get("name").map(String::as_str), Some("file_to_upload"));
        assert_eq!(params.get("filename").map(String::as_str), Some("hi.bin"));
    }

    #[tokio::test]
    async fn parses_a_preamble_with_no_pre_buffered_bytes() {
        let (mut server, mut client) = connected_pair().await;
        let body = b"--X\r\nContent-Disposition: form-data; name=\"file_to_upload\"; filename=\"hi.bin\"\r\n\r\nHELLO";
        client.write_all(body).await.unwrap();

        let preamble = parse_preamble(&mut server, Bytes::new(), "X", 16 * 1024)
            .await
            .unwrap();
        assert_eq!(preamble.file_name, "hi.bin");
        assert!(preamble.leftover.is_empty());

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"HELLO");
    }

    #[tokio::test]
    async fn recovers_body_bytes_already_present_in_pre_buffered() {
        let (mut server, mut client) = connected_pair().await;
        // Only the trailing payload byte arrives over the wire; the rest was
        // already consumed by the hijacker and handed in as pre_buffered.
        client.write_all(b"O").await.unwrap();

        let pre_buffered = Bytes::from_static(
            b"--X\r\nContent-Disposition: form-data; name=\"file_to_upload\"; filename=\"hi.bin\"\r\n\r\nHELL",
        );
        let preamble = parse_preamble(&mut server, pre_buffered, "X", 16 * 1024)
            .await
            .unwrap();
        assert_eq!(preamble.file_name, "hi.bin");
        assert_eq!(&preamble.leftover[..], b"HELL");

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"O");
    }

    #[tokio::test]
    async fn rejects_a_mismatched_boundary() {
        let (mut server, mut client) = connected_pair().await;
        client.write_all(b"--WRONG\r\n").await.unwrap();

        let err = parse_preamble(&mut server, Bytes::new(), "X", 16 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn rejects_a_part_with_the_wrong_field_name() {
        let (mut server, mut client) = connected_pair().await;
        client
            .write_all(b"--X\r\nContent-Disposition: form-data; name=\"wrong\"; filename=\"hi.bin\"\r\n\r\n")
            .await
            .unwrap();

        let err = parse_preamble(&mut server, Bytes::new(), "X", 16 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn rejects_a_part_with_no_filename() {
        let (mut server, mut client) = connected_pair().await;
        client
            .write_all(b"--X\r\nContent-Disposition: form-data; name=\"file_to_upload\"\r\n\r\n")
            .await
            .unwrap();

        let err = parse_preamble(&mut server, Bytes::new(), "X", 16 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }
}
