//! Connection Hijacker (spec §4.B).
//!
//! The teacher never runs a managed HTTP framework over its external
//! listener socket (`steal/connection.rs`, `steal/http_traffic/filter.rs`
//! hold the raw `TcpStream` themselves and only ever feed bytes to `hyper`
//! over an internal duplex pipe for *parsing*). This repo follows the same
//! shape: each accepted socket is read directly with `httparse`, so there is
//! no framework-managed response-writer to detach from — the read here *is*
//! the hijack. Any bytes read past the header terminator are the
//! `preBuffered` of §4.B, returned alongside the owned socket so the
//! multipart parser (or error responder) can chain them before further
//! socket reads.

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::RelayError;

/// Bound on the initial request line + header block. Guards memory against a
/// peer that never sends the `\r\n\r\n` terminator; unrelated to the
/// multipart preamble bound in `config.max_preamble_bytes`.
const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub(crate) headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The result of hijacking a connection: the owned socket, the parsed
/// request head, and any bytes already read past the header terminator.
pub struct Hijacked {
    pub socket: TcpStream,
    pub head: RequestHead,
    pub pre_buffered: Bytes,
}

/// Reads exactly the request line and headers from `socket`, leaving the
/// read cursor at the first byte of the body (or, if nothing followed the
/// headers yet, exactly at the socket's current position).
pub async fn hijack(mut socket: TcpStream) -> Result<Hijacked, RelayError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request
            .parse(&buf)
            .map_err(|e| RelayError::Internal(format!("malformed HTTP request head: {e}")))?
        {
            httparse::Status::Complete(offset) => {
                let method = match request.method {
                    Some("GET") => Method::Get,
                    Some("POST") => Method::Post,
                    Some(other) => Method::Other(other.to_string()),
                    None => {
                        return Err(RelayError::Internal("request missing method".into()))
                    }
                };
                let path = request
                    .path
                    .ok_or_else(|| RelayError::Internal("request missing path".into()))?
                    .to_string();
                let headers = request
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();

                return Ok(Hijacked {
                    socket,
                    head: RequestHead {
                        method,
                        path,
                        headers,
                    },
                    pre_buffered: Bytes::copy_from_slice(&buf[offset..]),
                });
            }
            httparse::Status::Partial => {}
        }

        if buf.len() >= MAX_HEAD_BYTES {
            return Err(RelayError::Internal(
                "request head exceeded maximum size".into(),
            ));
        }

        let n = socket
            .read(&mut chunk)
            .await
            .map_err(RelayError::Io)?;
        if n == 0 {
            return Err(RelayError::Internal(
                "connection closed before headers were complete".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
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

    #[tokio::test]
    async fn parses_a_simple_get() {
        let (server, mut client) = connected_pair().await;
        client
            .write_all(b"GET /api/abc HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let hijacked = hijack(server).await.unwrap();
        assert_eq!(hijacked.head.method, Method::Get);
        assert_eq!(hijacked.head.path, "/api/abc");
        assert_eq!(hijacked.head.header("host"), Some("x"));
        assert!(hijacked.pre_buffered.is_empty());
    }

    #[tokio::test]
    async fn carries_bytes_read_past_the_header_terminator_as_preBuffered() {
        let (server, mut client) = connected_pair().await;
        client
            .write_all(b"POST /api/abc HTTP/1.1\r\nContent-Length: 5\r\n\r\nHELLO")
            .await
            .unwrap();

        let hijacked = hijack(server).await.unwrap();
        assert_eq!(hijacked.head.method, Method::Post);
        assert_eq!(&hijacked.pre_buffered[..], b"HELLO");
    }
}
