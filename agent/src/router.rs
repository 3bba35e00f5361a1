//! HTTP Request Router (spec §4.E) and the error-taxonomy → response mapping
//! (spec §4.F).
//!
//! Dispatch follows spec §2's control flow exactly: a `POST` runs
//! hijack → multipart-parse → registry-insert and then simply returns,
//! leaving its socket parked inside the [`crate::registry::Registry`]; a
//! `GET` runs registry-take → relay. The one judgment call this module
//! encodes (documented in `DESIGN.md`) is *where* the Bad-Request/Log-Only
//! boundary falls on `POST`: header-level defects (missing or non-numeric
//! `x-filesharing-file-size`, a `Content-Type` with no declared boundary)
//! are caught before the multipart parser ever touches the body and answer
//! with `400`; everything the multipart parser itself finds wrong — a
//! boundary line that doesn't match the declared boundary, the wrong part
//! name, a missing filename — is found only after the connection is
//! already committed to the body stream, matching end-to-end scenario 4
//! ("Bad boundary... connection is already hijacked, so parse error is
//! Log-Only") and is swallowed as Log-Only instead.

use std::sync::Arc;

use http::StatusCode;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::RelayError;
use crate::multipart;
use crate::pending::PendingShare;
use crate::registry::Registry;
use crate::relay;
use crate::request_head::{self, Method, RequestHead};
use crate::response;
use crate::useragent::CrawlerBlocklist;

pub struct Server {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub blocklist: Arc<CrawlerBlocklist>,
}

impl Server {
    /// Handles one accepted connection start to finish. Errors returned
    /// here are always [`RelayError::LogOnly`] or an I/O failure that
    /// occurred while trying to write an error response — by design,
    /// nothing upstream of this needs to react to them beyond logging.
    pub async fn handle(&self, socket: TcpStream) -> Result<(), RelayError> {
        let hijacked = request_head::hijack(socket).await?;
        let request_head::Hijacked {
            mut socket,
            head,
            pre_buffered,
        } = hijacked;

        if self.is_blocked(&head) {
            response::plain_text(&mut socket, StatusCode::FORBIDDEN, "forbidden")
                .await
                .map_err(RelayError::Io)?;
            return Ok(());
        }

        let path = head.path.split('?').next().unwrap_or(&head.path);

        if path == "/" {
            return self.serve_static(&mut socket, &self.config.index_html, "text/html").await;
        }
        if path == "/favicon.ico" {
            return self
                .serve_static(&mut socket, &self.config.favicon, "image/x-icon")
                .await;
        }

        let Some(name) = self.config.api_path(path) else {
            return match head.method {
                Method::Get => self.serve_landing_page(&mut socket).await,
                _ => response::plain_text(&mut socket, StatusCode::BAD_REQUEST, "unknown path")
                    .await
                    .map_err(RelayError::Io),
            };
        };

        match head.method {
            Method::Get => self.handle_get(socket, name).await,
            Method::Post => self.handle_post(socket, &head, pre_buffered, name).await,
            Method::Other(_) => response::plain_text(
                &mut socket,
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed",
            )
            .await
            .map_err(RelayError::Io),
        }
    }

    fn is_blocked(&self, head: &RequestHead) -> bool {
        head.header("user-agent")
            .is_some_and(|ua| self.blocklist.is_blocked(ua))
    }

    async fn serve_static(
        &self,
        socket: &mut TcpStream,
        path: &std::path::Path,
        content_type: &str,
    ) -> Result<(), RelayError> {
        response::static_file(socket, StatusCode::OK, content_type, path)
            .await
            .map_err(RelayError::Io)
    }

    async fn serve_landing_page(&self, socket: &mut TcpStream) -> Result<(), RelayError> {
        response::landing_page(socket, StatusCode::OK, &self.config.index_html)
            .await
            .map_err(RelayError::Io)
    }

    /// Get path (spec §4.E): `registry.take` then relay, or the soft-404
    /// landing page if nothing is pending under `name`.
    async fn handle_get(&self, mut socket: TcpStream, name: &str) -> Result<(), RelayError> {
        match self.registry.take(name) {
            Some(share) => relay::relay(share, socket).await,
            None => {
                tracing::debug!(name, "get for unknown resource, serving landing page");
                self.serve_landing_page(&mut socket).await
            }
        }
    }

    /// Create path (spec §4.E): validate headers, parse the multipart
    /// preamble, then attempt the registry insert. See the module doc
    /// comment for the Bad-Request/Log-Only boundary this draws.
    async fn handle_post(
        &self,
        mut socket: TcpStream,
        head: &RequestHead,
        pre_buffered: bytes::Bytes,
        name: &str,
    ) -> Result<(), RelayError> {
        let file_size = match parse_file_size(head) {
            Ok(size) => size,
            Err(message) => {
                response::plain_text(&mut socket, StatusCode::BAD_REQUEST, &message)
                    .await
                    .map_err(RelayError::Io)?;
                return Ok(());
            }
        };

        let boundary = match parse_boundary(head) {
            Ok(boundary) => boundary,
            Err(message) => {
                response::plain_text(&mut socket, StatusCode::BAD_REQUEST, &message)
                    .await
                    .map_err(RelayError::Io)?;
                return Ok(());
            }
        };

        // From here on the connection is committed to the body stream; any
        // failure is Log-Only (spec §4.F, end-to-end scenario 4).
        let preamble = match multipart::parse_preamble(
            &mut socket,
            pre_buffered,
            &boundary,
            self.config.max_preamble_bytes,
        )
        .await
        {
            Ok(preamble) => preamble,
            Err(e) => return Err(e.log_only()),
        };

        let share = PendingShare {
            socket,
            file_size,
            file_name: preamble.file_name,
            leftover: preamble.leftover,
        };

        if !self.registry.insert_if_absent(name.to_string(), share) {
            return Err(RelayError::BadRequest(format!("name already in use: {name}")).log_only());
        }

        Ok(())
    }
}

fn parse_file_size(head: &RequestHead) -> Result<u64, String> {
    let raw = head
        .header("x-filesharing-file-size")
        .ok_or("missing x-filesharing-file-size header")?;
    raw.parse::<u64>()
        .map_err(|_| format!("x-filesharing-file-size is not a valid unsigned integer: {raw}"))
}

fn parse_boundary(head: &RequestHead) -> Result<String, String> {
    let content_type = head
        .header("content-type")
        .ok_or("missing Content-Type header")?;
    if !content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .eq_ignore_ascii_case("multipart/form-data")
    {
        return Err(format!("unsupported Content-Type: {content_type}"));
    }
    content_type
        .split(';')
        .skip(1)
        .find_map(|segment| segment.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| "Content-Type is missing a boundary parameter".to_string())
}
