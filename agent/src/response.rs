//! Hand-rolled HTTP response serialization for every path that runs before
//! a connection is hijacked (spec §4.E/§4.F). Once a socket is hijacked,
//! [`crate::relay`] writes its own fixed byte-literal responses directly —
//! this module is never touched again for that connection.

use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Cache headers the router applies to every non-static response (spec
/// §4.E).
const CACHE_HEADERS: &[(&str, &str)] = &[
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

/// Writes a status line, a `Content-Type`/`Content-Length` pair, and `body`,
/// then closes the connection (every pre-hijack response here is the whole
/// of what this server has to say to the peer). `cache_headers` controls
/// whether the §4.E cache-busting header block is included — true static
/// asset routes (`/`, `/favicon.ico`) omit it; every other response
/// includes it, the soft-404 landing page included, since that response is
/// a dynamic decision (no pending share) that happens to reuse the same
/// file body.
async fn write(
    socket: &mut TcpStream,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
    cache_headers: bool,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
    );
    if cache_headers {
        for (name, value) in CACHE_HEADERS {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    head.push_str("Connection: close\r\n\r\n");

    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.flush().await
}

pub async fn plain_text(
    socket: &mut TcpStream,
    status: StatusCode,
    message: &str,
) -> std::io::Result<()> {
    write(
        socket,
        status,
        "text/plain; charset=utf-8",
        message.as_bytes(),
        true,
    )
    .await
}

/// Serves the true static routes (`/`, `/favicon.ico`): no cache headers.
pub async fn static_file(
    socket: &mut TcpStream,
    status: StatusCode,
    content_type: &str,
    path: &std::path::Path,
) -> std::io::Result<()> {
    let body = tokio::fs::read(path).await?;
    write(socket, status, content_type, &body, false).await
}

/// Serves the soft-404 landing page (spec §4.F Not-Found): same body as
/// `static_file` would read, but a dynamic response so cache headers apply.
pub async fn landing_page(
    socket: &mut TcpStream,
    status: StatusCode,
    path: &std::path::Path,
) -> std::io::Result<()> {
    let body = tokio::fs::read(path).await?;
    write(socket, status, "text/html", &body, true).await
}
