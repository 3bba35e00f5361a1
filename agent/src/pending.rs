use bytes::Bytes;
use tokio::net::TcpStream;

/// A rendezvous waiting for its counterparty.
///
/// Created once the Create path finishes parsing the multipart preamble and
/// the resource name is free; transferred out of the registry by exactly one
/// `GET`; destroyed (by closing `socket`) once the relay completes, whether
/// it succeeded or failed.
#[derive(Debug)]
pub struct PendingShare {
    /// Owned connection to the uploader. Any bytes already drained into
    /// `leftover` aside, the next byte read from it is the first byte of the
    /// file payload — the preamble has already been consumed.
    pub socket: TcpStream,
    /// Byte count declared by the uploader in `x-filesharing-file-size`.
    pub file_size: u64,
    /// Filename extracted from the part's `Content-Disposition` header.
    pub file_name: String,
    /// Payload bytes the preamble reader already pulled off the wire before
    /// it recognized it had reached the end of the header block. Must be
    /// drained to the downloader before the first splice (spec.md §9:
    /// "Parser/relay cursor hand-off").
    pub leftover: Bytes,
}
