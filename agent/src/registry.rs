use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::pending::PendingShare;

/// Concurrent, single-consumer map from resource name to a suspended
/// uploader connection.
///
/// Backed by `DashMap`, the same sharded-lock concurrent map the teacher uses
/// for its per-client filter tables (`Arc<DashMap<ClientId, Regex>>` in
/// `mirrord/agent/src/steal/http_traffic.rs` and `hyper_handler.rs`). Each
/// shard's lock makes `insert_if_absent` and `take` linearizable with respect
/// to each other without a single crate-wide mutex.
#[derive(Debug, Default)]
pub struct Registry {
    shares: DashMap<String, PendingShare>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            shares: DashMap::new(),
        }
    }

    /// Inserts `share` under `name` iff no entry exists for `name` yet.
    ///
    /// Returns `true` and takes ownership of `share` on success. Returns
    /// `false` without touching `share` on a name collision — the caller
    /// remains responsible for closing the socket (I1/I2 in `spec.md` §3).
    pub fn insert_if_absent(&self, name: String, share: PendingShare) -> bool {
        match self.shares.entry(name) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(share);
                true
            }
        }
    }

    /// Atomically reads and removes the entry for `name`, transferring
    /// socket ownership to the caller (I2/I3).
    pub fn take(&self, name: &str) -> Option<PendingShare> {
        self.shares.remove(name).map(|(_, share)| share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::{TcpListener, TcpStream};

    async fn dummy_stream() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        drop(accepted.unwrap());
        connected.unwrap()
    }

    #[tokio::test]
    async fn insert_if_absent_rejects_duplicate_names() {
        let registry = Registry::new();
        let share_a = PendingShare {
            socket: dummy_stream().await,
            file_size: 5,
            file_name: "a.bin".into(),
            leftover: Bytes::new(),
        };
        let share_b = PendingShare {
            socket: dummy_stream().await,
            file_size: 9,
            file_name: "b.bin".into(),
            leftover: Bytes::new(),
        };

        assert!(registry.insert_if_absent("x".into(), share_a));
        assert!(!registry.insert_if_absent("x".into(), share_b));
    }

    #[tokio::test]
    async fn take_removes_the_entry_exactly_once() {
        let registry = Registry::new();
        let share = PendingShare {
            socket: dummy_stream().await,
            file_size: 5,
            file_name: "a.bin".into(),
            leftover: Bytes::new(),
        };
        assert!(registry.insert_if_absent("x".into(), share));

        let taken = registry.take("x");
        assert!(taken.is_some());
        assert_eq!(taken.unwrap().file_name, "a.bin");

        assert!(registry.take("x").is_none());
    }

    #[tokio::test]
    async fn take_on_unknown_name_returns_none() {
        let registry = Registry::new();
        assert!(registry.take("missing").is_none());
    }

    #[tokio::test]
    async fn a_freed_name_can_be_reused() {
        let registry = Registry::new();
        let share_a = PendingShare {
            socket: dummy_stream().await,
            file_size: 1,
            file_name: "a.bin".into(),
            leftover: Bytes::new(),
        };
        assert!(registry.insert_if_absent("x".into(), share_a));
        assert!(registry.take("x").is_some());

        let share_b = PendingShare {
            socket: dummy_stream().await,
            file_size: 2,
            file_name: "b.bin".into(),
            leftover: Bytes::new(),
        };
        assert!(registry.insert_if_absent("x".into(), share_b));
    }
}
