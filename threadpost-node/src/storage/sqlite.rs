//! SQLite storage backend for threadpost-node.

use super::{Contact, OutboxMessage, OutboxStore, Peer, PeerStore, Pointer, PointerStore};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use threadpost_types::{Envelope, MessageId, PeerId, ThreadId};

/// SQLite-based node storage.
///
/// One pool backs the outbox queue, peers, contacts and pointers.
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating it if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::info!(path = %path.display(), "opened node database");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // Every connection would get its own in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Move an undecodable outbox row out of the delivery queue.
    async fn quarantine_message(&self, id: &[u8], reason: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO outbox_quarantine (id, peer_id, envelope, enqueued_at, reason)
            SELECT id, peer_id, envelope, enqueued_at, ?2
            FROM outbox_messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("DELETE FROM outbox_messages WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(())
    }

    /// Number of outbox rows set aside because they could not be decoded.
    pub async fn quarantined_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_quarantine")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(count as u64)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_messages (
                id BLOB PRIMARY KEY,
                peer_id BLOB NOT NULL,
                envelope BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_quarantine (
                id BLOB PRIMARY KEY,
                peer_id BLOB NOT NULL,
                envelope BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                row TEXT PRIMARY KEY,
                peer_id BLOB NOT NULL,
                thread_id BLOB NOT NULL,
                public_key BLOB NOT NULL,
                UNIQUE(peer_id, thread_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                peer_id BLOB PRIMARY KEY,
                inboxes TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pointers (
                peer_id BLOB PRIMARY KEY,
                address TEXT NOT NULL,
                cancel_id BLOB,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_peers_thread ON peers(thread_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn add_message(&self, message: &OutboxMessage) -> Result<(), StorageError> {
        let envelope = message
            .envelope
            .to_bytes()
            .map_err(|e| StorageError::Corrupt {
                table: "outbox_messages",
                reason: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, peer_id, envelope, enqueued_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(message.id.as_bytes())
        .bind(message.peer.as_bytes().as_slice())
        .bind(envelope)
        .bind(message.enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn list_messages(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StorageError> {
        // The empty blob sorts before every id.
        let after = after.map(|id| id.as_bytes().to_vec()).unwrap_or_default();

        // Corrupt rows leave the queue, so re-reading from `after` makes
        // progress until a page has something deliverable or the queue ends.
        loop {
            let rows = sqlx::query_as::<_, OutboxRow>(
                r#"
                SELECT id, peer_id, envelope, enqueued_at
                FROM outbox_messages
                WHERE id > ?1
                ORDER BY id ASC
                LIMIT ?2
                "#,
            )
            .bind(after.as_slice())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

            if rows.is_empty() {
                return Ok(Vec::new());
            }

            let mut messages = Vec::with_capacity(rows.len());
            for row in rows {
                let raw_id = row.id.clone();
                match OutboxMessage::try_from(row) {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        tracing::error!(
                            id = %hex::encode(&raw_id),
                            error = %e,
                            "quarantining undecodable outbox row"
                        );
                        self.quarantine_message(&raw_id, &e.to_string()).await?;
                    }
                }
            }

            if !messages.is_empty() {
                return Ok(messages);
            }
        }
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM outbox_messages WHERE id = ?1")
            .bind(id.as_bytes())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_messages(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

#[async_trait]
impl PeerStore for SqliteStore {
    async fn add_peer(&self, peer: &Peer) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO peers (row, peer_id, thread_id, public_key)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&peer.row)
        .bind(peer.peer_id.as_bytes().as_slice())
        .bind(peer.thread_id.as_bytes().as_slice())
        .bind(&peer.public_key)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn thread_peers(&self, thread_id: &ThreadId) -> Result<Vec<Peer>, StorageError> {
        let rows = sqlx::query_as::<_, PeerRow>(
            r#"
            SELECT row, peer_id, thread_id, public_key
            FROM peers
            WHERE thread_id = ?1
            ORDER BY row ASC
            "#,
        )
        .bind(thread_id.as_bytes().as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn get_contact(&self, peer_id: &PeerId) -> Result<Option<Contact>, StorageError> {
        let inboxes: Option<String> =
            sqlx::query_scalar("SELECT inboxes FROM contacts WHERE peer_id = ?1")
                .bind(peer_id.as_bytes().as_slice())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        let Some(inboxes) = inboxes else {
            return Ok(None);
        };
        let inboxes: Vec<String> =
            serde_json::from_str(&inboxes).map_err(|e| StorageError::Corrupt {
                table: "contacts",
                reason: e.to_string(),
            })?;

        Ok(Some(Contact {
            peer_id: *peer_id,
            inboxes,
        }))
    }

    async fn set_inboxes(&self, peer_id: &PeerId, inboxes: &[String]) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(inboxes).map_err(|e| StorageError::Corrupt {
            table: "contacts",
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO contacts (peer_id, inboxes)
            VALUES (?1, ?2)
            ON CONFLICT(peer_id) DO UPDATE SET inboxes = excluded.inboxes
            "#,
        )
        .bind(peer_id.as_bytes().as_slice())
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl PointerStore for SqliteStore {
    async fn add_pointer(&self, pointer: &Pointer) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO pointers (peer_id, address, cancel_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(peer_id) DO UPDATE SET
                address = excluded.address,
                cancel_id = excluded.cancel_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(pointer.peer_id.as_bytes().as_slice())
        .bind(&pointer.address)
        .bind(pointer.cancel_id.map(|id| id.as_bytes().to_vec()))
        .bind(pointer.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn get_pointer(&self, peer_id: &PeerId) -> Result<Option<Pointer>, StorageError> {
        let row = sqlx::query_as::<_, PointerRow>(
            r#"
            SELECT peer_id, address, cancel_id, created_at
            FROM pointers
            WHERE peer_id = ?1
            "#,
        )
        .bind(peer_id.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn delete_pointer(&self, peer_id: &PeerId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM pointers WHERE peer_id = ?1")
            .bind(peer_id.as_bytes().as_slice())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

fn corrupt(table: &'static str, field: &str) -> StorageError {
    StorageError::Corrupt {
        table,
        reason: format!("invalid {}", field),
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Vec<u8>,
    peer_id: Vec<u8>,
    envelope: Vec<u8>,
    enqueued_at: i64,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StorageError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxMessage {
            id: MessageId::from_bytes(&row.id).ok_or_else(|| corrupt("outbox_messages", "id"))?,
            peer: PeerId::from_bytes(&row.peer_id)
                .ok_or_else(|| corrupt("outbox_messages", "peer_id"))?,
            envelope: Envelope::from_bytes(&row.envelope).map_err(|e| StorageError::Corrupt {
                table: "outbox_messages",
                reason: e.to_string(),
            })?,
            enqueued_at: row.enqueued_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PeerRow {
    row: String,
    peer_id: Vec<u8>,
    thread_id: Vec<u8>,
    public_key: Vec<u8>,
}

impl TryFrom<PeerRow> for Peer {
    type Error = StorageError;

    fn try_from(row: PeerRow) -> Result<Self, Self::Error> {
        Ok(Peer {
            row: row.row,
            peer_id: PeerId::from_bytes(&row.peer_id).ok_or_else(|| corrupt("peers", "peer_id"))?,
            thread_id: ThreadId::from_bytes(&row.thread_id)
                .ok_or_else(|| corrupt("peers", "thread_id"))?,
            public_key: row.public_key,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PointerRow {
    peer_id: Vec<u8>,
    address: String,
    cancel_id: Option<Vec<u8>>,
    created_at: i64,
}

impl TryFrom<PointerRow> for Pointer {
    type Error = StorageError;

    fn try_from(row: PointerRow) -> Result<Self, Self::Error> {
        let cancel_id = match row.cancel_id {
            Some(bytes) => {
                Some(PeerId::from_bytes(&bytes).ok_or_else(|| corrupt("pointers", "cancel_id"))?)
            }
            None => None,
        };
        Ok(Pointer {
            peer_id: PeerId::from_bytes(&row.peer_id)
                .ok_or_else(|| corrupt("pointers", "peer_id"))?,
            address: row.address,
            cancel_id,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Write an outbox row without encoding it, to simulate on-disk damage.
    pub(crate) async fn insert_raw_outbox_row(&self, id: MessageId, envelope: Vec<u8>) {
        sqlx::query(
            "INSERT INTO outbox_messages (id, peer_id, envelope, enqueued_at) VALUES (?1, ?2, ?3, 0)",
        )
        .bind(id.as_bytes())
        .bind(PeerId::random().as_bytes().as_slice())
        .bind(envelope)
        .execute(&self.pool)
        .await
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::current_timestamp;
    use threadpost_types::{Keypair, Message, Payload, Ping};

    fn envelope(nonce: u64) -> Envelope {
        let sender = Keypair::generate();
        Envelope::seal(&sender, Message::new(Payload::Ping(Ping { nonce }))).unwrap()
    }

    #[tokio::test]
    async fn outbox_messages_list_in_id_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let peer = PeerId::random();

        let mut ids = Vec::new();
        for n in 0..5 {
            let msg = OutboxMessage::new(peer, envelope(n));
            ids.push(msg.id);
            store.add_message(&msg).await.unwrap();
        }

        let page = store.list_messages(None, 3).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), ids[..3]);

        let rest = store.list_messages(Some(ids[2]), 3).await.unwrap();
        assert_eq!(rest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..]);

        assert!(store.list_messages(Some(ids[4]), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbox_message_roundtrips_envelope() {
        let store = SqliteStore::in_memory().await.unwrap();
        let msg = OutboxMessage::new(PeerId::random(), envelope(42));
        store.add_message(&msg).await.unwrap();

        let page = store.list_messages(None, 10).await.unwrap();
        assert_eq!(page, vec![msg]);
    }

    #[tokio::test]
    async fn outbox_delete_and_count() {
        let store = SqliteStore::in_memory().await.unwrap();
        let msg = OutboxMessage::new(PeerId::random(), envelope(1));
        store.add_message(&msg).await.unwrap();
        assert_eq!(store.count_messages().await.unwrap(), 1);

        assert!(store.delete_message(&msg.id).await.unwrap());
        assert!(!store.delete_message(&msg.id).await.unwrap());
        assert_eq!(store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_envelope_is_quarantined() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_raw_outbox_row(MessageId::new(), vec![0xFF, 0x00]).await;

        assert!(store.list_messages(None, 10).await.unwrap().is_empty());
        assert_eq!(store.count_messages().await.unwrap(), 0);
        assert_eq!(store.quarantined_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_row_does_not_hide_later_messages() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_raw_outbox_row(MessageId::new(), vec![0xFF, 0x00]).await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let msg = OutboxMessage::new(PeerId::random(), envelope(0));
            store.add_message(&msg).await.unwrap();
            ids.push(msg.id);
        }

        // A page made only of the corrupt row still moves on to good ones.
        let page = store.list_messages(None, 1).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[0]]);

        let all = store.list_messages(None, 10).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
        assert_eq!(store.count_messages().await.unwrap(), 5);
        assert_eq!(store.quarantined_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn peers_by_thread() {
        let store = SqliteStore::in_memory().await.unwrap();
        let thread = ThreadId::random();
        let member = Keypair::generate();

        let peer = Peer::new(thread, member.public_key().to_vec());
        assert_eq!(peer.peer_id, member.peer_id());
        store.add_peer(&peer).await.unwrap();
        store
            .add_peer(&Peer::new(ThreadId::random(), member.public_key().to_vec()))
            .await
            .unwrap();

        let peers = store.thread_peers(&thread).await.unwrap();
        assert_eq!(peers, vec![peer.clone()]);

        // Same member twice in one thread violates the unique constraint.
        let duplicate = Peer::new(thread, member.public_key().to_vec());
        assert!(matches!(
            store.add_peer(&duplicate).await,
            Err(StorageError::Database(_))
        ));
    }

    #[tokio::test]
    async fn contacts_store_inboxes() {
        let store = SqliteStore::in_memory().await.unwrap();
        let peer = PeerId::random();
        assert!(store.get_contact(&peer).await.unwrap().is_none());

        store
            .set_inboxes(&peer, &["cafe-a".to_string(), "cafe-b".to_string()])
            .await
            .unwrap();
        let contact = store.get_contact(&peer).await.unwrap().unwrap();
        assert_eq!(contact.inboxes, vec!["cafe-a", "cafe-b"]);

        store.set_inboxes(&peer, &[]).await.unwrap();
        let contact = store.get_contact(&peer).await.unwrap().unwrap();
        assert!(contact.inboxes.is_empty());
    }

    #[tokio::test]
    async fn pointers_add_get_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let peer = PeerId::random();
        let pointer = Pointer {
            peer_id: peer,
            address: "cafe-a".into(),
            cancel_id: Some(peer),
            created_at: current_timestamp(),
        };

        store.add_pointer(&pointer).await.unwrap();
        assert_eq!(store.get_pointer(&peer).await.unwrap(), Some(pointer));

        assert!(store.delete_pointer(&peer).await.unwrap());
        assert!(store.get_pointer(&peer).await.unwrap().is_none());
        assert!(!store.delete_pointer(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn pointer_without_canceller() {
        let store = SqliteStore::in_memory().await.unwrap();
        let peer = PeerId::random();
        store
            .add_pointer(&Pointer {
                peer_id: peer,
                address: "cafe".into(),
                cancel_id: None,
                created_at: 0,
            })
            .await
            .unwrap();
        assert_eq!(store.get_pointer(&peer).await.unwrap().unwrap().cancel_id, None);
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.db");
        let msg = OutboxMessage::new(PeerId::random(), envelope(7));

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.add_message(&msg).await.unwrap();
        }

        let store = SqliteStore::new(&path).await.unwrap();
        assert_eq!(store.list_messages(None, 10).await.unwrap(), vec![msg]);
    }
}
