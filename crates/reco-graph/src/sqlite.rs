//! SQLite-backed graph store implementation (persistent mirror).

use crate::{
    GraphStats, GraphStore, GraphStoreError, Interaction, InteractionKind, ItemNode,
    PeerInteraction, PreferenceCandidates, PreferenceVector, UserNode,
};
use async_trait::async_trait;
use reco_types::PreferenceFn;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Failure inside a transaction closure.
#[derive(Debug, thiserror::Error)]
enum TxError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("not found: {0}")]
    Missing(String),
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Corrupt(e.to_string())
    }
}

impl From<TxError> for GraphStoreError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Missing(what) => GraphStoreError::NotFound(what),
            TxError::Sql(rusqlite::Error::SqliteFailure(err, msg))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                GraphStoreError::Unavailable(msg.unwrap_or_else(|| err.to_string()))
            }
            other => GraphStoreError::Other(other.to_string()),
        }
    }
}

type ItemRow = (String, String, String, String);

const ITEM_COLUMNS: &str = "i.id, i.name, i.category, i.tags";

fn item_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<ItemRow> {
    Ok((
        row.get(offset)?,
        row.get(offset + 1)?,
        row.get(offset + 2)?,
        row.get(offset + 3)?,
    ))
}

fn decode_item((id, name, category, tags): ItemRow) -> Result<ItemNode, TxError> {
    Ok(ItemNode {
        id,
        name,
        category,
        tags: serde_json::from_str(&tags)?,
    })
}

fn decode_kind(label: &str) -> Result<InteractionKind, TxError> {
    label
        .parse()
        .map_err(|e: reco_types::InvalidInteraction| TxError::Corrupt(e.to_string()))
}

fn require_user(conn: &rusqlite::Connection, user_id: &str) -> Result<(), TxError> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |row| {
            row.get(0)
        })
        .optional()?;
    exists
        .map(|_| ())
        .ok_or_else(|| TxError::Missing(format!("user {}", user_id)))
}

fn load_user(conn: &rusqlite::Connection, user_id: &str) -> Result<Option<UserNode>, TxError> {
    let row = conn
        .query_row(
            "SELECT id, preference_tags, preference_coefficients FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((id, tags, coefficients)) = row else {
        return Ok(None);
    };
    let preferences = match (tags, coefficients) {
        (Some(t), Some(c)) => Some(PreferenceVector {
            tags: serde_json::from_str(&t)?,
            coefficients: serde_json::from_str(&c)?,
        }),
        _ => None,
    };
    Ok(Some(UserNode { id, preferences }))
}

fn load_interactions(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> Result<Vec<Interaction>, TxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT e.kind, e.weight, {ITEM_COLUMNS} FROM interactions e \
         JOIN items i ON i.id = e.item_id \
         WHERE e.user_id = ?1 ORDER BY i.id, e.kind"
    ))?;
    let rows = stmt.query_map([user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            item_row(row, 2)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (kind, weight, item) = row?;
        out.push(Interaction {
            kind: decode_kind(&kind)?,
            weight,
            item: decode_item(item)?,
        });
    }
    Ok(out)
}

/// SQLite-backed graph store. Each operation runs in its own transaction; the
/// composite key on `interactions` enforces one edge per (user, item, kind).
pub struct SqliteGraphStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteGraphStore {
    /// Open (or create) a SQLite graph store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, GraphStoreError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, GraphStoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| GraphStoreError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, GraphStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                tags TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                preference_tags TEXT,
                preference_coefficients TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS interactions (
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                weight INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, item_id, kind),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_item ON interactions(item_id);
            "#,
        )
        .map_err(|e| GraphStoreError::Other(e.to_string()))?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction; commit on success, roll back on error.
    fn with_tx<T, F>(&self, f: F) -> Result<T, GraphStoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, TxError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GraphStoreError::Unavailable(format!("failed to acquire lock: {}", e)))?;
        let tx = conn.unchecked_transaction().map_err(TxError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(TxError::from)?;
        Ok(value)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_item(&self, item: &ItemNode) -> Result<(), GraphStoreError> {
        let tags = serde_json::to_string(&item.tags)
            .map_err(|e| GraphStoreError::Other(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO items (id, name, category, tags, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
                 category = excluded.category, tags = excluded.tags, \
                 updated_at = excluded.updated_at",
                params![item.id, item.name, item.category, tags, now],
            )?;
            Ok(())
        })
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool, GraphStoreError> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM interactions WHERE item_id = ?1", [item_id])?;
            Ok(tx.execute("DELETE FROM items WHERE id = ?1", [item_id])? > 0)
        })
    }

    async fn upsert_user(&self, user_id: &str) -> Result<(), GraphStoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_tx(|tx| {
            tx.execute(
                "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
                params![user_id, now],
            )?;
            Ok(())
        })
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool, GraphStoreError> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM interactions WHERE user_id = ?1", [user_id])?;
            Ok(tx.execute("DELETE FROM users WHERE id = ?1", [user_id])? > 0)
        })
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemNode>, GraphStoreError> {
        self.with_tx(|tx| {
            let row = tx
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?1"),
                    [item_id],
                    |row| item_row(row, 0),
                )
                .optional()?;
            row.map(decode_item).transpose()
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserNode>, GraphStoreError> {
        self.with_tx(|tx| load_user(tx, user_id))
    }

    async fn create_interaction(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<bool, GraphStoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            let item: Option<i64> = tx
                .query_row("SELECT 1 FROM items WHERE id = ?1", [item_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if item.is_none() {
                return Err(TxError::Missing(format!("item {}", item_id)));
            }
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO interactions (user_id, item_id, kind, weight, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, item_id, kind.as_str(), kind.weight(), now],
            )?;
            Ok(inserted == 1)
        })
    }

    async fn interactions_of(&self, user_id: &str) -> Result<Vec<Interaction>, GraphStoreError> {
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            load_interactions(tx, user_id)
        })
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        compute: PreferenceFn<'_>,
    ) -> Result<Option<PreferenceVector>, GraphStoreError> {
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            let interactions = load_interactions(tx, user_id)?;
            let Some(prefs) = compute(&interactions) else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE users SET preference_tags = ?2, preference_coefficients = ?3 WHERE id = ?1",
                params![
                    user_id,
                    serde_json::to_string(&prefs.tags)?,
                    serde_json::to_string(&prefs.coefficients)?
                ],
            )?;
            Ok(Some(prefs))
        })
    }

    async fn peer_interactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PeerInteraction>, GraphStoreError> {
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            let mut stmt = tx.prepare(&format!(
                "WITH own AS (SELECT DISTINCT item_id FROM interactions WHERE user_id = ?1), \
                 peers AS (SELECT DISTINCT user_id FROM interactions \
                           WHERE user_id <> ?1 AND item_id IN (SELECT item_id FROM own)) \
                 SELECT p.user_id, p.kind, p.weight, {ITEM_COLUMNS} FROM interactions p \
                 JOIN items i ON i.id = p.item_id \
                 WHERE p.user_id IN (SELECT user_id FROM peers) \
                   AND p.item_id NOT IN (SELECT item_id FROM own) \
                 ORDER BY i.id, p.user_id, p.kind"
            ))?;
            let rows = stmt.query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    item_row(row, 3)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (peer_id, kind, weight, item) = row?;
                out.push(PeerInteraction {
                    peer_id,
                    kind: decode_kind(&kind)?,
                    weight,
                    item: decode_item(item)?,
                });
            }
            Ok(out)
        })
    }

    async fn preference_candidates(
        &self,
        user_id: &str,
    ) -> Result<PreferenceCandidates, GraphStoreError> {
        self.with_tx(|tx| {
            let preferences = load_user(tx, user_id)?
                .ok_or_else(|| TxError::Missing(format!("user {}", user_id)))?
                .preferences;
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items i \
                 WHERE i.id NOT IN (SELECT item_id FROM interactions WHERE user_id = ?1) \
                 ORDER BY i.id"
            ))?;
            let rows = stmt.query_map([user_id], |row| item_row(row, 0))?;
            let mut items = Vec::new();
            for row in rows {
                items.push(decode_item(row?)?);
            }
            Ok(PreferenceCandidates { preferences, items })
        })
    }

    async fn stats(&self) -> Result<GraphStats, GraphStoreError> {
        self.with_tx(|tx| {
            let count = |table: &str| -> Result<usize, TxError> {
                let n: i64 =
                    tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
                Ok(n as usize)
            };
            Ok(GraphStats {
                items: count("items")?,
                users: count("users")?,
                interactions: count("interactions")?,
            })
        })
    }
}
