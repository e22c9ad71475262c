//! Persistence for realtime collection children ([`Node`]).

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Node;

const LAST_SEQ: &str = "last_seq";

impl Database {
    /// Highest commit sequence ever allocated to a node.
    pub fn last_seq(&self) -> Result<i64> {
        let seq: Option<i64> = self
            .conn()
            .query_row(
                "SELECT value FROM engine_meta WHERE name = ?1",
                params![LAST_SEQ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    /// Insert or replace a node.
    ///
    /// An existing row keeps its original `seq` so replays stay in creation
    /// order. The allocated sequence high-water mark is bumped in the same
    /// transaction.
    pub fn put_node(&self, node: &Node) -> Result<()> {
        let value = serde_json::to_string(&node.value)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO nodes (collection, key, seq, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(collection, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![node.collection, node.key, node.seq, value, now],
        )?;
        tx.execute(
            "INSERT INTO engine_meta (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = MAX(value, excluded.value)",
            params![LAST_SEQ, node.seq],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_node(&self, collection: &str, key: &str) -> Result<Option<Node>> {
        let node = self
            .conn()
            .query_row(
                "SELECT collection, key, seq, value
                 FROM nodes
                 WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// All children of a collection in creation order.
    pub fn list_nodes(&self, collection: &str) -> Result<Vec<Node>> {
        let mut stmt = self.conn().prepare(
            "SELECT collection, key, seq, value
             FROM nodes
             WHERE collection = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![collection], row_to_node)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    /// Delete a node.  Returns `true` if a row was deleted.
    pub fn delete_node(&self, collection: &str, key: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM nodes WHERE collection = ?1 AND key = ?2",
            params![collection, key],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let collection: String = row.get(0)?;
    let key: String = row.get(1)?;
    let seq: i64 = row.get(2)?;
    let raw: String = row.get(3)?;

    let value = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Node {
        collection,
        key,
        seq,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(collection: &str, key: &str, seq: i64, value: serde_json::Value) -> Node {
        Node {
            collection: collection.into(),
            key: key.into(),
            seq,
            value,
        }
    }

    #[test]
    fn test_list_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        db.put_node(&node("channels", "b", 2, json!({"name": "b"}))).unwrap();
        db.put_node(&node("channels", "a", 1, json!({"name": "a"}))).unwrap();
        db.put_node(&node("other", "z", 3, json!(true))).unwrap();

        let keys: Vec<_> = db
            .list_nodes("channels")
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(db.last_seq().unwrap(), 3);
    }

    #[test]
    fn test_update_keeps_original_seq() {
        let db = Database::open_in_memory().unwrap();
        db.put_node(&node("c/messages", "m1", 5, json!({"photoURL": "NOTSET"})))
            .unwrap();
        db.put_node(&node("c/messages", "m1", 9, json!({"photoURL": "gs://b/p"})))
            .unwrap();

        let stored = db.get_node("c/messages", "m1").unwrap().unwrap();
        assert_eq!(stored.seq, 5);
        assert_eq!(stored.value["photoURL"], "gs://b/p");
    }

    #[test]
    fn test_delete() {
        let db = Database::open_in_memory().unwrap();
        db.put_node(&node("t", "u1", 1, json!(true))).unwrap();
        assert!(db.delete_node("t", "u1").unwrap());
        assert!(!db.delete_node("t", "u1").unwrap());
        assert!(db.get_node("t", "u1").unwrap().is_none());
    }

    #[test]
    fn test_last_seq_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.last_seq().unwrap(), 0);
    }
}
