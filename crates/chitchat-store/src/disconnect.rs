//! Pending on-disconnect removals.
//!
//! Registrations are persisted so that removals owed by sessions that died
//! together with the server process still run on the next start.

use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::DisconnectOp;

impl Database {
    /// Register a removal for `session_id`.  Returns `false` if the same path
    /// was already registered for that session.
    pub fn register_disconnect_op(&self, session_id: &str, path: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO disconnect_ops (session_id, path, created_at)
             VALUES (?1, ?2, ?3)",
            params![session_id, path, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Remove and return every op registered by `session_id`.
    pub fn take_disconnect_ops(&self, session_id: &str) -> Result<Vec<DisconnectOp>> {
        let tx = self.conn().unchecked_transaction()?;
        let ops = {
            let mut stmt = tx.prepare(
                "SELECT session_id, path FROM disconnect_ops
                 WHERE session_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_op)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "DELETE FROM disconnect_ops WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(ops)
    }

    /// Remove and return every registered op, whatever the session.
    pub fn take_all_disconnect_ops(&self) -> Result<Vec<DisconnectOp>> {
        let tx = self.conn().unchecked_transaction()?;
        let ops = {
            let mut stmt = tx.prepare(
                "SELECT session_id, path FROM disconnect_ops
                 ORDER BY session_id, created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_op)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM disconnect_ops", [])?;
        tx.commit()?;
        Ok(ops)
    }
}

fn row_to_op(row: &rusqlite::Row<'_>) -> rusqlite::Result<DisconnectOp> {
    Ok(DisconnectOp {
        session_id: row.get(0)?,
        path: row.get(1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.register_disconnect_op("s1", "c/typingIndicator/u1").unwrap());
        assert!(!db.register_disconnect_op("s1", "c/typingIndicator/u1").unwrap());
    }

    #[test]
    fn test_take_runs_once() {
        let db = Database::open_in_memory().unwrap();
        db.register_disconnect_op("s1", "a/x").unwrap();
        db.register_disconnect_op("s2", "a/y").unwrap();

        let ops = db.take_disconnect_ops("s1").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, "a/x");
        assert!(db.take_disconnect_ops("s1").unwrap().is_empty());

        let rest = db.take_all_disconnect_ops().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].session_id, "s2");
        assert!(db.take_all_disconnect_ops().unwrap().is_empty());
    }
}
