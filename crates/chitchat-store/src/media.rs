use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MediaRecord;

impl Database {
    /// Record metadata for a new blob.  Fails with
    /// [`StoreError::AlreadyExists`] if the path is taken.
    pub fn put_media(&self, media: &MediaRecord) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO media (path, content_type, size, blake3_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                media.path,
                media.content_type,
                media.size,
                media.blake3_hash,
                media.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_media(&self, path: &str) -> Result<Option<MediaRecord>> {
        let media = self
            .conn()
            .query_row(
                "SELECT path, content_type, size, blake3_hash, created_at
                 FROM media
                 WHERE path = ?1",
                params![path],
                row_to_media,
            )
            .optional()?;
        Ok(media)
    }
}

fn row_to_media(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRecord> {
    let path: String = row.get(0)?;
    let content_type: String = row.get(1)?;
    let size: i64 = row.get(2)?;
    let blake3_hash: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(MediaRecord {
        path,
        content_type,
        size,
        blake3_hash,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_never_replaces() {
        let db = Database::open_in_memory().unwrap();
        let mut record = MediaRecord {
            path: "u1/1700000000000.jpg".into(),
            content_type: "image/jpeg".into(),
            size: 4,
            blake3_hash: "00".into(),
            created_at: Utc::now(),
        };
        db.put_media(&record).unwrap();

        record.content_type = "image/gif".into();
        assert!(matches!(db.put_media(&record), Err(StoreError::AlreadyExists)));

        let stored = db.get_media("u1/1700000000000.jpg").unwrap().unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert!(db.get_media("u1/other.jpg").unwrap().is_none());
    }
}
