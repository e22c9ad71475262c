//! CRUD operations for local identity-provider [`Account`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Account;

impl Database {
    /// Insert a new account.  Fails with [`StoreError::AlreadyExists`] if the
    /// email is taken.
    pub fn create_account(&self, account: &Account) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO accounts (user_id, email, display_name, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.user_id,
                account.email,
                account.display_name,
                account.password_hash,
                account.created_at.to_rfc3339(),
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

    pub fn get_account(&self, user_id: &str) -> Result<Account> {
        self.conn()
            .query_row(
                "SELECT user_id, email, display_name, password_hash, created_at
                 FROM accounts WHERE user_id = ?1",
                params![user_id],
                row_to_account,
            )
            .map_err(not_found)
    }

    pub fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let account = self
            .conn()
            .query_row(
                "SELECT user_id, email, display_name, password_hash, created_at
                 FROM accounts WHERE email = ?1",
                params![email],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE accounts SET display_name = ?2 WHERE user_id = ?1",
            params![user_id, display_name],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Log a password reset request.  Delivery is someone else's job.
    pub fn record_password_reset(&self, user_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO password_resets (user_id, requested_at) VALUES (?1, ?2)",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn count_password_resets(&self, user_id: &str) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM password_resets WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let created_str: String = row.get(4)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Account {
        user_id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        password_hash: row.get(3)?,
        created_at,
    })
}
