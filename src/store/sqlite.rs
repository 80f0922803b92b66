use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "id, email, created_at, updated_at";
const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at";
const EXPERIMENT_COLUMNS: &str = "id, owner_id, title, description, researcher_name, protocol_text, status, experiment_date, created_at, updated_at";
const TAG_COLUMNS: &str = "id, owner_id, name, category, color, created_at";
const FILE_COLUMNS: &str = "id, experiment_id, filename, storage_path, size_bytes, mime_type, created_at";
const SHARE_COLUMNS: &str = "experiment_id, user_id, permission_level, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Reads a text column into one of the string-backed domain enums.
fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn map_insert_error(e: rusqlite::Error) -> Error {
    if is_unique_violation(&e) {
        Error::AlreadyExists
    } else {
        Error::from(e)
    }
}

fn link_tags(tx: &Transaction<'_>, experiment_id: &str, tag_ids: &[String]) -> Result<()> {
    for tag_id in tag_ids {
        tx.execute(
            "INSERT OR IGNORE INTO experiment_tags (experiment_id, tag_id) VALUES (?1, ?2)",
            params![experiment_id, tag_id],
        )?;
    }
    Ok(())
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

fn row_to_experiment(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    Ok(Experiment {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        researcher_name: row.get(4)?,
        protocol_text: row.get(5)?,
        status: parse_column(row, 6)?,
        experiment_date: parse_date_column(row, 7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: row.get::<_, Option<String>>(9)?.map(|s| parse_datetime(&s)),
    })
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        category: parse_column(row, 3)?,
        color: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<StoredFile> {
    Ok(StoredFile {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        filename: row.get(2)?,
        storage_path: row.get(3)?,
        size_bytes: row.get(4)?,
        mime_type: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn row_to_share(row: &Row<'_>) -> rusqlite::Result<ExperimentShare> {
    Ok(ExperimentShare {
        experiment_id: row.get(0)?,
        user_id: row.get(1)?,
        permission_level: parse_column(row, 2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id,
                    user.email,
                    format_datetime(&user.created_at),
                    format_datetime(&user.updated_at),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], row_to_user)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    token.id,
                    token.token_hash,
                    token.token_lookup,
                    token.is_admin,
                    token.user_id,
                    format_datetime(&token.created_at),
                    token.expires_at.as_ref().map(format_datetime),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
            params![id],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], row_to_token)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_token)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // Experiment operations

    fn create_experiment(&self, experiment: &Experiment, tag_ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO experiments ({EXPERIMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                experiment.id,
                experiment.owner_id,
                experiment.title,
                experiment.description,
                experiment.researcher_name,
                experiment.protocol_text,
                experiment.status.as_str(),
                experiment.experiment_date.as_ref().map(format_date),
                format_datetime(&experiment.created_at),
                experiment.updated_at.as_ref().map(format_datetime),
            ],
        )?;
        link_tags(&tx, &experiment.id, tag_ids)?;

        tx.commit()?;
        Ok(())
    }

    fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1"),
            params![id],
            row_to_experiment,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_owned_experiments(&self, owner_id: &str) -> Result<Vec<Experiment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE owner_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![owner_id], row_to_experiment)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_experiment(&self, experiment: &Experiment, tag_ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE experiments SET title = ?1, description = ?2, researcher_name = ?3,
                protocol_text = ?4, status = ?5, experiment_date = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                experiment.title,
                experiment.description,
                experiment.researcher_name,
                experiment.protocol_text,
                experiment.status.as_str(),
                experiment.experiment_date.as_ref().map(format_date),
                experiment.updated_at.as_ref().map(format_datetime),
                experiment.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::not_found("experiment"));
        }

        tx.execute(
            "DELETE FROM experiment_tags WHERE experiment_id = ?1",
            params![experiment.id],
        )?;
        link_tags(&tx, &experiment.id, tag_ids)?;

        tx.commit()?;
        Ok(())
    }

    fn delete_experiment_cascade(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM experiment_tags WHERE experiment_id = ?1", params![id])?;
        tx.execute("DELETE FROM protocols WHERE experiment_id = ?1", params![id])?;
        tx.execute("DELETE FROM files WHERE experiment_id = ?1", params![id])?;
        tx.execute("DELETE FROM results WHERE experiment_id = ?1", params![id])?;
        tx.execute("DELETE FROM experiment_shares WHERE experiment_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM experiments WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(rows > 0)
    }

    // Tag operations

    fn create_tag(&self, tag: &Tag) -> Result<()> {
        self.conn()
            .execute(
                &format!("INSERT INTO tags ({TAG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    tag.id,
                    tag.owner_id,
                    tag.name,
                    tag.category.as_str(),
                    tag.color,
                    format_datetime(&tag.created_at),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_tag_by_id(&self, id: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1"),
            params![id],
            row_to_tag,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_tag_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE owner_id = ?1 AND name = ?2"),
            params![owner_id, name],
            row_to_tag,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tags(&self, owner_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE owner_id = ?1
             ORDER BY name COLLATE NOCASE, name"
        ))?;

        let rows = stmt.query_map(params![owner_id], row_to_tag)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_experiment_tags(&self, experiment_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.owner_id, t.name, t.category, t.color, t.created_at
             FROM tags t
             JOIN experiment_tags et ON t.id = et.tag_id
             WHERE et.experiment_id = ?1
             ORDER BY t.name COLLATE NOCASE, t.name",
        )?;

        let rows = stmt.query_map(params![experiment_id], row_to_tag)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Attached file operations

    fn create_file(&self, kind: FileKind, file: &StoredFile) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} ({FILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    kind.table()
                ),
                params![
                    file.id,
                    file.experiment_id,
                    file.filename,
                    file.storage_path,
                    file.size_bytes,
                    file.mime_type,
                    format_datetime(&file.created_at),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_file(&self, kind: FileKind, id: &str) -> Result<Option<StoredFile>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM {} WHERE id = ?1", kind.table()),
            params![id],
            row_to_file,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_files(&self, kind: FileKind, experiment_id: &str) -> Result<Vec<StoredFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM {} WHERE experiment_id = ?1 ORDER BY created_at, id",
            kind.table()
        ))?;

        let rows = stmt.query_map(params![experiment_id], row_to_file)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_file(&self, kind: FileKind, id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            params![id],
        )?;
        Ok(rows > 0)
    }

    // Result operations

    fn create_result(&self, result: &ResultRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO results (id, experiment_id, title, storage_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.id,
                result.experiment_id,
                result.title,
                result.storage_path,
                format_datetime(&result.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_results(&self, experiment_id: &str) -> Result<Vec<ResultRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, experiment_id, title, storage_path, created_at
             FROM results WHERE experiment_id = ?1 ORDER BY created_at, id",
        )?;

        let rows = stmt.query_map(params![experiment_id], |row| {
            Ok(ResultRecord {
                id: row.get(0)?,
                experiment_id: row.get(1)?,
                title: row.get(2)?,
                storage_path: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Share operations

    fn upsert_share(&self, share: &ExperimentShare) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO experiment_shares ({SHARE_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (experiment_id, user_id) DO UPDATE SET
                    permission_level = excluded.permission_level"
            ),
            params![
                share.experiment_id,
                share.user_id,
                share.permission_level.as_str(),
                format_datetime(&share.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_share(&self, experiment_id: &str, user_id: &str) -> Result<Option<ExperimentShare>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {SHARE_COLUMNS} FROM experiment_shares
                 WHERE experiment_id = ?1 AND user_id = ?2"
            ),
            params![experiment_id, user_id],
            row_to_share,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_shares(&self, user_id: &str) -> Result<Vec<ExperimentShare>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SHARE_COLUMNS} FROM experiment_shares WHERE user_id = ?1 ORDER BY experiment_id"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_share)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_experiment_shares(&self, experiment_id: &str) -> Result<Vec<ExperimentShare>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SHARE_COLUMNS} FROM experiment_shares
             WHERE experiment_id = ?1 ORDER BY created_at, user_id"
        ))?;

        let rows = stmt.query_map(params![experiment_id], row_to_share)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_share(&self, experiment_id: &str, user_id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM experiment_shares WHERE experiment_id = ?1 AND user_id = ?2",
            params![experiment_id, user_id],
        )?;
        Ok(rows > 0)
    }
}
