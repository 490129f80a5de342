// src/db.rs
use crate::error::AppError;
use crate::models::{LedgerEntry, User, UserId};
use log::{error, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    username    TEXT NOT NULL UNIQUE,
    hash        TEXT NOT NULL,
    cash        TEXT NOT NULL DEFAULT '10000.00',
    session_gen INTEGER NOT NULL DEFAULT 0   -- bumped on logout
);

CREATE TABLE IF NOT EXISTS transactions (
    id      INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    symbol  TEXT NOT NULL,
    shares  INTEGER NOT NULL,   -- signed: +buy / -sell
    price   TEXT NOT NULL,      -- per share, fixed at execution
    date    TEXT NOT NULL,
    time    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_by_user ON transactions (user_id, symbol);
"#;

/// Handle on the SQLite store. Cloning shares the single connection.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        info!("Opening database at {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn, path.to_path_buf())
    }

    pub async fn new_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, AppError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        if let Err(e) = conn.execute_batch(SCHEMA) {
            error!("Failed to create schema: {}", e);
            return Err(e.into());
        }
        info!("Database ready.");
        Ok(Database {
            connection: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn with_connection<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&Connection) -> Result<R, AppError>,
    {
        let conn = self.connection.lock().await;
        f(&conn)
    }

    /// Runs `f` inside `BEGIN IMMEDIATE ... COMMIT`. Any error returned by
    /// `f` drops the transaction, which rolls it back.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&Connection) -> Result<R, AppError>,
    {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Inserts a user with the schema default cash. A taken username is
    /// reported as a validation error, including when two registrations race.
    pub async fn create_user(&self, username: &str, hash: &str) -> Result<UserId, AppError> {
        self.with_connection(|conn| {
            match conn.execute(
                "INSERT INTO users (username, hash) VALUES (?1, ?2)",
                params![username, hash],
            ) {
                Ok(_) => Ok(UserId(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(AppError::validation("username already exists"))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn find_users(&self, username: &str) -> Result<Vec<User>, AppError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, hash, cash, session_gen FROM users WHERE username = ?1",
            )?;
            let users = stmt
                .query_map([username], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    /// Current session generation of a user, `None` if the user is gone.
    pub async fn session_generation(&self, user: UserId) -> Result<Option<i64>, AppError> {
        self.with_connection(|conn| {
            let generation = conn
                .query_row(
                    "SELECT session_gen FROM users WHERE id = ?1",
                    [user.0],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(generation)
        })
        .await
    }

    /// Retires every session token issued to the user so far.
    pub async fn end_sessions(&self, user: UserId) -> Result<(), AppError> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE users SET session_gen = session_gen + 1 WHERE id = ?1",
                [user.0],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn cash(&self, user: UserId) -> Result<Decimal, AppError> {
        self.with_connection(|conn| read_cash(conn, user)).await
    }

    pub async fn ledger(&self, user: UserId) -> Result<Vec<LedgerEntry>, AppError> {
        self.with_connection(|conn| read_ledger(conn, user)).await
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        hash: row.get(2)?,
        cash: decimal_column(row, 3)?,
        session_gen: row.get(4)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        symbol: row.get(2)?,
        shares: row.get(3)?,
        price: decimal_column(row, 4)?,
        date: row.get(5)?,
        time: row.get(6)?,
    })
}

// Currency columns are stored as decimal text so no precision is lost.
fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn read_cash(conn: &Connection, user: UserId) -> Result<Decimal, AppError> {
    let cash = conn.query_row("SELECT cash FROM users WHERE id = ?1", [user.0], |row| {
        decimal_column(row, 0)
    })?;
    Ok(cash)
}

pub fn write_cash(conn: &Connection, user: UserId, cash: Decimal) -> Result<(), AppError> {
    conn.execute(
        "UPDATE users SET cash = ?1 WHERE id = ?2",
        params![cash.to_string(), user.0],
    )?;
    Ok(())
}

/// All ledger rows of a user, oldest first.
pub fn read_ledger(conn: &Connection, user: UserId) -> Result<Vec<LedgerEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, symbol, shares, price, date, time
         FROM transactions WHERE user_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map([user.0], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn append_entry(
    conn: &Connection,
    user: UserId,
    symbol: &str,
    shares: i64,
    price: Decimal,
) -> Result<i64, AppError> {
    let now = chrono::Utc::now();
    conn.execute(
        "INSERT INTO transactions (user_id, symbol, shares, price, date, time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.0,
            symbol,
            shares,
            price.to_string(),
            now.format("%Y-%m-%d").to_string(),
            now.format("%H:%M:%S").to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
