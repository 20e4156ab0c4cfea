//! SQLite Persistent Storage
//!
//! Provides durable storage for accounts, deposit events, withdrawal
//! requests and the admin audit trail, surviving service restarts.
//! Uses connection pooling via r2d2 for concurrent access.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{
    AccountStore, AuditStore, StorageError, StorageResult, WithdrawalStore,
};
use crate::audit::AdminAction;
use crate::types::account::{DepositEvent, UserAccount};
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

/// SQLite-backed platform store with connection pooling
///
/// One store carries all four tables; it implements each storage trait
/// so callers can hold it behind whichever interface they need.
pub struct SqlitePlatformStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlitePlatformStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                principal TEXT PRIMARY KEY,
                deposit_address TEXT UNIQUE,
                derivation_index INTEGER,
                balance_sats INTEGER NOT NULL DEFAULT 0,
                total_deposits_sats INTEGER NOT NULL DEFAULT 0,
                total_withdrawals_sats INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_deposit_address ON accounts(deposit_address);

            CREATE TABLE IF NOT EXISTS deposit_events (
                deposit_ref TEXT PRIMARY KEY,
                principal TEXT NOT NULL,
                amount_sats INTEGER NOT NULL,
                credited_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deposit_events_principal ON deposit_events(principal);

            CREATE TABLE IF NOT EXISTS withdrawals (
                id INTEGER PRIMARY KEY,
                principal TEXT NOT NULL,
                amount_sats INTEGER NOT NULL,
                to_address TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reservation_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                finalized_at INTEGER,
                rejection_reason TEXT,
                tx_hash TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_withdrawals_status ON withdrawals(status);
            CREATE INDEX IF NOT EXISTS idx_withdrawals_principal ON withdrawals(principal);

            CREATE TABLE IF NOT EXISTS admin_actions (
                id TEXT PRIMARY KEY,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_admin_actions_timestamp ON admin_actions(timestamp);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to UserAccount
    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<UserAccount> {
        Ok(UserAccount {
            principal: row.get("principal")?,
            deposit_address: row.get("deposit_address")?,
            derivation_index: row
                .get::<_, Option<i64>>("derivation_index")?
                .map(|v| v as u32),
            balance_sats: row.get::<_, i64>("balance_sats")? as u64,
            total_deposits_sats: row.get::<_, i64>("total_deposits_sats")? as u64,
            total_withdrawals_sats: row.get::<_, i64>("total_withdrawals_sats")? as u64,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
        })
    }

    /// Convert a database row to DepositEvent
    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<DepositEvent> {
        Ok(DepositEvent {
            deposit_ref: row.get("deposit_ref")?,
            principal: row.get("principal")?,
            amount_sats: row.get::<_, i64>("amount_sats")? as u64,
            credited_at: row.get::<_, i64>("credited_at")? as u64,
        })
    }

    /// Convert a database row to WithdrawalRequest
    fn row_to_withdrawal(row: &rusqlite::Row) -> rusqlite::Result<WithdrawalRequest> {
        let status_str: String = row.get("status")?;
        let status = status_str.parse().unwrap_or(WithdrawalStatus::Pending);

        Ok(WithdrawalRequest::from_parts(
            row.get::<_, i64>("id")? as u64,
            row.get("principal")?,
            row.get::<_, i64>("amount_sats")? as u64,
            row.get("to_address")?,
            status,
            row.get::<_, i64>("reservation_id")? as u64,
            row.get::<_, i64>("created_at")? as u64,
            row.get::<_, i64>("updated_at")? as u64,
            row.get::<_, Option<i64>>("finalized_at")?.map(|v| v as u64),
            row.get("rejection_reason")?,
            row.get("tx_hash")?,
        ))
    }

    /// Convert a database row to AdminAction
    fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<AdminAction> {
        let details_str: String = row.get("details")?;
        let details = serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null);

        Ok(AdminAction {
            id: row.get("id")?,
            actor: row.get("actor")?,
            action: row.get("action")?,
            details,
            timestamp: row.get::<_, i64>("timestamp")? as u64,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_account_sync(&self, account: &UserAccount) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO accounts (
                principal, deposit_address, derivation_index, balance_sats,
                total_deposits_sats, total_withdrawals_sats, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                account.principal,
                account.deposit_address,
                account.derivation_index.map(|v| v as i64),
                account.balance_sats as i64,
                account.total_deposits_sats as i64,
                account.total_withdrawals_sats as i64,
                account.created_at as i64,
                account.updated_at as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(account.principal.clone());
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn update_account_sync(&self, account: &UserAccount) -> Result<(), StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                r#"
            UPDATE accounts SET
                deposit_address = ?2,
                derivation_index = ?3,
                balance_sats = ?4,
                total_deposits_sats = ?5,
                total_withdrawals_sats = ?6,
                updated_at = ?7
            WHERE principal = ?1
            "#,
                params![
                    account.principal,
                    account.deposit_address,
                    account.derivation_index.map(|v| v as i64),
                    account.balance_sats as i64,
                    account.total_deposits_sats as i64,
                    account.total_withdrawals_sats as i64,
                    account.updated_at as i64,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(account.principal.clone()));
        }

        Ok(())
    }

    fn get_account_sync(&self, principal: &str) -> Result<Option<UserAccount>, StorageError> {
        let conn = self.conn()?;

        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE principal = ?1",
                params![principal],
                |row| Self::row_to_account(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(account)
    }

    fn get_account_by_address_sync(
        &self,
        address: &str,
    ) -> Result<Option<UserAccount>, StorageError> {
        let conn = self.conn()?;

        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE deposit_address = ?1",
                params![address],
                |row| Self::row_to_account(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(account)
    }

    fn get_all_accounts_sync(&self) -> Result<Vec<UserAccount>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM accounts ORDER BY principal ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let accounts = stmt
            .query_map([], |row| Self::row_to_account(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(accounts)
    }

    fn delete_account_sync(&self, principal: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                "DELETE FROM accounts WHERE principal = ?1",
                params![principal],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected > 0)
    }

    fn count_accounts_sync(&self) -> Result<usize, StorageError> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(count as usize)
    }

    fn insert_deposit_event_sync(&self, event: &DepositEvent) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO deposit_events (deposit_ref, principal, amount_sats, credited_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                event.deposit_ref,
                event.principal,
                event.amount_sats as i64,
                event.credited_at as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(event.deposit_ref.clone());
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn deposit_events_for_sync(&self, principal: &str) -> Result<Vec<DepositEvent>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM deposit_events
            WHERE principal = ?1
            ORDER BY credited_at ASC, deposit_ref ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let events = stmt
            .query_map(params![principal], |row| Self::row_to_event(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(events)
    }

    fn delete_deposit_events_for_sync(&self, principal: &str) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                "DELETE FROM deposit_events WHERE principal = ?1",
                params![principal],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected as u64)
    }

    fn clear_accounts_sync(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute("DELETE FROM accounts", [])
            .map_err(|e| StorageError::Database(e.to_string()))?;
        conn.execute("DELETE FROM deposit_events", [])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn insert_withdrawal_sync(&self, request: &WithdrawalRequest) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO withdrawals (
                id, principal, amount_sats, to_address, status,
                reservation_id, created_at, updated_at, finalized_at,
                rejection_reason, tx_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                request.id() as i64,
                request.principal(),
                request.amount_sats() as i64,
                request.to_address(),
                request.status().to_string(),
                request.reservation_id() as i64,
                request.created_at() as i64,
                request.updated_at() as i64,
                request.finalized_at().map(|v| v as i64),
                request.rejection_reason(),
                request.tx_hash(),
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(request.id().to_string());
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn update_withdrawal_sync(&self, request: &WithdrawalRequest) -> Result<(), StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                r#"
            UPDATE withdrawals SET
                principal = ?2,
                amount_sats = ?3,
                to_address = ?4,
                status = ?5,
                reservation_id = ?6,
                updated_at = ?7,
                finalized_at = ?8,
                rejection_reason = ?9,
                tx_hash = ?10
            WHERE id = ?1
            "#,
                params![
                    request.id() as i64,
                    request.principal(),
                    request.amount_sats() as i64,
                    request.to_address(),
                    request.status().to_string(),
                    request.reservation_id() as i64,
                    request.updated_at() as i64,
                    request.finalized_at().map(|v| v as i64),
                    request.rejection_reason(),
                    request.tx_hash(),
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(request.id().to_string()));
        }

        Ok(())
    }

    fn get_withdrawal_sync(&self, id: u64) -> Result<Option<WithdrawalRequest>, StorageError> {
        let conn = self.conn()?;

        let request = conn
            .query_row(
                "SELECT * FROM withdrawals WHERE id = ?1",
                params![id as i64],
                |row| Self::row_to_withdrawal(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(request)
    }

    fn get_withdrawals_by_status_sync(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM withdrawals WHERE status = ?1 ORDER BY id ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let requests = stmt
            .query_map(params![status.to_string()], |row| {
                Self::row_to_withdrawal(row)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(requests)
    }

    fn get_withdrawals_for_user_sync(
        &self,
        principal: &str,
    ) -> Result<Vec<WithdrawalRequest>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM withdrawals WHERE principal = ?1 ORDER BY id ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let requests = stmt
            .query_map(params![principal], |row| Self::row_to_withdrawal(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(requests)
    }

    fn get_all_withdrawals_sync(&self) -> Result<Vec<WithdrawalRequest>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM withdrawals ORDER BY id ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let requests = stmt
            .query_map([], |row| Self::row_to_withdrawal(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(requests)
    }

    fn max_withdrawal_id_sync(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        let max: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM withdrawals", [], |row| {
                row.get(0)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(max as u64)
    }

    fn clear_withdrawals_sync(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute("DELETE FROM withdrawals", [])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn append_action_sync(&self, entry: &AdminAction) -> Result<(), StorageError> {
        let conn = self.conn()?;

        let details = serde_json::to_string(&entry.details)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO admin_actions (id, actor, action, details, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                entry.id,
                entry.actor,
                entry.action,
                details,
                entry.timestamp as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(entry.id.clone());
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn actions_sync(&self) -> Result<Vec<AdminAction>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM admin_actions ORDER BY timestamp ASC, rowid ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let entries = stmt
            .query_map([], |row| Self::row_to_action(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(entries)
    }
}

#[async_trait]
impl AccountStore for SqlitePlatformStore {
    async fn insert(&self, account: &UserAccount) -> StorageResult<()> {
        self.insert_account_sync(account)
    }

    async fn update(&self, account: &UserAccount) -> StorageResult<()> {
        self.update_account_sync(account)
    }

    async fn get(&self, principal: &str) -> StorageResult<Option<UserAccount>> {
        self.get_account_sync(principal)
    }

    async fn get_by_address(&self, address: &str) -> StorageResult<Option<UserAccount>> {
        self.get_account_by_address_sync(address)
    }

    async fn get_all(&self) -> StorageResult<Vec<UserAccount>> {
        self.get_all_accounts_sync()
    }

    async fn delete(&self, principal: &str) -> StorageResult<bool> {
        self.delete_account_sync(principal)
    }

    async fn count(&self) -> StorageResult<usize> {
        self.count_accounts_sync()
    }

    async fn insert_deposit_event(&self, event: &DepositEvent) -> StorageResult<()> {
        self.insert_deposit_event_sync(event)
    }

    async fn deposit_events_for(&self, principal: &str) -> StorageResult<Vec<DepositEvent>> {
        self.deposit_events_for_sync(principal)
    }

    async fn delete_deposit_events_for(&self, principal: &str) -> StorageResult<u64> {
        self.delete_deposit_events_for_sync(principal)
    }

    async fn clear(&self) -> StorageResult<()> {
        self.clear_accounts_sync()
    }
}

#[async_trait]
impl WithdrawalStore for SqlitePlatformStore {
    async fn insert(&self, request: &WithdrawalRequest) -> StorageResult<()> {
        self.insert_withdrawal_sync(request)
    }

    async fn update(&self, request: &WithdrawalRequest) -> StorageResult<()> {
        self.update_withdrawal_sync(request)
    }

    async fn get(&self, id: u64) -> StorageResult<Option<WithdrawalRequest>> {
        self.get_withdrawal_sync(id)
    }

    async fn get_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> StorageResult<Vec<WithdrawalRequest>> {
        self.get_withdrawals_by_status_sync(status)
    }

    async fn get_for_user(&self, principal: &str) -> StorageResult<Vec<WithdrawalRequest>> {
        self.get_withdrawals_for_user_sync(principal)
    }

    async fn get_all(&self) -> StorageResult<Vec<WithdrawalRequest>> {
        self.get_all_withdrawals_sync()
    }

    async fn max_id(&self) -> StorageResult<u64> {
        self.max_withdrawal_id_sync()
    }

    async fn clear(&self) -> StorageResult<()> {
        self.clear_withdrawals_sync()
    }
}

#[async_trait]
impl AuditStore for SqlitePlatformStore {
    async fn append(&self, entry: &AdminAction) -> StorageResult<()> {
        self.append_action_sync(entry)
    }

    async fn entries(&self) -> StorageResult<Vec<AdminAction>> {
        self.actions_sync()
    }
}
