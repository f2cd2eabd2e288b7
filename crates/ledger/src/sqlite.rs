//! SQLite-backed ledger.
//!
//! One SQL transaction per commit. Claim and balance updates are guarded with
//! `WHERE version = ?` so a stale writer changes zero rows.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use claimdesk_core::{
    now_secs, Amount, BalanceRecord, Claim, ClaimError, ClaimKind, ClaimPatch, ClaimPayload,
    ClaimStatus, Delta, PaymentStatus, Result, RevenueEntry, User,
};

use crate::feed::{ChangeFeed, ClaimSnapshot, FeedConfig, LedgerSnapshot, LedgerSubscription, Subscription};
use crate::store::{
    check_adjustment, check_transition, fresh_claim, BalanceLedger, Commit, LedgerStore,
    RequestStore, Transition,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        balance INTEGER NOT NULL CHECK (balance >= 0),
        payment_status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        version INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS claims (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        payload TEXT NOT NULL,
        resolved_at INTEGER,
        resolved_by TEXT,
        note TEXT
    );

    CREATE INDEX IF NOT EXISTS claims_kind_status ON claims (kind, status, seq);

    CREATE TABLE IF NOT EXISTS revenue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        admin_fee_amount INTEGER NOT NULL,
        original_amount INTEGER NOT NULL,
        source_user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    );
";

const CLAIM_COLUMNS: &str =
    "id, status, version, created_at, payload, resolved_at, resolved_by, note";

const USER_COLUMNS: &str = "id, email, balance, payment_status, created_at, version";

type RawClaim = (String, String, i64, i64, String, Option<i64>, Option<String>, Option<String>);
type RawUser = (String, String, i64, String, i64, i64);

/// Ledger persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    feed: Arc<ChangeFeed>,
}

impl SqliteLedger {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, config: FeedConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ClaimError::Storage(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(storage)?;
        info!(path = %path.display(), "opened ledger database");
        Self::with_connection(conn, config)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::with_connection(conn, FeedConfig::default())
    }

    pub fn with_connection(conn: Connection, config: FeedConfig) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            feed: Arc::new(ChangeFeed::new(config)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ClaimError::Storage("ledger connection mutex poisoned".to_string()))
    }

    fn publish_claims(&self, conn: &Connection, revision: u64, kind: ClaimKind, status: ClaimStatus) {
        match list_claims(conn, kind, status) {
            Ok(claims) => self.feed.publish_claims(ClaimSnapshot {
                revision,
                kind,
                status,
                claims,
            }),
            Err(e) => warn!(kind = %kind, status = %status, error = %e, "failed to build claim snapshot"),
        }
    }

    fn publish_ledger(&self, conn: &Connection, revision: u64) {
        match ledger_snapshot(conn, revision, self.feed.revenue_cutoff(now_secs())) {
            Ok(snapshot) => self.feed.publish_ledger(snapshot),
            Err(e) => warn!(error = %e, "failed to build ledger snapshot"),
        }
    }

    fn create_sync(&self, claim: Claim) -> Result<Claim> {
        let conn = self.lock()?;
        if load_claim(&conn, &claim.id)?.is_some() {
            return Err(ClaimError::DuplicateId(claim.id));
        }
        let claim = fresh_claim(claim);
        conn.execute(
            "INSERT INTO claims (id, kind, status, version, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                claim.id,
                claim.kind().as_str(),
                claim.status.as_str(),
                to_i64(claim.version)?,
                to_i64(claim.created_at)?,
                encode_payload(&claim.payload)?,
            ],
        )
        .map_err(storage)?;

        let revision = self.feed.next_revision();
        self.publish_claims(&conn, revision, claim.kind(), ClaimStatus::Pending);
        debug!(claim_id = %claim.id, kind = %claim.kind(), "claim created");
        Ok(claim)
    }

    fn commit_sync(&self, transition: Transition) -> Result<Commit> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage)?;

        let mut claim = load_claim(&tx, &transition.claim_id)?
            .ok_or_else(|| ClaimError::NotFound(format!("claim {}", transition.claim_id)))?;
        check_transition(&claim, transition.expected_version, transition.new_status)?;
        let kind = claim.kind();
        let from = claim.status;

        let adjusted = match &transition.adjustment {
            Some(adj) => {
                let user = load_user(&tx, &adj.user_id)?
                    .ok_or_else(|| ClaimError::NotFound(format!("user {}", adj.user_id)))?;
                let balance = check_adjustment(&user, adj.delta, adj.expected_version)?;
                Some((user, balance))
            }
            None => None,
        };

        claim.apply_patch(transition.new_status, &transition.patch);
        let updated = tx
            .execute(
                "UPDATE claims
                 SET status = ?1, version = ?2, payload = ?3, resolved_at = ?4, resolved_by = ?5, note = ?6
                 WHERE id = ?7 AND version = ?8",
                params![
                    claim.status.as_str(),
                    to_i64(claim.version)?,
                    encode_payload(&claim.payload)?,
                    claim.resolved_at.map(to_i64).transpose()?,
                    claim.resolved_by,
                    claim.note,
                    claim.id,
                    to_i64(transition.expected_version)?,
                ],
            )
            .map_err(storage)?;
        if updated != 1 {
            return Err(ClaimError::VersionConflict {
                entity: format!("claim {}", claim.id),
                expected: transition.expected_version,
                actual: claim.version,
            });
        }

        let balance = match adjusted {
            Some((user, balance)) => Some(update_balance(&tx, &user, balance)?),
            None => None,
        };

        if let Some(entry) = &transition.revenue {
            insert_revenue(&tx, entry)?;
        }
        tx.commit().map_err(storage)?;

        let revision = self.feed.next_revision();
        self.publish_claims(&conn, revision, kind, from);
        self.publish_claims(&conn, revision, kind, claim.status);
        if balance.is_some() || transition.revenue.is_some() {
            self.publish_ledger(&conn, revision);
        }

        info!(
            claim_id = %claim.id,
            kind = %kind,
            status = %claim.status,
            version = claim.version,
            revision,
            "claim transition committed"
        );
        Ok(Commit { claim, balance })
    }

    fn create_user_sync(&self, user: User) -> Result<User> {
        let conn = self.lock()?;
        if load_user(&conn, &user.id)?.is_some() {
            return Err(ClaimError::DuplicateId(user.id));
        }
        let user = User { version: 0, ..user };
        conn.execute(
            "INSERT INTO users (id, email, balance, payment_status, created_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                user.id,
                user.email,
                to_i64(user.balance)?,
                user.payment_status.as_str(),
                to_i64(user.created_at)?,
            ],
        )
        .map_err(storage)?;
        let revision = self.feed.next_revision();
        self.publish_ledger(&conn, revision);
        Ok(user)
    }

    fn adjust_sync(&self, user_id: &str, delta: Delta, expected_version: u64) -> Result<BalanceRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage)?;
        let user = load_user(&tx, user_id)?
            .ok_or_else(|| ClaimError::NotFound(format!("user {}", user_id)))?;
        let balance = check_adjustment(&user, delta, expected_version)?;
        let record = update_balance(&tx, &user, balance)?;
        tx.commit().map_err(storage)?;

        let revision = self.feed.next_revision();
        self.publish_ledger(&conn, revision);
        debug!(user_id, delta, balance = record.balance, "balance adjusted");
        Ok(record)
    }
}

#[async_trait]
impl RequestStore for SqliteLedger {
    async fn create(&self, claim: Claim) -> Result<Claim> {
        self.create_sync(claim)
    }

    async fn get(&self, id: &str) -> Result<Claim> {
        let conn = self.lock()?;
        load_claim(&conn, id)?.ok_or_else(|| ClaimError::NotFound(format!("claim {}", id)))
    }

    async fn list_by_status(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Vec<Claim>> {
        let conn = self.lock()?;
        list_claims(&conn, kind, status)
    }

    async fn subscribe(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Subscription> {
        let conn = self.lock()?;
        let claims = list_claims(&conn, kind, status)?;
        Ok(self.feed.subscribe_claims(ClaimSnapshot {
            revision: self.feed.revision(),
            kind,
            status,
            claims,
        }))
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        new_status: ClaimStatus,
        patch: ClaimPatch,
    ) -> Result<Claim> {
        let transition = Transition {
            claim_id: id.to_string(),
            expected_version,
            new_status,
            patch,
            adjustment: None,
            revenue: None,
        };
        self.commit_sync(transition).map(|c| c.claim)
    }
}

#[async_trait]
impl BalanceLedger for SqliteLedger {
    async fn create_user(&self, user: User) -> Result<User> {
        self.create_user_sync(user)
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.lock()?;
        load_user(&conn, id)?.ok_or_else(|| ClaimError::NotFound(format!("user {}", id)))
    }

    async fn read(&self, user_id: &str) -> Result<BalanceRecord> {
        self.get_user(user_id).await.map(|u| u.balance_record())
    }

    async fn atomic_adjust(
        &self,
        user_id: &str,
        delta: Delta,
        expected_version: u64,
    ) -> Result<BalanceRecord> {
        self.adjust_sync(user_id, delta, expected_version)
    }

    async fn total_balance(&self) -> Result<Amount> {
        let conn = self.lock()?;
        Ok(ledger_totals(&conn)?.0)
    }

    async fn subscribe_ledger(&self) -> Result<LedgerSubscription> {
        let conn = self.lock()?;
        let initial = ledger_snapshot(
            &conn,
            self.feed.revision(),
            self.feed.revenue_cutoff(now_secs()),
        )?;
        Ok(self.feed.subscribe_ledger(initial))
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn commit(&self, transition: Transition) -> Result<Commit> {
        self.commit_sync(transition)
    }

    async fn revenue_since(&self, since: u64) -> Result<Vec<RevenueEntry>> {
        let conn = self.lock()?;
        revenue_since(&conn, since)
    }
}

fn storage(e: rusqlite::Error) -> ClaimError {
    ClaimError::Storage(e.to_string())
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| ClaimError::Storage(format!("value {} exceeds INTEGER range", value)))
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| ClaimError::Storage(format!("negative {}: {}", column, value)))
}

fn encode_payload(payload: &ClaimPayload) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| ClaimError::Storage(e.to_string()))
}

fn raw_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawClaim> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn claim_from_raw(raw: RawClaim) -> Result<Claim> {
    let (id, status, version, created_at, payload, resolved_at, resolved_by, note) = raw;
    let status = ClaimStatus::parse(&status).ok_or_else(|| {
        ClaimError::Storage(format!("claim {} has non-canonical status {:?}", id, status))
    })?;
    let payload: ClaimPayload = serde_json::from_str(&payload)
        .map_err(|e| ClaimError::Storage(format!("claim {} payload: {}", id, e)))?;
    Ok(Claim {
        status,
        version: to_u64(version, "version")?,
        created_at: to_u64(created_at, "created_at")?,
        payload,
        resolved_at: resolved_at.map(|t| to_u64(t, "resolved_at")).transpose()?,
        resolved_by,
        note,
        id,
    })
}

fn load_claim(conn: &Connection, id: &str) -> Result<Option<Claim>> {
    let sql = format!("SELECT {} FROM claims WHERE id = ?1", CLAIM_COLUMNS);
    conn.query_row(&sql, params![id], raw_claim)
        .optional()
        .map_err(storage)?
        .map(claim_from_raw)
        .transpose()
}

fn list_claims(conn: &Connection, kind: ClaimKind, status: ClaimStatus) -> Result<Vec<Claim>> {
    let sql = format!(
        "SELECT {} FROM claims WHERE kind = ?1 AND status = ?2 ORDER BY seq",
        CLAIM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(storage)?;
    let rows = stmt
        .query_map(params![kind.as_str(), status.as_str()], raw_claim)
        .map_err(storage)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage)?;
    rows.into_iter().map(claim_from_raw).collect()
}

fn raw_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn load_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let raw = conn
        .query_row(&sql, params![id], raw_user)
        .optional()
        .map_err(storage)?;
    let Some((id, email, balance, payment_status, created_at, version)) = raw else {
        return Ok(None);
    };
    let payment_status = PaymentStatus::parse(&payment_status).ok_or_else(|| {
        ClaimError::Storage(format!("user {} has unknown payment status {:?}", id, payment_status))
    })?;
    Ok(Some(User {
        balance: to_u64(balance, "balance")?,
        created_at: to_u64(created_at, "created_at")?,
        version: to_u64(version, "version")?,
        id,
        email,
        payment_status,
    }))
}

fn update_balance(conn: &Connection, user: &User, balance: Amount) -> Result<BalanceRecord> {
    let updated = conn
        .execute(
            "UPDATE users SET balance = ?1, version = version + 1 WHERE id = ?2 AND version = ?3",
            params![to_i64(balance)?, user.id, to_i64(user.version)?],
        )
        .map_err(storage)?;
    if updated != 1 {
        return Err(ClaimError::VersionConflict {
            entity: format!("user {}", user.id),
            expected: user.version,
            actual: user.version + 1,
        });
    }
    Ok(BalanceRecord {
        balance,
        version: user.version + 1,
    })
}

fn insert_revenue(conn: &Connection, entry: &RevenueEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO revenue (admin_fee_amount, original_amount, source_user_id, kind, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            to_i64(entry.admin_fee_amount)?,
            to_i64(entry.original_amount)?,
            entry.source_user_id,
            entry.kind.as_str(),
            to_i64(entry.timestamp)?,
        ],
    )
    .map_err(storage)?;
    Ok(())
}

fn revenue_since(conn: &Connection, since: u64) -> Result<Vec<RevenueEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT admin_fee_amount, original_amount, source_user_id, kind, timestamp
             FROM revenue WHERE timestamp >= ?1 ORDER BY seq",
        )
        .map_err(storage)?;
    let rows = stmt
        .query_map(params![to_i64(since)?], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })
        .map_err(storage)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage)?;

    rows.into_iter()
        .map(|(fee, original, source_user_id, kind, timestamp)| {
            Ok(RevenueEntry {
                admin_fee_amount: to_u64(fee, "admin_fee_amount")?,
                original_amount: to_u64(original, "original_amount")?,
                source_user_id,
                kind: ClaimKind::parse(&kind).ok_or_else(|| {
                    ClaimError::Storage(format!("revenue row has unknown kind {:?}", kind))
                })?,
                timestamp: to_u64(timestamp, "timestamp")?,
            })
        })
        .collect()
}

fn ledger_totals(conn: &Connection) -> Result<(Amount, usize)> {
    let (sum, count): (i64, i64) = conn
        .query_row(
            "SELECT COALESCE(SUM(balance), 0), COUNT(*) FROM users",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(storage)?;
    Ok((to_u64(sum, "total balance")?, to_u64(count, "user count")? as usize))
}

fn ledger_snapshot(conn: &Connection, revision: u64, cutoff: u64) -> Result<LedgerSnapshot> {
    let (total_balance, user_count) = ledger_totals(conn)?;
    Ok(LedgerSnapshot {
        revision,
        total_balance,
        user_count,
        revenue: revenue_since(conn, cutoff)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path, FeedConfig::default()).unwrap();
            ledger.create_user(User::new("u1", "u1@example.com", 100)).await.unwrap();
            ledger.create(Claim::withdrawal("w1", "u1", 3_000)).await.unwrap();
        }

        let ledger = SqliteLedger::open(&path, FeedConfig::default()).unwrap();
        assert_eq!(ledger.read("u1").await.unwrap().balance, 100);
        let claim = ledger.get("w1").await.unwrap();
        assert_eq!(claim.status, ClaimStatus::Pending);
        assert_eq!(claim.payload.amount(), 3_000);
    }

    #[tokio::test]
    async fn test_non_canonical_status_is_rejected() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.create(Claim::task("t1", "u1", "task", 10)).await.unwrap();
        {
            let conn = ledger.lock().unwrap();
            conn.execute("UPDATE claims SET status = 'Pending' WHERE id = 't1'", [])
                .unwrap();
        }
        let err = ledger.get("t1").await.unwrap_err();
        assert!(matches!(err, ClaimError::Storage(msg) if msg.contains("non-canonical")));
    }

    #[tokio::test]
    async fn test_balance_check_constraint_backs_funds_rule() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.create_user(User::new("u1", "u1@example.com", 100)).await.unwrap();
        let err = ledger.atomic_adjust("u1", -200, 0).await.unwrap_err();
        assert!(matches!(err, ClaimError::InsufficientFunds { .. }));
        assert_eq!(ledger.read("u1").await.unwrap(), BalanceRecord { balance: 100, version: 0 });
    }
}
