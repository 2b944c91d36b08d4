//! Durable per-identity daily quota.
//!
//! `check` is read-only; `record` is idempotent per conversation because the
//! conversation id is the primary key. The window is the UTC calendar day as
//! SQLite sees it (`date('now')`).

use rusqlite::{params, OptionalExtension};
use tabrelay_core::{Error, Result};
use tracing::{debug, info};

use crate::db::Database;

pub const DEFAULT_DAILY_RATE_LIMIT: u32 = 5;

pub struct RecordParams {
    pub conversation_id: String,
    pub identity_id: String,
    pub provider: String,
}

#[derive(Clone)]
pub struct RateLimiter {
    db: Database,
    daily_limit: u32,
}

impl RateLimiter {
    pub fn new(db: Database, daily_limit: u32) -> Self {
        Self { db, daily_limit }
    }

    pub fn with_default_limit(db: Database) -> Self {
        Self::new(db, DEFAULT_DAILY_RATE_LIMIT)
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Fails with `RateLimitExceeded` once today's distinct conversations reach the limit.
    pub fn check(&self, identity_id: &str) -> Result<()> {
        let used = self.today_count(identity_id)?;
        if used >= self.daily_limit {
            info!(identity_id, used, limit = self.daily_limit, "Daily rate limit reached");
            return Err(Error::RateLimitExceeded {
                used,
                limit: self.daily_limit,
            });
        }
        Ok(())
    }

    pub fn record(&self, params: RecordParams) -> Result<()> {
        let conn = self.db.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO rate_limiter (id, identity_id, provider) VALUES (?1, ?2, ?3)",
                params![params.conversation_id, params.identity_id, params.provider],
            )
            .map_err(|e| Error::Storage(format!("Failed to record conversation: {}", e)))?;
        debug!(
            conversation_id = %params.conversation_id,
            identity_id = %params.identity_id,
            provider = %params.provider,
            inserted = inserted > 0,
            "Recorded conversation"
        );
        Ok(())
    }

    /// Whether the conversation already has a row, on any day.
    pub fn is_recorded(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT 1 FROM rate_limiter WHERE id = ?1",
            params![conversation_id],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| Error::Storage(format!("Failed to look up conversation: {}", e)))
    }

    pub fn today_count(&self, identity_id: &str) -> Result<u32> {
        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM rate_limiter
                 WHERE identity_id = ?1 AND date(created_at) = date('now')",
                params![identity_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to count conversations: {}", e)))?;
        Ok(count as u32)
    }

    /// Remaining conversations for today, never negative.
    pub fn remaining(&self, identity_id: &str) -> Result<u32> {
        Ok(self.daily_limit.saturating_sub(self.today_count(identity_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_limiter(limit: u32) -> (RateLimiter, Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("rate.db")).unwrap();
        (RateLimiter::new(db.clone(), limit), db, dir)
    }

    fn record(limiter: &RateLimiter, conversation: &str, identity: &str) {
        limiter
            .record(RecordParams {
                conversation_id: conversation.to_string(),
                identity_id: identity.to_string(),
                provider: "default".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let (limiter, _db, _dir) = test_limiter(3);
        for i in 0..3 {
            limiter.check("id-1").unwrap();
            record(&limiter, &format!("conv-{}", i), "id-1");
        }

        match limiter.check("id-1") {
            Err(Error::RateLimitExceeded { used, limit }) => {
                assert_eq!(used, 3);
                assert_eq!(limit, 3);
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_conversation_counts_once() {
        let (limiter, _db, _dir) = test_limiter(3);
        for _ in 0..4 {
            record(&limiter, "same-conv", "id-1");
        }
        assert_eq!(limiter.today_count("id-1").unwrap(), 1);
        assert!(limiter.check("id-1").is_ok());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _db, _dir) = test_limiter(2);
        record(&limiter, "a1", "alice");
        record(&limiter, "a2", "alice");

        assert!(limiter.check("alice").is_err());
        assert!(limiter.check("bob").is_ok());
        assert_eq!(limiter.remaining("bob").unwrap(), 2);
    }

    #[test]
    fn test_check_has_no_side_effect() {
        let (limiter, _db, _dir) = test_limiter(1);
        for _ in 0..5 {
            limiter.check("id-1").unwrap();
        }
        assert_eq!(limiter.today_count("id-1").unwrap(), 0);
    }

    #[test]
    fn test_previous_days_do_not_count() {
        let (limiter, db, _dir) = test_limiter(1);
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO rate_limiter (id, identity_id, provider, created_at)
                 VALUES ('old', 'id-1', 'p', datetime('now', '-2 days'))",
                [],
            )
            .unwrap();
        assert_eq!(limiter.today_count("id-1").unwrap(), 0);
        assert!(limiter.check("id-1").is_ok());
    }

    #[test]
    fn test_is_recorded() {
        let (limiter, _db, _dir) = test_limiter(1);
        assert!(!limiter.is_recorded("conv-1").unwrap());
        record(&limiter, "conv-1", "id-1");
        assert!(limiter.is_recorded("conv-1").unwrap());
        assert!(!limiter.is_recorded("conv-2").unwrap());
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let (limiter, _db, _dir) = test_limiter(0);
        assert!(matches!(
            limiter.check("anyone"),
            Err(Error::RateLimitExceeded { used: 0, limit: 0 })
        ));
    }
}
