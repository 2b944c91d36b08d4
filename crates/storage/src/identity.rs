use rusqlite::{params, OptionalExtension};
use tabrelay_core::{Error, Result};
use tracing::info;

use crate::db::Database;

/// Resolves the identity used as the rate-limiting key.
///
/// Lookup order: the stored row, then a configured install id, then a fresh
/// UUID. Whichever wins is persisted so later runs see the same value.
#[derive(Clone)]
pub struct IdentityService {
    db: Database,
}

impl IdentityService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self) -> Result<Option<String>> {
        let conn = self.db.conn()?;
        conn.query_row("SELECT identity_id FROM identity WHERE id = 1", [], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to read identity: {}", e)))
    }

    pub fn resolve(&self, configured: Option<&str>) -> Result<String> {
        if let Some(existing) = self.get()? {
            return Ok(existing);
        }

        let identity = match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                info!(identity = %id, "Using configured install id as identity");
                id.to_string()
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                info!(identity = %id, "Generated new identity");
                id
            }
        };
        self.save(&identity)?;
        Ok(identity)
    }

    fn save(&self, identity: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO identity (id, identity_id) VALUES (1, ?1)",
            params![identity],
        )
        .map_err(|e| Error::Storage(format!("Failed to save identity: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_service() -> (IdentityService, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("id.db")).unwrap();
        (IdentityService::new(db), dir)
    }

    #[test]
    fn test_generates_and_persists() {
        let (svc, _dir) = test_service();
        assert!(svc.get().unwrap().is_none());

        let first = svc.resolve(None).unwrap();
        assert!(uuid::Uuid::parse_str(&first).is_ok());
        assert_eq!(svc.resolve(None).unwrap(), first);
    }

    #[test]
    fn test_configured_id_used_when_empty() {
        let (svc, _dir) = test_service();
        assert_eq!(svc.resolve(Some("install-42")).unwrap(), "install-42");
        assert_eq!(svc.get().unwrap().as_deref(), Some("install-42"));
    }

    #[test]
    fn test_stored_id_wins_over_configured() {
        let (svc, _dir) = test_service();
        let stored = svc.resolve(None).unwrap();
        assert_eq!(svc.resolve(Some("install-42")).unwrap(), stored);
    }

    #[test]
    fn test_blank_configured_id_is_ignored() {
        let (svc, _dir) = test_service();
        let id = svc.resolve(Some("   ")).unwrap();
        assert_ne!(id.trim(), "");
    }
}
