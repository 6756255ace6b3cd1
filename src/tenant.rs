//! Tenant registry.
//!
//! The real organization/billing system lives outside this service (see
//! `SPEC_FULL.md` §1 and §4.K); this is a minimal embedded stand-in so the
//! ingestion pipeline is runnable standalone. Backed by SQLite the same way
//! the teacher's `UserStore` persisted accounts.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub client_id: String,
    pub name: String,
    pub active: bool,
    /// Empty means "any origin allowed" (permissive dev/local tenants).
    pub allowed_origins: Vec<String>,
}

impl Tenant {
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            Some(o) => self.allowed_origins.iter().any(|allowed| allowed == o),
            None => false,
        }
    }
}

pub struct TenantRegistry {
    conn: Mutex<Connection>,
}

impl TenantRegistry {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("opening tenant registry database")?;
        let registry = Self { conn: Mutex::new(conn) };
        registry.init_schema()?;
        Ok(registry)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory tenant registry")?;
        let registry = Self { conn: Mutex::new(conn) };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tenants (
                client_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                allowed_origins TEXT NOT NULL DEFAULT ''
            )",
            [],
        )
        .context("creating tenants table")?;
        Ok(())
    }

    /// Insert or replace a tenant record. `allowed_origins` is comma-joined on storage.
    pub fn upsert(&self, tenant: &Tenant) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tenants (client_id, name, active, allowed_origins)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(client_id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                allowed_origins = excluded.allowed_origins",
            params![
                tenant.client_id,
                tenant.name,
                tenant.active as i64,
                tenant.allowed_origins.join(","),
            ],
        )
        .context("upserting tenant")?;
        info!(client_id = %tenant.client_id, "tenant registered");
        Ok(())
    }

    pub fn resolve(&self, client_id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT client_id, name, active, allowed_origins FROM tenants WHERE client_id = ?1")
            .context("preparing tenant lookup")?;
        let mut rows = stmt.query(params![client_id]).context("querying tenant")?;
        if let Some(row) = rows.next().context("reading tenant row")? {
            let allowed_origins_raw: String = row.get(3)?;
            Ok(Some(Tenant {
                client_id: row.get(0)?,
                name: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
                allowed_origins: allowed_origins_raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_tenant() {
        let registry = TenantRegistry::in_memory().unwrap();
        registry
            .upsert(&Tenant {
                client_id: "T".to_string(),
                name: "Acme".to_string(),
                active: true,
                allowed_origins: vec!["https://acme.example".to_string()],
            })
            .unwrap();

        let tenant = registry.resolve("T").unwrap().expect("tenant exists");
        assert!(tenant.active);
        assert!(tenant.allows_origin(Some("https://acme.example")));
        assert!(!tenant.allows_origin(Some("https://evil.example")));
    }

    #[test]
    fn unknown_tenant_resolves_to_none() {
        let registry = TenantRegistry::in_memory().unwrap();
        assert!(registry.resolve("nope").unwrap().is_none());
    }

    #[test]
    fn empty_allowlist_permits_any_origin() {
        let registry = TenantRegistry::in_memory().unwrap();
        registry
            .upsert(&Tenant {
                client_id: "dev".to_string(),
                name: "Dev".to_string(),
                active: true,
                allowed_origins: vec![],
            })
            .unwrap();
        let tenant = registry.resolve("dev").unwrap().unwrap();
        assert!(tenant.allows_origin(Some("https://anything.example")));
        assert!(tenant.allows_origin(None));
    }
}
