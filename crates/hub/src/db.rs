use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::calibration::{LiquidCalibration, PhCalibration};
use crate::cycle::GrowthCycle;
use crate::profile::{GrowthProfile, GrowthStage};

/// Durable storage for the catalog, the active cycle and both calibrations.
/// Every commit is a single statement or a single transaction, so a reload
/// never observes a partial write.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    seedling: String,
    growing: String,
    harvesting: String,
}

impl ProfileRow {
    fn into_profile(self) -> Result<GrowthProfile> {
        let stage = |json: &str, which: &str| -> Result<GrowthStage> {
            serde_json::from_str(json)
                .with_context(|| format!("profile '{}': bad {which} stage json", self.id))
        };
        Ok(GrowthProfile {
            seedling: stage(&self.seedling, "seedling")?,
            growing: stage(&self.growing, "growing")?,
            harvesting: stage(&self.harvesting, "harvesting")?,
            id: self.id,
            name: self.name,
        })
    }
}

#[derive(FromRow)]
struct CycleRow {
    profile_id: String,
    start_timestamp: i64,
    active: bool,
}

#[derive(FromRow)]
struct LiquidRow {
    dry: i64,
    critical_level: Option<i64>,
    full: i64,
}

#[derive(FromRow)]
struct PhRow {
    ph4_raw: f64,
    ph7_raw: f64,
    ph10_raw: f64,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/hydro/hydro.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Close the pool. Later calls fail, which tests use to simulate a
    /// storage outage.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ----------------------------
    // Profile catalog
    // ----------------------------

    /// `None` if no catalog has ever been committed.
    pub async fn load_catalog(&self) -> Result<Option<Vec<GrowthProfile>>> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM catalog_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("load_catalog: read catalog_meta failed")?;
        if revision.is_none() {
            return Ok(None);
        }

        let rows: Vec<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, name, seedling, growing, harvesting
            FROM profiles
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_catalog failed")?;

        rows.into_iter()
            .map(ProfileRow::into_profile)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Replace the whole catalog in one transaction.
    pub async fn commit_catalog(&self, catalog: &[GrowthProfile]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("commit_catalog: begin failed")?;

        sqlx::query("DELETE FROM profiles")
            .execute(&mut *tx)
            .await
            .context("commit_catalog: clear failed")?;

        for (position, p) in catalog.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO profiles (id, position, name, seedling, growing, harvesting)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&p.id)
            .bind(position as i64)
            .bind(&p.name)
            .bind(serde_json::to_string(&p.seedling)?)
            .bind(serde_json::to_string(&p.growing)?)
            .bind(serde_json::to_string(&p.harvesting)?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("commit_catalog: insert '{}' failed", p.id))?;
        }

        sqlx::query(
            r#"
            INSERT INTO catalog_meta (id, revision) VALUES (1, 1)
            ON CONFLICT(id) DO UPDATE SET revision = revision + 1
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("commit_catalog: bump revision failed")?;

        tx.commit().await.context("commit_catalog: commit failed")?;
        Ok(())
    }

    // ----------------------------
    // Active cycle
    // ----------------------------

    pub async fn load_active_cycle(&self) -> Result<Option<GrowthCycle>> {
        let row: Option<CycleRow> = sqlx::query_as(
            "SELECT profile_id, start_timestamp, active FROM active_cycle WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("load_active_cycle failed")?;

        Ok(row.map(|r| GrowthCycle {
            profile_id: r.profile_id,
            start_timestamp: r.start_timestamp,
            active: r.active,
        }))
    }

    pub async fn commit_active_cycle(&self, cycle: &GrowthCycle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO active_cycle (id, profile_id, start_timestamp, active)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              profile_id=excluded.profile_id,
              start_timestamp=excluded.start_timestamp,
              active=excluded.active
            "#,
        )
        .bind(&cycle.profile_id)
        .bind(cycle.start_timestamp)
        .bind(cycle.active)
        .execute(&self.pool)
        .await
        .context("commit_active_cycle failed")?;
        Ok(())
    }

    // ----------------------------
    // Calibration
    // ----------------------------

    pub async fn load_liquid_calibration(&self) -> Result<Option<LiquidCalibration>> {
        let row: Option<LiquidRow> =
            sqlx::query_as("SELECT dry, critical_level, full FROM liquid_calibration WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("load_liquid_calibration failed")?;

        Ok(row.map(|r| LiquidCalibration {
            dry: r.dry,
            critical_level: r.critical_level,
            full: r.full,
        }))
    }

    pub async fn commit_liquid_calibration(&self, calib: &LiquidCalibration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO liquid_calibration (id, dry, critical_level, full)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              dry=excluded.dry,
              critical_level=excluded.critical_level,
              full=excluded.full
            "#,
        )
        .bind(calib.dry)
        .bind(calib.critical_level)
        .bind(calib.full)
        .execute(&self.pool)
        .await
        .context("commit_liquid_calibration failed")?;
        Ok(())
    }

    pub async fn load_ph_calibration(&self) -> Result<Option<PhCalibration>> {
        let row: Option<PhRow> =
            sqlx::query_as("SELECT ph4_raw, ph7_raw, ph10_raw FROM ph_calibration WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("load_ph_calibration failed")?;

        Ok(row.map(|r| PhCalibration {
            ph4_raw: r.ph4_raw,
            ph7_raw: r.ph7_raw,
            ph10_raw: r.ph10_raw,
        }))
    }

    pub async fn commit_ph_calibration(&self, calib: &PhCalibration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ph_calibration (id, ph4_raw, ph7_raw, ph10_raw)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              ph4_raw=excluded.ph4_raw,
              ph7_raw=excluded.ph7_raw,
              ph10_raw=excluded.ph10_raw
            "#,
        )
        .bind(calib.ph4_raw)
        .bind(calib.ph7_raw)
        .bind(calib.ph10_raw)
        .execute(&self.pool)
        .await
        .context("commit_ph_calibration failed")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::default_catalog;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn fresh_db_has_nothing_committed() {
        let db = test_db().await;
        assert!(db.load_catalog().await.unwrap().is_none());
        assert!(db.load_active_cycle().await.unwrap().is_none());
        assert!(db.load_liquid_calibration().await.unwrap().is_none());
        assert!(db.load_ph_calibration().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn catalog_round_trip_keeps_order() {
        let db = test_db().await;
        let mut catalog = default_catalog();
        catalog.reverse();
        db.commit_catalog(&catalog).await.unwrap();

        let loaded = db.load_catalog().await.unwrap().unwrap();
        assert_eq!(loaded, catalog);
    }

    #[tokio::test]
    async fn empty_catalog_commit_is_not_never_committed() {
        let db = test_db().await;
        db.commit_catalog(&[]).await.unwrap();
        assert_eq!(db.load_catalog().await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn catalog_commit_replaces_previous() {
        let db = test_db().await;
        db.commit_catalog(&default_catalog()).await.unwrap();
        let only_lettuce: Vec<_> = default_catalog()
            .into_iter()
            .filter(|p| p.id == "lettuce")
            .collect();
        db.commit_catalog(&only_lettuce).await.unwrap();

        let loaded = db.load_catalog().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "lettuce");
    }

    #[tokio::test]
    async fn cycle_upsert() {
        let db = test_db().await;
        db.commit_active_cycle(&GrowthCycle::started("tomatoes", 1_700_000_000))
            .await
            .unwrap();
        let stopped = GrowthCycle::started("tomatoes", 1_700_000_000).stopped();
        db.commit_active_cycle(&stopped).await.unwrap();
        assert_eq!(db.load_active_cycle().await.unwrap(), Some(stopped));
    }

    #[tokio::test]
    async fn calibrations_round_trip() {
        let db = test_db().await;
        let liquid = LiquidCalibration {
            dry: 8_000,
            critical_level: None,
            full: 120_000,
        };
        db.commit_liquid_calibration(&liquid).await.unwrap();
        assert_eq!(db.load_liquid_calibration().await.unwrap(), Some(liquid));

        let ph = PhCalibration {
            ph4_raw: 3000.0,
            ph7_raw: 2480.5,
            ph10_raw: 1990.0,
        };
        db.commit_ph_calibration(&ph).await.unwrap();
        assert_eq!(db.load_ph_calibration().await.unwrap(), Some(ph));
    }

    #[tokio::test]
    async fn closed_pool_fails_commits() {
        let db = test_db().await;
        db.close().await;
        assert!(db.commit_catalog(&default_catalog()).await.is_err());
        assert!(db
            .commit_active_cycle(&GrowthCycle::default())
            .await
            .is_err());
    }
}
