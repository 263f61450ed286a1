//! # Postgres Store
//!
//! Maps the relational model (`advertisements`, `users`, `argon`) onto the
//! domain repositories. The schema is owned by the surrounding site; this
//! module only issues runtime-checked queries against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    AdEvent, AdId, AdRepository, Advertisement, DomainError, Engagement, GlobalStats,
    NewAdvertisement, Owner, Result, SlotType, TrustRecord, TrustRepository, UserRepository,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const AD_COLUMNS: &str =
    "ad_id, user_id, level_id, type, image_url, created_at, pending, boost_count, views, clicks";
const OWNER_COLUMNS: &str =
    "id, username, total_views, total_clicks, is_admin, is_staff, verified, banned, boost_count";

pub struct PgStore {
    pool: PgPool,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn ad_from_row(row: &PgRow) -> Result<Advertisement> {
    let code: i32 = row.try_get("type").map_err(DomainError::storage)?;
    let image_url: Option<String> = row.try_get("image_url").map_err(DomainError::storage)?;
    Ok(Advertisement {
        id: row.try_get("ad_id").map_err(DomainError::storage)?,
        owner_id: row.try_get("user_id").map_err(DomainError::storage)?,
        level_id: row.try_get("level_id").map_err(DomainError::storage)?,
        slot: SlotType::from_code(code).map_err(DomainError::storage)?,
        image_url: image_url.unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(DomainError::storage)?,
        pending: row.try_get("pending").map_err(DomainError::storage)?,
        boost_count: to_u32(row.try_get("boost_count").map_err(DomainError::storage)?),
        views: to_u64(row.try_get("views").map_err(DomainError::storage)?),
        clicks: to_u64(row.try_get("clicks").map_err(DomainError::storage)?),
    })
}

fn owner_from_row(row: &PgRow) -> Result<Owner> {
    Ok(Owner {
        id: row.try_get("id").map_err(DomainError::storage)?,
        username: row.try_get("username").map_err(DomainError::storage)?,
        total_views: to_u64(row.try_get("total_views").map_err(DomainError::storage)?),
        total_clicks: to_u64(row.try_get("total_clicks").map_err(DomainError::storage)?),
        is_admin: row.try_get("is_admin").map_err(DomainError::storage)?,
        is_staff: row.try_get("is_staff").map_err(DomainError::storage)?,
        verified: row.try_get("verified").map_err(DomainError::storage)?,
        banned: row.try_get("banned").map_err(DomainError::storage)?,
        boost_count: to_u32(row.try_get("boost_count").map_err(DomainError::storage)?),
    })
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(DomainError::storage)?;
        info!(max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_ad(&self, sql: &str, id: AdId) -> Result<Option<Advertisement>> {
        sqlx::query(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?
            .as_ref()
            .map(ad_from_row)
            .transpose()
    }
}

#[async_trait]
impl AdRepository for PgStore {
    async fn list_all(&self) -> Result<Vec<Advertisement>> {
        let sql = format!("SELECT {AD_COLUMNS} FROM advertisements ORDER BY ad_id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        debug!(count = rows.len(), "advertisements loaded");
        rows.iter().map(ad_from_row).collect()
    }

    async fn get(&self, id: AdId) -> Result<Option<Advertisement>> {
        let sql = format!("SELECT {AD_COLUMNS} FROM advertisements WHERE ad_id = $1");
        self.fetch_ad(&sql, id).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Advertisement>> {
        let sql = format!("SELECT {AD_COLUMNS} FROM advertisements WHERE user_id = $1 ORDER BY ad_id DESC");
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        rows.iter().map(ad_from_row).collect()
    }

    async fn create(&self, ad: NewAdvertisement) -> Result<Advertisement> {
        let sql = format!(
            "INSERT INTO advertisements (user_id, level_id, type, pending) \
             VALUES ($1, $2, $3, TRUE) RETURNING {AD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&ad.owner_id)
            .bind(ad.level_id)
            .bind(ad.slot.code())
            .fetch_one(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        ad_from_row(&row)
    }

    async fn approve(&self, id: AdId, at: DateTime<Utc>) -> Result<Option<Advertisement>> {
        let sql = format!(
            "UPDATE advertisements SET pending = FALSE, created_at = $2 WHERE ad_id = $1 RETURNING {AD_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?
            .as_ref()
            .map(ad_from_row)
            .transpose()
    }

    async fn delete(&self, id: AdId) -> Result<Option<Advertisement>> {
        let sql = format!("DELETE FROM advertisements WHERE ad_id = $1 RETURNING {AD_COLUMNS}");
        self.fetch_ad(&sql, id).await
    }

    async fn set_image_url(&self, id: AdId, url: &str) -> Result<Option<Advertisement>> {
        let sql = format!("UPDATE advertisements SET image_url = $2 WHERE ad_id = $1 RETURNING {AD_COLUMNS}");
        sqlx::query(&sql)
            .bind(id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?
            .as_ref()
            .map(ad_from_row)
            .transpose()
    }

    /// Both updates share one transaction; dropping `tx` on an early return
    /// rolls the balance deduction back.
    async fn boost(&self, id: AdId, owner_id: &str, boosts: u32) -> Result<Advertisement> {
        let amount = i32::try_from(boosts)
            .map_err(|_| DomainError::ValidationError(format!("boost count {boosts} too large")))?;
        let mut tx = self.pool.begin().await.map_err(DomainError::storage)?;

        let deducted = sqlx::query(
            "UPDATE users SET boost_count = boost_count - $1 WHERE id = $2 AND boost_count >= $1",
        )
        .bind(amount)
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(DomainError::storage)?;

        if deducted.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DomainError::storage)?;
            return Err(match exists {
                Some(_) => DomainError::Conflict(format!("owner {owner_id} has fewer than {boosts} boosts")),
                None => DomainError::owner_not_found(owner_id),
            });
        }

        let sql = format!(
            "UPDATE advertisements SET boost_count = boost_count + $1 WHERE ad_id = $2 RETURNING {AD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(amount)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DomainError::storage)?
            .ok_or_else(|| DomainError::ad_not_found(id))?;
        let ad = ad_from_row(&row)?;

        tx.commit().await.map_err(DomainError::storage)?;
        Ok(ad)
    }

    async fn ad_stats(&self, id: AdId) -> Result<Option<Engagement>> {
        let row = sqlx::query("SELECT views, clicks FROM advertisements WHERE ad_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        row.map(|row| {
            Ok(Engagement {
                views: to_u64(row.try_get("views").map_err(DomainError::storage)?),
                clicks: to_u64(row.try_get("clicks").map_err(DomainError::storage)?),
            })
        })
        .transpose()
    }

    async fn record_event(&self, id: AdId, event: AdEvent) -> Result<Option<Advertisement>> {
        let sql = match event {
            AdEvent::View => {
                format!("UPDATE advertisements SET views = views + 1 WHERE ad_id = $1 RETURNING {AD_COLUMNS}")
            }
            AdEvent::Click => {
                format!("UPDATE advertisements SET clicks = clicks + 1 WHERE ad_id = $1 RETURNING {AD_COLUMNS}")
            }
        };
        self.fetch_ad(&sql, id).await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM advertisements WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn get_owner(&self, id: &str) -> Result<Option<Owner>> {
        let sql = format!("SELECT {OWNER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?
            .as_ref()
            .map(owner_from_row)
            .transpose()
    }

    async fn owner_totals(&self, id: &str) -> Result<Engagement> {
        let row = sqlx::query("SELECT total_views, total_clicks FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        match row {
            Some(row) => Ok(Engagement {
                views: to_u64(row.try_get("total_views").map_err(DomainError::storage)?),
                clicks: to_u64(row.try_get("total_clicks").map_err(DomainError::storage)?),
            }),
            None => Ok(Engagement::default()),
        }
    }

    async fn credit_owner(&self, id: &str, event: AdEvent) -> Result<()> {
        let sql = match event {
            AdEvent::View => "UPDATE users SET total_views = total_views + 1, updated_at = NOW() WHERE id = $1",
            AdEvent::Click => "UPDATE users SET total_clicks = total_clicks + 1, updated_at = NOW() WHERE id = $1",
        };
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DomainError::storage)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::owner_not_found(id));
        }
        Ok(())
    }

    async fn set_banned(&self, id: &str, banned: bool) -> Result<Option<Owner>> {
        let sql = format!("UPDATE users SET banned = $2 WHERE id = $1 RETURNING {OWNER_COLUMNS}");
        sqlx::query(&sql)
            .bind(id)
            .bind(banned)
            .fetch_optional(&self.pool)
            .await
            .map_err(DomainError::storage)?
            .as_ref()
            .map(owner_from_row)
            .transpose()
    }

    async fn global_stats(&self) -> Result<GlobalStats> {
        let totals = sqlx::query(
            "SELECT COALESCE(SUM(total_views), 0)::BIGINT AS views, \
                    COALESCE(SUM(total_clicks), 0)::BIGINT AS clicks \
             FROM users WHERE banned = FALSE",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DomainError::storage)?;

        let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM advertisements WHERE pending = FALSE")
            .fetch_one(&self.pool)
            .await
            .map_err(DomainError::storage)?;

        Ok(GlobalStats {
            total_views: to_u64(totals.try_get("views").map_err(DomainError::storage)?),
            total_clicks: to_u64(totals.try_get("clicks").map_err(DomainError::storage)?),
            ad_count: to_u64(live),
        })
    }
}

#[async_trait]
impl TrustRepository for PgStore {
    async fn get_trust(&self, account_id: i64) -> Result<Option<TrustRecord>> {
        let row = sqlx::query(
            "SELECT account_id, authtoken, valid_at FROM argon WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DomainError::storage)?;

        row.map(|row| {
            Ok(TrustRecord {
                account_id: row.try_get("account_id").map_err(DomainError::storage)?,
                token: row.try_get("authtoken").map_err(DomainError::storage)?,
                validated_at: row.try_get("valid_at").map_err(DomainError::storage)?,
            })
        })
        .transpose()
    }

    async fn upsert_trust(&self, account_id: i64, token: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO argon (account_id, authtoken, valid_at) VALUES ($1, $2, $3) \
             ON CONFLICT (account_id) DO UPDATE SET authtoken = EXCLUDED.authtoken, valid_at = EXCLUDED.valid_at",
        )
        .bind(account_id)
        .bind(token)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(DomainError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counters_clamp_to_zero() {
        assert_eq!(to_u64(-3), 0);
        assert_eq!(to_u64(42), 42);
        assert_eq!(to_u32(-1), 0);
    }
}
