//! Postgres-backed `EventStore` (§6, §9 "Replaceable semantics on
//! append-only stores"). Uses runtime-bound `sqlx::query` rather than the
//! compile-time-checked `query!`/`query_as!` macros, since those require a
//! live database reachable at build time.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::errors::{PolicyError, StoreError};
use crate::model::event::{Event, EventRecord, ReplaceKey};
use crate::model::Filter;

use super::{EventStore, PolicyStore, RelayMetadata};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Fetch ceiling applied when a query carries no `limit` at all, so an
/// unbounded filter never triggers a full-table read (§4.6, §9).
const DEFAULT_FETCH_CAP: i64 = 10_000;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn transient(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            StoreError::Transient(e.to_string())
        }
        _ => StoreError::Permanent(e.to_string()),
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    /// Replaceable/addressable write semantics per §9: for each event that
    /// carries a replace key, read the current winner under that key and
    /// skip the insert if the incoming event loses the tie-break,
    /// otherwise insert-then-delete-losers. Callers (the storage batcher)
    /// are responsible for serialising writes to the same key so this
    /// read-then-write is not racy in practice.
    async fn put_batch(&self, events: &[Event]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(transient)?;
        for event in events {
            match event.replace_key() {
                None => {
                    insert_event(&mut tx, event).await.map_err(transient)?;
                }
                Some(key) => {
                    let current = fetch_current_winner(&mut tx, &key)
                        .await
                        .map_err(transient)?;
                    if let Some(current) = &current {
                        if !event.wins_tiebreak(current) {
                            continue;
                        }
                    }
                    delete_replace_key(&mut tx, &key).await.map_err(transient)?;
                    insert_event(&mut tx, event).await.map_err(transient)?;
                }
            }
        }
        tx.commit().await.map_err(transient)?;
        Ok(())
    }

    /// Fetches a coarse candidate set with SQL (kind/author/time bounds,
    /// newest-first, capped), then applies the full §4.5 predicate,
    /// replaceable dedup, ordering and `limit` in process — prefix matching
    /// and tag constraints are awkward to express portably in SQL for an
    /// inverted `tags` column. The SQL-level cap carries headroom over
    /// `filter.limit` since replaceable dedup and post-fetch predicates
    /// (prefix/tag matches) can only shrink the row count, never grow it;
    /// a filter with no `limit` (e.g. an internal liveness probe) still
    /// gets a hard fetch ceiling rather than an unbounded table scan.
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE 1=1",
        );
        let mut binds: Vec<Bound> = Vec::new();

        if let Some(kinds) = &filter.kinds {
            sql.push_str(&format!(" AND kind = ANY(${})", binds.len() + 1));
            binds.push(Bound::Kinds(kinds.iter().map(|k| *k as i32).collect()));
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND created_at >= ${}", binds.len() + 1));
            binds.push(Bound::I64(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(&format!(" AND created_at <= ${}", binds.len() + 1));
            binds.push(Bound::I64(until));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let fetch_cap: i64 = match filter.limit {
            Some(limit) => (i64::from(limit).saturating_mul(4)).max(i64::from(limit) + 500),
            None => DEFAULT_FETCH_CAP,
        };
        sql.push_str(&format!(" LIMIT ${}", binds.len() + 1));
        binds.push(Bound::I64(fetch_cap));

        let mut query = sqlx::query(&sql);
        for bound in &binds {
            query = match bound {
                Bound::Kinds(v) => query.bind(v.clone()),
                Bound::I64(v) => query.bind(*v),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(transient)?;
        let mut winners: HashMap<ReplaceKey, Event> = HashMap::new();
        let mut plain = Vec::new();
        for row in rows {
            let record = EventRecord {
                id: row.get("id"),
                pubkey: row.get("pubkey"),
                created_at: row.get("created_at"),
                kind: row.get::<i32, _>("kind") as u32,
                tags: serde_json::from_value(row.get("tags")).unwrap_or_default(),
                content: row.get("content"),
                sig: row.get("sig"),
            };
            let Ok(event) = Event::try_from(record) else {
                continue;
            };
            if !filter.matches(&event) {
                continue;
            }
            match event.replace_key() {
                Some(key) => {
                    winners
                        .entry(key)
                        .and_modify(|current| {
                            if event.wins_tiebreak(current) {
                                *current = event.clone();
                            }
                        })
                        .or_insert_with(|| event.clone());
                }
                None => plain.push(event),
            }
        }
        let mut all: Vec<Event> = plain.into_iter().chain(winners.into_values()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            all.truncate(limit as usize);
        }
        Ok(all)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.query(filter).await?.len() as u64)
    }

    async fn remove(&self, filter: &Filter) -> Result<(), StoreError> {
        let matching = self.query(filter).await?;
        let mut tx = self.pool.begin().await.map_err(transient)?;
        for event in matching {
            sqlx::query("DELETE FROM events WHERE id = $1")
                .bind(&event.id_hex)
                .execute(&mut *tx)
                .await
                .map_err(transient)?;
        }
        tx.commit().await.map_err(transient)?;
        Ok(())
    }
}

enum Bound {
    Kinds(Vec<i32>),
    I64(i64),
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<(), sqlx::Error> {
    let key = event.replace_key();
    sqlx::query(
        r#"INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig,
                                replace_pubkey, replace_kind, replace_d)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           ON CONFLICT (id) DO NOTHING"#,
    )
    .bind(&event.id_hex)
    .bind(&event.pubkey_hex)
    .bind(event.created_at)
    .bind(event.kind as i32)
    .bind(serde_json::to_value(&event.tags).unwrap_or_default())
    .bind(&event.content)
    .bind(&event.sig_hex)
    .bind(key.as_ref().map(|_| event.pubkey_hex.clone()))
    .bind(key.as_ref().map(|_| event.kind as i32))
    .bind(key.as_ref().and_then(|k| k.d.clone()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_current_winner(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &ReplaceKey,
) -> Result<Option<Event>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, pubkey, created_at, kind, tags, content, sig FROM events
           WHERE replace_pubkey = $1 AND replace_kind = $2
             AND replace_d IS NOT DISTINCT FROM $3"#,
    )
    .bind(hex::encode(key.pubkey))
    .bind(key.kind as i32)
    .bind(&key.d)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.and_then(|r| {
        Event::try_from(EventRecord {
            id: r.get("id"),
            pubkey: r.get("pubkey"),
            created_at: r.get("created_at"),
            kind: r.get::<i32, _>("kind") as u32,
            tags: serde_json::from_value(r.get("tags")).unwrap_or_default(),
            content: r.get("content"),
            sig: r.get("sig"),
        })
        .ok()
    }))
}

async fn delete_replace_key(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &ReplaceKey,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"DELETE FROM events WHERE replace_pubkey = $1 AND replace_kind = $2
           AND replace_d IS NOT DISTINCT FROM $3"#,
    )
    .bind(hex::encode(key.pubkey))
    .bind(key.kind as i32)
    .bind(&key.d)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub struct PostgresPolicyStore {
    pool: PgPool,
}

impl PostgresPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn policy_err(e: sqlx::Error) -> PolicyError {
    PolicyError::Unreachable(e.to_string())
}

#[async_trait]
impl PolicyStore for PostgresPolicyStore {
    async fn is_pubkey_banned(&self, pubkey: &str) -> Result<bool, PolicyError> {
        let row = sqlx::query("SELECT 1 FROM banned_pubkeys WHERE pubkey = $1")
            .bind(pubkey)
            .fetch_optional(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(row.is_some())
    }

    async fn pubkey_allowlist(&self) -> Result<Vec<String>, PolicyError> {
        let rows = sqlx::query("SELECT pubkey FROM allowed_pubkeys")
            .fetch_all(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(rows.into_iter().map(|r| r.get("pubkey")).collect())
    }

    async fn is_event_banned(&self, id: &str) -> Result<bool, PolicyError> {
        let row = sqlx::query("SELECT 1 FROM banned_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(row.is_some())
    }

    async fn kind_allowlist(&self) -> Result<Vec<u32>, PolicyError> {
        let rows = sqlx::query("SELECT kind FROM allowed_kinds")
            .fetch_all(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i32, _>("kind") as u32)
            .collect())
    }

    async fn is_ip_blocked(&self, ip: &str) -> Result<bool, PolicyError> {
        let row = sqlx::query("SELECT 1 FROM blocked_ips WHERE ip = $1")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(row.is_some())
    }

    async fn relay_metadata(&self) -> Result<RelayMetadata, PolicyError> {
        let row = sqlx::query("SELECT name, description, icon FROM relay_metadata LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(policy_err)?;
        Ok(row
            .map(|r| RelayMetadata {
                name: r.get("name"),
                description: r.get("description"),
                icon: r.get("icon"),
            })
            .unwrap_or_default())
    }
}
