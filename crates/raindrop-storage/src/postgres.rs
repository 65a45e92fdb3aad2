use crate::convert::{check_range, time_unit_from_code, timestamp_from_millis};
use crate::error::{is_unique_violation, map_sqlx_error};
use crate::{validate_table_name, DEFAULT_TABLE_NAME};
use async_trait::async_trait;
use jiff::Timestamp;
use raindrop_core::{Result, SlotStore, TimeUnit, WorkerSlot};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

const DDL: &str = include_str!("../ddl/postgres/raindrop_worker.sql");
const MAX_CONNECTIONS: u32 = 3;

/// PostgreSQL implementation of the slot store contract.
///
/// Mirrors [`crate::MySqlSlotStore`]; the table lives in the connection's
/// current schema.
#[derive(Debug, Clone)]
pub struct PostgresSlotStore {
    pool: PgPool,
    table: String,
}

impl PostgresSlotStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE_NAME.to_string(),
        }
    }

    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Opens a small connection pool over `table` and checks it can reach
    /// the server.
    pub async fn connect(database_url: &str, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool, table })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn select(&self, filter: &str) -> String {
        format!(
            r#"SELECT "id", "owner_code", "time_unit", "heartbeat_time", "create_time",
                   "update_time", "version", "deleted"
               FROM "{}" WHERE NOT "deleted" {filter}"#,
            self.table
        )
    }
}

fn slot_from_row(row: &PgRow) -> Result<WorkerSlot> {
    let time_unit: i16 = row.try_get("time_unit").map_err(map_sqlx_error)?;
    let heartbeat_time: i64 = row.try_get("heartbeat_time").map_err(map_sqlx_error)?;
    let create_time: i64 = row.try_get("create_time").map_err(map_sqlx_error)?;
    let update_time: i64 = row.try_get("update_time").map_err(map_sqlx_error)?;

    Ok(WorkerSlot {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        owner_code: row.try_get("owner_code").map_err(map_sqlx_error)?,
        time_unit: time_unit_from_code(time_unit as i64)?,
        heartbeat_time: timestamp_from_millis("heartbeat_time", heartbeat_time)?,
        create_time: timestamp_from_millis("create_time", create_time)?,
        update_time: timestamp_from_millis("update_time", update_time)?,
        version: row.try_get("version").map_err(map_sqlx_error)?,
        deleted: row.try_get("deleted").map_err(map_sqlx_error)?,
    })
}

#[async_trait]
impl SlotStore for PostgresSlotStore {
    async fn now(&self) -> Result<Timestamp> {
        let now_ms: i64 =
            sqlx::query_scalar("SELECT (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        timestamp_from_millis("database now", now_ms)
    }

    async fn table_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_tables
                WHERE schemaname = current_schema() AND tablename = $1
            )
            "#,
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(exists)
    }

    async fn provision_slots(&self, begin_id: i64, end_id: i64) -> Result<()> {
        check_range(begin_id, end_id)?;
        let now = Timestamp::now().as_millisecond();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let ddl = DDL.replace("{table}", &self.table);
        match (&mut *tx).execute(sqlx::raw_sql(&ddl))
            .await
        {
            Ok(_) => {}
            // concurrent CREATE TABLE IF NOT EXISTS collides on the catalog
            Err(err) if is_unique_violation(&err) => {
                info!(table = %self.table, "worker table created concurrently");
                return Ok(());
            }
            Err(err) => return Err(map_sqlx_error(err)),
        }

        let mut insert: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"INSERT INTO "{}" ("id", "heartbeat_time", "create_time", "update_time") "#,
            self.table
        ));
        insert.push_values(begin_id..=end_id, |mut row, id| {
            row.push_bind(id)
                .push_bind(0_i64)
                .push_bind(now)
                .push_bind(now);
        });

        match insert.build().execute(&mut *tx).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                info!(table = %self.table, "worker slots already provisioned");
                return Ok(());
            }
            Err(err) => return Err(map_sqlx_error(err)),
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        info!(table = %self.table, begin_id, end_id, "provisioned worker slots");
        Ok(())
    }

    async fn find_slot_by_owner(&self, owner_code: &str) -> Result<Option<WorkerSlot>> {
        let row = sqlx::query(&self.select(r#"AND "owner_code" = $1 ORDER BY "id" ASC LIMIT 1"#))
            .bind(owner_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn find_free_slots(&self, heartbeat_before: Timestamp) -> Result<Vec<WorkerSlot>> {
        let rows = sqlx::query(
            &self.select(r#"AND "heartbeat_time" < $1 ORDER BY "heartbeat_time" ASC, "id" ASC"#),
        )
        .bind(heartbeat_before.as_millisecond())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(slot_from_row).collect()
    }

    async fn activate_slot(
        &self,
        id: i64,
        owner_code: &str,
        time_unit: TimeUnit,
        expected_version: i64,
    ) -> Result<Option<WorkerSlot>> {
        let now = Timestamp::now().as_millisecond();
        let row = sqlx::query(&format!(
            r#"
            UPDATE "{}"
            SET "owner_code" = $1, "time_unit" = $2, "heartbeat_time" = $3, "update_time" = $3,
                "version" = "version" + 1
            WHERE "id" = $4 AND "version" = $5 AND NOT "deleted"
            RETURNING "id", "owner_code", "time_unit", "heartbeat_time", "create_time",
                      "update_time", "version", "deleted"
            "#,
            self.table
        ))
        .bind(owner_code)
        .bind(time_unit.code())
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if row.is_none() {
            debug!(id, expected_version, "slot activation not applied");
        }
        row.as_ref().map(slot_from_row).transpose()
    }

    async fn renew_slot(&self, id: i64, expected_version: i64) -> Result<Option<WorkerSlot>> {
        let now = Timestamp::now().as_millisecond();
        let row = sqlx::query(&format!(
            r#"
            UPDATE "{}"
            SET "heartbeat_time" = $1, "update_time" = $1, "version" = "version" + 1
            WHERE "id" = $2 AND "version" = $3 AND NOT "deleted"
            RETURNING "id", "owner_code", "time_unit", "heartbeat_time", "create_time",
                      "update_time", "version", "deleted"
            "#,
            self.table
        ))
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if row.is_none() {
            debug!(id, expected_version, "slot renewal not applied");
        }
        row.as_ref().map(slot_from_row).transpose()
    }

    async fn get_slot(&self, id: i64) -> Result<Option<WorkerSlot>> {
        let row = sqlx::query(&self.select(r#"AND "id" = $1"#))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(slot_from_row).transpose()
    }
}
