use crate::convert::{check_range, time_unit_from_code, timestamp_from_millis};
use crate::error::{is_unique_violation, map_sqlx_error};
use crate::{validate_table_name, DEFAULT_TABLE_NAME};
use async_trait::async_trait;
use jiff::Timestamp;
use raindrop_core::{Result, SlotStore, TimeUnit, WorkerSlot};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, MySql, MySqlPool, QueryBuilder, Row};
use tracing::{debug, info};

const DDL: &str = include_str!("../ddl/mysql/raindrop_worker.sql");
const MAX_CONNECTIONS: u32 = 3;

/// MySQL implementation of the slot store contract.
///
/// Timestamps are stored as `BIGINT` milliseconds written by the leasing
/// process. Rows are soft-deleted through the `deleted` flag and never
/// removed; every query ignores deleted rows.
#[derive(Debug, Clone)]
pub struct MySqlSlotStore {
    pool: MySqlPool,
    table: String,
}

impl MySqlSlotStore {
    /// Creates a store over the default table from an existing pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE_NAME.to_string(),
        }
    }

    /// Creates a store over a custom table.
    pub fn with_table(pool: MySqlPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Opens a small connection pool over `table` and checks it can reach
    /// the server.
    pub async fn connect(database_url: &str, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool, table })
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn select(&self, filter: &str) -> String {
        format!(
            "SELECT `id`, `owner_code`, `time_unit`, `heartbeat_time`, `create_time`, \
             `update_time`, `version`, `deleted` FROM `{}` WHERE `deleted` = 0 {filter}",
            self.table
        )
    }
}

fn slot_from_row(row: &MySqlRow) -> Result<WorkerSlot> {
    let time_unit: i8 = row.try_get("time_unit").map_err(map_sqlx_error)?;
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
impl SlotStore for MySqlSlotStore {
    async fn now(&self) -> Result<Timestamp> {
        let now_ms: i64 = sqlx::query_scalar("SELECT CAST(UNIX_TIMESTAMP(NOW(3)) * 1000 AS SIGNED)")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        timestamp_from_millis("database now", now_ms)
    }

    async fn table_exists(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = DATABASE()
              AND table_name = ?
              AND table_type = 'BASE TABLE'
            "#,
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count == 1)
    }

    async fn provision_slots(&self, begin_id: i64, end_id: i64) -> Result<()> {
        check_range(begin_id, end_id)?;
        let now = Timestamp::now().as_millisecond();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let ddl = DDL.replace("{table}", &self.table);
        (&mut *tx).execute(sqlx::raw_sql(&ddl))
            .await
            .map_err(map_sqlx_error)?;

        let mut insert: QueryBuilder<MySql> = QueryBuilder::new(format!(
            "INSERT INTO `{}` (`id`, `heartbeat_time`, `create_time`, `update_time`) ",
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
                // Another process provisioned the table first.
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
        let row = sqlx::query(&self.select("AND `owner_code` = ? ORDER BY `id` ASC LIMIT 1"))
            .bind(owner_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn find_free_slots(&self, heartbeat_before: Timestamp) -> Result<Vec<WorkerSlot>> {
        let rows = sqlx::query(
            &self.select("AND `heartbeat_time` < ? ORDER BY `heartbeat_time` ASC, `id` ASC"),
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
        let result = sqlx::query(&format!(
            r#"
            UPDATE `{}`
            SET `owner_code` = ?, `time_unit` = ?, `heartbeat_time` = ?, `update_time` = ?,
                `version` = `version` + 1
            WHERE `id` = ? AND `version` = ? AND `deleted` = 0
            "#,
            self.table
        ))
        .bind(owner_code)
        .bind(time_unit.code())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() != 1 {
            debug!(id, expected_version, rows = result.rows_affected(), "slot activation not applied");
            return Ok(None);
        }
        self.get_slot(id).await
    }

    async fn renew_slot(&self, id: i64, expected_version: i64) -> Result<Option<WorkerSlot>> {
        let now = Timestamp::now().as_millisecond();
        let result = sqlx::query(&format!(
            r#"
            UPDATE `{}`
            SET `heartbeat_time` = ?, `update_time` = ?, `version` = `version` + 1
            WHERE `id` = ? AND `version` = ? AND `deleted` = 0
            "#,
            self.table
        ))
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() != 1 {
            debug!(id, expected_version, rows = result.rows_affected(), "slot renewal not applied");
            return Ok(None);
        }
        self.get_slot(id).await
    }

    async fn get_slot(&self, id: i64) -> Result<Option<WorkerSlot>> {
        let row = sqlx::query(&self.select("AND `id` = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(slot_from_row).transpose()
    }
}
