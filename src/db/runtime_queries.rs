use crate::models::{JobRuntime, RuntimeStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn insert_runtime(pool: &PgPool, runtime: &JobRuntime) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_runtime
            (execution_id, job_id, job_name, job_group, status, node_id,
             scheduled_time, enqueue_time, start_time, retry_count, max_retry, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(&runtime.execution_id)
    .bind(runtime.job_id)
    .bind(&runtime.job_name)
    .bind(&runtime.job_group)
    .bind(runtime.status)
    .bind(&runtime.node_id)
    .bind(runtime.scheduled_time)
    .bind(runtime.enqueue_time)
    .bind(runtime.start_time)
    .bind(runtime.retry_count)
    .bind(runtime.max_retry)
    .bind(&runtime.payload)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_runtime(pool: &PgPool, execution_id: &str) -> Result<Option<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>("SELECT * FROM job_runtime WHERE execution_id = $1")
        .bind(execution_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_active_for_job(pool: &PgPool, job_id: i64) -> Result<Option<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>(
        r#"
        SELECT * FROM job_runtime
        WHERE job_id = $1 AND status IN ('WAITING', 'RUNNING', 'RETRYING')
        ORDER BY enqueue_time
        LIMIT 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_active(pool: &PgPool) -> Result<Vec<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>(
        r#"
        SELECT * FROM job_runtime
        WHERE status IN ('WAITING', 'RUNNING', 'RETRYING')
        ORDER BY enqueue_time
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn list_running_for_node(pool: &PgPool, node_id: &str) -> Result<Vec<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>(
        "SELECT * FROM job_runtime WHERE node_id = $1 AND status = $2",
    )
    .bind(node_id)
    .bind(RuntimeStatus::Running)
    .fetch_all(pool)
    .await
}

/// Conditional WAITING/RETRYING -> RUNNING transition; `None` when another claimant won.
pub async fn claim(
    pool: &PgPool,
    execution_id: &str,
    node_id: &str,
    start_time: DateTime<Utc>,
) -> Result<Option<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>(
        r#"
        UPDATE job_runtime
        SET status = 'RUNNING', node_id = $2, start_time = $3
        WHERE execution_id = $1 AND status IN ('WAITING', 'RETRYING')
        RETURNING *
        "#,
    )
    .bind(execution_id)
    .bind(node_id)
    .bind(start_time)
    .fetch_optional(pool)
    .await
}

pub async fn release_to_waiting(pool: &PgPool, execution_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE job_runtime
        SET status = 'WAITING', node_id = NULL, start_time = NULL
        WHERE execution_id = $1 AND status = 'RUNNING'
        "#,
    )
    .bind(execution_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_retrying(pool: &PgPool, execution_id: &str) -> Result<Option<JobRuntime>, sqlx::Error> {
    sqlx::query_as::<_, JobRuntime>(
        r#"
        UPDATE job_runtime
        SET status = 'RETRYING', node_id = NULL, retry_count = retry_count + 1
        WHERE execution_id = $1 AND status IN ('WAITING', 'RUNNING', 'RETRYING')
        RETURNING *
        "#,
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await
}

pub async fn delete_runtime(pool: &PgPool, execution_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_runtime WHERE execution_id = $1")
        .bind(execution_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
