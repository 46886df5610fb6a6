use crate::models::{JobExecutionLog, LogQuery, NewExecutionLog};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

pub async fn insert_log(pool: &PgPool, log: &NewExecutionLog) -> Result<JobExecutionLog, sqlx::Error> {
    sqlx::query_as::<_, JobExecutionLog>(
        r#"
        INSERT INTO job_execution_log
            (execution_id, job_id, job_name, job_group, status, node_id, scheduled_time,
             start_time, end_time, duration_ms, retry_count, error_message, error_detail, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING *
        "#,
    )
    .bind(&log.execution_id)
    .bind(log.job_id)
    .bind(&log.job_name)
    .bind(&log.job_group)
    .bind(log.status)
    .bind(&log.node_id)
    .bind(log.scheduled_time)
    .bind(log.start_time)
    .bind(log.end_time)
    .bind(log.duration_ms())
    .bind(log.retry_count)
    .bind(&log.error_message)
    .bind(&log.error_detail)
    .bind(&log.payload)
    .fetch_one(pool)
    .await
}

pub async fn list_logs(pool: &PgPool, query: &LogQuery, limit: i64) -> Result<Vec<JobExecutionLog>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM job_execution_log WHERE 1 = 1");
    if let Some(job_id) = query.job_id {
        builder.push(" AND job_id = ").push_bind(job_id);
    }
    if let Some(execution_id) = &query.execution_id {
        builder.push(" AND execution_id = ").push_bind(execution_id.clone());
    }
    builder.push(" ORDER BY end_time DESC, id DESC LIMIT ").push_bind(limit);

    builder.build_query_as::<JobExecutionLog>().fetch_all(pool).await
}

pub async fn delete_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_execution_log WHERE end_time < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
