use crate::models::{CreateJob, JobDefinition, UpdateJob, DEFAULT_GROUP};
use sqlx::PgPool;

pub async fn create_job(pool: &PgPool, job: &CreateJob) -> Result<JobDefinition, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(
        r#"
        INSERT INTO job_definitions
            (name, group_name, invoke_target, cron_expression, enabled,
             concurrent, master_only, auto_replenish, priority)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(&job.name)
    .bind(job.group_name.as_deref().unwrap_or(DEFAULT_GROUP))
    .bind(&job.invoke_target)
    .bind(&job.cron_expression)
    .bind(job.enabled)
    .bind(job.concurrent)
    .bind(job.master_only)
    .bind(job.auto_replenish)
    .bind(job.priority)
    .fetch_one(pool)
    .await
}

pub async fn get_job(pool: &PgPool, id: i64) -> Result<Option<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>("SELECT * FROM job_definitions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_jobs(pool: &PgPool) -> Result<Vec<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>("SELECT * FROM job_definitions ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn list_enabled_jobs(pool: &PgPool) -> Result<Vec<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(
        "SELECT * FROM job_definitions WHERE enabled = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn update_job(
    pool: &PgPool,
    id: i64,
    update: &UpdateJob,
) -> Result<Option<JobDefinition>, sqlx::Error> {
    // `cron_expression` distinguishes "leave as is" from "clear".
    let (cron_set, cron_value) = match &update.cron_expression {
        Some(value) => (true, value.clone()),
        None => (false, None),
    };

    sqlx::query_as::<_, JobDefinition>(
        r#"
        UPDATE job_definitions
        SET name = COALESCE($2, name),
            group_name = COALESCE($3, group_name),
            invoke_target = COALESCE($4, invoke_target),
            cron_expression = CASE WHEN $5 THEN $6 ELSE cron_expression END,
            concurrent = COALESCE($7, concurrent),
            master_only = COALESCE($8, master_only),
            auto_replenish = COALESCE($9, auto_replenish),
            priority = COALESCE($10, priority),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&update.name)
    .bind(&update.group_name)
    .bind(&update.invoke_target)
    .bind(cron_set)
    .bind(cron_value)
    .bind(update.concurrent)
    .bind(update.master_only)
    .bind(update.auto_replenish)
    .bind(update.priority)
    .fetch_optional(pool)
    .await
}

pub async fn set_job_enabled(
    pool: &PgPool,
    id: i64,
    enabled: bool,
) -> Result<Option<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(
        r#"
        UPDATE job_definitions
        SET enabled = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(enabled)
    .fetch_optional(pool)
    .await
}

pub async fn delete_job(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_definitions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
