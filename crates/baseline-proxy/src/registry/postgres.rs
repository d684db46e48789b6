//! PostgreSQL registry storage

use super::storage::{
    MappingStorage, WorkflowFilter, WorkflowStorage, WorkflowVersion, WorkgroupStorage,
    WorkstepStorage,
};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use baseline_types::{Mapping, MappingModel, Workflow, Workgroup, Workstep};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

/// PostgreSQL-backed registry storage
#[derive(Debug, Clone)]
pub struct PostgresRegistryStorage {
    pool: PgPool,
}

impl PostgresRegistryStorage {
    /// Connect to PostgreSQL and initialize the schema
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workgroups (
                id UUID PRIMARY KEY,
                organization_id UUID,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workgroups_participants (
                workgroup_id UUID NOT NULL,
                participant TEXT NOT NULL,
                PRIMARY KEY (workgroup_id, participant)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id UUID PRIMARY KEY,
                workgroup_id UUID,
                workflow_id UUID,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflows_workgroup_id ON workflows(workgroup_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_versions (
                id UUID PRIMARY KEY,
                root_workflow_id UUID NOT NULL,
                workflow_id UUID NOT NULL,
                version TEXT,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS workflow_versions_root ON workflow_versions(root_workflow_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS worksteps (
                id UUID PRIMARY KEY,
                workflow_id UUID NOT NULL,
                cardinality INTEGER NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS worksteps_workflow_id ON worksteps(workflow_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS mappings (
                id UUID PRIMARY KEY,
                organization_id UUID,
                workgroup_id UUID,
                type TEXT,
                ref TEXT,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS mappings_ref ON mappings(ref);"#,
            r#"
            CREATE TABLE IF NOT EXISTS mappingmodels (
                id UUID PRIMARY KEY,
                mapping_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS mappingmodels_mapping_id ON mappingmodels(mapping_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS mappingfields (
                id UUID PRIMARY KEY,
                mappingmodel_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS mappingfields_model_id ON mappingfields(mappingmodel_id);"#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }
}

fn storage_err(err: sqlx::Error) -> ProxyError {
    ProxyError::Storage(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(ProxyError::Serialization)
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(ProxyError::Serialization)
}

fn status_text<T: serde::Serialize>(status: &T) -> Result<String> {
    match serde_json::to_value(status).map_err(ProxyError::Serialization)? {
        Value::String(s) => Ok(s),
        other => Err(ProxyError::Storage(format!(
            "status did not serialize to a string: {other}"
        ))),
    }
}

#[async_trait]
impl WorkgroupStorage for PostgresRegistryStorage {
    async fn get_workgroup(&self, id: &Uuid) -> Result<Option<Workgroup>> {
        let row = sqlx::query("SELECT data FROM workgroups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|row| from_json(row.get::<Value, _>("data")))
            .transpose()
    }

    async fn list_workgroups(&self) -> Result<Vec<Workgroup>> {
        let rows = sqlx::query("SELECT data FROM workgroups ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.into_iter()
            .map(|row| from_json(row.get::<Value, _>("data")))
            .collect()
    }

    async fn upsert_workgroup(&self, workgroup: Workgroup) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO workgroups (id, organization_id, data, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET organization_id = $2, data = $3
            "#,
        )
        .bind(workgroup.id)
        .bind(workgroup.organization_id)
        .bind(to_json(&workgroup)?)
        .bind(workgroup.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query("DELETE FROM workgroups_participants WHERE workgroup_id = $1")
            .bind(workgroup.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for participant in &workgroup.participants {
            if let Some(address) = participant.address.as_deref() {
                sqlx::query(
                    "INSERT INTO workgroups_participants (workgroup_id, participant) VALUES ($1, $2)",
                )
                .bind(workgroup.id)
                .bind(address)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            }
        }

        tx.commit().await.map_err(storage_err)
    }
}

#[async_trait]
impl WorkflowStorage for PostgresRegistryStorage {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT data FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|row| from_json(row.get::<Value, _>("data")))
            .transpose()
    }

    async fn list_workflows(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>> {
        let mut sql = String::from("SELECT data FROM workflows WHERE TRUE");
        if filter.workgroup_id.is_some() {
            sql.push_str(" AND workgroup_id = $1");
        }
        if filter.prototypes_only {
            sql.push_str(" AND workflow_id IS NULL");
        }
        if filter.instances_only {
            sql.push_str(" AND workflow_id IS NOT NULL");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(workgroup_id) = filter.workgroup_id {
            query = query.bind(workgroup_id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.into_iter()
            .map(|row| from_json(row.get::<Value, _>("data")))
            .collect()
    }

    async fn insert_workflow(&self, workflow: Workflow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, workgroup_id, workflow_id, status, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.workgroup_id)
        .bind(workflow.workflow_id)
        .bind(status_text(&workflow.status)?)
        .bind(to_json(&workflow)?)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: Workflow) -> Result<()> {
        sqlx::query("UPDATE workflows SET status = $2, data = $3 WHERE id = $1")
            .bind(workflow.id)
            .bind(status_text(&workflow.status)?)
            .bind(to_json(&workflow)?)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM worksteps WHERE workflow_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_workflow_version(&self, version: WorkflowVersion) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_versions (id, root_workflow_id, workflow_id, version, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(version.id)
        .bind(version.root_workflow_id)
        .bind(version.workflow_id)
        .bind(version.version)
        .bind(version.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_workflow_versions(
        &self,
        root_workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, root_workflow_id, workflow_id, version, created_at
            FROM workflow_versions WHERE root_workflow_id = $1 ORDER BY created_at ASC
            "#,
        )
        .bind(root_workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowVersion {
                id: row.get("id"),
                root_workflow_id: row.get("root_workflow_id"),
                workflow_id: row.get("workflow_id"),
                version: row.get("version"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn find_workflow_version_root(&self, workflow_id: &Uuid) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT root_workflow_id FROM workflow_versions WHERE workflow_id = $1 LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|row| row.get("root_workflow_id")))
    }
}

#[async_trait]
impl WorkstepStorage for PostgresRegistryStorage {
    async fn get_workstep(&self, id: &Uuid) -> Result<Option<Workstep>> {
        let row = sqlx::query("SELECT data FROM worksteps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|row| from_json(row.get::<Value, _>("data")))
            .transpose()
    }

    async fn list_worksteps(&self, workflow_id: &Uuid) -> Result<Vec<Workstep>> {
        let rows = sqlx::query(
            "SELECT data FROM worksteps WHERE workflow_id = $1 ORDER BY cardinality ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|row| from_json(row.get::<Value, _>("data")))
            .collect()
    }

    async fn insert_workstep(&self, workstep: Workstep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO worksteps (id, workflow_id, cardinality, status, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(workstep.id)
        .bind(workstep.workflow_id)
        .bind(workstep.cardinality)
        .bind(status_text(&workstep.status)?)
        .bind(to_json(&workstep)?)
        .bind(workstep.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn update_workstep(&self, workstep: Workstep) -> Result<()> {
        sqlx::query("UPDATE worksteps SET cardinality = $2, status = $3, data = $4 WHERE id = $1")
            .bind(workstep.id)
            .bind(workstep.cardinality)
            .bind(status_text(&workstep.status)?)
            .bind(to_json(&workstep)?)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_workstep(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM worksteps WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_worksteps(&self, workflow_id: &Uuid, worksteps: Vec<Workstep>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM worksteps WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for workstep in &worksteps {
            sqlx::query(
                r#"
                INSERT INTO worksteps (id, workflow_id, cardinality, status, data, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(workstep.id)
            .bind(workstep.workflow_id)
            .bind(workstep.cardinality)
            .bind(status_text(&workstep.status)?)
            .bind(to_json(workstep)?)
            .bind(workstep.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)
    }
}

#[async_trait]
impl MappingStorage for PostgresRegistryStorage {
    async fn get_mapping(&self, id: &Uuid) -> Result<Option<Mapping>> {
        let row = sqlx::query("SELECT data FROM mappings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else { return Ok(None) };
        let mut mapping: Mapping = from_json(row.get::<Value, _>("data"))?;
        mapping.models = self.load_models(id).await?;
        Ok(Some(mapping))
    }

    async fn list_mappings(
        &self,
        organization_id: Option<Uuid>,
        workgroup_id: Option<Uuid>,
    ) -> Result<Vec<Mapping>> {
        let rows = sqlx::query(
            r#"
            SELECT id, data FROM mappings
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::uuid IS NULL OR workgroup_id = $2)
            ORDER BY type DESC
            "#,
        )
        .bind(organization_id)
        .bind(workgroup_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            let mut mapping: Mapping = from_json(row.get::<Value, _>("data"))?;
            mapping.models = self.load_models(&id).await?;
            mappings.push(mapping);
        }
        Ok(mappings)
    }

    async fn list_mappings_by_type(&self, mapping_type: &str) -> Result<Vec<Mapping>> {
        let rows = sqlx::query("SELECT id, data FROM mappings WHERE type = $1")
            .bind(mapping_type)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            let mut mapping: Mapping = from_json(row.get::<Value, _>("data"))?;
            mapping.models = self.load_models(&id).await?;
            mappings.push(mapping);
        }
        Ok(mappings)
    }

    async fn insert_mapping(&self, mapping: Mapping) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        Self::write_mapping(&mut tx, &mapping, false).await?;
        tx.commit().await.map_err(storage_err)
    }

    async fn replace_mapping(&self, mapping: Mapping) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            DELETE FROM mappingfields WHERE mappingmodel_id IN
                (SELECT id FROM mappingmodels WHERE mapping_id = $1)
            "#,
        )
        .bind(mapping.id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query("DELETE FROM mappingmodels WHERE mapping_id = $1")
            .bind(mapping.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        Self::write_mapping(&mut tx, &mapping, true).await?;
        tx.commit().await.map_err(storage_err)
    }

    async fn delete_mapping(&self, id: &Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            DELETE FROM mappingfields WHERE mappingmodel_id IN
                (SELECT id FROM mappingmodels WHERE mapping_id = $1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query("DELETE FROM mappingmodels WHERE mapping_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let result = sqlx::query("DELETE FROM mappings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }
}

impl PostgresRegistryStorage {
    async fn load_models(&self, mapping_id: &Uuid) -> Result<Vec<MappingModel>> {
        let rows = sqlx::query("SELECT id, data FROM mappingmodels WHERE mapping_id = $1")
            .bind(mapping_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            let mut model: MappingModel = from_json(row.get::<Value, _>("data"))?;

            let field_rows =
                sqlx::query("SELECT data FROM mappingfields WHERE mappingmodel_id = $1")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(storage_err)?;

            model.fields = field_rows
                .into_iter()
                .map(|row| from_json(row.get::<Value, _>("data")))
                .collect::<Result<Vec<_>>>()?;
            models.push(model);
        }
        Ok(models)
    }

    async fn write_mapping(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        mapping: &Mapping,
        update: bool,
    ) -> Result<()> {
        // the detail row is stored without its models; they have their own
        // tables
        let mut detail = mapping.clone();
        detail.models = Vec::new();

        if update {
            sqlx::query("UPDATE mappings SET type = $2, ref = $3, data = $4 WHERE id = $1")
                .bind(mapping.id)
                .bind(mapping.mapping_type.as_deref())
                .bind(mapping.mapping_ref.as_deref())
                .bind(to_json(&detail)?)
                .execute(&mut **tx)
                .await
                .map_err(storage_err)?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO mappings (id, organization_id, workgroup_id, type, ref, data, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(mapping.id)
            .bind(mapping.organization_id)
            .bind(mapping.workgroup_id)
            .bind(mapping.mapping_type.as_deref())
            .bind(mapping.mapping_ref.as_deref())
            .bind(to_json(&detail)?)
            .bind(mapping.created_at)
            .execute(&mut **tx)
            .await
            .map_err(storage_err)?;
        }

        for model in &mapping.models {
            let mut model_detail = model.clone();
            model_detail.fields = Vec::new();

            sqlx::query("INSERT INTO mappingmodels (id, mapping_id, data) VALUES ($1, $2, $3)")
                .bind(model.id)
                .bind(mapping.id)
                .bind(to_json(&model_detail)?)
                .execute(&mut **tx)
                .await
                .map_err(storage_err)?;

            for field in &model.fields {
                sqlx::query(
                    "INSERT INTO mappingfields (id, mappingmodel_id, data) VALUES ($1, $2, $3)",
                )
                .bind(field.id)
                .bind(model.id)
                .bind(to_json(field)?)
                .execute(&mut **tx)
                .await
                .map_err(storage_err)?;
            }
        }

        Ok(())
    }
}
