//! Postgres persistence backend. Each record is stored whole as JSONB next
//! to the scalar columns used for ordering; `ON DELETE CASCADE` removes a
//! session's history with it.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use tutor_core::model::{Intervention, Patch, Run, Session};
use tutor_core::profile::LearningProfile;
use tutor_core::store::{Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let row: Option<Json<Session>> =
            sqlx::query_scalar("SELECT body FROM tutor_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_error)?;
        Ok(row.map(|Json(session)| session))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_sessions (id, user_id, status, created_at, body) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body",
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(Json(session))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<Json<Session>> =
            sqlx::query_scalar("SELECT body FROM tutor_sessions ORDER BY created_at DESC, id DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_error)?;
        Ok(rows.into_iter().map(|Json(s)| s).collect())
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tutor_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_runs (id, session_id, created_at, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(run.id)
        .bind(run.session_id)
        .bind(run.created_at)
        .bind(Json(run))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn load_run(&self, session_id: Uuid, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let row: Option<Json<Run>> =
            sqlx::query_scalar("SELECT body FROM tutor_runs WHERE session_id = $1 AND id = $2")
                .bind(session_id)
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_error)?;
        Ok(row.map(|Json(run)| run))
    }

    async fn list_runs(&self, session_id: Uuid) -> Result<Vec<Run>, StoreError> {
        let rows: Vec<Json<Run>> = sqlx::query_scalar(
            "SELECT body FROM tutor_runs WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn save_intervention(&self, intervention: &Intervention) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_interventions (id, session_id, created_at, body) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(intervention.id)
        .bind(intervention.session_id)
        .bind(intervention.created_at)
        .bind(Json(intervention))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn list_interventions(&self, session_id: Uuid) -> Result<Vec<Intervention>, StoreError> {
        let rows: Vec<Json<Intervention>> = sqlx::query_scalar(
            "SELECT body FROM tutor_interventions WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(rows.into_iter().map(|Json(i)| i).collect())
    }

    async fn save_patch(&self, patch: &Patch) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_patches (id, session_id, status, created_at, body) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body",
        )
        .bind(patch.id)
        .bind(patch.session_id)
        .bind(patch.status.as_str())
        .bind(patch.created_at)
        .bind(Json(patch))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn list_patches(&self, session_id: Uuid) -> Result<Vec<Patch>, StoreError> {
        let rows: Vec<Json<Patch>> = sqlx::query_scalar(
            "SELECT body FROM tutor_patches WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(rows.into_iter().map(|Json(p)| p).collect())
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<LearningProfile>, StoreError> {
        let row: Option<Json<LearningProfile>> =
            sqlx::query_scalar("SELECT body FROM tutor_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend_error)?;
        Ok(row.map(|Json(p)| p))
    }

    async fn save_profile(&self, profile: &LearningProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_profiles (user_id, updated_at, body) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET updated_at = EXCLUDED.updated_at, body = EXCLUDED.body",
        )
        .bind(&profile.user_id)
        .bind(profile.updated_at)
        .bind(Json(profile))
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tutor_core::model::{Code, SessionIntent, SessionStatus};
    use tutor_core::policy::LearningPolicy;

    // Runs only when DATABASE_URL points at a scratch database.
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::migrate!("../migrations").run(&pool).await.ok()?;
        Some(PgStore::new(pool))
    }

    fn session() -> Session {
        let now = chrono::Utc::now();
        Session {
            id: Uuid::now_v7(),
            user_id: "pg-test".into(),
            exercise_id: Some("go/hello".into()),
            spec_path: None,
            intent: SessionIntent::Training,
            status: SessionStatus::Active,
            topic: None,
            code: Code::from([("main.go".to_string(), "package main\n".to_string())]),
            policy: LearningPolicy::new("practice", 3, 30),
            run_count: 0,
            hint_count: 0,
            escalation_count: 0,
            last_tests_passed: None,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            last_intervention_at: None,
            ended_at: None,
            authoring_docs: Vec::new(),
            authoring_section: None,
        }
    }

    #[tokio::test]
    async fn session_delete_cascades_to_runs() {
        let Some(store) = test_store().await else {
            return;
        };
        let session = session();
        store.save_session(&session).await.expect("save session");
        let run = Run {
            id: Uuid::now_v7(),
            session_id: session.id,
            code: session.code.clone(),
            result: None,
            created_at: chrono::Utc::now(),
        };
        store.save_run(&run).await.expect("save run");

        assert_eq!(store.load_session(session.id).await.expect("load"), Some(session.clone()));
        assert!(store.delete_session(session.id).await.expect("delete"));
        assert!(store.list_runs(session.id).await.expect("runs").is_empty());
        assert!(!store.delete_session(session.id).await.expect("second delete"));
    }
}
