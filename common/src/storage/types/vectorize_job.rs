use std::time::Duration;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::document::Document;

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 600;

/// Queue-side lifecycle of a vectorization job. Succeeded and Failed are
/// terminal for the queue; the document's own status is tracked separately
/// on the Document row.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Reserved")]
    Reserved,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Succeeded")]
    Succeeded,
    #[serde(rename = "Failed")]
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Reserved => "Reserved",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Reserve,
    StartProcessing,
    Succeed,
    Fail,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Reserve => "reserve",
            JobTransition::StartProcessing => "start_processing",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Reserved, Processing, Succeeded, Failed],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Succeeded }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn reserved() -> JobLifecycleMachine<(), Reserved> {
        pending()
            .reserve()
            .expect("reserve transition from Pending should exist")
    }

    pub(super) fn processing() -> JobLifecycleMachine<(), Processing> {
        reserved()
            .start_processing()
            .expect("start_processing transition from Reserved should exist")
    }
}

fn invalid_transition(state: &JobState, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: &JobState, event: JobTransition) -> Result<JobState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (JobState::Pending, JobTransition::Reserve) => pending()
            .reserve()
            .map(|_| JobState::Reserved)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Reserved, JobTransition::StartProcessing) => reserved()
            .start_processing()
            .map(|_| JobState::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Processing, JobTransition::Succeed) => processing()
            .succeed()
            .map(|_| JobState::Succeeded)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Processing, JobTransition::Fail) => processing()
            .fail()
            .map(|_| JobState::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(VectorizeJob, "vectorize_job", {
    document_id: String,
    company_id: String,
    storage_key: String,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_message: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    updated_at: chrono::DateTime<chrono::Utc>
});

impl VectorizeJob {
    /// The queue payload is deliberately minimal: workers re-read every
    /// mutable document field from the database instead of trusting data
    /// that may have gone stale between enqueue and claim.
    pub fn new(document_id: String, company_id: String, storage_key: String) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            company_id,
            storage_key,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.max(0) as u64)
    }

    /// Enqueue a vectorization job for an uploaded document.
    pub async fn enqueue(
        db: &SurrealDbClient,
        document: &Document,
    ) -> Result<VectorizeJob, AppError> {
        let storage_key = document.storage_key.clone().ok_or_else(|| {
            AppError::Validation(format!(
                "Document {} has no storage key to enqueue",
                document.id
            ))
        })?;

        let job = Self::new(
            document.id.clone(),
            document.company_id.clone(),
            storage_key,
        );
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    /// Atomically reserve the next ready job for a worker.
    ///
    /// A job is ready when it is Pending and due, or when a previous worker's
    /// lease on it has expired (crash redelivery; this is where the queue's
    /// at-least-once semantics come from). Every claim consumes one attempt;
    /// a job that has burned through `max_attempts` is never handed out
    /// again and stays visible with its last state and worker id.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<VectorizeJob>, AppError> {
        debug_assert!(compute_next_state(&JobState::Pending, JobTransition::Reserve).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE attempts < max_attempts
                  AND (
                        (state = $pending_state AND scheduled_at <= $now)
                        OR (
                            state IN $sticky_states
                            AND locked_at != NONE
                            AND time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                        )
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET state = $reserved_state,
                attempts = attempts + 1,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("pending_state", JobState::Pending.as_str()))
            .bind((
                "sticky_states",
                vec![JobState::Reserved.as_str(), JobState::Processing.as_str()],
            ))
            .bind(("reserved_state", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let job: Option<VectorizeJob> = result.take(0)?;
        Ok(job)
    }

    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<VectorizeJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::StartProcessing)?;
        debug_assert_eq!(next, JobState::Processing);

        const START_PROCESSING_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $processing,
                updated_at = $now,
                locked_at = $now
            WHERE state = $reserved AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_PROCESSING_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("reserved", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<VectorizeJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::StartProcessing))
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<VectorizeJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Succeed)?;
        debug_assert_eq!(next, JobState::Succeeded);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $succeeded,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_message = NONE
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("succeeded", JobState::Succeeded.as_str()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<VectorizeJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Succeed))
    }

    /// Record a handled pipeline failure. Terminal for the queue: the
    /// document has already been moved to its own failed state by the
    /// pipeline's failure handler, so requeueing would reprocess a document
    /// whose status is final.
    pub async fn mark_failed(
        &self,
        error_message: String,
        db: &SurrealDbClient,
    ) -> Result<VectorizeJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Fail)?;
        debug_assert_eq!(next, JobState::Failed);

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_message = $error_message
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", JobState::Failed.as_str()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_message", error_message))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<VectorizeJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Fail))
    }
}
