//! Transient progress pub/sub for document processing.
//!
//! One channel per document, named `document_progress:{document_id}`. The
//! channel name is a stable, documented contract; external subscribers key
//! off it. Transport is a SurrealDB live query on the `progress_event`
//! table: every subscriber with an open live query receives every published
//! event (fan-out), subscribers that connect after an event was published
//! never see it (no replay), and the published row is deleted in the same
//! round trip. The durable record of a document's fate is the Document row,
//! never this table.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use surrealdb::{method::QueryStream, Action, Notification};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

const PROGRESS_TABLE: &str = "progress_event";

/// Channel name for a document's progress topic.
pub fn progress_channel(document_id: &str) -> String {
    format!("document_progress:{document_id}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Downloading,
    Vectorizing,
    Completed,
    Failed,
}

/// One notification on a document's progress channel.
///
/// `progress` is a coarse checkpoint percentage, non-decreasing within one
/// processing attempt. The only event with `done = true` is the terminal one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub document_id: String,
    pub step: ProgressStep,
    pub progress: u8,
    pub message: String,
    pub done: bool,
}

impl ProgressEvent {
    pub fn new(
        document_id: &str,
        step: ProgressStep,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.to_string(),
            step,
            progress,
            message: message.into(),
            done: false,
        }
    }

    /// The terminal event of a successful attempt.
    pub fn completed(document_id: &str, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.to_string(),
            step: ProgressStep::Completed,
            progress: 100,
            message: message.into(),
            done: true,
        }
    }

    /// The terminal event of a failed attempt.
    pub fn failed(document_id: &str, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.to_string(),
            step: ProgressStep::Failed,
            progress: 0,
            message: message.into(),
            done: true,
        }
    }
}

// Transport row: the event fields plus the channel the subscribers filter on.
#[derive(Serialize)]
struct PublishedEvent {
    channel: String,
    document_id: String,
    step: ProgressStep,
    progress: u8,
    message: String,
    done: bool,
}

impl PublishedEvent {
    fn from_event(event: &ProgressEvent) -> Self {
        Self {
            channel: progress_channel(&event.document_id),
            document_id: event.document_id.clone(),
            step: event.step,
            progress: event.progress,
            message: event.message.clone(),
            done: event.done,
        }
    }
}

/// Publish/subscribe broker for progress events.
///
/// Cheap to clone; both the worker process (publisher) and the HTTP server
/// process (subscriber) construct one over their own database handle.
#[derive(Clone)]
pub struct ProgressBroker {
    db: Arc<SurrealDbClient>,
}

impl ProgressBroker {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Publish an event on the document's channel.
    ///
    /// The row is created and deleted in one query; it exists only long
    /// enough to fire the live-query notifications.
    pub async fn publish(&self, event: &ProgressEvent) -> Result<(), AppError> {
        const PUBLISH_QUERY: &str = r#"
            CREATE type::thing($table, $id) CONTENT $content;
            DELETE type::thing($table, $id);
        "#;

        let content = PublishedEvent::from_event(event);

        self.db
            .client
            .query(PUBLISH_QUERY)
            .bind(("table", PROGRESS_TABLE))
            .bind(("id", Uuid::new_v4().to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Ok(())
    }

    /// Open a subscription on a document's channel.
    ///
    /// Events published before the subscription was opened are not
    /// replayed; callers needing the authoritative current state must read
    /// the Document row instead.
    pub async fn subscribe(&self, document_id: &str) -> Result<ProgressSubscription, AppError> {
        let mut response = self
            .db
            .client
            .query("LIVE SELECT * FROM progress_event WHERE channel = $channel")
            .bind(("channel", progress_channel(document_id)))
            .await?;

        let stream = response.stream::<Notification<ProgressEvent>>(0)?;

        Ok(ProgressSubscription { stream })
    }
}

/// A scoped subscription on one document's progress channel.
///
/// Dropping the subscription kills the underlying live query, so release is
/// deterministic on every exit path, including client disconnects.
pub struct ProgressSubscription {
    stream: QueryStream<Notification<ProgressEvent>>,
}

impl ProgressSubscription {
    /// Pull the next published event, suspending until one arrives or the
    /// subscription ends. Callers bound the wait with `tokio::time::timeout`.
    pub async fn next(&mut self) -> Option<Result<ProgressEvent, AppError>> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(notification) => match notification.action {
                    Action::Create => return Some(Ok(notification.data)),
                    // Deletions are the publisher cleaning up its transport
                    // row; updates do not occur on this table.
                    _ => continue,
                },
                Err(e) => return Some(Err(e.into())),
            }
        }

        None
    }
}
