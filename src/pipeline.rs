//! Submission pipeline: validate, store, accumulate, classify, notify.
//!
//! Each stage returns a value that owns the previous stage's output, so a
//! stage can only run once everything before it has succeeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::models::{
    EngagementEvent, NewEvent, Notifications, StudentProfile, SubmissionOutcome,
};
use crate::notify;
use crate::risk;
use crate::stats;
use crate::store::{EventStore, NotificationSink, ProfileStore, StudentDirectory};
use crate::validate::{self, ValidatedEvent};

/// Serializes profile read-modify-write per student within one process.
///
/// An entry lives only while some task holds or waits for that student's
/// lock, so the map is bounded by the number of in-flight students.
#[derive(Debug, Default)]
pub struct StudentLocks {
    inner: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl StudentLocks {
    pub async fn acquire(&self, student_id: Uuid) -> StudentGuard<'_> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(student_id).or_default().clone()
        };
        StudentGuard {
            locks: self,
            student_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn release(&self, student_id: Uuid) {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&student_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&student_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds one student's lock and drops the map entry once nobody else wants it.
pub struct StudentGuard<'a> {
    locks: &'a StudentLocks,
    student_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StudentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(self.student_id);
    }
}

#[derive(Debug)]
struct Stored {
    validated: ValidatedEvent,
    event: EngagementEvent,
}

#[derive(Debug)]
struct Assessed {
    stored: Stored,
    profile: StudentProfile,
    risk_changed: bool,
}

#[derive(Debug)]
struct Notified {
    assessed: Assessed,
    notifications: Notifications,
}

pub struct Pipeline {
    directory: Arc<dyn StudentDirectory>,
    events: Arc<dyn EventStore>,
    profiles: Arc<dyn ProfileStore>,
    sink: Arc<dyn NotificationSink>,
    locks: StudentLocks,
}

impl Pipeline {
    pub fn new(
        directory: Arc<dyn StudentDirectory>,
        events: Arc<dyn EventStore>,
        profiles: Arc<dyn ProfileStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            directory,
            events,
            profiles,
            sink,
            locks: StudentLocks::default(),
        }
    }

    /// Builds a pipeline over one backend that provides every store.
    pub fn with_store<S>(store: Arc<S>, sink: Arc<dyn NotificationSink>) -> Self
    where
        S: StudentDirectory + EventStore + ProfileStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store, sink)
    }

    pub async fn submit_event(
        &self,
        student_id: Uuid,
        event_type: &str,
        event_data: Value,
    ) -> PipelineResult<SubmissionOutcome> {
        self.submit_event_at(student_id, event_type, event_data, Utc::now())
            .await
    }

    pub async fn submit_event_at(
        &self,
        student_id: Uuid,
        event_type: &str,
        event_data: Value,
        occurred_at: DateTime<Utc>,
    ) -> PipelineResult<SubmissionOutcome> {
        let validated =
            validate::validate_event(self.directory.as_ref(), student_id, event_type, event_data)
                .await?;
        let stored = self.store(validated, occurred_at).await?;
        let assessed = self.analyze(stored).await?;
        let notified = self.notify(assessed).await?;

        let Notified {
            assessed,
            notifications,
        } = notified;
        Ok(SubmissionOutcome {
            event_id: assessed.stored.event.id,
            risk_level: assessed.profile.assessment.risk_level,
            risk_reasons: assessed.profile.assessment.risk_reasons,
            risk_changed: assessed.risk_changed,
            notifications,
        })
    }

    async fn store(
        &self,
        validated: ValidatedEvent,
        occurred_at: DateTime<Utc>,
    ) -> PipelineResult<Stored> {
        let event = self
            .events
            .create(NewEvent {
                student_id: validated.student.id,
                event_type: validated.event_type,
                event_data: validated.event_data.clone(),
                occurred_at,
            })
            .await?;

        tracing::info!(
            event_id = %event.id,
            student_id = %event.student_id,
            event_type = %event.event_type,
            "event stored"
        );
        Ok(Stored { validated, event })
    }

    async fn analyze(&self, stored: Stored) -> PipelineResult<Assessed> {
        let student_id = stored.validated.student.id;
        let payload = &stored.validated.payload;
        let guard = self.locks.acquire(student_id).await;

        let change = self
            .profiles
            .apply_event(student_id, stored.event.id, &|previous: Option<&StudentProfile>| {
                let base = previous
                    .map(|profile| profile.statistics.clone())
                    .unwrap_or_default();
                let statistics = stats::accumulate(base, payload);
                StudentProfile {
                    student_id,
                    assessment: risk::classify(&statistics),
                    statistics,
                    last_updated: Utc::now(),
                }
            })
            .await?;
        drop(guard);

        let risk_changed = risk::risk_changed(
            change.previous.as_ref().map(|p| &p.assessment),
            &change.current.assessment,
        );
        let profile = change.current;

        tracing::info!(
            %student_id,
            risk_level = %profile.assessment.risk_level,
            risk_changed,
            reasons = %profile.assessment.reason_summary(),
            "risk assessed"
        );
        Ok(Assessed {
            stored,
            profile,
            risk_changed,
        })
    }

    async fn notify(&self, assessed: Assessed) -> PipelineResult<Notified> {
        let student = &assessed.stored.validated.student;
        let assessment = &assessed.profile.assessment;
        let now = Utc::now();
        let mut notifications = Notifications::default();

        if let Some(note) = notify::student_notification(student, assessment, now) {
            self.sink.deliver_student(&note).await?;
            notifications.student = Some(note);
        } else {
            tracing::debug!(student_id = %student.id, "no student notification needed");
        }

        if let Some(alert) =
            notify::mentor_notification(student, assessment, assessed.risk_changed, now)
        {
            let mentors = self.directory.mentors().await?;
            self.sink.deliver_mentor(&alert, &mentors).await?;
            tracing::info!(
                student_id = %student.id,
                mentors = mentors.len(),
                "mentor alert dispatched"
            );
            notifications.mentors_notified = mentors.len();
            notifications.mentor = Some(alert);
        }

        Ok(Notified {
            assessed,
            notifications,
        })
    }
}
