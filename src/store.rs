//! Collaborator interfaces the pipeline is written against.
//!
//! `db` backs these with Postgres and `memory` with process-local maps.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    EngagementEvent, EventCounts, Member, MentorNotification, NewEvent, NewMember, RoleCounts,
    StudentNotification, StudentProfile,
};

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn find_member(&self, id: Uuid) -> anyhow::Result<Option<Member>>;

    async fn mentors(&self) -> anyhow::Result<Vec<Member>>;

    async fn students(&self) -> anyhow::Result<Vec<Member>>;

    /// Inserts a member or updates the one registered under the same email.
    async fn register(&self, member: NewMember) -> anyhow::Result<Member>;

    async fn role_counts(&self) -> anyhow::Result<RoleCounts>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists the event with `processed = false`.
    async fn create(&self, event: NewEvent) -> anyhow::Result<EngagementEvent>;

    /// Newest first.
    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<EngagementEvent>>;

    async fn counts(&self) -> anyhow::Result<EventCounts>;
}

/// Builds a student's next profile from the stored one, if any.
pub type ProfileUpdate<'a> = dyn Fn(Option<&StudentProfile>) -> StudentProfile + Send + Sync + 'a;

/// A profile before and after one event was applied.
#[derive(Debug, Clone)]
pub struct ProfileChange {
    pub previous: Option<StudentProfile>,
    pub current: StudentProfile,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Option<StudentProfile>>;

    /// Stores `update(current profile)` and marks `event_id` processed.
    ///
    /// Both writes land together or not at all. Calls for the same student
    /// are serialized by the backend, so no update reads a stale profile.
    async fn apply_event(
        &self,
        student_id: Uuid,
        event_id: Uuid,
        update: &ProfileUpdate<'_>,
    ) -> anyhow::Result<ProfileChange>;

    async fn all(&self) -> anyhow::Result<Vec<StudentProfile>>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver_student(&self, notification: &StudentNotification) -> anyhow::Result<()>;

    async fn deliver_mentor(
        &self,
        notification: &MentorNotification,
        mentors: &[Member],
    ) -> anyhow::Result<()>;
}

/// Writes every notification to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver_student(&self, notification: &StudentNotification) -> anyhow::Result<()> {
        tracing::info!(
            student_id = %notification.student_id,
            risk_level = %notification.risk_level,
            recommendations = notification.recommendations.len(),
            "student notification: {}",
            notification.message
        );
        Ok(())
    }

    async fn deliver_mentor(
        &self,
        notification: &MentorNotification,
        mentors: &[Member],
    ) -> anyhow::Result<()> {
        for mentor in mentors {
            tracing::info!(
                mentor = %mentor.email,
                student_id = %notification.student_id,
                risk_level = %notification.risk_level,
                "mentor alert: {}",
                notification.message
            );
        }
        Ok(())
    }
}
