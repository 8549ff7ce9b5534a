//! Process-local stores for dry runs (`simulate`) and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    EngagementEvent, EventCounts, Member, MentorNotification, NewEvent, NewMember, Role,
    RoleCounts, StudentNotification, StudentProfile,
};
use crate::store::{
    EventStore, NotificationSink, ProfileChange, ProfileStore, ProfileUpdate, StudentDirectory,
};

#[derive(Debug, Default)]
struct State {
    members: Vec<Member>,
    events: Vec<EngagementEvent>,
    profiles: HashMap<Uuid, StudentProfile>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> anyhow::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Events for one student, newest first.
    #[cfg(test)]
    pub fn events_for(&self, student_id: Uuid) -> Vec<EngagementEvent> {
        self.state()
            .map(|state| student_events(&state, student_id))
            .unwrap_or_default()
    }
}

fn student_events(state: &State, student_id: Uuid) -> Vec<EngagementEvent> {
    let mut events: Vec<EngagementEvent> = state
        .events
        .iter()
        .rev()
        .filter(|event| event.student_id == student_id)
        .cloned()
        .collect();
    events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    events
}

#[async_trait]
impl StudentDirectory for MemoryStore {
    async fn find_member(&self, id: Uuid) -> anyhow::Result<Option<Member>> {
        let state = self.state()?;
        Ok(state.members.iter().find(|m| m.id == id).cloned())
    }

    async fn mentors(&self) -> anyhow::Result<Vec<Member>> {
        let state = self.state()?;
        Ok(state
            .members
            .iter()
            .filter(|m| m.role == Role::Mentor)
            .cloned()
            .collect())
    }

    async fn students(&self) -> anyhow::Result<Vec<Member>> {
        let state = self.state()?;
        Ok(state
            .members
            .iter()
            .filter(|m| m.role == Role::Student)
            .cloned()
            .collect())
    }

    async fn register(&self, member: NewMember) -> anyhow::Result<Member> {
        let mut state = self.state()?;
        if let Some(existing) = state.members.iter_mut().find(|m| m.email == member.email) {
            existing.name = member.name;
            existing.role = member.role;
            existing.course = member.course;
            existing.year = member.year;
            return Ok(existing.clone());
        }

        let created = Member {
            id: Uuid::new_v4(),
            name: member.name,
            email: member.email,
            role: member.role,
            course: member.course,
            year: member.year,
        };
        state.members.push(created.clone());
        Ok(created)
    }

    async fn role_counts(&self) -> anyhow::Result<RoleCounts> {
        let state = self.state()?;
        let mut counts = RoleCounts::default();
        for member in state.members.iter() {
            match member.role {
                Role::Student => counts.students += 1,
                Role::Mentor => counts.mentors += 1,
                Role::Admin => counts.admins += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create(&self, event: NewEvent) -> anyhow::Result<EngagementEvent> {
        let mut state = self.state()?;
        let stored = EngagementEvent {
            id: Uuid::new_v4(),
            student_id: event.student_id,
            event_type: event.event_type,
            event_data: event.event_data,
            occurred_at: event.occurred_at,
            processed: false,
        };
        state.events.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<EngagementEvent>> {
        let state = self.state()?;
        Ok(student_events(&state, student_id))
    }

    async fn counts(&self) -> anyhow::Result<EventCounts> {
        let state = self.state()?;
        let mut counts = EventCounts::default();
        for event in state.events.iter() {
            counts.record(event.event_type, 1);
        }
        Ok(counts)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Option<StudentProfile>> {
        let state = self.state()?;
        Ok(state.profiles.get(&student_id).cloned())
    }

    /// The event must live in this store. Everything happens under one lock.
    async fn apply_event(
        &self,
        student_id: Uuid,
        event_id: Uuid,
        update: &ProfileUpdate<'_>,
    ) -> anyhow::Result<ProfileChange> {
        let mut state = self.state()?;
        let index = state
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| anyhow!("event {event_id} not found"))?;

        let previous = state.profiles.get(&student_id).cloned();
        let current = update(previous.as_ref());
        state.profiles.insert(student_id, current.clone());
        state.events[index].processed = true;
        Ok(ProfileChange { previous, current })
    }

    async fn all(&self) -> anyhow::Result<Vec<StudentProfile>> {
        let state = self.state()?;
        Ok(state.profiles.values().cloned().collect())
    }
}

/// Keeps every delivered notification for later inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    students: Mutex<Vec<StudentNotification>>,
    mentors: Mutex<Vec<(MentorNotification, usize)>>,
}

impl MemorySink {
    pub fn student_notifications(&self) -> Vec<StudentNotification> {
        self.students
            .lock()
            .map(|notes| notes.clone())
            .unwrap_or_default()
    }

    /// Each alert with the number of mentors it was addressed to.
    pub fn mentor_alerts(&self) -> Vec<(MentorNotification, usize)> {
        self.mentors
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver_student(&self, notification: &StudentNotification) -> anyhow::Result<()> {
        self.students
            .lock()
            .map_err(|_| anyhow!("notification sink lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }

    async fn deliver_mentor(
        &self,
        notification: &MentorNotification,
        mentors: &[Member],
    ) -> anyhow::Result<()> {
        self.mentors
            .lock()
            .map_err(|_| anyhow!("notification sink lock poisoned"))?
            .push((notification.clone(), mentors.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::models::{EventType, RiskAssessment, RiskLevel};

    fn new_member(email: &str, role: Role) -> NewMember {
        NewMember {
            name: "Avery Lee".to_string(),
            email: email.to_string(),
            role,
            course: None,
            year: None,
        }
    }

    #[tokio::test]
    async fn register_upserts_by_email() {
        let store = MemoryStore::new();
        let first = store
            .register(new_member("avery@example.com", Role::Student))
            .await
            .unwrap();
        let mut update = new_member("avery@example.com", Role::Student);
        update.course = Some("History".to_string());
        let second = store.register(update).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.course.as_deref(), Some("History"));
        assert_eq!(store.role_counts().await.unwrap().students, 1);
    }

    #[tokio::test]
    async fn events_come_back_newest_first() {
        let store = MemoryStore::new();
        let student_id = Uuid::new_v4();
        let now = Utc::now();
        for days_ago in [5, 1, 3] {
            store
                .create(NewEvent {
                    student_id,
                    event_type: EventType::Attendance,
                    event_data: json!({"status": "present"}),
                    occurred_at: now - Duration::days(days_ago),
                })
                .await
                .unwrap();
        }

        let events = EventStore::find_by_student(&store, student_id).await.unwrap();
        let ages: Vec<i64> = events
            .iter()
            .map(|e| (now - e.occurred_at).num_days())
            .collect();
        assert_eq!(ages, vec![1, 3, 5]);
        assert!(events.iter().all(|e| !e.processed));
    }

    fn profile_with_absences(student_id: Uuid, previous: Option<&StudentProfile>) -> StudentProfile {
        let mut statistics = previous
            .map(|p| p.statistics.clone())
            .unwrap_or_default();
        statistics.consecutive_absences += 1;
        StudentProfile {
            student_id,
            statistics,
            assessment: RiskAssessment {
                risk_level: RiskLevel::Low,
                risk_reasons: vec!["No risk detected".to_string()],
            },
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn applying_an_event_updates_profile_and_flag_together() {
        let store = MemoryStore::new();
        let student_id = Uuid::new_v4();
        let event = store
            .create(NewEvent {
                student_id,
                event_type: EventType::Attendance,
                event_data: json!({"status": "absent"}),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();

        let change = store
            .apply_event(student_id, event.id, &|previous: Option<&StudentProfile>| {
                profile_with_absences(student_id, previous)
            })
            .await
            .unwrap();
        assert!(change.previous.is_none());
        assert_eq!(change.current.statistics.consecutive_absences, 1);
        assert!(store.events_for(student_id)[0].processed);
    }

    #[tokio::test]
    async fn unknown_event_leaves_profile_untouched() {
        let store = MemoryStore::new();
        let student_id = Uuid::new_v4();

        let err = store
            .apply_event(student_id, Uuid::new_v4(), &|previous: Option<&StudentProfile>| {
                profile_with_absences(student_id, previous)
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(ProfileStore::find_by_student(&store, student_id)
            .await
            .unwrap()
            .is_none());
    }
}
