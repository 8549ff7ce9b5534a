use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    EngagementEvent, EventCounts, EventType, Member, NewEvent, NewMember, RiskAssessment,
    RiskLevel, Role, RoleCounts, StudentProfile, StudentStatistics,
};
use crate::pipeline::Pipeline;
use crate::store::{EventStore, ProfileChange, ProfileStore, ProfileUpdate, StudentDirectory};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed directory, event store and profile store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn member_from_row(row: &PgRow) -> anyhow::Result<Member> {
    let role: String = row.try_get("role")?;
    Ok(Member {
        id: row.try_get("id")?,
        name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        role: Role::parse(&role).with_context(|| format!("unknown role `{role}`"))?,
        course: row.try_get("course")?,
        year: row.try_get("year")?,
    })
}

fn event_from_row(row: &PgRow) -> anyhow::Result<EngagementEvent> {
    let event_type: String = row.try_get("event_type")?;
    Ok(EngagementEvent {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        event_type: EventType::parse(&event_type)
            .with_context(|| format!("unknown event type `{event_type}`"))?,
        event_data: row.try_get("event_data")?,
        occurred_at: row.try_get("occurred_at")?,
        processed: row.try_get("processed")?,
    })
}

fn profile_from_row(row: &PgRow) -> anyhow::Result<StudentProfile> {
    let risk_level: String = row.try_get("risk_level")?;
    let statistics: Json<StudentStatistics> = row.try_get("statistics")?;
    let risk_reasons: Json<Vec<String>> = row.try_get("risk_reasons")?;
    Ok(StudentProfile {
        student_id: row.try_get("student_id")?,
        statistics: statistics.0,
        assessment: RiskAssessment {
            risk_level: RiskLevel::parse(&risk_level)
                .with_context(|| format!("unknown risk level `{risk_level}`"))?,
            risk_reasons: risk_reasons.0,
        },
        last_updated: row.try_get("last_updated")?,
    })
}

const MEMBER_COLUMNS: &str = "id, full_name, email, role, course, year";

#[async_trait]
impl StudentDirectory for PgStore {
    async fn find_member(&self, id: Uuid) -> anyhow::Result<Option<Member>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM dropout_watch.members WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn mentors(&self) -> anyhow::Result<Vec<Member>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM dropout_watch.members \
             WHERE role = 'mentor' ORDER BY full_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(member_from_row).collect()
    }

    async fn students(&self) -> anyhow::Result<Vec<Member>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM dropout_watch.members \
             WHERE role = 'student' ORDER BY full_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(member_from_row).collect()
    }

    async fn register(&self, member: NewMember) -> anyhow::Result<Member> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dropout_watch.members (id, full_name, email, role, course, year)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                role = EXCLUDED.role,
                course = EXCLUDED.course,
                year = EXCLUDED.year
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&member.name)
        .bind(&member.email)
        .bind(member.role.as_str())
        .bind(&member.course)
        .bind(member.year)
        .fetch_one(&self.pool)
        .await?;

        member_from_row(&row)
    }

    async fn role_counts(&self) -> anyhow::Result<RoleCounts> {
        let rows = sqlx::query(
            "SELECT role, COUNT(*) AS count FROM dropout_watch.members GROUP BY role",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = RoleCounts::default();
        for row in rows {
            let role: String = row.try_get("role")?;
            let count: i64 = row.try_get("count")?;
            match Role::parse(&role) {
                Some(Role::Student) => counts.students = count,
                Some(Role::Mentor) => counts.mentors = count,
                Some(Role::Admin) => counts.admins = count,
                None => tracing::warn!(%role, "ignoring members with unknown role"),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn create(&self, event: NewEvent) -> anyhow::Result<EngagementEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO dropout_watch.engagement_events
            (id, student_id, event_type, event_data, occurred_at, processed)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            RETURNING id, student_id, event_type, event_data, occurred_at, processed
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.student_id)
        .bind(event.event_type.as_str())
        .bind(&event.event_data)
        .bind(event.occurred_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to store engagement event")?;

        event_from_row(&row)
    }

    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Vec<EngagementEvent>> {
        let rows = sqlx::query(
            "SELECT id, student_id, event_type, event_data, occurred_at, processed \
             FROM dropout_watch.engagement_events \
             WHERE student_id = $1 \
             ORDER BY occurred_at DESC, created_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn counts(&self) -> anyhow::Result<EventCounts> {
        let rows = sqlx::query(
            "SELECT event_type, COUNT(*) AS count \
             FROM dropout_watch.engagement_events GROUP BY event_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = EventCounts::default();
        for row in rows {
            let event_type: String = row.try_get("event_type")?;
            let count: i64 = row.try_get("count")?;
            if let Some(event_type) = EventType::parse(&event_type) {
                counts.record(event_type, count);
            }
        }
        Ok(counts)
    }
}

const PROFILE_COLUMNS: &str = "student_id, statistics, risk_level, risk_reasons, last_updated";

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_by_student(&self, student_id: Uuid) -> anyhow::Result<Option<StudentProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM dropout_watch.student_profiles WHERE student_id = $1"
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Runs in one transaction holding a per-student advisory lock, so
    /// separate processes cannot interleave updates for the same student.
    async fn apply_event(
        &self,
        student_id: Uuid,
        event_id: Uuid,
        update: &ProfileUpdate<'_>,
    ) -> anyhow::Result<ProfileChange> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .context("failed to lock student profile")?;

        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM dropout_watch.student_profiles \
             WHERE student_id = $1 FOR UPDATE"
        ))
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = row.as_ref().map(profile_from_row).transpose()?;
        let current = update(previous.as_ref());

        sqlx::query(
            r#"
            INSERT INTO dropout_watch.student_profiles
            (student_id, statistics, risk_level, risk_reasons, last_updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id) DO UPDATE
            SET statistics = EXCLUDED.statistics,
                risk_level = EXCLUDED.risk_level,
                risk_reasons = EXCLUDED.risk_reasons,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(current.student_id)
        .bind(Json(&current.statistics))
        .bind(current.assessment.risk_level.as_str())
        .bind(Json(&current.assessment.risk_reasons))
        .bind(current.last_updated)
        .execute(&mut *tx)
        .await
        .context("failed to upsert student profile")?;

        let marked = sqlx::query(
            "UPDATE dropout_watch.engagement_events SET processed = TRUE WHERE id = $1",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .context("failed to mark event processed")?;
        if marked.rows_affected() == 0 {
            anyhow::bail!("event {event_id} not found");
        }

        tx.commit().await?;
        Ok(ProfileChange { previous, current })
    }

    async fn all(&self) -> anyhow::Result<Vec<StudentProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM dropout_watch.student_profiles"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }
}

/// Registers demo members and replays a short engagement history for every
/// seeded student that has no events yet.
pub async fn seed(store: &PgStore, pipeline: &Pipeline) -> anyhow::Result<()> {
    let members = vec![
        ("Avery Lee", "avery.lee@example.edu", Role::Student, Some("Computer Science"), Some(2)),
        ("Jules Moreno", "jules.moreno@example.edu", Role::Student, Some("Biology"), Some(1)),
        ("Kiara Patel", "kiara.patel@example.edu", Role::Student, Some("Economics"), Some(3)),
        ("Morgan Hale", "morgan.hale@example.edu", Role::Mentor, None, None),
        ("Dana Brooks", "dana.brooks@example.edu", Role::Admin, None, None),
    ];

    let mut students = Vec::new();
    for (name, email, role, course, year) in members {
        let member = store
            .register(NewMember {
                name: name.to_string(),
                email: email.to_string(),
                role,
                course: course.map(str::to_string),
                year,
            })
            .await
            .with_context(|| format!("failed to register {email}"))?;
        if member.role == Role::Student {
            students.push(member);
        }
    }

    let histories: [Vec<(&str, Value)>; 3] = [
        vec![
            ("attendance", json!({"status": "present"})),
            ("assignment", json!({"submitted": true, "assignmentName": "Lab 1"})),
            ("performance", json!({"score": 82, "testName": "Quiz 1"})),
        ],
        vec![
            ("attendance", json!({"status": "absent"})),
            ("attendance", json!({"status": "absent"})),
            ("attendance", json!({"status": "absent"})),
            ("performance", json!({"score": 58, "testName": "Quiz 1"})),
        ],
        vec![
            ("assignment", json!({"submitted": false, "assignmentName": "Essay 1"})),
            ("assignment", json!({"submitted": false, "assignmentName": "Essay 2"})),
            ("performance", json!({"score": 35, "testName": "Midterm"})),
        ],
    ];

    for (student, history) in students.iter().zip(histories) {
        if !EventStore::find_by_student(store, student.id).await?.is_empty() {
            continue;
        }

        let start = Utc::now() - Duration::days(history.len() as i64);
        for (offset, (event_type, data)) in history.into_iter().enumerate() {
            pipeline
                .submit_event_at(
                    student.id,
                    event_type,
                    data,
                    start + Duration::days(offset as i64),
                )
                .await
                .with_context(|| format!("failed to seed events for {}", student.email))?;
        }
    }

    Ok(())
}
