use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Role::Student),
            "mentor" => Some(Role::Mentor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory entry. Students, mentors and admins share one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub course: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub course: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Attendance,
    Assignment,
    Performance,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::Attendance,
        EventType::Assignment,
        EventType::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Attendance => "attendance",
            EventType::Assignment => "assignment",
            EventType::Performance => "performance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// Typed view of an event payload, produced by the validator.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Attendance {
        status: AttendanceStatus,
    },
    Assignment {
        submitted: bool,
        assignment_name: String,
    },
    Performance {
        score: f64,
        test_name: String,
    },
}

/// A stored engagement fact. Only `processed` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    pub id: Uuid,
    pub student_id: Uuid,
    pub event_type: EventType,
    pub event_data: Value,
    pub occurred_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub student_id: Uuid,
    pub event_type: EventType,
    pub event_data: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentStatistics {
    pub total_attendance: u32,
    pub present_count: u32,
    pub absent_count: u32,
    pub consecutive_absences: u32,
    pub assignments_submitted: u32,
    pub assignments_missed: u32,
    pub average_performance: f64,
    pub performance_scores: Vec<f64>,
}

impl StudentStatistics {
    pub fn attendance_rate(&self) -> Option<f64> {
        if self.total_attendance == 0 {
            return None;
        }
        Some(self.present_count as f64 / self.total_attendance as f64 * 100.0)
    }

    pub fn assignment_completion_rate(&self) -> Option<f64> {
        let total = self.assignments_submitted + self.assignments_missed;
        if total == 0 {
            return None;
        }
        Some(self.assignments_submitted as f64 / total as f64 * 100.0)
    }

    pub fn has_performance(&self) -> bool {
        !self.performance_scores.is_empty()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Low" => Some(RiskLevel::Low),
            "Medium" => Some(RiskLevel::Medium),
            "High" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn is_elevated(&self) -> bool {
        *self > RiskLevel::Low
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn reason_summary(&self) -> String {
        self.risk_reasons.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: Uuid,
    pub statistics: StudentStatistics,
    pub assessment: RiskAssessment,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentNotification {
    pub student_id: Uuid,
    pub student_name: String,
    pub risk_level: RiskLevel,
    pub message: String,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorNotification {
    pub student_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub course: Option<String>,
    pub year: Option<i32>,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub message: String,
    pub action_required: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifications {
    pub student: Option<StudentNotification>,
    pub mentor: Option<MentorNotification>,
    pub mentors_notified: usize,
}

/// What a caller of the submission entry point gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub event_id: Uuid,
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
    pub risk_changed: bool,
    pub notifications: Notifications,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCounts {
    pub students: i64,
    pub mentors: i64,
    pub admins: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub total: i64,
    pub attendance: i64,
    pub assignment: i64,
    pub performance: i64,
}

impl EventCounts {
    pub fn record(&mut self, event_type: EventType, count: i64) {
        self.total += count;
        match event_type {
            EventType::Attendance => self.attendance += count,
            EventType::Assignment => self.assignment += count,
            EventType::Performance => self.performance += count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RiskDistribution {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::High => self.high += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRiskEntry {
    pub student: Member,
    pub risk_level: RiskLevel,
    pub risk_reason: String,
    pub statistics: StudentStatistics,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    pub student: Member,
    pub profile: Option<StudentProfile>,
    pub events: Vec<EngagementEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageStatistics {
    pub attendance_rate: f64,
    pub assignment_completion_rate: f64,
    pub average_performance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionOverview {
    pub user_counts: RoleCounts,
    pub risk_distribution: RiskDistribution,
    pub event_counts: EventCounts,
    pub average_statistics: AverageStatistics,
    pub high_risk_students: Vec<StudentRiskEntry>,
}
