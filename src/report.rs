use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    AverageStatistics, InstitutionOverview, Member, RiskDistribution, RiskLevel, Role,
    StudentDetail, StudentProfile, StudentRiskEntry, StudentStatistics,
};
use crate::risk;
use crate::store::{EventStore, ProfileStore, StudentDirectory};

pub const NO_ACTIVITY_REASON: &str = "No activity yet";

/// Read-only views over the stores, for dashboards and the CLI.
pub struct Queries<'a> {
    pub directory: &'a dyn StudentDirectory,
    pub events: &'a dyn EventStore,
    pub profiles: &'a dyn ProfileStore,
}

impl<'a> Queries<'a> {
    pub async fn student_detail(&self, student_id: Uuid) -> PipelineResult<StudentDetail> {
        let student = self
            .directory
            .find_member(student_id)
            .await?
            .ok_or(PipelineError::NotFound { student_id })?;
        if student.role != Role::Student {
            return Err(PipelineError::Role {
                id: student.id,
                role: student.role,
            });
        }

        let profile = self.profiles.find_by_student(student_id).await?;
        let events = self.events.find_by_student(student_id).await?;
        Ok(StudentDetail {
            student,
            profile,
            events,
        })
    }

    /// Every student, High first, with a default Low entry for students
    /// that have no profile yet.
    pub async fn students_by_risk(
        &self,
    ) -> anyhow::Result<(Vec<StudentRiskEntry>, RiskDistribution)> {
        let students = self.directory.students().await?;
        let mut profiles = self.profiles.all().await?;

        let mut entries: Vec<StudentRiskEntry> = students
            .into_iter()
            .map(|student| {
                let profile = profiles
                    .iter()
                    .position(|p| p.student_id == student.id)
                    .map(|index| profiles.swap_remove(index));
                risk_entry(student, profile)
            })
            .collect();
        entries.sort_by_key(|entry| risk::rank(entry.risk_level));

        let mut summary = RiskDistribution::default();
        for entry in entries.iter() {
            summary.record(entry.risk_level);
        }
        Ok((entries, summary))
    }

    pub async fn institution_overview(&self) -> anyhow::Result<InstitutionOverview> {
        let user_counts = self.directory.role_counts().await?;
        let event_counts = self.events.counts().await?;
        let profiles = self.profiles.all().await?;

        let mut risk_distribution = RiskDistribution::default();
        for profile in profiles.iter() {
            risk_distribution.record(profile.assessment.risk_level);
        }
        let average_statistics = average_statistics(&profiles);

        let mut high_risk: Vec<StudentProfile> = profiles
            .into_iter()
            .filter(|p| p.assessment.risk_level == RiskLevel::High)
            .collect();
        high_risk.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        let mut high_risk_students = Vec::new();
        for profile in high_risk {
            if high_risk_students.len() == 10 {
                break;
            }
            match self.directory.find_member(profile.student_id).await? {
                Some(student) => high_risk_students.push(risk_entry(student, Some(profile))),
                None => tracing::warn!(student_id = %profile.student_id, "profile without member"),
            }
        }

        Ok(InstitutionOverview {
            user_counts,
            risk_distribution,
            event_counts,
            average_statistics,
            high_risk_students,
        })
    }
}

fn risk_entry(student: Member, profile: Option<StudentProfile>) -> StudentRiskEntry {
    match profile {
        Some(profile) => StudentRiskEntry {
            student,
            risk_level: profile.assessment.risk_level,
            risk_reason: profile.assessment.reason_summary(),
            statistics: profile.statistics,
            last_updated: Some(profile.last_updated),
        },
        None => StudentRiskEntry {
            student,
            risk_level: RiskLevel::Low,
            risk_reason: NO_ACTIVITY_REASON.to_string(),
            statistics: StudentStatistics::default(),
            last_updated: None,
        },
    }
}

/// Means over the students that have data for each measure, to one decimal.
pub fn average_statistics(profiles: &[StudentProfile]) -> AverageStatistics {
    let attendance: Vec<f64> = profiles
        .iter()
        .filter_map(|p| p.statistics.attendance_rate())
        .collect();
    let completion: Vec<f64> = profiles
        .iter()
        .filter_map(|p| p.statistics.assignment_completion_rate())
        .collect();
    let performance: Vec<f64> = profiles
        .iter()
        .filter(|p| p.statistics.has_performance())
        .map(|p| p.statistics.average_performance)
        .collect();

    AverageStatistics {
        attendance_rate: rounded_mean(&attendance),
        assignment_completion_rate: rounded_mean(&completion),
        average_performance: rounded_mean(&performance),
    }
}

fn rounded_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (mean * 10.0).round() / 10.0
}

pub fn build_report(
    generated_at: DateTime<Utc>,
    overview: &InstitutionOverview,
    ranking: &[StudentRiskEntry],
    limit: usize,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Dropout Early Warning Report");
    let _ = writeln!(output, "Generated {}", generated_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Population");
    let _ = writeln!(
        output,
        "- {} students, {} mentors, {} admins",
        overview.user_counts.students, overview.user_counts.mentors, overview.user_counts.admins
    );
    let _ = writeln!(
        output,
        "- Risk: {} high, {} medium, {} low",
        overview.risk_distribution.high,
        overview.risk_distribution.medium,
        overview.risk_distribution.low
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Engagement Mix");
    if overview.event_counts.total == 0 {
        let _ = writeln!(output, "No engagement events recorded.");
    } else {
        let counts = &overview.event_counts;
        let _ = writeln!(output, "- attendance: {} events", counts.attendance);
        let _ = writeln!(output, "- assignment: {} events", counts.assignment);
        let _ = writeln!(output, "- performance: {} events", counts.performance);
    }

    let averages = &overview.average_statistics;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Averages");
    let _ = writeln!(output, "- Attendance rate: {:.1}%", averages.attendance_rate);
    let _ = writeln!(
        output,
        "- Assignment completion: {:.1}%",
        averages.assignment_completion_rate
    );
    let _ = writeln!(output, "- Performance: {:.1}%", averages.average_performance);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");
    let elevated: Vec<&StudentRiskEntry> = ranking
        .iter()
        .filter(|entry| entry.risk_level.is_elevated())
        .take(limit)
        .collect();
    if elevated.is_empty() {
        let _ = writeln!(output, "No students at elevated risk.");
    } else {
        for entry in elevated {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} risk: {}",
                entry.student.name,
                entry.student.email,
                entry.student.course.as_deref().unwrap_or("no course"),
                entry.risk_level,
                entry.risk_reason
            );
        }
    }

    output
}
