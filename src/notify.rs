use chrono::{DateTime, Utc};

use crate::models::{Member, MentorNotification, RiskAssessment, StudentNotification};

const TIP_GROUPS: [(&str, [&str; 2]); 3] = [
    (
        "absence",
        [
            "Attend classes regularly",
            "Contact your mentor if facing difficulties",
        ],
    ),
    (
        "assignment",
        [
            "Submit pending assignments",
            "Seek help from peers or instructors",
        ],
    ),
    (
        "performance",
        [
            "Review study materials",
            "Consider tutoring or study groups",
        ],
    ),
];

/// Sent on every event that leaves the student at Medium or High.
pub fn student_notification(
    student: &Member,
    assessment: &RiskAssessment,
    now: DateTime<Utc>,
) -> Option<StudentNotification> {
    if !assessment.risk_level.is_elevated() {
        return None;
    }

    Some(StudentNotification {
        student_id: student.id,
        student_name: student.name.clone(),
        risk_level: assessment.risk_level,
        message: format!(
            "Your engagement level requires attention. {}",
            assessment.reason_summary()
        ),
        recommendations: recommendations(&assessment.risk_reasons),
        created_at: now,
    })
}

/// Only sent when the student has just moved into, or between, elevated levels.
pub fn mentor_notification(
    student: &Member,
    assessment: &RiskAssessment,
    risk_changed: bool,
    now: DateTime<Utc>,
) -> Option<MentorNotification> {
    if !assessment.risk_level.is_elevated() || !risk_changed {
        return None;
    }

    Some(MentorNotification {
        student_id: student.id,
        student_name: student.name.clone(),
        student_email: student.email.clone(),
        course: student.course.clone(),
        year: student.year,
        risk_level: assessment.risk_level,
        reasons: assessment.risk_reasons.clone(),
        message: format!(
            "Student {} is at {} risk. Immediate intervention recommended.",
            student.name, assessment.risk_level
        ),
        action_required: true,
        created_at: now,
    })
}

pub fn recommendations(reasons: &[String]) -> Vec<String> {
    TIP_GROUPS
        .iter()
        .filter(|(token, _)| reasons.iter().any(|reason| reason.contains(*token)))
        .flat_map(|(_, tips)| tips.iter().map(|tip| tip.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{RiskLevel, Role};

    fn student() -> Member {
        Member {
            id: Uuid::new_v4(),
            name: "Jules Moreno".to_string(),
            email: "jules@example.com".to_string(),
            role: Role::Student,
            course: Some("Biology".to_string()),
            year: Some(1),
        }
    }

    fn assessment(level: RiskLevel, reasons: &[&str]) -> RiskAssessment {
        RiskAssessment {
            risk_level: level,
            risk_reasons: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn low_risk_sends_nothing() {
        let low = assessment(RiskLevel::Low, &["No risk detected"]);
        assert!(student_notification(&student(), &low, Utc::now()).is_none());
        assert!(mentor_notification(&student(), &low, true, Utc::now()).is_none());
    }

    #[test]
    fn student_message_joins_reasons_and_collects_tips() {
        let high = assessment(
            RiskLevel::High,
            &["3 consecutive absences", "low performance (32.0%)"],
        );
        let note = student_notification(&student(), &high, Utc::now()).unwrap();
        assert_eq!(
            note.message,
            "Your engagement level requires attention. 3 consecutive absences, low performance (32.0%)"
        );
        assert_eq!(
            note.recommendations,
            vec![
                "Attend classes regularly",
                "Contact your mentor if facing difficulties",
                "Review study materials",
                "Consider tutoring or study groups",
            ]
        );
    }

    #[test]
    fn every_reason_kind_collects_its_tips() {
        let reasons: Vec<String> = [
            "3 consecutive absences",
            "2 missed assignments",
            "low performance (30.0%)",
        ]
        .iter()
        .map(|r| r.to_string())
        .collect();
        assert_eq!(
            recommendations(&reasons),
            vec![
                "Attend classes regularly",
                "Contact your mentor if facing difficulties",
                "Submit pending assignments",
                "Seek help from peers or instructors",
                "Review study materials",
                "Consider tutoring or study groups",
            ]
        );
    }

    #[test]
    fn student_is_notified_even_without_change() {
        let medium = assessment(RiskLevel::Medium, &["4 consecutive absences"]);
        assert!(student_notification(&student(), &medium, Utc::now()).is_some());
        assert!(mentor_notification(&student(), &medium, false, Utc::now()).is_none());
    }

    #[test]
    fn mentor_alert_carries_student_identity() {
        let member = student();
        let high = assessment(RiskLevel::High, &["2 missed assignments"]);
        let alert = mentor_notification(&member, &high, true, Utc::now()).unwrap();
        assert_eq!(alert.student_id, member.id);
        assert_eq!(alert.course.as_deref(), Some("Biology"));
        assert!(alert.action_required);
        assert_eq!(
            alert.message,
            "Student Jules Moreno is at High risk. Immediate intervention recommended."
        );
    }
}
