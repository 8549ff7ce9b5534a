use crate::models::{AttendanceStatus, EventPayload, StudentStatistics};

/// Folds one validated event into `stats`. Must be called exactly once per event.
pub fn accumulate(mut stats: StudentStatistics, payload: &EventPayload) -> StudentStatistics {
    match payload {
        EventPayload::Attendance { status } => {
            stats.total_attendance += 1;
            match status {
                AttendanceStatus::Present => {
                    stats.present_count += 1;
                    stats.consecutive_absences = 0;
                }
                AttendanceStatus::Absent => {
                    stats.absent_count += 1;
                    stats.consecutive_absences += 1;
                }
            }
        }
        EventPayload::Assignment { submitted, .. } => {
            if *submitted {
                stats.assignments_submitted += 1;
            } else {
                stats.assignments_missed += 1;
            }
        }
        EventPayload::Performance { score, .. } => {
            stats.performance_scores.push(*score);
            stats.average_performance = mean(&stats.performance_scores);
        }
    }

    stats
}

fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}
