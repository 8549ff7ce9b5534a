use crate::models::{RiskAssessment, RiskLevel, StudentStatistics};

pub const ABSENCE_STREAK_THRESHOLD: u32 = 3;
pub const MISSED_ASSIGNMENT_THRESHOLD: u32 = 2;
pub const LOW_PERFORMANCE_THRESHOLD: f64 = 40.0;
pub const NO_RISK_REASON: &str = "No risk detected";

/// Evaluates the threshold rules over a statistics snapshot.
///
/// Every rule is checked, in order, and each match overwrites the level set by
/// the ones before it. A Medium rule placed after a High one would downgrade
/// the student; keep that in mind before reordering or adding rules.
pub fn classify(stats: &StudentStatistics) -> RiskAssessment {
    let mut risk_level = RiskLevel::Low;
    let mut risk_reasons = Vec::new();

    if stats.consecutive_absences >= ABSENCE_STREAK_THRESHOLD {
        risk_level = RiskLevel::Medium;
        risk_reasons.push(format!(
            "{} consecutive absences",
            stats.consecutive_absences
        ));
    }

    if stats.assignments_missed >= MISSED_ASSIGNMENT_THRESHOLD {
        risk_level = RiskLevel::High;
        risk_reasons.push(format!("{} missed assignments", stats.assignments_missed));
    }

    if stats.has_performance() && stats.average_performance < LOW_PERFORMANCE_THRESHOLD {
        risk_level = RiskLevel::High;
        // Half-way values round up, e.g. 37.25 shows as 37.3.
        let shown = (stats.average_performance * 10.0).round() / 10.0;
        risk_reasons.push(format!("low performance ({shown:.1}%)"));
    }

    if risk_reasons.is_empty() {
        risk_reasons.push(NO_RISK_REASON.to_string());
    }

    RiskAssessment {
        risk_level,
        risk_reasons,
    }
}

/// A student with no stored assessment counts as Low.
pub fn risk_changed(previous: Option<&RiskAssessment>, current: &RiskAssessment) -> bool {
    let previous = previous.map(|a| a.risk_level).unwrap_or_default();
    previous != current.risk_level
}

pub fn rank(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::High => 0,
        RiskLevel::Medium => 1,
        RiskLevel::Low => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_with(absences: u32, missed: u32, scores: &[f64]) -> StudentStatistics {
        let average = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        StudentStatistics {
            consecutive_absences: absences,
            assignments_missed: missed,
            performance_scores: scores.to_vec(),
            average_performance: average,
            ..StudentStatistics::default()
        }
    }

    #[test]
    fn quiet_record_is_low() {
        let assessment = classify(&StudentStatistics::default());
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.risk_reasons, vec![NO_RISK_REASON.to_string()]);
    }

    #[test]
    fn absence_streak_alone_is_medium() {
        let assessment = classify(&stats_with(3, 1, &[]));
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert_eq!(assessment.risk_reasons, vec!["3 consecutive absences"]);
    }

    #[test]
    fn later_rule_overrides_earlier() {
        let assessment = classify(&stats_with(3, 2, &[]));
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(
            assessment.risk_reasons,
            vec!["3 consecutive absences", "2 missed assignments"]
        );
    }

    #[test]
    fn low_average_is_high_on_its_own() {
        let assessment = classify(&stats_with(0, 0, &[30.0, 45.0]));
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.risk_reasons, vec!["low performance (37.5%)"]);
    }

    #[test]
    fn reason_rounds_half_way_average_up() {
        let stats = stats_with(0, 0, &[37.0, 37.0, 37.0, 38.0]);
        assert_eq!(stats.average_performance, 37.25);
        let assessment = classify(&stats);
        assert_eq!(assessment.risk_reasons, vec!["low performance (37.3%)"]);
    }

    #[test]
    fn empty_scores_never_trigger_performance_rule() {
        let assessment = classify(&stats_with(0, 0, &[]));
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn forty_is_not_low_performance() {
        let assessment = classify(&stats_with(0, 0, &[40.0]));
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn change_detection_defaults_to_low() {
        let medium = classify(&stats_with(3, 0, &[]));
        let low = classify(&StudentStatistics::default());
        assert!(risk_changed(None, &medium));
        assert!(!risk_changed(None, &low));
        assert!(!risk_changed(Some(&medium), &medium));
    }

    #[test]
    fn rank_orders_high_first() {
        assert!(rank(RiskLevel::High) < rank(RiskLevel::Medium));
        assert!(rank(RiskLevel::Medium) < rank(RiskLevel::Low));
    }
}
