use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AttendanceStatus, EventPayload, EventType, Member, Role};
use crate::store::StudentDirectory;

/// An event that passed validation. The raw payload is kept as submitted.
#[derive(Debug, Clone)]
pub struct ValidatedEvent {
    pub student: Member,
    pub event_type: EventType,
    pub event_data: Value,
    pub payload: EventPayload,
}

pub async fn validate_event(
    directory: &dyn StudentDirectory,
    student_id: Uuid,
    event_type: &str,
    event_data: Value,
) -> PipelineResult<ValidatedEvent> {
    let student = directory
        .find_member(student_id)
        .await?
        .ok_or(PipelineError::NotFound { student_id })?;

    if student.role != Role::Student {
        return Err(PipelineError::Role {
            id: student.id,
            role: student.role,
        });
    }

    let event_type = EventType::parse(event_type)
        .ok_or_else(|| PipelineError::InvalidEventType(event_type.to_string()))?;
    let payload = parse_payload(event_type, &event_data)?;

    tracing::debug!(student_id = %student.id, %event_type, "event validated");

    Ok(ValidatedEvent {
        student,
        event_type,
        event_data,
        payload,
    })
}

/// Checks `data` against the schema of `event_type`.
pub fn parse_payload(event_type: EventType, data: &Value) -> PipelineResult<EventPayload> {
    let empty = Map::new();
    let fields = data.as_object().unwrap_or(&empty);

    match event_type {
        EventType::Attendance => {
            let status = match fields.get("status").and_then(Value::as_str) {
                Some("present") => AttendanceStatus::Present,
                Some("absent") => AttendanceStatus::Absent,
                _ => {
                    return Err(PipelineError::invalid_payload(
                        "status",
                        "attendance status must be \"present\" or \"absent\"",
                    ))
                }
            };
            Ok(EventPayload::Attendance { status })
        }
        EventType::Assignment => {
            let submitted = fields
                .get("submitted")
                .and_then(Value::as_bool)
                .ok_or_else(|| {
                    PipelineError::invalid_payload("submitted", "must be a boolean")
                })?;
            let assignment_name = required_text(fields, "assignmentName")?;
            Ok(EventPayload::Assignment {
                submitted,
                assignment_name,
            })
        }
        EventType::Performance => {
            let score = fields
                .get("score")
                .and_then(Value::as_f64)
                .filter(|score| (0.0..=100.0).contains(score))
                .ok_or_else(|| {
                    PipelineError::invalid_payload("score", "must be a number between 0 and 100")
                })?;
            let test_name = required_text(fields, "testName")?;
            Ok(EventPayload::Performance { score, test_name })
        }
    }
}

fn required_text(fields: &Map<String, Value>, field: &'static str) -> PipelineResult<String> {
    match fields.get(field).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(PipelineError::invalid_payload(
            field,
            "is required and must be a non-empty string",
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::NewMember;

    async fn directory_with(role: Role) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let member = store
            .register(NewMember {
                name: "Avery Lee".to_string(),
                email: "avery@example.com".to_string(),
                role,
                course: Some("Computer Science".to_string()),
                year: Some(2),
            })
            .await
            .unwrap();
        (store, member.id)
    }

    fn field_of(err: PipelineError) -> &'static str {
        match err {
            PipelineError::InvalidPayload { field, .. } => field,
            other => panic!("expected invalid payload, got {other:?}"),
        }
    }

    #[test]
    fn attendance_status_must_be_known() {
        let ok = parse_payload(EventType::Attendance, &json!({"status": "absent"})).unwrap();
        assert_eq!(
            ok,
            EventPayload::Attendance {
                status: AttendanceStatus::Absent
            }
        );

        let err = parse_payload(EventType::Attendance, &json!({"status": "late"})).unwrap_err();
        assert_eq!(field_of(err), "status");
        let err = parse_payload(EventType::Attendance, &json!({})).unwrap_err();
        assert_eq!(field_of(err), "status");
    }

    #[test]
    fn assignment_requires_boolean_and_name() {
        let err = parse_payload(
            EventType::Assignment,
            &json!({"submitted": "yes", "assignmentName": "Essay"}),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "submitted");

        let err = parse_payload(
            EventType::Assignment,
            &json!({"submitted": false, "assignmentName": ""}),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "assignmentName");

        let ok = parse_payload(
            EventType::Assignment,
            &json!({"submitted": false, "assignmentName": "Essay"}),
        )
        .unwrap();
        assert!(matches!(ok, EventPayload::Assignment { submitted: false, .. }));
    }

    #[test]
    fn only_empty_names_are_missing() {
        let ok = parse_payload(
            EventType::Performance,
            &json!({"score": 70, "testName": "  "}),
        )
        .unwrap();
        assert_eq!(
            ok,
            EventPayload::Performance {
                score: 70.0,
                test_name: "  ".to_string()
            }
        );

        let err = parse_payload(EventType::Performance, &json!({"score": 70, "testName": ""}))
            .unwrap_err();
        assert_eq!(field_of(err), "testName");
        let err = parse_payload(
            EventType::Assignment,
            &json!({"submitted": true, "assignmentName": 7}),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "assignmentName");
    }

    #[test]
    fn performance_score_is_bounded() {
        for score in [json!(150), json!(-1), json!("90"), Value::Null] {
            let err = parse_payload(
                EventType::Performance,
                &json!({"score": score, "testName": "Midterm"}),
            )
            .unwrap_err();
            assert_eq!(field_of(err), "score");
        }

        let err = parse_payload(EventType::Performance, &json!({"score": 55})).unwrap_err();
        assert_eq!(field_of(err), "testName");

        let ok = parse_payload(
            EventType::Performance,
            &json!({"score": 100, "testName": "Final"}),
        )
        .unwrap();
        assert_eq!(
            ok,
            EventPayload::Performance {
                score: 100.0,
                test_name: "Final".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_student_is_not_found() {
        let (store, _) = directory_with(Role::Student).await;
        let missing = Uuid::new_v4();
        let err = validate_event(&store, missing, "attendance", json!({"status": "present"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { student_id } if student_id == missing));
    }

    #[tokio::test]
    async fn mentors_cannot_submit_events() {
        let (store, id) = directory_with(Role::Mentor).await;
        let err = validate_event(&store, id, "attendance", json!({"status": "present"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "role");
    }

    #[tokio::test]
    async fn event_type_is_checked_before_payload() {
        let (store, id) = directory_with(Role::Student).await;
        let err = validate_event(&store, id, "quiz", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_event_type");

        let validated = validate_event(&store, id, "attendance", json!({"status": "present"}))
            .await
            .unwrap();
        assert_eq!(validated.event_type, EventType::Attendance);
        assert_eq!(validated.event_data, json!({"status": "present"}));
    }
}
