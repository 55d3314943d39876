//! Mapping of raw Icinga 2 `StateChange` events onto [`StatusChange`].

use serde::Deserialize;
use serde_json::Value;

use crate::model::{CheckState, ObjectRef, Status, StatusChange, StatusType};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawStateChange {
    host: String,
    #[serde(default)]
    service: Option<String>,
    state: f64,
    state_type: f64,
    check_result: RawCheckResult,
}

#[derive(Debug, Deserialize)]
struct RawCheckResult {
    #[serde(default)]
    output: String,
    vars_after: RawVarsAfter,
    #[serde(default)]
    vars_before: Option<RawVarsBefore>,
}

#[derive(Debug, Deserialize)]
struct RawVarsAfter {
    attempt: f64,
}

#[derive(Debug, Deserialize)]
struct RawVarsBefore {
    state: f64,
    state_type: f64,
    attempt: f64,
}

/// Icinga serializes enum indices as JSON numbers, often with a fraction
/// part (`2.0`).
fn index(value: f64) -> Option<usize> {
    (value >= 0.0 && value.fract() == 0.0).then_some(value as usize)
}

fn check_state(state: f64, state_type: f64, attempt: f64) -> Result<CheckState> {
    let status = index(state)
        .and_then(Status::from_index)
        .ok_or_else(|| Error::invalid_response(format!("unknown state index {}", state)))?;
    let status_type = index(state_type)
        .and_then(StatusType::from_index)
        .ok_or_else(|| {
            Error::invalid_response(format!("unknown state type index {}", state_type))
        })?;

    Ok(CheckState {
        status,
        status_type,
        attempt: attempt.max(0.0) as u32,
    })
}

/// Convert one decoded stream value into a [`StatusChange`].
pub fn status_change_from_icinga(value: Value) -> Result<StatusChange> {
    let raw: RawStateChange = serde_json::from_value(value)?;
    let result = raw.check_result;

    let state = check_state(raw.state, raw.state_type, result.vars_after.attempt)?;
    let previous_state = result
        .vars_before
        .map(|before| check_state(before.state, before.state_type, before.attempt))
        .transpose()?;

    Ok(StatusChange {
        host: ObjectRef::named(raw.host),
        service: raw.service.map(ObjectRef::named),
        state,
        previous_state,
        output: result.output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_change(state: f64, state_type: f64) -> Value {
        json!({
            "type": "StateChange",
            "host": "web1",
            "service": "http",
            "state": state,
            "state_type": state_type,
            "timestamp": 1_700_000_000.5,
            "check_result": {
                "output": "HTTP CRITICAL - connection refused",
                "vars_after": {"attempt": 1.0, "reachable": true, "state": state, "state_type": state_type},
                "vars_before": {"attempt": 3.0, "reachable": true, "state": 0.0, "state_type": 1.0}
            }
        })
    }

    #[test]
    fn test_critical_hard() {
        let change = status_change_from_icinga(state_change(2.0, 1.0)).unwrap();

        assert_eq!(change.host.name, "web1");
        assert_eq!(change.service.unwrap().name, "http");
        assert_eq!(change.state.status, Status::Critical);
        assert_eq!(change.state.status_type, StatusType::Hard);
        assert_eq!(change.state.attempt, 1);
        assert_eq!(change.output, "HTTP CRITICAL - connection refused");

        let previous = change.previous_state.unwrap();
        assert_eq!(previous.status, Status::Ok);
        assert_eq!(previous.status_type, StatusType::Hard);
        assert_eq!(previous.attempt, 3);
    }

    #[test]
    fn test_ok_soft_with_integer_indices() {
        let mut value = state_change(0.0, 0.0);
        value["state"] = json!(0);
        value["state_type"] = json!(0);

        let change = status_change_from_icinga(value).unwrap();
        assert_eq!(change.state.status, Status::Ok);
        assert_eq!(change.state.status_type, StatusType::Soft);
    }

    #[test]
    fn test_previous_state_only_when_present() {
        let mut value = state_change(1.0, 0.0);
        value["check_result"]
            .as_object_mut()
            .unwrap()
            .remove("vars_before");

        let change = status_change_from_icinga(value).unwrap();
        assert_eq!(change.state.status, Status::Warning);
        assert!(change.previous_state.is_none());
    }

    #[test]
    fn test_host_check_has_no_service() {
        let mut value = state_change(2.0, 1.0);
        value.as_object_mut().unwrap().remove("service");

        let change = status_change_from_icinga(value).unwrap();
        assert!(change.service.is_none());
    }

    #[test]
    fn test_unknown_state_index() {
        let err = status_change_from_icinga(state_change(7.0, 1.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));

        let err = status_change_from_icinga(state_change(1.5, 1.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_not_a_state_change() {
        let err = status_change_from_icinga(json!({"type": "Notification"})).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
