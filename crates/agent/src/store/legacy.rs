//! Backward-compatible decode for on-disk records written by an older
//! schema, so a store-format change doesn't strand existing agent
//! directories. So far only `ToolCallRecord.state` has ever changed
//! encoding: the original schema wrote integer codes in the tool-call
//! state's declaration order, the current one writes the snake_case
//! variant name.

use crate::protocol::{ToolCallRecord, ToolCallState};

fn legacy_state(code: u64) -> Option<ToolCallState> {
    use ToolCallState::*;
    match code {
        0 => Some(Pending),
        1 => Some(ApprovalRequired),
        2 => Some(Approved),
        3 => Some(Denied),
        4 => Some(Running),
        5 => Some(Completed),
        6 => Some(Failed),
        7 => Some(Sealed),
        _ => None,
    }
}

fn snake_case_state(state: ToolCallState) -> &'static str {
    match state {
        ToolCallState::Pending => "pending",
        ToolCallState::ApprovalRequired => "approval_required",
        ToolCallState::Approved => "approved",
        ToolCallState::Denied => "denied",
        ToolCallState::Running => "running",
        ToolCallState::Completed => "completed",
        ToolCallState::Failed => "failed",
        ToolCallState::Sealed => "sealed",
    }
}

/// Reinterprets one raw JSON tool-call record under the legacy
/// integer-coded-state schema. Returns `None` if it doesn't match that
/// schema either, in which case the caller discards the record.
pub fn convert_tool_call_record(mut value: serde_json::Value) -> Option<ToolCallRecord> {
    let code = value.get("state")?.as_u64()?;
    let state = legacy_state(code)?;
    value
        .as_object_mut()?
        .insert("state".to_string(), serde_json::Value::String(snake_case_state(state).to_string()));
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_integer_coded_state() {
        let raw = serde_json::json!({
            "id": "c1",
            "name": "fs_list",
            "input": {},
            "state": 5,
            "approval": {
                "required": false, "approval_id": null, "decided_by": null,
                "decided_at": null, "note": null,
            },
            "result": null,
            "error": null,
            "is_error": false,
            "started_at": null,
            "completed_at": null,
            "duration_ms": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "audit_trail": [],
        });
        let record = convert_tool_call_record(raw).expect("legacy record should convert");
        assert_eq!(record.state, ToolCallState::Completed);
    }

    #[test]
    fn unknown_state_code_is_rejected() {
        let raw = serde_json::json!({"id": "c1", "name": "fs_list", "state": 99});
        assert!(convert_tool_call_record(raw).is_none());
    }
}
