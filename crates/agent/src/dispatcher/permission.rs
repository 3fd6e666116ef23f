//! Five-step permission classification for one tool call, run before the
//! hook pipeline's `preToolUse` stage.

use crate::tools::ToolAttributes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Auto,
    Approval,
    Readonly,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Auto
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub require_approval_tools: Vec<String>,
    pub mode: PermissionMode,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Denied(String),
    ApprovalRequired,
}

/// Classifies one call against the policy, in the order the spec lays out:
/// explicit deny, then an allow-list if configured, then
/// approval-requirement (by name, mode, or descriptor attribute), then
/// readonly-mode restriction, else allowed.
pub fn classify(name: &str, attributes: ToolAttributes, policy: &ToolPolicy) -> Classification {
    if policy.deny_tools.iter().any(|denied| denied == name) {
        return Classification::Denied("tool forbidden".into());
    }
    if !policy.allow_tools.is_empty() && !policy.allow_tools.iter().any(|allowed| allowed == name) {
        return Classification::Denied("tool not permitted".into());
    }
    let approval_by_name = policy.require_approval_tools.iter().any(|n| n == name);
    let approval_by_mode = policy.mode == PermissionMode::Approval;
    let approval_by_attribute = attributes.requires_approval && policy.mode != PermissionMode::Readonly;
    if approval_by_name || approval_by_mode || approval_by_attribute {
        return Classification::ApprovalRequired;
    }
    if policy.mode == PermissionMode::Readonly && !attributes.read_only {
        return Classification::Denied("readonly mode: tool is not read-only".into());
    }
    Classification::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(read_only: bool, requires_approval: bool) -> ToolAttributes {
        ToolAttributes {
            read_only,
            requires_approval,
            concurrency_safe: true,
        }
    }

    #[test]
    fn deny_list_wins_over_everything_else() {
        let policy = ToolPolicy {
            deny_tools: vec!["fs_rm".into()],
            allow_tools: vec!["fs_rm".into()],
            ..Default::default()
        };
        assert_eq!(
            classify("fs_rm", attrs(false, false), &policy),
            Classification::Denied("tool forbidden".into())
        );
    }

    #[test]
    fn allow_list_excludes_unlisted_tools() {
        let policy = ToolPolicy {
            allow_tools: vec!["fs_list".into()],
            ..Default::default()
        };
        assert_eq!(
            classify("fs_write", attrs(false, false), &policy),
            Classification::Denied("tool not permitted".into())
        );
        assert_eq!(classify("fs_list", attrs(true, false), &policy), Classification::Allowed);
    }

    #[test]
    fn descriptor_requires_approval_unless_readonly_mode() {
        let policy = ToolPolicy::default();
        assert_eq!(
            classify("fs_rm", attrs(false, true), &policy),
            Classification::ApprovalRequired
        );

        let readonly_policy = ToolPolicy {
            mode: PermissionMode::Readonly,
            ..Default::default()
        };
        assert_eq!(
            classify("fs_rm", attrs(false, true), &readonly_policy),
            Classification::Denied("readonly mode: tool is not read-only".into())
        );
    }

    #[test]
    fn readonly_mode_allows_only_read_only_tools() {
        let policy = ToolPolicy {
            mode: PermissionMode::Readonly,
            ..Default::default()
        };
        assert_eq!(classify("fs_list", attrs(true, false), &policy), Classification::Allowed);
        assert_eq!(
            classify("fs_write", attrs(false, false), &policy),
            Classification::Denied("readonly mode: tool is not read-only".into())
        );
    }

    #[test]
    fn approval_mode_requires_approval_for_every_tool() {
        let policy = ToolPolicy {
            mode: PermissionMode::Approval,
            ..Default::default()
        };
        assert_eq!(
            classify("fs_list", attrs(true, false), &policy),
            Classification::ApprovalRequired
        );
    }
}
