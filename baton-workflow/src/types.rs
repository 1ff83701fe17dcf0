//! Declarative workflow types: the closed set of named role sequences.

use baton_core::{AgentRoleKind, WorkflowKind};

/// Resolved execution shape of a workflow type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSpec {
    pub kind: WorkflowKind,
    /// Roles in declared execution order
    pub roles: &'static [AgentRoleKind],
    /// Parallel workflows fan the role list out per branch
    pub parallel: bool,
}

/// Resolve a workflow type to its role list and execution order.
pub fn spec_for(kind: WorkflowKind) -> WorkflowSpec {
    use AgentRoleKind::*;
    match kind {
        WorkflowKind::FeatureDevelopment => WorkflowSpec {
            kind,
            roles: &[SourceControl, Security, Code, Deploy],
            parallel: false,
        },
        WorkflowKind::SecurityAudit => WorkflowSpec {
            kind,
            roles: &[SourceControl, Security, Communication],
            parallel: false,
        },
        WorkflowKind::Release => WorkflowSpec {
            kind,
            roles: &[Code, Deploy, Communication],
            parallel: false,
        },
        WorkflowKind::BranchParallel => WorkflowSpec {
            kind,
            roles: &[SourceControl, Code],
            parallel: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_development_order() {
        let spec = spec_for(WorkflowKind::FeatureDevelopment);
        assert_eq!(
            spec.roles,
            &[
                AgentRoleKind::SourceControl,
                AgentRoleKind::Security,
                AgentRoleKind::Code,
                AgentRoleKind::Deploy,
            ]
        );
        assert!(!spec.parallel);
    }

    #[test]
    fn test_only_branch_parallel_fans_out() {
        for kind in [
            WorkflowKind::FeatureDevelopment,
            WorkflowKind::SecurityAudit,
            WorkflowKind::Release,
            WorkflowKind::BranchParallel,
        ] {
            let spec = spec_for(kind);
            assert_eq!(spec.parallel, kind == WorkflowKind::BranchParallel);
            assert!(!spec.roles.is_empty());
        }
    }
}
