//! BATON Agents - The Closed Role Set
//!
//! One module per worker role. Each role declares its step plan (at most
//! eight steps) and implements `AgentBehavior` against injected
//! collaborator traits; dispatch is by role tag through `build_role`.

mod code;
mod communication;
mod deploy;
mod patterns;
mod project_identity;
mod security;
mod source_control;

pub use code::CodeRole;
pub use communication::CommunicationRole;
pub use deploy::DeployRole;
pub use patterns::{ScanFinding, ScanPattern};
pub use project_identity::ProjectIdentityRole;
pub use security::SecurityRole;
pub use source_control::SourceControlRole;

use baton_core::AgentRoleKind;
use baton_external::{ChatPlatform, ContainerRuntime, CredentialStore, SourceControlHost};
use baton_runtime::AgentBehavior;
use std::path::PathBuf;
use std::sync::Arc;

/// Dependencies a role may draw on. Roles take what they need; missing
/// collaborators surface as `auth-missing`/`config-invalid` failures at
/// the role's authenticate/validate step, not at construction.
#[derive(Clone)]
pub struct RoleDeps {
    pub credentials: Arc<CredentialStore>,
    pub source_control: Option<Arc<dyn SourceControlHost>>,
    pub chat: Option<Arc<dyn ChatPlatform>>,
    pub containers: Option<Arc<dyn ContainerRuntime>>,
    pub projects_dir: PathBuf,
}

impl RoleDeps {
    /// Dependencies with nothing wired up (offline roles only).
    pub fn offline(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials: Arc::new(CredentialStore::empty()),
            source_control: None,
            chat: None,
            containers: None,
            projects_dir: projects_dir.into(),
        }
    }
}

/// Resolve a role tag to its behaviour implementation.
pub fn build_role(role: AgentRoleKind, deps: &RoleDeps) -> Arc<dyn AgentBehavior> {
    match role {
        AgentRoleKind::SourceControl => Arc::new(SourceControlRole::new(deps.clone())),
        AgentRoleKind::Security => Arc::new(SecurityRole::new()),
        AgentRoleKind::Code => Arc::new(CodeRole::new()),
        AgentRoleKind::Deploy => Arc::new(DeployRole::new(deps.clone())),
        AgentRoleKind::Communication => Arc::new(CommunicationRole::new(deps.clone())),
        AgentRoleKind::ProjectIdentity => Arc::new(ProjectIdentityRole::new(deps.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::MAX_STEPS;

    #[test]
    fn test_every_role_resolves_with_a_legal_plan() {
        let deps = RoleDeps::offline("/tmp/baton-projects");
        for role in AgentRoleKind::ALL {
            let behavior = build_role(role, &deps);
            assert_eq!(behavior.role(), role);
            assert!(behavior.plan().len() <= MAX_STEPS);
            assert!(!behavior.plan().is_empty());
        }
    }
}
