//! BATON External - Collaborator Interfaces
//!
//! Narrow clients for the systems the core talks to: the source-control
//! host, the chat platform, and the container runtime, plus credential
//! loading and the lifecycle coordinator that fans out on context
//! creation and completion. External failures are recorded as events,
//! never allowed to block the core.

mod chat;
mod container;
mod coordinator;
mod credentials;
mod source_control;

pub use chat::{ChannelInfo, ChatPlatform, SlackClient};
pub use container::{ContainerRuntime, DockerCli};
pub use coordinator::{ChatTarget, CoordinatorConfig, ExternalCoordinator, SourceControlTarget};
pub use credentials::{encrypt_credentials_file, CredentialStore, SERVICE_CHAT, SERVICE_SOURCE_CONTROL};
pub use source_control::{ExternalRef, GitHubClient, SourceControlHost};
