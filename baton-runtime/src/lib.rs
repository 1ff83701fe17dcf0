//! BATON Runtime - Agent Execution
//!
//! The runtime drives one agent instance through its declared step plan:
//! state-machine enforcement, the hard step budget, timing, learning
//! hooks, per-step persistence, and compact error wrapping. Roles are
//! behaviour implementations over a uniform trait; the runtime itself is
//! composition, not inheritance.

mod plan;
mod progress;
mod runtime;

pub use plan::{GuardFn, StepPlan, StepSpec};
pub use progress::{ProgressSender, ProgressUpdate};
pub use runtime::{AgentBehavior, AgentRuntime, StepContext};
