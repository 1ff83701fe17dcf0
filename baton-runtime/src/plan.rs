//! Step plans: the ordered list of at most eight named steps a role will
//! execute. The cap is enforced at construction, not at run time.

use baton_core::{AgentError, MAX_STEPS};

/// Optional precondition over the agent's accumulated working state.
/// A step whose guard returns false is skipped, not failed.
pub type GuardFn = fn(&serde_json::Value) -> bool;

/// One named unit of work in a plan.
#[derive(Clone)]
pub struct StepSpec {
    pub name: &'static str,
    pub guard: Option<GuardFn>,
}

impl StepSpec {
    /// A step with no precondition.
    pub fn new(name: &'static str) -> Self {
        Self { name, guard: None }
    }

    /// Attach a guard.
    pub fn with_guard(mut self, guard: GuardFn) -> Self {
        self.guard = Some(guard);
        self
    }
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// An ordered plan of at most `MAX_STEPS` steps.
#[derive(Debug, Clone)]
pub struct StepPlan {
    steps: Vec<StepSpec>,
}

impl StepPlan {
    /// Build a plan, rejecting oversized ones at construction.
    pub fn new(steps: Vec<StepSpec>) -> Result<Self, AgentError> {
        if steps.len() > MAX_STEPS {
            return Err(AgentError::PlanTooLong {
                got: steps.len(),
                max: MAX_STEPS,
            });
        }
        Ok(Self { steps })
    }

    /// Convenience constructor from bare names.
    pub fn from_names(names: &[&'static str]) -> Result<Self, AgentError> {
        Self::new(names.iter().map(|n| StepSpec::new(n)).collect())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Declared step names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_within_cap() {
        let plan = StepPlan::from_names(&["a", "b", "c"]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_plan_at_cap() {
        let names: Vec<&'static str> = vec!["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8"];
        assert!(StepPlan::from_names(&names).is_ok());
    }

    #[test]
    fn test_plan_over_cap_rejected_at_construction() {
        let names: Vec<&'static str> =
            vec!["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9"];
        let err = StepPlan::from_names(&names).unwrap_err();
        assert!(matches!(err, AgentError::PlanTooLong { got: 9, max: 8 }));
    }

    #[test]
    fn test_guarded_step() {
        let step = StepSpec::new("deploy").with_guard(|working| working.get("build").is_some());
        let guard = step.guard.unwrap();
        assert!(!guard(&serde_json::json!({})));
        assert!(guard(&serde_json::json!({"build": {"ok": true}})));
    }
}
