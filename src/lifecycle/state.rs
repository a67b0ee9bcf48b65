//! Lifecycle states and the transition history of a launch

use std::fmt;

use chrono::{DateTime, Local};

/// Phase of the orchestrator (and of each service it starts)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    PortsReclaiming,
    Building,
    Spawning,
    AwaitingReadiness,
    Running,
    Stopping,
    Failed,
}

impl LifecycleState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `AwaitingReadiness` may lead back to `Building` or `Spawning` because
    /// services start one after another within a single launch.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Idle | Failed, PortsReclaiming)
                | (PortsReclaiming, Building | Spawning | Failed)
                | (Building, Spawning | Failed)
                | (Spawning, AwaitingReadiness | Failed)
                | (AwaitingReadiness, Running | Building | Spawning | Failed)
                | (Running, Stopping)
                | (Stopping, Idle)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::PortsReclaiming => "reclaiming ports",
            LifecycleState::Building => "building",
            LifecycleState::Spawning => "spawning",
            LifecycleState::AwaitingReadiness => "awaiting readiness",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One recorded step
#[derive(Debug, Clone)]
pub struct Transition {
    pub at: DateTime<Local>,
    /// Service the step belongs to, `None` for orchestrator-wide steps
    pub service: Option<String>,
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.at.format("%H:%M:%S"))?;
        if let Some(service) = &self.service {
            write!(f, "[{service}] ")?;
        }
        write!(f, "{} -> {}", self.from, self.to)
    }
}
