//! Service lifecycle: freeing ports, spawning and supervising processes,
//! readiness checks and the orchestrator state machine that ties them together.

pub mod error;
pub mod orchestrator;
pub mod readiness;
pub mod reaper;
pub mod scanners;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod watchdog;

pub use error::{LaunchError, LaunchResult};
pub use orchestrator::{
    ExitReport, LaunchOptions, ManagedService, ServiceOrchestrator, ServiceView, StopReport,
};
pub use readiness::{ReadinessCheck, ReadinessProbe, ReadinessResult};
pub use reaper::{PortReaper, is_port_available};
pub use scanners::PortScanner;
pub use state::{LifecycleState, Transition};
pub use supervisor::{ProcessHandle, ProcessSupervisor, TerminateOutcome};
pub use watchdog::RestartBudget;
