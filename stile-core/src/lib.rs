pub mod api;
pub mod browser;
pub mod config;
pub mod queue;
pub mod registry;
pub mod sweeper;
pub mod task;
pub mod worker;

pub use api::{router, ApiError, ApiState};
pub use browser::{
    BrowserSession, HeaderProfile, HeaderProfilePool, ProxyPool, SessionError, SessionLauncher,
    SessionResult,
};
pub use config::{load_solver_config, BrowserVariant, ConfigError, ConfigResult, SolverConfig};
pub use queue::{DispatchQueue, QueueError, QueueResult};
pub use registry::{RegistryError, RegistryResult, TaskRegistry};
pub use sweeper::{Sweeper, SweeperHandle};
pub use task::{ErrorCode, Task, TaskId, TaskOutcome, TaskRequest, TaskState};
pub use worker::{BrowserDriver, SessionFactory, WorkerOptions, WorkerPhase, WorkerPool};
