pub mod protocol;
pub mod supervisor;
pub mod worker_handle;
pub mod worker_main;

pub use protocol::{WorkerCommand, WorkerEvent};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker_handle::{Health, HealthSnapshot, WorkerState, WorkerThread};
