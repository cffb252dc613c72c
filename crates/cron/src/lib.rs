pub mod clock;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::CronError;
pub use executor::{AgentExecutor, AgentTurnRequest, AgentTurnResponse, Executor};
pub use schedule::next_run_at_ms;
pub use service::{EventSink, SchedulerConfig, SchedulerService};
pub use store::{FileJobStore, JobStore};
pub use types::{
    CreateJob, ExecutionResult, Job, JobPatch, JobState, Payload, RunStatus, Schedule,
    SchedulerEvent, StoreFile,
};
