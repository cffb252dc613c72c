use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job store corrupt: {0}")]
    StoreCorrupt(String),
}
