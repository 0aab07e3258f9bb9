pub use backoff::is_retryable;
pub use error::Error;
pub use job::DueJob;
pub use job::JobCreate;
pub use job::JobRow;
pub use job::JobStatus;
pub use state::AppState;

mod backoff;
mod error;
mod job;
mod state;
