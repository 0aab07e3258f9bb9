pub mod jobs;
pub mod live;
pub mod process;
