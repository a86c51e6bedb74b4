pub mod driver;
pub mod job;
pub mod scanner;
pub mod source;

pub use driver::{DriveSummary, QueueDriver};
pub use job::{ClaimedJob, JobOutcome};
pub use scanner::{ProjectFolder, ProjectScanner};
pub use source::{DbJobSource, JobSource};
