pub mod grading_ctx;
pub mod grading_flow;
pub mod retry;

pub use grading_ctx::GradingCtx;
pub use grading_flow::{GradeOutcome, GradingFlow};
pub use retry::{Backoff, RetryPolicy};
