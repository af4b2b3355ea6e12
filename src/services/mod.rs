pub mod exercise_extractor;
pub mod grade_store;
pub mod grading_prompt;
pub mod identity;
pub mod llm_service;
pub mod notebook_view;
pub mod submission_ledger;
pub mod warn_writer;

pub use exercise_extractor::ExerciseExtractor;
pub use grade_store::{GradeIndex, GradeStore, KeyGuard};
pub use identity::{resolve, resolve_traced, IdentityRule, IdentityRules};
pub use llm_service::{backend_from_config, GradeRequest, GradingBackend, LlmService};
pub use notebook_view::NotebookView;
pub use submission_ledger::{ScannedFile, SubmissionLedger, UnresolvedFile};
pub use warn_writer::WarnWriter;
