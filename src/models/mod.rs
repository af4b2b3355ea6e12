pub mod grade;
pub mod ids;
pub mod loaders;
pub mod route;
pub mod status;
pub mod submission;

pub use grade::{ExerciseGrade, GradeRecord, GradeResult, Rating, FLAG_OPTIONAL_NOT_ATTEMPTED};
pub use ids::{RouteId, StudentId, SubmissionKey};
pub use loaders::{load_policy, load_route_catalog, RouteLayout};
pub use route::{DeliverableKind, Exercise, Route, RouteCatalog, RouteDocument};
pub use status::{SendScore, StatusReason, StudentRouteStatus};
pub use submission::{FileKind, Fingerprint, Submission};
