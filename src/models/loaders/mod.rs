pub mod policy_loader;
pub mod route_loader;

pub use policy_loader::load_policy;
pub use route_loader::{load_route_catalog, RouteLayout};
