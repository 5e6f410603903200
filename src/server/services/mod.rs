pub mod edge_services;
pub mod origin_services;
pub mod recovery_services;
pub mod resolution_cache_services;
pub mod resolver_services;

pub use origin_services::OriginService;
pub use recovery_services::RecoveryService;
pub use resolution_cache_services::ResolutionCache;
pub use resolver_services::{DynStreamResolver, StreamResolver};
