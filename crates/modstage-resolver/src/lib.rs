mod error;
mod order;
mod resolve;
mod types;

pub use error::{ConflictKind, ResolveError};
pub use resolve::Resolver;
pub use types::{Action, ChainEntry, Dependency, ItemErrorCode, ResolutionChain, ResolverItem};
