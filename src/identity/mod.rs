mod cache;
mod resolver;

pub use cache::load_identity_cache;
pub use resolver::{
    fallback_name, truncate_name, KnownName, NameResolver, NameSource, PlaceholderPolicy,
    ResolvedName, MAX_NAME_LEN,
};
