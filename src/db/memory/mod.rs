mod change_collections;
mod cluster_parameters;

pub use change_collections::InMemoryChangeCollections;
pub use cluster_parameters::InMemoryClusterParameters;
