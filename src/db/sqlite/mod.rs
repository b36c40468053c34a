mod change_collections;
mod cluster_parameters;

pub use change_collections::SqliteChangeCollectionRepo;
pub use cluster_parameters::SqliteClusterParameterRepo;
