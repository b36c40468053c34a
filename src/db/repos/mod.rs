mod change_collections;
mod cluster_parameters;

pub use change_collections::*;
pub use cluster_parameters::*;
