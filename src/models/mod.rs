mod change_document;
mod tenant;

pub use change_document::*;
pub use tenant::*;
