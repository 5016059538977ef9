//! Storage backend traits.

mod backend;
mod relational;

pub use backend::Backend;
pub use relational::RelationalStore;
