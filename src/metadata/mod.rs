//! Per-class property metadata: descriptors, static schema tables, and the registry.

mod descriptor;
mod registry;
mod schema;

pub use descriptor::*;
pub use registry::*;
pub use schema::*;
