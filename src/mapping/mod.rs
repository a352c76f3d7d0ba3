//! Registered class-to-class mappings and the structural mapper that applies them.

mod mapper;
mod pairs;

pub use mapper::StructuralMapper;
pub use pairs::{FieldOverride, MappingPair, MappingPairRegistry, MappingProfile};
