//! Dynamic entity values and change-tracked collections.

mod collection;
mod instance;

pub use collection::{Tracked, TrackedCollection, View};
pub use instance::{EntityKey, FieldValue, Instance, Intent};
