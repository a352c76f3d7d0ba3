//! relkit: metadata-driven object mapping, change-tracked collections and relation loading
//! over PostgreSQL.

pub mod case;
pub mod config;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod materialize;
pub mod metadata;
pub mod planner;
pub mod repository;
pub mod runtime;
pub mod storage;

pub use config::{load_from_dir, resolve, AdditionPolicy, FullConfig, RepositoryOptions, Settings, StorageSchema};
pub use entity::{EntityKey, FieldValue, Instance, Intent, Tracked, TrackedCollection, View};
pub use error::{
    ConfigError, MappingError, MaterializeError, MetadataError, PlanError, RepositoryError, StorageError,
};
pub use mapping::{MappingPair, MappingPairRegistry, MappingProfile, StructuralMapper};
pub use materialize::EntityMaterializer;
pub use metadata::{ClassDef, CompositionAction, CompositionKind, MetadataRegistry, PropertyDef};
pub use planner::{IncludeDirective, RelationPlanner};
pub use repository::Repository;
pub use runtime::OrmContext;
pub use storage::{FindArgs, OrderBy, PgBackend, SortOrder, StorageBackend, WriteOp};
