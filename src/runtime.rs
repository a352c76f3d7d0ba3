//! Registries built once at boot and shared by reference with every consumer.

use crate::config::{register_classes, FullConfig};
use crate::error::MappingError;
use crate::mapping::{MappingPairRegistry, MappingProfile, StructuralMapper};
use crate::materialize::EntityMaterializer;
use crate::metadata::{ClassDef, MetadataRegistry};
use crate::planner::RelationPlanner;

/// Metadata plus mapping pairs. Read-only once built; wrap in `Arc` to share across tasks.
#[derive(Debug, Default)]
pub struct OrmContext {
    metadata: MetadataRegistry,
    mappings: MappingPairRegistry,
}

impl OrmContext {
    /// Take ownership of fully registered registries and validate every mapping pair, so a
    /// missing nested pairing fails at boot instead of on first use.
    pub fn build(metadata: MetadataRegistry, mappings: MappingPairRegistry) -> Result<Self, MappingError> {
        mappings.validate(&metadata)?;
        tracing::debug!(
            classes = metadata.classes().count(),
            pairs = mappings.len(),
            "orm context ready"
        );
        Ok(OrmContext { metadata, mappings })
    }

    /// Convenience for the common boot sequence: static class tables, classes from config, then
    /// profiles.
    pub fn from_parts(
        classes: &[ClassDef],
        config: Option<&FullConfig>,
        profiles: &[&dyn MappingProfile],
    ) -> Result<Self, MappingError> {
        let mut metadata = MetadataRegistry::new();
        metadata.register_classes(classes);
        if let Some(config) = config {
            register_classes(config, &mut metadata);
        }
        let mut mappings = MappingPairRegistry::new();
        for profile in profiles {
            mappings.add_profile(*profile);
        }
        Self::build(metadata, mappings)
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    pub fn mappings(&self) -> &MappingPairRegistry {
        &self.mappings
    }

    pub fn mapper(&self) -> StructuralMapper<'_> {
        StructuralMapper::new(&self.metadata, &self.mappings)
    }

    pub fn materializer(&self) -> EntityMaterializer<'_> {
        EntityMaterializer::new(&self.metadata)
    }

    pub fn planner(&self) -> RelationPlanner<'_> {
        RelationPlanner::new(&self.metadata)
    }
}
