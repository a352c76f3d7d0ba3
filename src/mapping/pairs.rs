//! (source, target, overrides) triples registered by profiles at startup.

use crate::entity::{FieldValue, Instance};
use crate::error::MappingError;
use crate::metadata::MetadataRegistry;
use std::fmt;
use std::sync::Arc;

/// Computes a target field from the original source instance.
pub type FieldOverride = Arc<dyn Fn(&Instance) -> FieldValue + Send + Sync>;

#[derive(Clone)]
pub struct MappingPair {
    source: String,
    target: String,
    overrides: Vec<(String, FieldOverride)>,
}

impl fmt::Debug for MappingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingPair")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("overrides", &self.overrides.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl MappingPair {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Override one target field. A second override for the same field replaces the first
    /// and keeps its position.
    pub fn for_member<F>(&mut self, target_field: &str, f: F) -> &mut Self
    where
        F: Fn(&Instance) -> FieldValue + Send + Sync + 'static,
    {
        let f: FieldOverride = Arc::new(f);
        match self.overrides.iter_mut().find(|(n, _)| n == target_field) {
            Some(slot) => slot.1 = f,
            None => self.overrides.push((target_field.to_string(), f)),
        }
        self
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, &FieldOverride)> {
        self.overrides.iter().map(|(n, f)| (n.as_str(), f))
    }
}

/// A group of related `create_map` calls, applied once at boot.
pub trait MappingProfile {
    fn configure(&self, pairs: &mut MappingPairRegistry);
}

#[derive(Clone, Debug, Default)]
pub struct MappingPairRegistry {
    pairs: Vec<MappingPair>,
}

impl MappingPairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (source, target), or return the pair already registered for it.
    pub fn create_map(&mut self, source: &str, target: &str) -> &mut MappingPair {
        let idx = match self.position(source, target) {
            Some(i) => i,
            None => {
                self.pairs.push(MappingPair {
                    source: source.to_string(),
                    target: target.to_string(),
                    overrides: Vec::new(),
                });
                self.pairs.len() - 1
            }
        };
        &mut self.pairs[idx]
    }

    pub fn add_profile(&mut self, profile: &dyn MappingProfile) -> &mut Self {
        profile.configure(self);
        self
    }

    fn position(&self, source: &str, target: &str) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.source == source && p.target == target)
    }

    pub fn find(&self, source: &str, target: &str) -> Option<&MappingPair> {
        self.position(source, target).map(|i| &self.pairs[i])
    }

    /// First pair targeting `target`, by registration order.
    pub fn find_by_target(&self, target: &str) -> Option<&MappingPair> {
        self.pairs.iter().find(|p| p.target == target)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &MappingPair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Boot-time check: both classes of every pair are registered, and every composite
    /// property that would recurse into a different class has a pair to recurse with.
    pub fn validate(&self, metadata: &MetadataRegistry) -> Result<(), MappingError> {
        let mut problems = Vec::new();
        for pair in &self.pairs {
            let (Some(source), Some(target)) =
                (metadata.context(&pair.source), metadata.context(&pair.target))
            else {
                for class in [&pair.source, &pair.target] {
                    if !metadata.contains(class) {
                        problems.push(format!("class '{}' is not registered", class));
                    }
                }
                continue;
            };
            for sp in source.relations() {
                let Some(tp) = target.property(&sp.name) else { continue };
                if sp.declared_type == tp.declared_type {
                    continue;
                }
                if !metadata.contains(&sp.declared_type) || !metadata.contains(&tp.declared_type) {
                    continue;
                }
                if self.find(&sp.declared_type, &tp.declared_type).is_none() {
                    problems.push(format!(
                        "{}.{} needs a mapping from '{}' to '{}'",
                        pair.source, sp.name, sp.declared_type, tp.declared_type
                    ));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(MappingError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ClassDef, PropertyDef};

    fn metadata() -> MetadataRegistry {
        let mut reg = MetadataRegistry::new();
        reg.register_classes(&[
            ClassDef {
                name: "Line",
                identity: Some("id"),
                properties: const { &[PropertyDef::scalar("id", "number")] },
            },
            ClassDef {
                name: "LineDto",
                identity: None,
                properties: const { &[PropertyDef::scalar("id", "number")] },
            },
            ClassDef {
                name: "Order",
                identity: Some("id"),
                properties: const { &[PropertyDef::collection("lines", "Line")] },
            },
            ClassDef {
                name: "OrderDto",
                identity: None,
                properties: const { &[PropertyDef::collection("lines", "LineDto")] },
            },
        ]);
        reg
    }

    #[test]
    fn create_map_never_duplicates() {
        let mut pairs = MappingPairRegistry::new();
        pairs.create_map("Order", "OrderDto");
        pairs
            .create_map("Order", "OrderDto")
            .for_member("status", |_| FieldValue::from("x"));
        assert_eq!(pairs.len(), 1);
        let pair = pairs.find("Order", "OrderDto").expect("registered");
        assert_eq!(pair.overrides().count(), 1);
    }

    #[test]
    fn find_by_target_takes_first_registration() {
        let mut pairs = MappingPairRegistry::new();
        pairs.create_map("Order", "OrderDto");
        pairs.create_map("Draft", "OrderDto");
        assert_eq!(pairs.find_by_target("OrderDto").map(|p| p.source()), Some("Order"));
        assert!(pairs.find("OrderDto", "Order").is_none());
    }

    #[test]
    fn for_member_replaces_in_place() {
        let mut pairs = MappingPairRegistry::new();
        pairs
            .create_map("A", "B")
            .for_member("x", |_| FieldValue::from(1))
            .for_member("y", |_| FieldValue::from(2))
            .for_member("x", |_| FieldValue::from(3));
        let pair = pairs.find("A", "B").expect("registered");
        let names: Vec<_> = pair.overrides().map(|(n, _)| n).collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn validate_reports_missing_nested_pairs() {
        let reg = metadata();
        let mut pairs = MappingPairRegistry::new();
        pairs.create_map("Order", "OrderDto");
        pairs.create_map("Order", "Ghost");

        let err = pairs.validate(&reg).unwrap_err();
        let MappingError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("from 'Line' to 'LineDto'"));
        assert!(problems[1].contains("'Ghost'"));

        pairs.create_map("Line", "LineDto");
        pairs.pairs.retain(|p| p.target != "Ghost");
        assert!(pairs.validate(&reg).is_ok());
    }

    struct OrderProfile;

    impl MappingProfile for OrderProfile {
        fn configure(&self, pairs: &mut MappingPairRegistry) {
            pairs.create_map("Order", "OrderDto");
            pairs.create_map("Line", "LineDto");
        }
    }

    #[test]
    fn profiles_register_their_pairs() {
        let mut pairs = MappingPairRegistry::new();
        pairs.add_profile(&OrderProfile);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.validate(&metadata()).is_ok());
    }
}
