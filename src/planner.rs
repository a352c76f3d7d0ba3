//! Decides how deep a read eagerly loads relations.

use crate::error::PlanError;
use crate::metadata::{CompositionKind, MetadataRegistry};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which relations to fetch with a row. `Shallow` fetches the relation itself but nothing
/// beneath it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncludeDirective {
    Shallow,
    Nested(BTreeMap<String, IncludeDirective>),
}

impl IncludeDirective {
    pub fn get(&self, relation: &str) -> Option<&IncludeDirective> {
        match self {
            IncludeDirective::Shallow => None,
            IncludeDirective::Nested(m) => m.get(relation),
        }
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &IncludeDirective)> {
        let map = match self {
            IncludeDirective::Nested(m) => Some(m),
            IncludeDirective::Shallow => None,
        };
        map.into_iter().flatten().map(|(k, v)| (k.as_str(), v))
    }

    /// Levels of nested directives; `Shallow` is 0.
    pub fn depth(&self) -> usize {
        match self {
            IncludeDirective::Shallow => 0,
            IncludeDirective::Nested(m) => 1 + m.values().map(IncludeDirective::depth).max().unwrap_or(0),
        }
    }

    /// `true` for `Shallow`, otherwise the relation map with nested levels wrapped as
    /// `{"include": {...}}`.
    pub fn to_json(&self) -> Value {
        match self {
            IncludeDirective::Shallow => Value::Bool(true),
            IncludeDirective::Nested(m) => {
                let mut out = Map::new();
                for (k, v) in m {
                    let rendered = match v {
                        IncludeDirective::Shallow => Value::Bool(true),
                        nested => serde_json::json!({ "include": nested.to_json() }),
                    };
                    out.insert(k.clone(), rendered);
                }
                Value::Object(out)
            }
        }
    }
}

impl Serialize for IncludeDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

pub struct RelationPlanner<'a> {
    metadata: &'a MetadataRegistry,
}

impl<'a> RelationPlanner<'a> {
    pub fn new(metadata: &'a MetadataRegistry) -> Self {
        RelationPlanner { metadata }
    }

    /// Plan the includes for a read of `class`.
    ///
    /// `list_mode` caps every collection relation at one level regardless of `deep_limit`.
    pub fn plan(&self, class: &str, deep_limit: usize, list_mode: bool) -> Result<IncludeDirective, PlanError> {
        if !self.metadata.contains(class) {
            return Err(PlanError::UnknownClass(class.to_string()));
        }
        let directive = self.plan_at(class, deep_limit, 0, list_mode);
        tracing::debug!(class, deep_limit, list_mode, depth = directive.depth(), "planned includes");
        Ok(directive)
    }

    /// One level of planning. `deep_count` grows by exactly one on every edge, so cyclic
    /// class graphs stop at `deep_limit`.
    pub fn plan_at(&self, class: &str, deep_limit: usize, deep_count: usize, list_mode: bool) -> IncludeDirective {
        if deep_count >= deep_limit {
            return IncludeDirective::Shallow;
        }
        let Some(ctx) = self.metadata.context(class) else {
            return IncludeDirective::Shallow;
        };
        let next = deep_count + 1;

        let mut relations = BTreeMap::new();
        for p in ctx.relations() {
            let directive = match p.composition {
                CompositionKind::Collection if list_mode => IncludeDirective::Shallow,
                CompositionKind::Collection => self.plan_at(&p.declared_type, deep_limit, next, list_mode),
                CompositionKind::NestedEntity => match self.metadata.class_by_type_name(&p.declared_type) {
                    Some(nested) => self.plan_at(&nested.class, deep_limit, next, list_mode),
                    None => IncludeDirective::Shallow,
                },
                CompositionKind::None => continue,
            };
            let directive = match directive {
                IncludeDirective::Nested(m) if m.is_empty() => IncludeDirective::Shallow,
                other => other,
            };
            relations.insert(p.name.clone(), directive);
        }
        IncludeDirective::Nested(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ClassDef, PropertyDef};
    use serde_json::json;

    fn registry(defs: &[ClassDef]) -> MetadataRegistry {
        let mut reg = MetadataRegistry::new();
        reg.register_classes(defs);
        reg
    }

    const A_WITH_BS: &[ClassDef] = &[
        ClassDef {
            name: "A",
            identity: Some("id"),
            properties: &[PropertyDef::scalar("id", "number"), PropertyDef::collection("bs", "B")],
        },
        ClassDef {
            name: "B",
            identity: Some("id"),
            properties: &[PropertyDef::scalar("id", "number"), PropertyDef::entity("c", "C")],
        },
        ClassDef {
            name: "C",
            identity: Some("id"),
            properties: &[PropertyDef::scalar("id", "number")],
        },
    ];

    const CYCLE: &[ClassDef] = &[
        ClassDef {
            name: "A",
            identity: Some("id"),
            properties: &[PropertyDef::collection("bs", "B")],
        },
        ClassDef {
            name: "B",
            identity: Some("id"),
            properties: &[PropertyDef::entity("a", "A")],
        },
    ];

    #[test]
    fn depth_limit_one_keeps_collections_shallow() {
        let reg = registry(A_WITH_BS);
        let plan = RelationPlanner::new(&reg).plan("A", 1, false).expect("plan");
        assert_eq!(plan.get("bs"), Some(&IncludeDirective::Shallow));
        assert_eq!(plan.to_json(), json!({"bs": true}));
    }

    #[test]
    fn recurses_until_leaves() {
        let reg = registry(A_WITH_BS);
        let plan = RelationPlanner::new(&reg).plan("A", 10, false).expect("plan");
        assert_eq!(plan.to_json(), json!({"bs": {"include": {"c": true}}}));
        assert_eq!(plan.depth(), 2);
    }

    #[test]
    fn zero_limit_is_shallow() {
        let reg = registry(A_WITH_BS);
        let plan = RelationPlanner::new(&reg).plan("A", 0, false).expect("plan");
        assert_eq!(plan, IncludeDirective::Shallow);
    }

    #[test]
    fn cyclic_graph_terminates_within_limit() {
        let reg = registry(CYCLE);
        let planner = RelationPlanner::new(&reg);
        for limit in 1..=6 {
            let plan = planner.plan("A", limit, false).expect("plan");
            assert_eq!(plan.depth(), limit);
        }
    }

    #[test]
    fn list_mode_caps_collections_at_one_level() {
        let reg = registry(A_WITH_BS);
        let plan = RelationPlanner::new(&reg).plan("A", 10, true).expect("plan");
        assert_eq!(plan.to_json(), json!({"bs": true}));

        let plan = RelationPlanner::new(&reg).plan("B", 10, true).expect("plan");
        assert_eq!(plan.to_json(), json!({"c": true}));
    }

    #[test]
    fn leaf_class_yields_empty_plan() {
        let reg = registry(A_WITH_BS);
        let plan = RelationPlanner::new(&reg).plan("C", 3, false).expect("plan");
        assert_eq!(plan, IncludeDirective::Nested(BTreeMap::new()));
    }

    #[test]
    fn unknown_root_is_an_error() {
        let reg = registry(A_WITH_BS);
        assert_eq!(
            RelationPlanner::new(&reg).plan("Z", 3, false),
            Err(PlanError::UnknownClass("Z".into()))
        );
    }

    #[test]
    fn unresolvable_nested_type_is_shallow() {
        let reg = registry(&[ClassDef {
            name: "A",
            identity: Some("id"),
            properties: const { &[PropertyDef::entity("ghost", "Ghost")] },
        }]);
        let plan = RelationPlanner::new(&reg).plan("A", 3, false).expect("plan");
        assert_eq!(plan.to_json(), json!({"ghost": true}));
    }
}
