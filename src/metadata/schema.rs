//! Statically authored class tables. Consumers declare one `ClassDef` per class as a
//! `const` and hand them to `MetadataRegistry::register_class` at boot.

use super::{CompositionAction, CompositionKind};

#[derive(Clone, Copy, Debug)]
pub struct PropertyDef {
    pub name: &'static str,
    pub declared_type: &'static str,
    pub composition: CompositionKind,
    pub action: CompositionAction,
}

impl PropertyDef {
    pub const fn scalar(name: &'static str, declared_type: &'static str) -> Self {
        PropertyDef {
            name,
            declared_type,
            composition: CompositionKind::None,
            action: CompositionAction::ReplaceAll,
        }
    }

    pub const fn entity(name: &'static str, class: &'static str) -> Self {
        PropertyDef {
            name,
            declared_type: class,
            composition: CompositionKind::NestedEntity,
            action: CompositionAction::ReplaceAll,
        }
    }

    pub const fn collection(name: &'static str, element_class: &'static str) -> Self {
        PropertyDef {
            name,
            declared_type: element_class,
            composition: CompositionKind::Collection,
            action: CompositionAction::ReplaceAll,
        }
    }

    pub const fn collection_merge(name: &'static str, element_class: &'static str) -> Self {
        PropertyDef {
            name,
            declared_type: element_class,
            composition: CompositionKind::Collection,
            action: CompositionAction::MergeAdd,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ClassDef {
    pub name: &'static str,
    pub identity: Option<&'static str>,
    pub properties: &'static [PropertyDef],
}
