//! Node Factory
//!
//! Maps interned type names to [`NodeTypeInfo`] registrations and produces
//! [`RuntimeNode`]s in the `Setup` state. The factory does not know about
//! scenes: the scene inserts the node into its arena and gives it a
//! renderer-side mirror.

use std::sync::Arc;

use glam::Vec3;
use rustc_hash::FxHashMap;

use trellis_core::errors::{Result, SceneError};
use trellis_core::field::{AccessType, FieldDecl, FieldStore, FieldType, FieldValue};
use trellis_core::interner::{self, Symbol};
use trellis_core::Template;

use crate::config::Profile;
use crate::node::{Construction, NodeRole, RuntimeNode};

/// Registration of one node type.
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    pub name: Symbol,
    pub role: NodeRole,
    pub fields: Arc<[FieldDecl]>,
    pub min_profile: Profile,
}

/// Registry-backed constructor of runtime nodes.
#[derive(Debug, Clone)]
pub struct NodeFactory {
    profile: Profile,
    types: FxHashMap<Symbol, NodeTypeInfo>,
}

impl NodeFactory {
    /// An empty factory. Only template instances can be created from it.
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            types: FxHashMap::default(),
        }
    }

    /// A factory with the built-in grouping, shape and metadata types.
    #[must_use]
    pub fn with_builtins(profile: Profile) -> Self {
        interner::preload_builtin_types();
        let mut factory = Self::new(profile);
        for (name, role, fields, min_profile) in builtin_types() {
            factory.insert(name, role, fields, min_profile);
        }
        factory
    }

    #[inline]
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Registers (or replaces) a node type. `Root` is reserved for the scene.
    pub fn register(
        &mut self,
        name: &str,
        role: NodeRole,
        fields: Vec<FieldDecl>,
        min_profile: Profile,
    ) -> Result<()> {
        if role == NodeRole::Root || name == "Root" {
            return Err(SceneError::InvalidUse(
                "the root node type cannot be registered".to_string(),
            ));
        }
        if self.insert(name, role, fields, min_profile) {
            log::debug!("Node type {name} re-registered");
        }
        Ok(())
    }

    fn insert(
        &mut self,
        name: &str,
        role: NodeRole,
        fields: Vec<FieldDecl>,
        min_profile: Profile,
    ) -> bool {
        let sym = interner::intern(name);
        let info = NodeTypeInfo {
            name: sym,
            role,
            fields: Arc::from(fields),
            min_profile,
        };
        self.types.insert(sym, info).is_some()
    }

    /// Registration of `name` regardless of the active profile.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&NodeTypeInfo> {
        let sym = interner::get(name)?;
        self.types.get(&sym)
    }

    /// Whether `name` can be created under the active profile.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.lookup(name)
            .is_some_and(|info| info.min_profile <= self.profile)
    }

    /// Creates a node of type `name` in the `Setup` state.
    pub fn create(&self, name: &str) -> Result<RuntimeNode> {
        if name == "Root" {
            return Err(SceneError::InvalidUse(
                "the root node is created by the scene".to_string(),
            ));
        }
        let info = self
            .lookup(name)
            .filter(|info| info.min_profile <= self.profile)
            .ok_or_else(|| SceneError::UnknownType {
                type_name: name.to_string(),
            })?;

        let fields = FieldStore::new(info.name, Arc::clone(&info.fields));
        Ok(RuntimeNode::new(info.name, info.role, fields))
    }

    /// Container node for an instance of `template`; its fields are the
    /// template's declared fields.
    pub(crate) fn instance(&self, template: &Arc<Template>) -> RuntimeNode {
        let sym = interner::intern(template.name());
        let fields = FieldStore::new(sym, Arc::clone(template.fields()));
        let mut node = RuntimeNode::new(sym, NodeRole::Group, fields);
        node.template = Some(Arc::clone(template));
        node
    }

    /// Stand-in for an instance of an external template that has not resolved.
    pub(crate) fn placeholder(&self, template: &Arc<Template>) -> RuntimeNode {
        let mut node = self.instance(template);
        node.construction = Construction::Placeholder;
        node
    }

    pub(crate) fn root(&self) -> RuntimeNode {
        let sym = interner::intern("Root");
        RuntimeNode::new(sym, NodeRole::Root, FieldStore::new(sym, Arc::from(Vec::new())))
    }
}

type Registration = (&'static str, NodeRole, Vec<FieldDecl>, Profile);

fn bbox_fields() -> Vec<FieldDecl> {
    vec![
        FieldDecl::new("bboxCenter", FieldType::SFVec3f, AccessType::InitializeOnly),
        FieldDecl::new("bboxSize", FieldType::SFVec3f, AccessType::InitializeOnly)
            .with_default(FieldValue::Vec3f(Vec3::splat(-1.0))),
    ]
}

fn builtin_types() -> Vec<Registration> {
    use AccessType::{InitializeOnly, InputOutput};

    let grouped = |extra: Vec<FieldDecl>| {
        let mut fields = extra;
        fields.extend(bbox_fields());
        fields
    };

    vec![
        ("Group", NodeRole::Group, grouped(Vec::new()), Profile::Core),
        (
            "Transform",
            NodeRole::Transform,
            grouped(vec![
                FieldDecl::new("translation", FieldType::SFVec3f, InputOutput),
                FieldDecl::new("rotation", FieldType::SFRotation, InputOutput),
                FieldDecl::new("scale", FieldType::SFVec3f, InputOutput)
                    .with_default(FieldValue::Vec3f(Vec3::ONE)),
                FieldDecl::new("center", FieldType::SFVec3f, InputOutput),
            ]),
            Profile::Core,
        ),
        (
            "Switch",
            NodeRole::Switch,
            grouped(vec![
                FieldDecl::new("whichChoice", FieldType::SFInt32, InputOutput)
                    .with_default(FieldValue::Int32(-1)),
            ]),
            Profile::Core,
        ),
        (
            "WorldInfo",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("title", FieldType::SFString, InitializeOnly),
                FieldDecl::new("info", FieldType::MFString, InitializeOnly),
            ],
            Profile::Core,
        ),
        (
            "Shape",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("appearance", FieldType::SFNode, InputOutput),
                FieldDecl::new("geometry", FieldType::SFNode, InputOutput),
            ],
            Profile::Interchange,
        ),
        (
            "Box",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("size", FieldType::SFVec3f, InitializeOnly)
                    .with_default(FieldValue::Vec3f(Vec3::splat(2.0))),
            ],
            Profile::Interchange,
        ),
        (
            "Sphere",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("radius", FieldType::SFFloat, InitializeOnly)
                    .with_default(FieldValue::Float(1.0)),
            ],
            Profile::Interchange,
        ),
        (
            "Cone",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("bottomRadius", FieldType::SFFloat, InitializeOnly)
                    .with_default(FieldValue::Float(1.0)),
                FieldDecl::new("height", FieldType::SFFloat, InitializeOnly)
                    .with_default(FieldValue::Float(2.0)),
                FieldDecl::new("side", FieldType::SFBool, InitializeOnly)
                    .with_default(FieldValue::Bool(true)),
                FieldDecl::new("bottom", FieldType::SFBool, InitializeOnly)
                    .with_default(FieldValue::Bool(true)),
            ],
            Profile::Interchange,
        ),
        (
            "Appearance",
            NodeRole::Leaf,
            vec![FieldDecl::new("material", FieldType::SFNode, InputOutput)],
            Profile::Interchange,
        ),
        (
            "Material",
            NodeRole::Leaf,
            vec![
                FieldDecl::new("diffuseColor", FieldType::SFColor, InputOutput)
                    .with_default(FieldValue::Color(Vec3::splat(0.8))),
                FieldDecl::new("emissiveColor", FieldType::SFColor, InputOutput),
                FieldDecl::new("shininess", FieldType::SFFloat, InputOutput)
                    .with_default(FieldValue::Float(0.2)),
                FieldDecl::new("transparency", FieldType::SFFloat, InputOutput),
            ],
            Profile::Interchange,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Capabilities;

    #[test]
    fn test_create_builtin() {
        let factory = NodeFactory::with_builtins(Profile::Interchange);
        let node = factory.create("Switch").unwrap();

        assert_eq!(node.type_name(), "Switch");
        assert!(node.capabilities().contains(Capabilities::SELECTOR));
        assert_eq!(node.construction(), Construction::Setup);
        assert_eq!(node.fields().get("whichChoice"), Some(&FieldValue::Int32(-1)));
    }

    #[test]
    fn test_unknown_type() {
        let factory = NodeFactory::with_builtins(Profile::Immersive);
        assert!(matches!(
            factory.create("Teapot"),
            Err(SceneError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_profile_gates_types() {
        let factory = NodeFactory::with_builtins(Profile::Core);
        assert!(factory.create("Group").is_ok());
        assert!(factory.lookup("Box").is_some());
        assert!(!factory.supports("Box"));
        assert!(matches!(
            factory.create("Box"),
            Err(SceneError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_root_is_reserved() {
        let mut factory = NodeFactory::with_builtins(Profile::Interchange);
        assert!(matches!(factory.create("Root"), Err(SceneError::InvalidUse(_))));
        assert!(
            factory
                .register("Root", NodeRole::Group, Vec::new(), Profile::Core)
                .is_err()
        );
    }

    #[test]
    fn test_register_custom_type() {
        let mut factory = NodeFactory::new(Profile::Core);
        factory
            .register(
                "Billboard",
                NodeRole::Group,
                vec![FieldDecl::new("axisOfRotation", FieldType::SFVec3f, AccessType::InputOutput)],
                Profile::Core,
            )
            .unwrap();

        let node = factory.create("Billboard").unwrap();
        assert!(node.role().is_container());
        assert!(node.fields().decl("axisOfRotation").is_some());
    }
}
