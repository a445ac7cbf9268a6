//! Field Model
//!
//! Declared fields, their access modes and the live value store carried by
//! every runtime node.
//!
//! - [`FieldDecl`]: name, data type, access mode and optional default
//! - [`FieldValue`]: tagged value, vector types backed by `glam`
//! - [`FieldStore`]: the per-node store read and written by the event layer

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::NodeHandle;
use crate::errors::{Result, SceneError};
use crate::interner::{self, Symbol};

/// Data type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    SFBool,
    SFInt32,
    SFFloat,
    SFDouble,
    SFString,
    SFVec3f,
    SFRotation,
    SFColor,
    MFInt32,
    MFFloat,
    MFString,
    MFVec3f,
    SFNode,
    MFNode,
}

impl FieldType {
    /// Node-typed fields describe sub-graphs rather than scalar values.
    #[inline]
    #[must_use]
    pub fn is_node(self) -> bool {
        matches!(self, FieldType::SFNode | FieldType::MFNode)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FieldType::SFBool => "SFBool",
            FieldType::SFInt32 => "SFInt32",
            FieldType::SFFloat => "SFFloat",
            FieldType::SFDouble => "SFDouble",
            FieldType::SFString => "SFString",
            FieldType::SFVec3f => "SFVec3f",
            FieldType::SFRotation => "SFRotation",
            FieldType::SFColor => "SFColor",
            FieldType::MFInt32 => "MFInt32",
            FieldType::MFFloat => "MFFloat",
            FieldType::MFString => "MFString",
            FieldType::MFVec3f => "MFVec3f",
            FieldType::SFNode => "SFNode",
            FieldType::MFNode => "MFNode",
        }
    }

    /// The value a field of this type holds before anything is assigned.
    #[must_use]
    pub fn default_value(self) -> FieldValue {
        match self {
            FieldType::SFBool => FieldValue::Bool(false),
            FieldType::SFInt32 => FieldValue::Int32(0),
            FieldType::SFFloat => FieldValue::Float(0.0),
            FieldType::SFDouble => FieldValue::Double(0.0),
            FieldType::SFString => FieldValue::String(String::new()),
            FieldType::SFVec3f => FieldValue::Vec3f(Vec3::ZERO),
            FieldType::SFRotation => FieldValue::Rotation(Vec4::new(0.0, 0.0, 1.0, 0.0)),
            FieldType::SFColor => FieldValue::Color(Vec3::ZERO),
            FieldType::MFInt32 => FieldValue::Int32Array(Vec::new()),
            FieldType::MFFloat => FieldValue::FloatArray(Vec::new()),
            FieldType::MFString => FieldValue::StringArray(Vec::new()),
            FieldType::MFVec3f => FieldValue::Vec3fArray(Vec::new()),
            FieldType::SFNode => FieldValue::Node(None),
            FieldType::MFNode => FieldValue::Nodes(Vec::new()),
        }
    }
}

/// Access mode of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    InputOnly,
    OutputOnly,
    InputOutput,
    InitializeOnly,
}

impl AccessType {
    /// Whether a value recorded on a template reference is carried onto the
    /// built instance.
    #[inline]
    #[must_use]
    pub fn is_copied_down(self) -> bool {
        matches!(self, AccessType::InitializeOnly | AccessType::InputOutput)
    }

    /// Writable while the node is still being set up.
    #[inline]
    #[must_use]
    pub fn writable_in_setup(self) -> bool {
        matches!(self, AccessType::InitializeOnly | AccessType::InputOutput)
    }

    /// Writable once construction is complete.
    #[inline]
    #[must_use]
    pub fn writable_live(self) -> bool {
        matches!(self, AccessType::InputOnly | AccessType::InputOutput)
    }
}

/// A tagged field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int32(i32),
    Float(f32),
    Double(f64),
    String(String),
    Vec3f(Vec3),
    /// Axis (xyz) and angle in radians (w).
    Rotation(Vec4),
    Color(Vec3),
    Int32Array(Vec<i32>),
    FloatArray(Vec<f32>),
    StringArray(Vec<String>),
    Vec3fArray(Vec<Vec3>),
    Node(Option<NodeHandle>),
    Nodes(Vec<NodeHandle>),
}

impl FieldValue {
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::SFBool,
            FieldValue::Int32(_) => FieldType::SFInt32,
            FieldValue::Float(_) => FieldType::SFFloat,
            FieldValue::Double(_) => FieldType::SFDouble,
            FieldValue::String(_) => FieldType::SFString,
            FieldValue::Vec3f(_) => FieldType::SFVec3f,
            FieldValue::Rotation(_) => FieldType::SFRotation,
            FieldValue::Color(_) => FieldType::SFColor,
            FieldValue::Int32Array(_) => FieldType::MFInt32,
            FieldValue::FloatArray(_) => FieldType::MFFloat,
            FieldValue::StringArray(_) => FieldType::MFString,
            FieldValue::Vec3fArray(_) => FieldType::MFVec3f,
            FieldValue::Node(_) => FieldType::SFNode,
            FieldValue::Nodes(_) => FieldType::MFNode,
        }
    }

    /// Converts the value to `target`, widening integers and floats.
    /// Returns `None` when the types are incompatible.
    #[must_use]
    pub fn conform(self, target: FieldType) -> Option<FieldValue> {
        if self.field_type() == target {
            return Some(self);
        }
        match (self, target) {
            (FieldValue::Int32(i), FieldType::SFFloat) => Some(FieldValue::Float(i as f32)),
            (FieldValue::Int32(i), FieldType::SFDouble) => Some(FieldValue::Double(f64::from(i))),
            (FieldValue::Float(f), FieldType::SFDouble) => Some(FieldValue::Double(f64::from(f))),
            (FieldValue::Int32Array(v), FieldType::MFFloat) => {
                Some(FieldValue::FloatArray(v.into_iter().map(|i| i as f32).collect()))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            FieldValue::Int32(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            FieldValue::Vec3f(v) | FieldValue::Color(v) => Some(*v),
            _ => None,
        }
    }
}

/// Declaration of a single field: name, type, access mode and default.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: FieldType,
    pub access: AccessType,
    pub default: Option<FieldValue>,
}

impl FieldDecl {
    #[must_use]
    pub fn new(name: &str, field_type: FieldType, access: AccessType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            access,
            default: None,
        }
    }

    /// Sets the declared default. The value is conformed to the field type;
    /// an incompatible default is ignored.
    #[must_use]
    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = value.conform(self.field_type);
        self
    }

    fn initial_value(&self) -> FieldValue {
        self.default
            .clone()
            .unwrap_or_else(|| self.field_type.default_value())
    }
}

/// Live field values of one runtime node.
///
/// Values are indexed in declaration order. The store never changes shape
/// after creation: unknown names are rejected rather than appended.
#[derive(Debug, Clone)]
pub struct FieldStore {
    type_name: Symbol,
    decls: Arc<[FieldDecl]>,
    values: Vec<FieldValue>,
}

impl FieldStore {
    #[must_use]
    pub fn new(type_name: Symbol, decls: Arc<[FieldDecl]>) -> Self {
        let values = decls.iter().map(FieldDecl::initial_value).collect();
        Self {
            type_name,
            decls,
            values,
        }
    }

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        interner::resolve(self.type_name)
    }

    #[inline]
    #[must_use]
    pub fn decls(&self) -> &[FieldDecl] {
        &self.decls
    }

    #[must_use]
    pub fn decl(&self, name: &str) -> Option<&FieldDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.decls.iter().position(|d| d.name == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.index_of(name).map(|i| &self.values[i])
    }

    /// Setup-time assignment (from a template or before construction completes).
    /// Accepts initialize-only and input-output fields.
    pub fn assign(&mut self, name: &str, value: FieldValue) -> Result<()> {
        self.write(name, value, AccessType::writable_in_setup)
    }

    /// Live assignment from the event layer. Accepts input-only and
    /// input-output fields.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        self.write(name, value, AccessType::writable_live)
    }

    /// Assignment that only checks name and type. Used by the scene for
    /// fields it maintains itself (e.g. selector state).
    pub fn set_internal(&mut self, name: &str, value: FieldValue) -> Result<()> {
        self.write(name, value, |_| true)
    }

    fn write(
        &mut self,
        name: &str,
        value: FieldValue,
        allowed: impl Fn(AccessType) -> bool,
    ) -> Result<()> {
        let Some(index) = self.index_of(name) else {
            return Err(SceneError::unknown_field(self.type_name(), name));
        };
        let decl = &self.decls[index];
        if !allowed(decl.access) {
            return Err(SceneError::FieldAccess {
                node_type: self.type_name().to_string(),
                field: name.to_string(),
                access: decl.access,
            });
        }
        let found = value.field_type();
        let Some(value) = value.conform(decl.field_type) else {
            return Err(SceneError::type_mismatch(
                self.type_name(),
                name,
                decl.field_type,
                found,
            ));
        };
        self.values[index] = value;
        Ok(())
    }

    /// Every node handle held by a node-typed field, in declaration order.
    #[must_use]
    pub fn referenced_nodes(&self) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        for value in &self.values {
            match value {
                FieldValue::Node(Some(h)) => out.push(*h),
                FieldValue::Nodes(list) => out.extend(list.iter().copied()),
                _ => {}
            }
        }
        out
    }

    /// Name of the first node-typed field that references `handle`.
    #[must_use]
    pub fn field_referencing(&self, handle: NodeHandle) -> Option<&str> {
        self.values
            .iter()
            .position(|v| match v {
                FieldValue::Node(Some(h)) => *h == handle,
                FieldValue::Nodes(list) => list.contains(&handle),
                _ => false,
            })
            .map(|i| self.decls[i].name.as_str())
    }

    /// Swaps one reference to `old` in `field` for `new`.
    pub fn replace_node_ref(&mut self, field: &str, old: NodeHandle, new: NodeHandle) -> bool {
        let Some(index) = self.index_of(field) else {
            return false;
        };
        match &mut self.values[index] {
            FieldValue::Node(slot) if *slot == Some(old) => {
                *slot = Some(new);
                true
            }
            FieldValue::Nodes(list) => match list.iter_mut().find(|h| **h == old) {
                Some(h) => {
                    *h = new;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Drops every reference to `handle`; returns how many were removed.
    pub fn drop_node_ref(&mut self, handle: NodeHandle) -> usize {
        let mut removed = 0;
        for value in &mut self.values {
            match value {
                FieldValue::Node(slot) if *slot == Some(handle) => {
                    *slot = None;
                    removed += 1;
                }
                FieldValue::Nodes(list) => {
                    let before = list.len();
                    list.retain(|h| *h != handle);
                    removed += before - list.len();
                }
                _ => {}
            }
        }
        removed
    }
}
