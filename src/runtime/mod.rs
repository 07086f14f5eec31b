//! Contracts the profiler needs from the host VM: shapes, functions,
//! decoded bytecode, feedback slots and GC visitation.
//!
//! Every heap object is named by an opaque handle. Handles are not stable
//! across a moving GC; the host reports moves through [`WeakVisitor`].

mod bytecode;
mod feedback;
#[cfg(test)]
pub(crate) mod sim;

pub use bytecode::*;
pub use feedback::*;

use serde::Serialize;

use crate::FieldDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShapeHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackHandle(pub u64);

/// Where a typed array keeps its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnHeapMode {
    None,
    OnHeap,
    NotOnHeap,
}

impl OnHeapMode {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::OnHeap => 1,
            Self::NotOnHeap => 2,
        }
    }
}

/// What the host knows about a shape that belongs to a builtin object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinShape {
    /// The canonical instance shape of an array with this elements kind.
    Array { js_type: u8, elements_kind: u8 },
    /// A typed array shape; `root` is set only for the canonical root shape
    /// of its element type and storage mode.
    TypedArray {
        js_type: u8,
        on_heap: bool,
        root: bool,
    },
    /// Any other builtin instance with its canonical shape.
    Object { js_type: u8 },
}

/// Shape graph queries. Parent links follow field-add transitions.
pub trait ShapeModel {
    fn parent(&self, shape: ShapeHandle) -> Option<ShapeHandle>;

    /// Shape of the object this shape's instances delegate to.
    fn proto_shape(&self, shape: ShapeHandle) -> Option<ShapeHandle>;

    /// Own fields in insertion order.
    fn layout(&self, shape: ShapeHandle) -> Vec<FieldDesc>;

    fn is_dictionary(&self, shape: ShapeHandle) -> bool;

    /// Composite shapes merge several layouts and are never profiled.
    fn is_composite(&self, shape: ShapeHandle) -> bool {
        let _ = shape;
        false
    }

    fn builtin(&self, shape: ShapeHandle) -> Option<BuiltinShape>;

    /// Global-env slot index when `shape` is a well-known global shape.
    fn global_slot(&self, shape: ShapeHandle) -> Option<u32>;

    /// The original root a proto-transitioned shape was derived from.
    fn fake_parent(&self, shape: ShapeHandle) -> Option<ShapeHandle>;

    /// Links `shape` to `parent` unless `shape` already has a fake parent.
    fn try_insert_fake_parent(&self, shape: ShapeHandle, parent: ShapeHandle) -> bool;

    /// Walks parent links to the structural root.
    fn root_of(&self, shape: ShapeHandle) -> ShapeHandle {
        let mut current = shape;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Root of the prototype lineage of `root`.
    fn proto_root_of(&self, root: ShapeHandle) -> Option<ShapeHandle> {
        self.proto_shape(root).map(|proto| self.root_of(proto))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionKind {
    #[default]
    Normal,
    BaseConstructor,
    ClassConstructor,
    DerivedConstructor,
}

impl FunctionKind {
    pub fn is_class_constructor(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// A snapshot of one live function as the profiler needs it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionInfo {
    pub method_id: u32,
    pub method_name: String,
    /// Desc of the compiled unit this method lives in.
    pub abc_desc: String,
    pub abc_checksum: u32,
    /// Empty when the function belongs to no record.
    pub record_name: String,
    pub bytecode_checksum: Option<u32>,
    pub kind: FunctionKind,
    pub is_native: bool,
    /// Sendable and concurrent functions are never profiled.
    pub is_shared: bool,
    pub has_profile_info: bool,
    /// Shape of the function object itself.
    pub own_shape: Option<ShapeHandle>,
    /// Shape given to instances created by `new`.
    pub instance_shape: Option<ShapeHandle>,
    /// Shape of the `prototype` object.
    pub prototype_shape: Option<ShapeHandle>,
    /// Instance shape created when `prototype` was first replaced.
    pub proto_trans_root: Option<ShapeHandle>,
}

/// How a record resolves inside its compiled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLookup {
    ClassId(u32),
    /// The unit is a bundle; every record shares one id.
    Bundle,
    Missing,
}

/// Everything the profiler asks of the host VM.
pub trait HostRuntime: ShapeModel + Send + Sync {
    fn function(&self, func: FunctionHandle) -> Option<FunctionInfo>;

    fn bytecode(&self, func: FunctionHandle) -> Vec<Instruction>;

    fn feedback(&self, func: FunctionHandle, slot: u32) -> FeedbackValue;

    fn record_id(&self, abc_desc: &str, record_name: &str) -> RecordLookup;

    /// Creates and stores the proto-transition root of `func`, an instance
    /// shape whose prototype has `old_proto` as shape.
    fn create_proto_trans_root(&self, func: FunctionHandle, old_proto: ShapeHandle) -> Option<ShapeHandle>;

    /// Whether the prototype chain of `shape` defines its own
    /// `@@hasInstance` ahead of `Function.prototype`.
    fn has_custom_has_instance(&self, shape: ShapeHandle) -> bool;

    fn track_info(&self, track: TrackHandle) -> Option<TrackInfo>;

    fn set_track_info(&self, track: TrackHandle, info: TrackInfo);

    /// Marks the function's feedback as pre-dumped for this period.
    /// Returns `false` when it already was.
    fn mark_pre_dumped(&self, func: FunctionHandle) -> bool;
}

/// Result of asking the GC about one weakly held object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness<T> {
    Alive,
    Moved(T),
    Dead,
}

/// Sweep-phase callback used by [`crate::PgoProfiler::process_weak_references`].
pub trait WeakVisitor {
    fn visit_function(&self, func: FunctionHandle) -> Liveness<FunctionHandle>;

    fn visit_shape(&self, shape: ShapeHandle) -> Liveness<ShapeHandle>;
}
