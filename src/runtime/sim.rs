//! In-memory host used by profiler tests.

use parking_lot::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    BuiltinShape, FeedbackValue, FunctionHandle, FunctionInfo, HostRuntime, Instruction, Liveness,
    RecordLookup, ShapeHandle, ShapeModel, TrackHandle, TrackInfo, WeakVisitor,
};
use crate::{FieldDesc, FieldRep};

#[derive(Debug, Clone, Default)]
struct SimShape {
    parent: Option<ShapeHandle>,
    proto: Option<ShapeHandle>,
    fields: Vec<FieldDesc>,
    dictionary: bool,
    builtin: Option<BuiltinShape>,
    global_slot: Option<u32>,
}

#[derive(Default)]
struct SimState {
    next: u64,
    shapes: FxHashMap<ShapeHandle, SimShape>,
    fake_parents: FxHashMap<ShapeHandle, ShapeHandle>,
    functions: FxHashMap<FunctionHandle, FunctionInfo>,
    bytecode: FxHashMap<FunctionHandle, Vec<Instruction>>,
    feedback: FxHashMap<(FunctionHandle, u32), FeedbackValue>,
    records: FxHashMap<(String, String), RecordLookup>,
    custom_has_instance: FxHashSet<ShapeHandle>,
    tracks: FxHashMap<TrackHandle, TrackInfo>,
    pre_dumped: FxHashSet<FunctionHandle>,
    moved_shapes: FxHashMap<ShapeHandle, ShapeHandle>,
    moved_functions: FxHashMap<FunctionHandle, FunctionHandle>,
    dead_functions: FxHashSet<FunctionHandle>,
}

impl SimState {
    fn fresh(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

#[derive(Default)]
pub(crate) struct SimHost {
    state: Mutex<SimState>,
}

impl SimHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_root_shape(&self) -> ShapeHandle {
        let mut state = self.state.lock();
        let handle = ShapeHandle(state.fresh());
        state.shapes.insert(handle, SimShape::default());
        handle
    }

    pub(crate) fn new_builtin_shape(&self, builtin: BuiltinShape) -> ShapeHandle {
        let handle = self.new_root_shape();
        self.state
            .lock()
            .shapes
            .entry(handle)
            .or_default()
            .builtin = Some(builtin);
        handle
    }

    pub(crate) fn set_global_slot(&self, shape: ShapeHandle, slot: u32) {
        self.state.lock().shapes.entry(shape).or_default().global_slot = Some(slot);
    }

    /// Adds field `key` to `parent`, returning the child shape.
    pub(crate) fn transition(&self, parent: ShapeHandle, key: &str) -> ShapeHandle {
        let mut state = self.state.lock();
        let base = state.shapes.get(&parent).cloned().unwrap_or_default();
        let mut fields = base.fields;
        fields.push(FieldDesc::new(key, FieldRep::Tagged));
        let handle = ShapeHandle(state.fresh());
        state.shapes.insert(
            handle,
            SimShape {
                parent: Some(parent),
                proto: base.proto,
                fields,
                ..SimShape::default()
            },
        );
        handle
    }

    pub(crate) fn set_proto(&self, shape: ShapeHandle, proto: ShapeHandle) {
        self.state.lock().shapes.entry(shape).or_default().proto = Some(proto);
    }

    pub(crate) fn set_dictionary(&self, shape: ShapeHandle) {
        self.state.lock().shapes.entry(shape).or_default().dictionary = true;
    }

    pub(crate) fn set_fake_parent(&self, shape: ShapeHandle, parent: ShapeHandle) {
        self.state.lock().fake_parents.insert(shape, parent);
    }

    pub(crate) fn set_custom_has_instance(&self, shape: ShapeHandle) {
        self.state.lock().custom_has_instance.insert(shape);
    }

    pub(crate) fn add_function(&self, info: FunctionInfo) -> FunctionHandle {
        let mut state = self.state.lock();
        let handle = FunctionHandle(state.fresh());
        state.functions.insert(handle, info);
        handle
    }

    pub(crate) fn update_function(&self, func: FunctionHandle, update: impl FnOnce(&mut FunctionInfo)) {
        if let Some(info) = self.state.lock().functions.get_mut(&func) {
            update(info);
        }
    }

    pub(crate) fn set_bytecode(&self, func: FunctionHandle, code: Vec<Instruction>) {
        self.state.lock().bytecode.insert(func, code);
    }

    pub(crate) fn set_feedback(&self, func: FunctionHandle, slot: u32, value: FeedbackValue) {
        self.state.lock().feedback.insert((func, slot), value);
    }

    pub(crate) fn add_record(&self, abc_desc: &str, record_name: &str, lookup: RecordLookup) {
        self.state
            .lock()
            .records
            .insert((abc_desc.to_string(), record_name.to_string()), lookup);
    }

    pub(crate) fn add_track(&self, info: TrackInfo) -> TrackHandle {
        let mut state = self.state.lock();
        let handle = TrackHandle(state.fresh());
        state.tracks.insert(handle, info);
        handle
    }

    /// Moves a shape to a new handle, rewriting every reference to it.
    pub(crate) fn relocate_shape(&self, old: ShapeHandle) -> ShapeHandle {
        let mut state = self.state.lock();
        let new = ShapeHandle(state.fresh());
        if let Some(shape) = state.shapes.remove(&old) {
            state.shapes.insert(new, shape);
        }
        for shape in state.shapes.values_mut() {
            if shape.parent == Some(old) {
                shape.parent = Some(new);
            }
            if shape.proto == Some(old) {
                shape.proto = Some(new);
            }
        }
        state.moved_shapes.insert(old, new);
        new
    }

    pub(crate) fn relocate_function(&self, old: FunctionHandle) -> FunctionHandle {
        let mut state = self.state.lock();
        let new = FunctionHandle(state.fresh());
        if let Some(info) = state.functions.remove(&old) {
            state.functions.insert(new, info);
        }
        if let Some(code) = state.bytecode.remove(&old) {
            state.bytecode.insert(new, code);
        }
        let slots: Vec<_> = state
            .feedback
            .keys()
            .filter(|(func, _)| *func == old)
            .copied()
            .collect();
        for key in slots {
            if let Some(value) = state.feedback.remove(&key) {
                state.feedback.insert((new, key.1), value);
            }
        }
        state.moved_functions.insert(old, new);
        new
    }

    pub(crate) fn kill_function(&self, func: FunctionHandle) {
        let mut state = self.state.lock();
        state.functions.remove(&func);
        state.dead_functions.insert(func);
    }
}

impl ShapeModel for SimHost {
    fn parent(&self, shape: ShapeHandle) -> Option<ShapeHandle> {
        self.state.lock().shapes.get(&shape)?.parent
    }

    fn proto_shape(&self, shape: ShapeHandle) -> Option<ShapeHandle> {
        self.state.lock().shapes.get(&shape)?.proto
    }

    fn layout(&self, shape: ShapeHandle) -> Vec<FieldDesc> {
        self.state
            .lock()
            .shapes
            .get(&shape)
            .map(|s| s.fields.clone())
            .unwrap_or_default()
    }

    fn is_dictionary(&self, shape: ShapeHandle) -> bool {
        self.state
            .lock()
            .shapes
            .get(&shape)
            .is_some_and(|s| s.dictionary)
    }

    fn builtin(&self, shape: ShapeHandle) -> Option<BuiltinShape> {
        self.state.lock().shapes.get(&shape)?.builtin
    }

    fn global_slot(&self, shape: ShapeHandle) -> Option<u32> {
        self.state.lock().shapes.get(&shape)?.global_slot
    }

    fn fake_parent(&self, shape: ShapeHandle) -> Option<ShapeHandle> {
        self.state.lock().fake_parents.get(&shape).copied()
    }

    fn try_insert_fake_parent(&self, shape: ShapeHandle, parent: ShapeHandle) -> bool {
        let mut state = self.state.lock();
        if state.fake_parents.contains_key(&shape) {
            return false;
        }
        state.fake_parents.insert(shape, parent);
        true
    }
}

impl HostRuntime for SimHost {
    fn function(&self, func: FunctionHandle) -> Option<FunctionInfo> {
        self.state.lock().functions.get(&func).cloned()
    }

    fn bytecode(&self, func: FunctionHandle) -> Vec<Instruction> {
        self.state
            .lock()
            .bytecode
            .get(&func)
            .cloned()
            .unwrap_or_default()
    }

    fn feedback(&self, func: FunctionHandle, slot: u32) -> FeedbackValue {
        self.state
            .lock()
            .feedback
            .get(&(func, slot))
            .cloned()
            .unwrap_or_default()
    }

    fn record_id(&self, abc_desc: &str, record_name: &str) -> RecordLookup {
        self.state
            .lock()
            .records
            .get(&(abc_desc.to_string(), record_name.to_string()))
            .copied()
            .unwrap_or(RecordLookup::Missing)
    }

    fn create_proto_trans_root(&self, func: FunctionHandle, old_proto: ShapeHandle) -> Option<ShapeHandle> {
        let ihc = self.new_root_shape();
        self.set_proto(ihc, old_proto);
        let mut state = self.state.lock();
        let info = state.functions.get_mut(&func)?;
        info.proto_trans_root = Some(ihc);
        Some(ihc)
    }

    fn has_custom_has_instance(&self, shape: ShapeHandle) -> bool {
        let state = self.state.lock();
        let mut current = Some(shape);
        while let Some(s) = current {
            if state.custom_has_instance.contains(&s) {
                return true;
            }
            current = state.shapes.get(&s).and_then(|s| s.proto);
        }
        false
    }

    fn track_info(&self, track: TrackHandle) -> Option<TrackInfo> {
        self.state.lock().tracks.get(&track).copied()
    }

    fn set_track_info(&self, track: TrackHandle, info: TrackInfo) {
        self.state.lock().tracks.insert(track, info);
    }

    fn mark_pre_dumped(&self, func: FunctionHandle) -> bool {
        self.state.lock().pre_dumped.insert(func)
    }
}

impl WeakVisitor for SimHost {
    fn visit_function(&self, func: FunctionHandle) -> Liveness<FunctionHandle> {
        let state = self.state.lock();
        if state.dead_functions.contains(&func) {
            return Liveness::Dead;
        }
        match state.moved_functions.get(&func) {
            Some(new) => Liveness::Moved(*new),
            None => Liveness::Alive,
        }
    }

    fn visit_shape(&self, shape: ShapeHandle) -> Liveness<ShapeHandle> {
        let state = self.state.lock();
        match state.moved_shapes.get(&shape) {
            Some(new) => Liveness::Moved(*new),
            None if state.shapes.contains_key(&shape) => Liveness::Alive,
            None => Liveness::Dead,
        }
    }
}
