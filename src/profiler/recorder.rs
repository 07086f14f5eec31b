//! Bytecode scan: turns one function's feedback slots into samples.

use super::lineage::layout_of;
use super::state::PgoState;
use crate::{
    ApEntityId, BuiltinShape, DefineOpType, ElementsTrack, FeedbackValue, FunctionHandle,
    HandlerInfo, HandlerKind, HostRuntime, IcHandler, Instruction, ObjectInfo, OnHeapMode, OpType,
    Opcode, PgoInfo, ProfileType, ProfileTypeKind, ProtoTransitionType, ShapeHandle,
    ShapeLineageTracker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Load,
    Store,
}

/// Scan of one function, run with the info lock and the lineage lock held.
pub(crate) struct MethodScan<'a, H: HostRuntime + ?Sized> {
    pub(crate) host: &'a H,
    pub(crate) state: &'a PgoState,
    pub(crate) lineage: &'a mut ShapeLineageTracker,
    pub(crate) info: &'a mut PgoInfo,
    /// Ignore the GC flag; used by the final drain before teardown.
    pub(crate) force_dump: bool,
    pub(crate) func: FunctionHandle,
    pub(crate) abc_id: ApEntityId,
    pub(crate) record: ProfileType,
    pub(crate) method_id: u32,
}

impl<H: HostRuntime + ?Sized> MethodScan<'_, H> {
    /// Walks the bytecode. Returns `false` when a GC request cut it short.
    pub(crate) fn run(&mut self) -> bool {
        for ins in self.host.bytecode(self.func) {
            if !self.force_dump && self.state.gc_is_waiting() {
                tracing::debug!(method_id = self.method_id, "bytecode scan interrupted by gc");
                return false;
            }
            let Some(slot) = ins.slot_id() else {
                continue;
            };
            self.dump_instruction(&ins, slot);
        }
        true
    }

    fn dump_instruction(&mut self, ins: &Instruction, slot: u32) {
        let offset = ins.offset;
        match ins.opcode {
            Opcode::LoadByName => self.dump_ic_by_name(offset, slot, Access::Load),
            Opcode::StoreByName => self.dump_ic_by_name(offset, slot, Access::Store),
            Opcode::LoadByValue => self.dump_ic_by_value(offset, slot, Access::Load),
            Opcode::StoreByValue => self.dump_ic_by_value(offset, slot, Access::Store),
            Opcode::Arith => self.dump_op_type(offset, slot),
            Opcode::Call => self.dump_call(offset, slot),
            Opcode::NewObjRange => self.dump_new_obj_range(offset, slot),
            Opcode::DefineClass => self.dump_define_class(offset, slot),
            Opcode::CreateObject | Opcode::CreateArray | Opcode::CreateEmptyArray => {
                self.dump_create_object(offset, slot, ins.trace_id)
            }
            Opcode::GetIterator => self.dump_get_iterator(offset, slot),
            Opcode::InstanceOf => self.dump_instance_of(offset, slot),
            Opcode::CallInit | Opcode::DefineFunc | Opcode::Other => {}
        }
    }

    fn feedback(&self, slot: u32) -> FeedbackValue {
        self.host.feedback(self.func, slot)
    }

    fn add_object_info_mega(&mut self, offset: u32) {
        self.info
            .details
            .add_object_info_mega(&self.record, self.method_id, offset);
    }

    fn dump_ic_by_name(&mut self, offset: u32, slot: u32, access: Access) {
        match self.feedback(slot) {
            FeedbackValue::Hole => self.add_object_info_mega(offset),
            FeedbackValue::Mono { shape, handler } => {
                self.dump_by_name_handler(offset, shape, &handler, access);
            }
            FeedbackValue::Poly(entries) => {
                for (shape, handler) in entries {
                    if !self.dump_by_name_handler(offset, shape, &handler, access) {
                        self.add_object_info_mega(offset);
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    fn dump_ic_by_value(&mut self, offset: u32, slot: u32, access: Access) {
        match self.feedback(slot) {
            FeedbackValue::Hole => self.add_object_info_mega(offset),
            FeedbackValue::Mono { shape, handler } => {
                self.dump_by_value_handler(offset, shape, &handler, access);
            }
            FeedbackValue::Poly(entries) | FeedbackValue::KeyedPoly(entries) => {
                for (shape, handler) in entries {
                    self.dump_by_value_handler(offset, shape, &handler, access);
                }
            }
            _ => {}
        }
    }

    fn dump_by_name_handler(
        &mut self,
        offset: u32,
        shape: ShapeHandle,
        handler: &IcHandler,
        access: Access,
    ) -> bool {
        self.try_dump_proto_transition_type(shape);
        if access == Access::Load {
            return self.dump_load_by_name_handler(offset, shape, handler);
        }
        match *handler {
            IcHandler::Simple(_) => self.add_object_info(offset, shape, shape, shape, 0),
            IcHandler::Transition {
                target: Some(target),
                ..
            } => self.add_object_info(offset, shape, shape, target, 0),
            IcHandler::TransWithProto {
                target: Some(target),
                proto_changed: false,
                ..
            } => self.add_object_info(offset, shape, shape, target, 0),
            IcHandler::Prototype {
                holder,
                accessor_method,
                proto_changed: false,
                ..
            } => self.add_object_info(offset, shape, holder, holder, accessor_method),
            IcHandler::StoreAot {
                holder,
                proto_changed: false,
            } => self.add_object_info(offset, shape, holder, holder, 0),
            _ => false,
        }
    }

    fn dump_load_by_name_handler(&mut self, offset: u32, shape: ShapeHandle, handler: &IcHandler) -> bool {
        match *handler {
            IcHandler::Simple(info) => {
                if info.kind == HandlerKind::NonExist {
                    return false;
                }
                if matches!(info.kind, HandlerKind::Field | HandlerKind::Accessor)
                    && self.add_object_info(offset, shape, shape, shape, 0)
                {
                    return true;
                }
                self.add_builtins_info_by_name_in_instance(offset, shape)
            }
            IcHandler::Prototype {
                holder,
                accessor_method,
                info: Some(info),
                proto_changed: false,
            } => {
                if info.kind == HandlerKind::NonExist {
                    return false;
                }
                if self.add_object_info(offset, shape, holder, holder, accessor_method) {
                    return true;
                }
                self.add_builtins_info_by_name_in_prot(offset, shape, holder)
            }
            _ => false,
        }
    }

    fn dump_by_value_handler(
        &mut self,
        offset: u32,
        shape: ShapeHandle,
        handler: &IcHandler,
        access: Access,
    ) {
        self.try_dump_proto_transition_type(shape);
        if access == Access::Load {
            if let IcHandler::Simple(info) = *handler {
                match info.kind {
                    HandlerKind::NormalElement | HandlerKind::StringElement => {
                        if !info.skip_in_dump {
                            self.add_builtins_info(offset, shape, shape, OnHeapMode::None, false);
                        }
                    }
                    HandlerKind::TypedArrayElement { on_heap } => {
                        self.add_builtins_info(offset, shape, shape, heap_mode(on_heap), false);
                    }
                    _ => {
                        self.add_object_info(offset, shape, shape, shape, 0);
                    }
                }
            }
            return;
        }
        match *handler {
            IcHandler::Simple(info) => match info.kind {
                HandlerKind::NormalElement | HandlerKind::StringElement => {
                    self.add_builtins_info(offset, shape, shape, OnHeapMode::None, info.out_of_bounds);
                }
                HandlerKind::TypedArrayElement { on_heap } => {
                    self.add_builtins_info(offset, shape, shape, heap_mode(on_heap), info.out_of_bounds);
                }
                _ => {
                    self.add_object_info(offset, shape, shape, shape, 0);
                }
            },
            IcHandler::Transition {
                target: Some(target),
                info,
            }
            | IcHandler::TransWithProto {
                target: Some(target),
                info,
                ..
            } => match info {
                Some(info) if info.kind.is_element() => {
                    self.add_builtins_info(offset, shape, target, OnHeapMode::None, info.out_of_bounds);
                }
                _ => {
                    self.add_object_info(offset, shape, shape, target, 0);
                }
            },
            IcHandler::Prototype {
                holder,
                info,
                proto_changed: false,
                ..
            } => match info {
                Some(HandlerInfo {
                    kind,
                    out_of_bounds,
                    ..
                }) if kind.is_element() => {
                    self.add_builtins_info(offset, shape, shape, OnHeapMode::None, out_of_bounds);
                }
                _ => {
                    self.add_object_info(offset, shape, holder, holder, 0);
                }
            },
            _ => {}
        }
    }

    fn add_object_info(
        &mut self,
        offset: u32,
        receiver: ShapeHandle,
        holder: ShapeHandle,
        holder_tra: ShapeHandle,
        accessor_method: u32,
    ) -> bool {
        let accessor = match accessor_method {
            0 => ProfileType::None,
            id => ProfileType::method(self.abc_id, id),
        };
        self.add_transition_object_info(offset, receiver, holder, holder_tra, accessor)
    }

    /// Returns `false` only when the receiver lineage is unknown; an unknown
    /// holder lineage drops the sample but counts as handled.
    fn add_transition_object_info(
        &mut self,
        offset: u32,
        receiver: ShapeHandle,
        holder: ShapeHandle,
        holder_tra: ShapeHandle,
        accessor: ProfileType,
    ) -> bool {
        if self.host.is_composite(receiver) {
            return false;
        }
        let receiver_root = self.lineage.find_root_profile_type(self.host, receiver);
        if !receiver_root.is_root() {
            return false;
        }
        let holder_root = self.lineage.find_root_profile_type(self.host, holder);
        if !holder_root.is_root() {
            return true;
        }

        let receiver_type = self
            .lineage
            .get_or_insert_profile_type(self.host, receiver, receiver_root);
        let holder_type = self
            .lineage
            .get_or_insert_profile_type(self.host, holder, holder_root);
        let holder_tra_type = self
            .lineage
            .get_or_insert_profile_type(self.host, holder_tra, holder_root);

        let layouts = self.info.details.layouts_mut();
        if receiver != holder {
            self.lineage.update_layout(self.host, layouts, receiver);
        }
        if holder_type == holder_tra_type {
            self.lineage.update_layout(self.host, layouts, holder);
        } else {
            self.lineage
                .update_transition_layout(self.host, layouts, holder, holder_tra);
        }

        let info = ObjectInfo {
            receiver_root,
            receiver: receiver_type,
            holder_root,
            holder: holder_type,
            holder_tra_root: holder_root,
            holder_tra: holder_tra_type,
            accessor,
            proto_chain: self.prototype_chain(receiver, holder),
        };
        self.info
            .details
            .add_object_info(&self.record, self.method_id, offset, info);
        true
    }

    /// `(root, shape)` of every prototype between `receiver` and `holder`.
    fn prototype_chain(&mut self, receiver: ShapeHandle, holder: ShapeHandle) -> Vec<(ProfileType, ProfileType)> {
        let mut chain = Vec::new();
        if receiver == holder {
            return chain;
        }
        let mut proto = self.host.proto_shape(receiver);
        while let Some(current) = proto {
            if current == holder {
                break;
            }
            let root = self.lineage.find_root_profile_type(self.host, current);
            if !root.is_root() {
                break;
            }
            let shape = self
                .lineage
                .get_or_insert_profile_type(self.host, current, root);
            chain.push((root, shape));
            proto = self.host.proto_shape(current);
        }
        chain
    }

    fn add_builtins_info_by_name_in_instance(&mut self, offset: u32, receiver: ShapeHandle) -> bool {
        if let Some(slot) = self.host.global_slot(receiver) {
            let globals = ProfileType::Globals {
                abc_id: self.abc_id,
                id: slot,
            };
            self.info.details.add_object_info(
                &self.record,
                self.method_id,
                offset,
                ObjectInfo::own(globals, globals),
            );
            return true;
        }
        if self.host.builtin(receiver).is_none() {
            return false;
        }
        self.add_builtins_info(offset, receiver, receiver, OnHeapMode::None, false)
    }

    /// The holder must be the builtin's prototype or the one above it.
    fn add_builtins_info_by_name_in_prot(
        &mut self,
        offset: u32,
        receiver: ShapeHandle,
        holder: ShapeHandle,
    ) -> bool {
        if self.host.builtin(receiver).is_none() {
            return false;
        }
        let proto = self.host.proto_shape(receiver);
        let proto_of_proto = proto.and_then(|p| self.host.proto_shape(p));
        if proto != Some(holder) && proto_of_proto != Some(holder) {
            return false;
        }
        self.add_builtins_info(offset, receiver, receiver, OnHeapMode::None, false)
    }

    fn add_builtins_info(
        &mut self,
        offset: u32,
        receiver: ShapeHandle,
        transition: ShapeHandle,
        on_heap: OnHeapMode,
        out_of_bounds: bool,
    ) -> bool {
        let oob = u32::from(out_of_bounds) << 24;
        let id = match self.host.builtin(receiver) {
            Some(BuiltinShape::Array {
                js_type,
                elements_kind,
            }) => {
                let transition_kind = match self.host.builtin(transition) {
                    Some(BuiltinShape::Array { elements_kind, .. }) => elements_kind,
                    _ => elements_kind,
                };
                u32::from(js_type)
                    | u32::from(elements_kind) << 8
                    | u32::from(transition_kind) << 16
                    | oob
            }
            Some(BuiltinShape::TypedArray {
                js_type,
                on_heap: stored_on_heap,
                root,
            }) => {
                let matches_mode = match on_heap {
                    OnHeapMode::None => true,
                    OnHeapMode::OnHeap => stored_on_heap,
                    OnHeapMode::NotOnHeap => !stored_on_heap,
                };
                if root && matches_mode {
                    u32::from(js_type) | u32::from(on_heap.to_u8()) << 8 | oob
                } else {
                    0
                }
            }
            Some(BuiltinShape::Object { js_type }) => u32::from(js_type),
            None => return false,
        };
        let builtins = ProfileType::Builtins {
            abc_id: self.abc_id,
            id,
        };
        self.info.details.add_object_info(
            &self.record,
            self.method_id,
            offset,
            ObjectInfo::own(builtins, builtins),
        );
        true
    }

    /// Records `Sub.prototype = Object.create(Base.prototype)` style
    /// transitions whose roots both came from a proto transition.
    fn try_dump_proto_transition_type(&mut self, shape: ShapeHandle) {
        if self.host.is_composite(shape) {
            return;
        }
        let ihc1 = self.host.root_of(shape);
        let transition = self.lineage.get_profile_type(ihc1, true);
        if !transition.is_root() || !transition.is_transition_class() {
            return;
        }
        let Some(phc1_root) = self.host.proto_root_of(ihc1) else {
            tracing::debug!("transition root has no prototype shape");
            return;
        };
        let transition_proto = self.lineage.get_profile_type(phc1_root, true);
        if !transition_proto.is_root() {
            tracing::debug!("prototype was reassigned after its transition");
            return;
        }
        let (Some(ihc0), Some(base_ihc)) = (
            self.host.fake_parent(ihc1),
            self.host.fake_parent(phc1_root),
        ) else {
            return;
        };

        let layouts = self.info.details.layouts_mut();
        self.lineage.update_layout(self.host, layouts, ihc0);
        self.lineage.update_layout(self.host, layouts, ihc1);
        self.lineage.update_layout(self.host, layouts, base_ihc);

        let ihc = self.lineage.get_profile_type(ihc0, false);
        if !ihc.is_root() {
            return;
        }
        let base_root = self
            .lineage
            .get_profile_type(self.host.root_of(base_ihc), true);
        if !base_root.is_root() {
            tracing::debug!("base prototype lineage is not recorded");
            return;
        }
        let base = self.lineage.get_profile_type(base_ihc, false);
        if base.is_none() {
            return;
        }
        self.info.details.proto_transitions_mut().add(ProtoTransitionType {
            ihc,
            base_root,
            base,
            transition,
            transition_proto,
        });
    }

    fn dump_op_type(&mut self, offset: u32, slot: u32) {
        if let FeedbackValue::Int(bits) = self.feedback(slot) {
            self.info.details.add_type(
                &self.record,
                self.method_id,
                offset,
                OpType::from_bits(bits as u32),
            );
        }
    }

    fn add_call_target(&mut self, offset: u32, target: ProfileType) {
        self.info
            .details
            .add_call_target(&self.record, self.method_id, offset, target);
    }

    fn dump_call(&mut self, offset: u32, slot: u32) {
        let target = match self.feedback(slot) {
            FeedbackValue::Int(0) => ProfileType::method(self.abc_id, 0),
            FeedbackValue::Int(builtin) => ProfileType::BuiltinFunction {
                abc_id: self.abc_id,
                id: builtin.unsigned_abs(),
            },
            FeedbackValue::Function(callee) => {
                let Some(callee) = self.host.function(callee) else {
                    return;
                };
                let abc_id = self
                    .info
                    .sample_panda_file(&callee.abc_desc, callee.abc_checksum);
                ProfileType::method(abc_id, callee.method_id)
            }
            _ => return,
        };
        self.add_call_target(offset, target);
    }

    fn dump_get_iterator(&mut self, offset: u32, slot: u32) {
        if let FeedbackValue::Int(kind) = self.feedback(slot) {
            let target = ProfileType::BuiltinFunction {
                abc_id: self.abc_id,
                id: kind.unsigned_abs(),
            };
            self.add_call_target(offset, target);
        }
    }

    fn dump_new_obj_range(&mut self, offset: u32, slot: u32) {
        let ctor_id = match self.feedback(slot) {
            FeedbackValue::Int(id) => i64::from(id),
            FeedbackValue::Function(callee) => match self.host.function(callee) {
                Some(callee) => i64::from(callee.method_id),
                None => return,
            },
            _ => return,
        };
        let target = if ctor_id > 0 {
            ProfileType::root(ProfileTypeKind::Class, self.abc_id, ctor_id as u32)
        } else {
            ProfileType::BuiltinFunction {
                abc_id: self.abc_id,
                id: ctor_id.unsigned_abs() as u32,
            }
        };
        self.add_call_target(offset, target);
    }

    fn dump_define_class(&mut self, offset: u32, slot: u32) {
        let FeedbackValue::ClassCell(Some(ctor)) = self.feedback(slot) else {
            return;
        };
        let Some(ctor) = self.host.function(ctor) else {
            return;
        };
        if !ctor.kind.is_class_constructor() {
            return;
        }
        let ctor_abc = self
            .info
            .sample_panda_file(&ctor.abc_desc, ctor.abc_checksum);
        let local = ProfileType::root(ProfileTypeKind::Class, ctor_abc, ctor.method_id);
        if self.lineage.is_skippable_object_type(local) {
            return;
        }
        let mut define = DefineOpType::new(local);

        let prototype_shape = match ctor.instance_shape {
            Some(ihc) => {
                self.lineage
                    .set_root_profile_type(ihc, ctor_abc, ctor.method_id, ProfileTypeKind::Class);
                self.info
                    .details
                    .layouts_mut()
                    .add_root_layout(local, &layout_of(self.host, ihc));
                self.host.proto_shape(ihc).or(ctor.prototype_shape)
            }
            None => ctor.prototype_shape,
        };

        if let Some(own) = ctor.own_shape {
            let ctor_root = self.host.root_of(own);
            let ctor_type = self.lineage.get_profile_type(ctor_root, false);
            if ctor_type.is_root() {
                define.ctor = ctor_type;
                self.info
                    .details
                    .layouts_mut()
                    .add_root_layout(ctor_type, &layout_of(self.host, ctor_root));
            } else {
                tracing::debug!(ctor = ctor.method_id, "constructor root shape not registered");
            }
        }

        if let Some(prototype) = prototype_shape {
            let prototype_root = self.host.root_of(prototype);
            let prototype_type = self.lineage.get_profile_type(prototype_root, false);
            if prototype_type.is_root() {
                define.prototype = prototype_type;
                self.info
                    .details
                    .layouts_mut()
                    .add_root_layout(prototype_type, &layout_of(self.host, prototype_root));
            } else {
                tracing::debug!(ctor = ctor.method_id, "prototype root shape not registered");
            }
        }

        self.info
            .details
            .add_define(&self.record, self.method_id, offset, define);
    }

    fn dump_create_object(&mut self, offset: u32, slot: u32, trace_id: Option<u32>) {
        match self.feedback(slot) {
            FeedbackValue::LiteralShape(shape) => {
                let root = self.host.root_of(shape);
                let literal = self.lineage.get_profile_type(root, false);
                if !literal.is_root() {
                    return;
                }
                self.info.details.add_define(
                    &self.record,
                    self.method_id,
                    offset,
                    DefineOpType::new(literal),
                );
                self.info
                    .details
                    .layouts_mut()
                    .add_root_layout(literal, &layout_of(self.host, root));
            }
            FeedbackValue::Track(track) => {
                let (Some(trace_id), Some(track)) = (trace_id, self.host.track_info(track)) else {
                    return;
                };
                let literal = ProfileType::root(ProfileTypeKind::ArrayLiteral, self.abc_id, trace_id);
                let define = DefineOpType::new(literal).with_elements(ElementsTrack {
                    elements_kind: track.elements_kind,
                    length: track.length,
                    space_flag: track.space_flag,
                });
                self.info
                    .details
                    .add_define(&self.record, self.method_id, offset, define);
                if let Some(cached) = track.cached_shape {
                    self.info
                        .details
                        .layouts_mut()
                        .add_root_layout(literal, &layout_of(self.host, cached));
                }
            }
            _ => {}
        }
    }

    fn dump_instance_of(&mut self, offset: u32, slot: u32) {
        match self.feedback(slot) {
            FeedbackValue::Hole => self.add_object_info_mega(offset),
            FeedbackValue::Mono { shape, .. } => {
                // Symbol keyed lookups are not profiled.
                if self.host.has_custom_has_instance(shape) {
                    return;
                }
                self.add_object_info(offset, shape, shape, shape, 0);
            }
            _ => {}
        }
    }
}

fn heap_mode(on_heap: bool) -> OnHeapMode {
    if on_heap {
        OnHeapMode::OnHeap
    } else {
        OnHeapMode::NotOnHeap
    }
}
