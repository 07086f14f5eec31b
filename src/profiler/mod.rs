//! The live profiler: entry points for the interpreter, the object model
//! and the GC.
//!
//! Functions become interesting in two steps. A hot function is parked in
//! the pre-dump list; once it is seen running from a record it moves to the
//! dump list, which a drain empties into the manager's aggregate. A drain
//! holds the info lock and then the lineage lock for its whole duration,
//! so it blocks every other writer of the aggregate until it returns.

mod lineage;
mod recorder;
mod state;
mod worklist;

pub use lineage::*;
pub use state::*;
pub use worklist::*;

use parking_lot::Mutex;

use rustc_hash::FxHashMap;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use self::recorder::MethodScan;
use crate::{
    ApEntityId, FunctionHandle, FunctionInfo, HostRuntime, Liveness, PgoInfo, PgoProfilerManager,
    ProfileType, ProfileTypeKind, RecordLookup, SampleMode, ShapeHandle, TrackHandle, TrackInfo,
    WeakVisitor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    PreDump,
    Dump,
}

pub struct PgoProfiler<H: HostRuntime + 'static> {
    host: Arc<H>,
    manager: Arc<PgoProfilerManager>,
    enabled: AtomicBool,
    state: PgoState,
    lineage: Mutex<ShapeLineageTracker>,
    pre_dump: WorkList,
    dump: WorkList,
    /// Which list holds each queued function. A function is in at most one.
    nodes: Mutex<FxHashMap<FunctionHandle, (ListKind, NodeRef)>>,
    /// Methods first seen since the last save.
    method_count: AtomicU32,
    last_save: Mutex<Instant>,
}

impl<H: HostRuntime + 'static> PgoProfiler<H> {
    pub fn new(host: Arc<H>, manager: Arc<PgoProfilerManager>) -> Arc<Self> {
        let enabled = manager.config().enable;
        tracing::info!(enabled, "profiler created");
        Arc::new(Self {
            host,
            manager,
            enabled: AtomicBool::new(enabled),
            state: PgoState::new(),
            lineage: Mutex::new(ShapeLineageTracker::new()),
            pre_dump: WorkList::new(),
            dump: WorkList::new(),
            nodes: Mutex::new(FxHashMap::default()),
            method_count: AtomicU32::new(0),
            last_save: Mutex::new(Instant::now()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn manager(&self) -> &Arc<PgoProfilerManager> {
        &self.manager
    }

    pub fn state(&self) -> DumpState {
        self.state.state()
    }

    pub fn pre_dump_len(&self) -> usize {
        self.pre_dump.len()
    }

    pub fn dump_len(&self) -> usize {
        self.dump.len()
    }

    /// Blocks until no drain or save is in flight.
    pub fn wait_for_dump(&self) {
        self.state.wait_until_stopped();
    }

    fn abc_id_of(&self, info: &FunctionInfo) -> ApEntityId {
        self.manager
            .sample_panda_file(&info.abc_desc, info.abc_checksum)
    }

    /// Gives an object literal's root shape its identity.
    pub fn record_profile_type(&self, shape: ShapeHandle, abc_desc: &str, abc_checksum: u32, trace_id: u32) {
        if !self.is_enabled() {
            return;
        }
        let abc_id = self.manager.sample_panda_file(abc_desc, abc_checksum);
        self.lineage
            .lock()
            .set_root_profile_type(shape, abc_id, trace_id, ProfileTypeKind::ObjectLiteral);
    }

    /// Registers the constructor, instance and prototype roots of a class.
    /// A constructor defined a second time poisons every identity built
    /// from its method id.
    pub fn profile_define_class(&self, ctor: FunctionHandle) {
        if !self.is_enabled() {
            return;
        }
        let Some(info) = self.host.function(ctor) else {
            return;
        };
        let abc_id = self.abc_id_of(&info);
        let ctor_id = info.method_id;
        let mut lineage = self.lineage.lock();
        if !lineage.insert_defined_ctor(ctor_id) {
            tracing::debug!(ctor_id, "constructor defined more than once");
            lineage.insert_skip_ctor(ctor_id);
            return;
        }
        if let Some(own) = info.own_shape {
            lineage.set_root_profile_type(own, abc_id, ctor_id, ProfileTypeKind::Constructor);
        }
        if let Some(ihc) = info.instance_shape {
            lineage.set_root_profile_type(ihc, abc_id, ctor_id, ProfileTypeKind::Class);
        }
        if let Some(prototype) = info.prototype_shape {
            lineage.set_root_profile_type(prototype, abc_id, ctor_id, ProfileTypeKind::Prototype);
        }
    }

    pub fn profile_class_root_shape(&self, ctor: FunctionHandle, root: ShapeHandle, kind: ProfileTypeKind) {
        if !self.is_enabled() {
            return;
        }
        let Some(info) = self.host.function(ctor) else {
            return;
        };
        if !info.kind.is_class_constructor() {
            return;
        }
        self.register_ctor_root(&info, root, kind);
    }

    /// Same as [`Self::profile_class_root_shape`] for native-module
    /// constructors, which carry no class kind.
    pub fn profile_napi_root_shape(&self, ctor: FunctionHandle, root: ShapeHandle, kind: ProfileTypeKind) {
        if !self.is_enabled() {
            return;
        }
        let Some(info) = self.host.function(ctor) else {
            return;
        };
        self.register_ctor_root(&info, root, kind);
    }

    fn register_ctor_root(&self, info: &FunctionInfo, root: ShapeHandle, kind: ProfileTypeKind) {
        let abc_id = self.abc_id_of(info);
        let mut lineage = self.lineage.lock();
        if lineage.is_skippable_ctor(info.method_id) {
            return;
        }
        lineage.set_root_profile_type(root, abc_id, info.method_id, kind);
    }

    /// `F.prototype = Object.create(Base.prototype)`, prototype half:
    /// links the new prototype's shape to `base_ihc` and makes the host
    /// remember the instance root that `F` had before.
    pub fn profile_proto_transition_prototype(
        &self,
        func: FunctionHandle,
        prototype_shape: ShapeHandle,
        old_proto_shape: ShapeHandle,
        base_ihc: ShapeHandle,
    ) {
        if !self.is_enabled() {
            return;
        }
        let Some(info) = self.host.function(func) else {
            return;
        };
        if info.is_native || info.proto_trans_root.is_some() {
            return;
        }
        if self.host.is_dictionary(prototype_shape) {
            return;
        }
        let abc_id = self.abc_id_of(&info);
        let mut lineage = self.lineage.lock();
        let base_root = lineage.get_profile_type(self.host.root_of(base_ihc), true);
        if !base_root.is_root() {
            tracing::debug!(method_id = info.method_id, "base of proto transition is not recorded");
            return;
        }
        let trans_phc = self.host.root_of(prototype_shape);
        if !self.host.try_insert_fake_parent(trans_phc, base_ihc) {
            return;
        }
        if self
            .host
            .create_proto_trans_root(func, old_proto_shape)
            .is_none()
        {
            return;
        }
        lineage.set_root_profile_type(
            self.host.root_of(old_proto_shape),
            abc_id,
            info.method_id,
            ProfileTypeKind::Prototype,
        );
        lineage.set_root_profile_type(
            trans_phc,
            abc_id,
            info.method_id,
            ProfileTypeKind::TransitionPrototype,
        );
    }

    /// Class half of a proto transition: `shape` is the instance shape
    /// built after the prototype was replaced.
    pub fn profile_proto_transition_class(&self, func: FunctionHandle, shape: ShapeHandle) {
        if !self.is_enabled() {
            return;
        }
        let Some(info) = self.host.function(func) else {
            return;
        };
        if info.is_native {
            return;
        }
        let Some(ihc) = info.proto_trans_root else {
            return;
        };
        let trans_ihc = self.host.root_of(shape);
        let Some(base_ihc) = self
            .host
            .proto_root_of(trans_ihc)
            .and_then(|phc| self.host.fake_parent(phc))
        else {
            return;
        };
        let abc_id = self.abc_id_of(&info);
        let mut lineage = self.lineage.lock();
        let base_root = lineage.get_profile_type(self.host.root_of(base_ihc), true);
        if !base_root.is_root() {
            tracing::debug!(method_id = info.method_id, "base of proto transition is not recorded");
            return;
        }
        if !self.host.try_insert_fake_parent(trans_ihc, ihc) {
            return;
        }
        lineage.set_root_profile_type(ihc, abc_id, info.method_id, ProfileTypeKind::Class);
        lineage.set_root_profile_type(
            trans_ihc,
            abc_id,
            info.method_id,
            ProfileTypeKind::TransitionClass,
        );
    }

    /// The object behind `old` left fast mode; its root identity follows.
    pub fn update_root_profile_type(&self, old: ShapeHandle, new: ShapeHandle) {
        if !self.is_enabled() {
            return;
        }
        self.lineage.lock().update_root_profile_type(old, new);
    }

    pub fn update_track_array_length(&self, track: TrackHandle, length: u32) {
        self.update_track(track, |info| {
            if length <= info.length {
                return false;
            }
            info.length = length;
            true
        });
    }

    /// Only a young-space literal can be tenured.
    pub fn update_track_space_flag(&self, track: TrackHandle, space_flag: u8) {
        self.update_track(track, |info| {
            if info.space_flag != TrackInfo::YOUNG_SPACE || info.space_flag == space_flag {
                return false;
            }
            info.space_flag = space_flag;
            true
        });
    }

    pub fn update_track_elements_kind(&self, track: TrackHandle, elements_kind: u32) {
        self.update_track(track, |info| {
            if info.elements_kind == elements_kind {
                return false;
            }
            info.elements_kind = elements_kind;
            true
        });
    }

    fn update_track(&self, track: TrackHandle, update: impl FnOnce(&mut TrackInfo) -> bool) {
        if !self.is_enabled() {
            return;
        }
        let Some(mut info) = self.host.track_info(track) else {
            return;
        };
        if !update(&mut info) {
            return;
        }
        self.host.set_track_info(track, info);
        let Some(owner) = info.owner else {
            return;
        };
        let has_profile_info = self
            .host
            .function(owner)
            .is_some_and(|f| f.has_profile_info);
        if has_profile_info && self.host.mark_pre_dumped(owner) {
            self.pgo_pre_dump(owner);
        }
    }

    fn list(&self, kind: ListKind) -> &WorkList {
        match kind {
            ListKind::PreDump => &self.pre_dump,
            ListKind::Dump => &self.dump,
        }
    }

    /// Puts `func` on `target`, taking it off the other list first.
    fn enqueue(&self, func: FunctionHandle, target: ListKind) {
        let mut nodes = self.nodes.lock();
        if let Some(&(kind, node)) = nodes.get(&func)
            && self.list(kind).contains(node)
        {
            if kind == target {
                return;
            }
            self.list(kind).remove(node);
        }
        let node = self.list(target).push_back(func);
        nodes.insert(func, (target, node));
    }

    fn forget(&self, func: FunctionHandle, kind: ListKind) {
        let mut nodes = self.nodes.lock();
        if nodes.get(&func).is_some_and(|(k, _)| *k == kind) {
            nodes.remove(&func);
        }
    }

    fn rekey(&self, old: FunctionHandle, new: Option<FunctionHandle>) {
        let mut nodes = self.nodes.lock();
        if let Some(entry) = nodes.remove(&old)
            && let Some(new) = new
        {
            nodes.insert(new, entry);
        }
    }

    fn dump_enabled(&self) -> bool {
        self.is_enabled() && self.manager.config().enable_profile_dump
    }

    /// A function got hot. It waits in the pre-dump list, where the GC
    /// keeps it alive, until it is dumped.
    pub fn pgo_pre_dump(&self, func: FunctionHandle) {
        if !self.dump_enabled() || self.host.function(func).is_none() {
            return;
        }
        self.enqueue(func, ListKind::PreDump);
    }

    /// A hot function ran from a record: queue it for the next drain and
    /// start one if none is running.
    pub fn pgo_dump(self: &Arc<Self>, func: FunctionHandle) {
        if !self.dump_enabled() || self.host.function(func).is_none() {
            return;
        }
        self.enqueue(func, ListKind::Dump);
        self.try_dispatch_dump_task();
    }

    /// Samples one function right away, outside the work lists.
    pub fn profile_bytecode(&self, func: FunctionHandle) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut info = self.manager.lock_info();
        let mut lineage = self.lineage.lock();
        self.dump_function(&mut info, &mut lineage, func, self.manager.config().force_dump)
    }

    fn try_dispatch_dump_task(self: &Arc<Self>) {
        if !self.state.set_start_if_stop() {
            return;
        }
        self.spawn_dump_task();
    }

    /// Runs a drain for a machine already in `Running`.
    fn spawn_dump_task(self: &Arc<Self>) {
        if !self.manager.config().background_dump {
            self.run_dump_task();
            return;
        }
        let this = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("pgo-dump".to_string())
            .spawn(move || this.run_dump_task());
        if let Err(err) = spawned {
            tracing::warn!("failed to spawn dump thread, draining inline: {err}");
            self.run_dump_task();
        }
    }

    fn run_dump_task(self: &Arc<Self>) {
        let force = self.manager.config().force_dump;
        if !self.handle_pgo_dump(force) && self.state.gc_is_waiting() {
            self.state.pause_for_gc();
            return;
        }
        self.try_save();
        self.state.set_stop_and_notify();
        if !self.dump.is_empty() {
            self.try_dispatch_dump_task();
        }
    }

    /// Drains the dump list in FIFO order. Returns `false` when a GC
    /// request stopped it early; the rest waits for the next cycle.
    fn handle_pgo_dump(&self, force: bool) -> bool {
        let mut info = self.manager.lock_info();
        let mut lineage = self.lineage.lock();
        loop {
            if !force && self.state.gc_is_waiting() {
                return false;
            }
            let Some(func) = self.dump.pop_front() else {
                return true;
            };
            self.forget(func, ListKind::Dump);
            if !self.dump_function(&mut info, &mut lineage, func, force) {
                return false;
            }
        }
    }

    /// Samples every pre-dumped function without dequeuing it.
    fn handle_pgo_pre_dump(&self, force: bool) -> bool {
        let mut info = self.manager.lock_info();
        let mut lineage = self.lineage.lock();
        let mut completed = true;
        self.pre_dump.iterate(|_, func| {
            if completed && (force || !self.state.gc_is_waiting()) {
                completed = self.dump_function(&mut info, &mut lineage, func, force);
            } else {
                completed = false;
            }
            Visit::Keep
        });
        completed
    }

    /// Adds `func` to the aggregate and scans its bytecode. Returns `false`
    /// only when the scan was interrupted by a GC request.
    fn dump_function(
        &self,
        info: &mut PgoInfo,
        lineage: &mut ShapeLineageTracker,
        func: FunctionHandle,
        force: bool,
    ) -> bool {
        let Some(function) = self.host.function(func) else {
            return true;
        };
        if function.is_shared || function.is_native || !function.has_profile_info {
            return true;
        }
        if function.record_name.is_empty() {
            return true;
        }
        let abc_id = info.sample_panda_file(&function.abc_desc, function.abc_checksum);
        let Some(record) = self.record_type(info, abc_id, &function) else {
            return true;
        };
        let first_seen = info.details.add_method(
            record,
            function.method_id,
            &function.method_name,
            function.bytecode_checksum,
            SampleMode::HotnessMode,
        );
        if first_seen {
            self.method_count.fetch_add(1, Ordering::Relaxed);
        }
        MethodScan {
            host: &*self.host,
            state: &self.state,
            lineage,
            info,
            force_dump: force,
            func,
            abc_id,
            record,
            method_id: function.method_id,
        }
        .run()
    }

    fn record_type(&self, info: &mut PgoInfo, abc_id: ApEntityId, function: &FunctionInfo) -> Option<ProfileType> {
        let id = match self
            .host
            .record_id(&function.abc_desc, &function.record_name)
        {
            RecordLookup::ClassId(id) => id,
            RecordLookup::Bundle => ProfileType::RECORD_ID_FOR_BUNDLE,
            RecordLookup::Missing => {
                tracing::error!(
                    record = %function.record_name,
                    abc = %function.abc_desc,
                    "record id not found; method skipped"
                );
                return None;
            }
        };
        let record = ProfileType::RecordClass { abc_id, id };
        info.details
            .record_pool_mut()
            .add(record, function.record_name.clone());
        Some(record)
    }

    /// Saves when asked to, or when enough new methods piled up and the
    /// minimum interval has passed.
    fn try_save(&self) {
        let config = self.manager.config();
        let requested = self.manager.take_save_request();
        let due = self.method_count.load(Ordering::Relaxed) >= config.merged_every_count
            && self.last_save.lock().elapsed() > Duration::from_secs(config.save_min_interval_secs);
        if !(requested || due || config.force_dump) {
            return;
        }
        self.state.set_save_and_notify();
        self.handle_pgo_pre_dump(config.force_dump);
        if let Err(err) = self.manager.save() {
            tracing::warn!("profile save failed: {err}");
        }
        self.method_count.store(0, Ordering::Relaxed);
        *self.last_save.lock() = Instant::now();
        self.state.finish_save();
    }

    /// Final synchronous drain of both lists, ignoring the GC flag.
    pub fn dump_before_destroy(&self) {
        if !self.is_enabled() {
            return;
        }
        self.state.start_dump_before_destroy();
        self.handle_pgo_dump(true);
        self.handle_pgo_pre_dump(true);
        self.state.set_stop_and_notify();
        tracing::info!(
            methods = self.manager.lock_info().method_count(),
            "final profile drain finished"
        );
    }

    /// Reports every pre-dumped function as a strong root. `visit` returns
    /// the root's address after the GC moved it.
    pub fn iterate_pre_dump_roots(&self, mut visit: impl FnMut(FunctionHandle) -> FunctionHandle) {
        if !self.is_enabled() {
            return;
        }
        self.pre_dump.iterate(|_, func| {
            let moved = visit(func);
            if moved == func {
                return Visit::Keep;
            }
            self.rekey(func, Some(moved));
            Visit::Replace(moved)
        });
    }

    /// Sweep callback: drops dead queued functions, follows moved ones and
    /// rekeys the lineage table. Must run while the profiler is suspended.
    pub fn process_weak_references<V: WeakVisitor + ?Sized>(&self, visitor: &V) {
        if !self.is_enabled() {
            return;
        }
        for list in [&self.pre_dump, &self.dump] {
            list.iterate(|_, func| match visitor.visit_function(func) {
                Liveness::Alive => Visit::Keep,
                Liveness::Moved(moved) => {
                    self.rekey(func, Some(moved));
                    Visit::Replace(moved)
                }
                Liveness::Dead => {
                    self.rekey(func, None);
                    Visit::Remove
                }
            });
        }
        self.lineage.lock().process_weak_references(visitor);
    }

    /// Blocks until any running drain has parked.
    pub fn suspend_by_gc(&self) {
        if !self.is_enabled() {
            return;
        }
        self.state.suspend_by_gc();
    }

    /// Restarts a parked drain, or starts one for work queued meanwhile.
    pub fn resume_by_gc(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }
        if self.state.resume_by_gc() {
            self.spawn_dump_task();
        } else if !self.dump.is_empty() {
            self.try_dispatch_dump_task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sim::SimHost;
    use crate::{
        BuiltinShape, DefineOpType, ElementsTrack, FeedbackValue, FunctionKind, HandlerInfo, HandlerKind,
        IcHandler, Instruction, MethodTypeSet, OnHeapMode, OpType, Opcode, ProfilerConfig,
        ProtoTransitionType, ShapeModel, SlotOperand,
    };

    const ABC: &str = "app.abc";
    const ABC_CHECKSUM: u32 = 0xabc;
    const RECORD: &str = "com.app/main";

    fn config() -> ProfilerConfig {
        ProfilerConfig {
            enable: true,
            enable_profile_dump: true,
            background_dump: false,
            output: std::env::temp_dir()
                .join(format!("pgoprof-profiler-{}", uuid::Uuid::new_v4()))
                .join("profile.ap"),
            ..ProfilerConfig::default()
        }
    }

    fn setup_with(config: ProfilerConfig) -> (Arc<SimHost>, Arc<PgoProfiler<SimHost>>) {
        let host = Arc::new(SimHost::new());
        host.add_record(ABC, RECORD, RecordLookup::ClassId(3));
        let manager = Arc::new(PgoProfilerManager::new(config));
        let profiler = PgoProfiler::new(Arc::clone(&host), manager);
        (host, profiler)
    }

    fn setup() -> (Arc<SimHost>, Arc<PgoProfiler<SimHost>>) {
        setup_with(config())
    }

    fn function_info(method_id: u32) -> FunctionInfo {
        FunctionInfo {
            method_id,
            method_name: format!("m{method_id}"),
            abc_desc: ABC.to_string(),
            abc_checksum: ABC_CHECKSUM,
            record_name: RECORD.to_string(),
            has_profile_info: true,
            ..FunctionInfo::default()
        }
    }

    fn function(host: &SimHost, method_id: u32, code: Vec<Instruction>) -> FunctionHandle {
        let func = host.add_function(function_info(method_id));
        host.set_bytecode(func, code);
        func
    }

    fn ins(offset: u32, opcode: Opcode, slot: u8) -> Instruction {
        Instruction::new(offset, opcode, SlotOperand::Imm8(slot))
    }

    fn field() -> IcHandler {
        IcHandler::Simple(HandlerInfo::new(HandlerKind::Field))
    }

    fn abc_id(profiler: &PgoProfiler<SimHost>) -> ApEntityId {
        profiler.manager().panda_file_id(ABC).expect("module sampled")
    }

    fn types_of(profiler: &PgoProfiler<SimHost>, method_id: u32) -> Option<MethodTypeSet> {
        let abc = abc_id(profiler);
        let info = profiler.manager().lock_info();
        let record = ProfileType::RecordClass { abc_id: abc, id: 3 };
        info.details
            .method(&record, method_id)
            .map(|m| m.types.clone())
    }

    fn literal(profiler: &PgoProfiler<SimHost>, host: &SimHost, trace_id: u32) -> ShapeHandle {
        let root = host.new_root_shape();
        profiler.record_profile_type(root, ABC, ABC_CHECKSUM, trace_id);
        root
    }

    #[test]
    fn dump_samples_deep_property_sites() {
        let (host, profiler) = setup();
        let root = literal(&profiler, &host, 17);
        let child = host.transition(root, "x");
        let grandchild = host.transition(child, "y");
        let func = function(&host, 40, vec![ins(0, Opcode::LoadByName, 0)]);
        host.set_feedback(
            func,
            0,
            FeedbackValue::Mono {
                shape: grandchild,
                handler: field(),
            },
        );

        profiler.pgo_dump(func);
        assert_eq!(profiler.state(), DumpState::Stopped);
        assert_eq!(profiler.dump_len(), 0);

        let abc = abc_id(&profiler);
        let root_type = ProfileType::root(ProfileTypeKind::ObjectLiteral, abc, 17);
        let types = types_of(&profiler, 40).expect("method dumped");
        let slot = types.rw_slots.get(&0).expect("rw sample");
        assert!(!slot.is_mega());
        let sample = &slot.infos()[0];
        assert_eq!(sample.receiver_root, root_type);
        assert_ne!(sample.receiver, root_type);
        assert_eq!(sample.receiver.kind(), ProfileTypeKind::ObjectLiteral);

        let info = profiler.manager().lock_info();
        let tree = info.details.layouts().get(&root_type).expect("lineage tree");
        assert!(tree.nodes.len() >= 3);
        assert_eq!(info.details.record_pool().name(&ProfileType::RecordClass { abc_id: abc, id: 3 }), Some(RECORD));
    }

    #[test]
    fn too_many_receivers_escalate_to_mega() {
        let (host, profiler) = setup();
        let entries = (0..5)
            .map(|i| (literal(&profiler, &host, 100 + i), field()))
            .collect::<Vec<_>>();
        let func = function(
            &host,
            41,
            vec![ins(0, Opcode::LoadByName, 0), ins(4, Opcode::StoreByName, 1)],
        );
        host.set_feedback(func, 0, FeedbackValue::Poly(entries));
        host.set_feedback(func, 1, FeedbackValue::Hole);

        profiler.pgo_dump(func);
        let types = types_of(&profiler, 41).expect("method dumped");
        assert!(types.rw_slots[&0].is_mega());
        assert!(types.rw_slots[&4].is_mega());
    }

    #[test]
    fn unknown_receiver_lineage_records_nothing() {
        let (host, profiler) = setup();
        let stray = host.new_root_shape();
        let func = function(&host, 42, vec![ins(0, Opcode::LoadByName, 0)]);
        host.set_feedback(
            func,
            0,
            FeedbackValue::Mono {
                shape: stray,
                handler: field(),
            },
        );
        profiler.pgo_dump(func);
        let types = types_of(&profiler, 42).expect("method dumped");
        assert!(types.rw_slots.is_empty());
    }

    #[test]
    fn scalar_call_and_op_sites_are_recorded() {
        let (host, profiler) = setup();
        let callee = host.add_function(function_info(77));
        let func = function(
            &host,
            43,
            vec![
                ins(0, Opcode::Arith, 0),
                ins(2, Opcode::Call, 1),
                ins(4, Opcode::Call, 2),
                ins(6, Opcode::NewObjRange, 3),
                ins(8, Opcode::GetIterator, 4),
                Instruction::new(10, Opcode::Arith, SlotOperand::Imm8(SlotOperand::NO_SLOT_IMM8)),
            ],
        );
        host.set_feedback(func, 0, FeedbackValue::Int(OpType::INT.bits() as i32));
        host.set_feedback(func, 1, FeedbackValue::Function(callee));
        host.set_feedback(func, 2, FeedbackValue::Int(-5));
        host.set_feedback(func, 3, FeedbackValue::Int(12));
        host.set_feedback(func, 4, FeedbackValue::Int(2));

        profiler.pgo_dump(func);
        let abc = abc_id(&profiler);
        let types = types_of(&profiler, 43).expect("method dumped");
        assert_eq!(types.op_types.get(&0), Some(&OpType::INT));
        assert_eq!(types.op_types.len(), 1);
        assert_eq!(types.call_targets[&2], ProfileType::method(abc, 77));
        assert_eq!(types.call_targets[&4], ProfileType::BuiltinFunction { abc_id: abc, id: 5 });
        assert_eq!(
            types.call_targets[&6],
            ProfileType::root(ProfileTypeKind::Class, abc, 12)
        );
        assert_eq!(types.call_targets[&8], ProfileType::BuiltinFunction { abc_id: abc, id: 2 });
    }

    fn class_ctor(host: &SimHost, method_id: u32) -> (FunctionHandle, ShapeHandle, ShapeHandle) {
        let own = host.new_root_shape();
        let ihc = host.new_root_shape();
        let prototype = host.new_root_shape();
        let ctor = host.add_function(FunctionInfo {
            kind: FunctionKind::ClassConstructor,
            own_shape: Some(own),
            instance_shape: Some(ihc),
            prototype_shape: Some(prototype),
            ..function_info(method_id)
        });
        (ctor, ihc, prototype)
    }

    #[test]
    fn define_class_records_class_ctor_and_prototype() {
        let (host, profiler) = setup();
        let (ctor, _, _) = class_ctor(&host, 50);
        profiler.profile_define_class(ctor);

        let func = function(&host, 44, vec![ins(0, Opcode::DefineClass, 0)]);
        host.set_feedback(func, 0, FeedbackValue::ClassCell(Some(ctor)));
        profiler.pgo_dump(func);

        let abc = abc_id(&profiler);
        let class = ProfileType::root(ProfileTypeKind::Class, abc, 50);
        let expected = DefineOpType::new(class).with_class_parts(
            ProfileType::root(ProfileTypeKind::Constructor, abc, 50),
            ProfileType::root(ProfileTypeKind::Prototype, abc, 50),
        );
        let types = types_of(&profiler, 44).expect("method dumped");
        assert_eq!(types.defines[&0], expected);
        assert!(profiler.manager().lock_info().details.layouts().get(&class).is_some());
    }

    #[test]
    fn redefined_constructor_is_skipped() {
        let (host, profiler) = setup();
        let (ctor, ihc, _) = class_ctor(&host, 51);
        profiler.profile_define_class(ctor);
        profiler.profile_define_class(ctor);

        let func = function(
            &host,
            45,
            vec![ins(0, Opcode::DefineClass, 0), ins(2, Opcode::LoadByName, 1)],
        );
        host.set_feedback(func, 0, FeedbackValue::ClassCell(Some(ctor)));
        host.set_feedback(
            func,
            1,
            FeedbackValue::Mono {
                shape: ihc,
                handler: field(),
            },
        );
        profiler.pgo_dump(func);

        let types = types_of(&profiler, 45).expect("method dumped");
        assert!(types.defines.is_empty());
        assert!(types.rw_slots.is_empty());
    }

    #[test]
    fn array_literal_sites_carry_track_info() {
        let (host, profiler) = setup();
        let func = function(
            &host,
            46,
            vec![ins(0, Opcode::CreateArray, 0).with_trace_id(9)],
        );
        let track = host.add_track(TrackInfo {
            elements_kind: 3,
            length: 2,
            space_flag: TrackInfo::YOUNG_SPACE,
            cached_shape: None,
            owner: Some(func),
        });
        host.set_feedback(func, 0, FeedbackValue::Track(track));
        profiler.pgo_dump(func);

        let abc = abc_id(&profiler);
        let types = types_of(&profiler, 46).expect("method dumped");
        let expected = DefineOpType::new(ProfileType::root(ProfileTypeKind::ArrayLiteral, abc, 9))
            .with_elements(ElementsTrack {
                elements_kind: 3,
                length: 2,
                space_flag: TrackInfo::YOUNG_SPACE,
            });
        assert_eq!(types.defines[&0], expected);

        profiler.update_track_array_length(track, 1);
        assert_eq!(profiler.pre_dump_len(), 0);
        profiler.update_track_array_length(track, 8);
        assert_eq!(host.track_info(track).expect("track").length, 8);
        assert_eq!(profiler.pre_dump_len(), 1);

        profiler.update_track_space_flag(track, 1);
        profiler.update_track_space_flag(track, 2);
        assert_eq!(host.track_info(track).expect("track").space_flag, 1);
    }

    #[test]
    fn pre_dump_migrates_to_dump_and_drains_after_gc() {
        let (host, profiler) = setup();
        let func = function(&host, 47, Vec::new());
        profiler.pgo_pre_dump(func);
        profiler.pgo_pre_dump(func);
        assert_eq!((profiler.pre_dump_len(), profiler.dump_len()), (1, 0));

        profiler.suspend_by_gc();
        profiler.pgo_dump(func);
        assert_eq!((profiler.pre_dump_len(), profiler.dump_len()), (0, 1));
        assert!(types_of_opt(&profiler, 47).is_none());

        profiler.resume_by_gc();
        assert_eq!(profiler.dump_len(), 0);
        assert!(types_of(&profiler, 47).is_some());
    }

    fn types_of_opt(profiler: &PgoProfiler<SimHost>, method_id: u32) -> Option<MethodTypeSet> {
        profiler.manager().panda_file_id(ABC)?;
        types_of(profiler, method_id)
    }

    #[test]
    fn weak_processing_follows_moved_and_drops_dead_functions() {
        let (host, profiler) = setup();
        let moving = function(&host, 48, Vec::new());
        let dying = function(&host, 49, Vec::new());
        let root = literal(&profiler, &host, 5);

        profiler.suspend_by_gc();
        profiler.pgo_dump(moving);
        profiler.pgo_dump(dying);
        assert_eq!(profiler.dump_len(), 2);

        let moved = host.relocate_function(moving);
        host.kill_function(dying);
        let new_root = host.relocate_shape(root);
        profiler.process_weak_references(&*host);
        assert_eq!(profiler.dump_len(), 1);
        assert!(
            profiler
                .lineage
                .lock()
                .get_profile_type(new_root, false)
                .is_root()
        );

        profiler.resume_by_gc();
        assert_eq!(profiler.dump_len(), 0);
        assert!(types_of(&profiler, 48).is_some());
        assert!(types_of(&profiler, 49).is_none());
        assert!(!profiler.nodes.lock().contains_key(&moved));
    }

    #[test]
    fn pre_dump_roots_are_rewritten_when_moved() {
        let (host, profiler) = setup();
        let func = function(&host, 52, Vec::new());
        profiler.pgo_pre_dump(func);

        let moved = host.relocate_function(func);
        profiler.iterate_pre_dump_roots(|f| if f == func { moved } else { f });

        profiler.pgo_dump(moved);
        assert_eq!((profiler.pre_dump_len(), profiler.dump_len()), (0, 0));
        assert!(types_of(&profiler, 52).is_some());
    }

    #[test]
    fn disabled_profiler_ignores_everything() {
        let (host, profiler) = setup_with(ProfilerConfig {
            enable: false,
            ..config()
        });
        let root = host.new_root_shape();
        profiler.record_profile_type(root, ABC, ABC_CHECKSUM, 1);
        let func = function(&host, 53, Vec::new());
        profiler.pgo_pre_dump(func);
        profiler.pgo_dump(func);
        assert_eq!((profiler.pre_dump_len(), profiler.dump_len()), (0, 0));
        assert!(profiler.lineage.lock().is_empty());
        assert_eq!(profiler.manager().panda_file_id(ABC), None);
    }

    #[test]
    fn dump_before_destroy_drains_both_lists_despite_gc() {
        let (host, profiler) = setup();
        let parked = function(&host, 54, Vec::new());
        let queued = function(&host, 55, Vec::new());
        profiler.pgo_pre_dump(parked);
        profiler.suspend_by_gc();
        profiler.pgo_dump(queued);

        profiler.dump_before_destroy();
        assert_eq!(profiler.state(), DumpState::Stopped);
        assert_eq!(profiler.dump_len(), 0);
        assert!(types_of(&profiler, 54).is_some());
        assert!(types_of(&profiler, 55).is_some());
    }

    #[test]
    fn requested_save_writes_the_profile() {
        let cfg = config();
        let output = cfg.output.clone();
        let (host, profiler) = setup_with(cfg);
        let func = function(&host, 56, Vec::new());
        profiler.manager().request_save();
        profiler.pgo_dump(func);
        assert_eq!(profiler.manager().save_count(), 1);
        assert!(output.exists());
        assert_eq!(profiler.state(), DumpState::Stopped);
    }

    #[test]
    fn shared_functions_and_missing_records_are_skipped() {
        let (host, profiler) = setup();
        let shared = host.add_function(FunctionInfo {
            is_shared: true,
            ..function_info(57)
        });
        let orphan = host.add_function(FunctionInfo {
            record_name: "com.app/unknown".to_string(),
            ..function_info(58)
        });
        profiler.pgo_dump(shared);
        profiler.pgo_dump(orphan);
        assert!(types_of(&profiler, 57).is_none());
        assert!(profiler.manager().lock_info().method_count() == 0);
    }

    #[test]
    fn background_drain_completes() {
        let (host, profiler) = setup_with(ProfilerConfig {
            background_dump: true,
            ..config()
        });
        let func = function(&host, 59, Vec::new());
        profiler.pgo_dump(func);
        profiler.wait_for_dump();
        assert!(types_of(&profiler, 59).is_some());
    }

    #[test]
    fn root_identity_follows_dictionary_migration() {
        let (host, profiler) = setup();
        let root = literal(&profiler, &host, 8);
        let fresh = host.new_root_shape();
        profiler.update_root_profile_type(root, fresh);
        let lineage = profiler.lineage.lock();
        assert!(lineage.get_profile_type(root, false).is_none());
        assert_eq!(lineage.get_profile_type(fresh, false).kind(), ProfileTypeKind::ObjectLiteral);
    }

    #[test]
    fn proto_transition_is_recorded_for_object_create_pattern() {
        let (host, profiler) = setup();
        let (base, _, base_proto) = class_ctor(&host, 60);
        profiler.profile_define_class(base);

        let old_proto = host.new_root_shape();
        let sub = host.add_function(function_info(61));
        let trans_phc = host.new_root_shape();
        host.set_proto(trans_phc, base_proto);
        profiler.profile_proto_transition_prototype(sub, trans_phc, old_proto, base_proto);
        let ihc0 = host
            .function(sub)
            .and_then(|f| f.proto_trans_root)
            .expect("proto transition root");

        let trans_ihc = host.new_root_shape();
        host.set_proto(trans_ihc, trans_phc);
        profiler.profile_proto_transition_class(sub, trans_ihc);
        assert_eq!(host.fake_parent(trans_ihc), Some(ihc0));

        let func = function(&host, 62, vec![ins(0, Opcode::LoadByName, 0)]);
        host.set_feedback(
            func,
            0,
            FeedbackValue::Mono {
                shape: trans_ihc,
                handler: field(),
            },
        );
        profiler.pgo_dump(func);

        let abc = abc_id(&profiler);
        let ihc = ProfileType::root(ProfileTypeKind::Class, abc, 61);
        let base_type = ProfileType::root(ProfileTypeKind::Prototype, abc, 60);
        let expected = ProtoTransitionType {
            ihc,
            base_root: base_type,
            base: base_type,
            transition: ProfileType::root(ProfileTypeKind::TransitionClass, abc, 61),
            transition_proto: ProfileType::root(ProfileTypeKind::TransitionPrototype, abc, 61),
        };
        let info = profiler.manager().lock_info();
        assert_eq!(info.details.proto_transitions().get(&ihc), Some(&expected));
        let method = info
            .details
            .method(&ProfileType::RecordClass { abc_id: abc, id: 3 }, 62)
            .expect("method dumped");
        assert_eq!(method.types.rw_slots[&0].infos()[0].receiver_root, expected.transition);
    }

    #[test]
    fn builtin_and_global_receivers_are_recorded() {
        let (host, profiler) = setup();
        let array = host.new_builtin_shape(BuiltinShape::Array {
            js_type: 3,
            elements_kind: 1,
        });
        let typed = host.new_builtin_shape(BuiltinShape::TypedArray {
            js_type: 9,
            on_heap: true,
            root: true,
        });
        let global = host.new_root_shape();
        host.set_global_slot(global, 6);
        let func = function(
            &host,
            63,
            vec![
                ins(0, Opcode::LoadByValue, 0),
                ins(2, Opcode::LoadByValue, 1),
                ins(4, Opcode::LoadByName, 2),
            ],
        );
        host.set_feedback(
            func,
            0,
            FeedbackValue::Mono {
                shape: array,
                handler: IcHandler::Simple(HandlerInfo::new(HandlerKind::NormalElement)),
            },
        );
        host.set_feedback(
            func,
            1,
            FeedbackValue::Mono {
                shape: typed,
                handler: IcHandler::Simple(HandlerInfo::new(HandlerKind::TypedArrayElement {
                    on_heap: true,
                })),
            },
        );
        host.set_feedback(
            func,
            2,
            FeedbackValue::Mono {
                shape: global,
                handler: field(),
            },
        );
        profiler.pgo_dump(func);

        let abc = abc_id(&profiler);
        let types = types_of(&profiler, 63).expect("method dumped");
        let receiver = |offset: u32| types.rw_slots[&offset].infos()[0].receiver;
        assert_eq!(
            receiver(0),
            ProfileType::Builtins {
                abc_id: abc,
                id: 3 | 1 << 8 | 1 << 16,
            }
        );
        assert_eq!(
            receiver(2),
            ProfileType::Builtins {
                abc_id: abc,
                id: 9 | u32::from(OnHeapMode::OnHeap.to_u8()) << 8,
            }
        );
        assert_eq!(receiver(4), ProfileType::Globals { abc_id: abc, id: 6 });
    }

    #[test]
    fn instanceof_skips_custom_has_instance() {
        let (host, profiler) = setup();
        let custom = literal(&profiler, &host, 30);
        host.set_custom_has_instance(custom);
        let plain = literal(&profiler, &host, 31);
        let func = function(
            &host,
            64,
            vec![ins(0, Opcode::InstanceOf, 0), ins(2, Opcode::InstanceOf, 1)],
        );
        host.set_feedback(
            func,
            0,
            FeedbackValue::Mono {
                shape: custom,
                handler: field(),
            },
        );
        host.set_feedback(
            func,
            1,
            FeedbackValue::Mono {
                shape: plain,
                handler: field(),
            },
        );
        profiler.pgo_dump(func);

        let abc = abc_id(&profiler);
        let types = types_of(&profiler, 64).expect("method dumped");
        assert!(!types.rw_slots.contains_key(&0));
        assert_eq!(
            types.rw_slots[&2].infos()[0].receiver_root,
            ProfileType::root(ProfileTypeKind::ObjectLiteral, abc, 31)
        );
    }

    #[test]
    fn proto_transition_needs_fast_unlinked_prototype() {
        let (host, profiler) = setup();
        let (base, _, base_proto) = class_ctor(&host, 65);
        profiler.profile_define_class(base);

        let dictionary = host.add_function(function_info(66));
        let dict_phc = host.new_root_shape();
        host.set_proto(dict_phc, base_proto);
        host.set_dictionary(dict_phc);
        profiler.profile_proto_transition_prototype(dictionary, dict_phc, host.new_root_shape(), base_proto);
        assert!(host.function(dictionary).and_then(|f| f.proto_trans_root).is_none());

        let linked = host.add_function(function_info(67));
        let linked_phc = host.new_root_shape();
        let elsewhere = host.new_root_shape();
        host.set_fake_parent(linked_phc, elsewhere);
        profiler.profile_proto_transition_prototype(linked, linked_phc, host.new_root_shape(), base_proto);
        assert!(host.function(linked).and_then(|f| f.proto_trans_root).is_none());
        assert_eq!(host.fake_parent(linked_phc), Some(elsewhere));
    }

    #[test]
    fn functions_turned_native_are_no_longer_profiled() {
        let (host, profiler) = setup();
        let func = function(&host, 68, Vec::new());
        host.update_function(func, |info| info.is_native = true);
        profiler.pgo_dump(func);
        assert!(types_of(&profiler, 68).is_none());

        host.update_function(func, |info| info.is_native = false);
        profiler.pgo_dump(func);
        assert!(types_of(&profiler, 68).is_some());
    }
}
