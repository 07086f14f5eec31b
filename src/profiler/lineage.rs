//! Shape lineage tracking: which live shapes carry which profile identity.
//!
//! Roots are named explicitly by the class/literal registration hooks.
//! Every other shape in a lineage gets a child identity derived from its
//! root and its field layout, so two processes that build the same shapes
//! agree on the ids no matter in which order the shapes were observed.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ApEntityId, FieldDesc, Liveness, ProfileType, ProfileTypeKind, ShapeHandle, ShapeLayoutTable,
    ShapeModel, WeakVisitor,
};

#[derive(Debug, Default)]
pub struct ShapeLineageTracker {
    types: FxHashMap<ShapeHandle, ProfileType>,
    recorded_trans_roots: FxHashSet<ProfileType>,
    skip_ctor_ids: FxHashSet<u32>,
    defined_ctor_ids: FxHashSet<u32>,
}

impl ShapeLineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Names `shape` as a lineage root unless it already has an identity.
    ///
    /// A transition identity may be given to one shape only; later attempts
    /// are refused. Returns whether the identity was assigned.
    pub fn set_root_profile_type(
        &mut self,
        shape: ShapeHandle,
        abc_id: ApEntityId,
        id: u32,
        kind: ProfileTypeKind,
    ) -> bool {
        if !self.get_profile_type(shape, false).is_none() {
            return false;
        }
        let root = ProfileType::root(kind, abc_id, id);
        if root.is_transition() && !self.recorded_trans_roots.insert(root) {
            tracing::debug!(%root, "transition root already bound to another shape");
            return false;
        }
        self.types.insert(shape, root);
        true
    }

    /// Stored identity of `shape`. With `check`, identities derived from a
    /// constructor that was defined more than once read as `None`.
    pub fn get_profile_type(&self, shape: ShapeHandle, check: bool) -> ProfileType {
        let found = self.types.get(&shape).copied().unwrap_or_default();
        if check && self.is_skippable_object_type(found) {
            return ProfileType::None;
        }
        found
    }

    pub fn is_skippable_object_type(&self, t: ProfileType) -> bool {
        (t.is_generalized_class() || t.is_constructor() || t.is_generalized_prototype())
            && self.skip_ctor_ids.contains(&t.id())
    }

    /// Identity of the structural root of `shape`'s lineage.
    pub fn find_root_profile_type<M: ShapeModel + ?Sized>(
        &self,
        model: &M,
        shape: ShapeHandle,
    ) -> ProfileType {
        self.get_profile_type(model.root_of(shape), true)
    }

    /// Identity of `shape`, deriving a child of `root` when it has none.
    pub fn get_or_insert_profile_type<M: ShapeModel + ?Sized>(
        &mut self,
        model: &M,
        shape: ShapeHandle,
        root: ProfileType,
    ) -> ProfileType {
        let existing = self.get_profile_type(shape, false);
        if !existing.is_none() || !root.is_root() {
            return existing;
        }
        let child = root.child(child_id(root, &model.layout(shape)));
        self.types.insert(shape, child);
        child
    }

    /// Records `shape` and everything above it in its lineage tree,
    /// following the prototype lineage as well.
    pub fn update_layout<M: ShapeModel + ?Sized>(
        &mut self,
        model: &M,
        layouts: &mut ShapeLayoutTable,
        shape: ShapeHandle,
    ) {
        if !self.get_profile_type(shape, false).is_root()
            && let Some(parent) = model.parent(shape)
        {
            self.update_transition_layout(model, layouts, parent, shape);
            return;
        }
        let root = model.root_of(shape);
        let root_type = self.get_profile_type(root, true);
        if !root_type.is_root() {
            return;
        }
        self.link_proto_root(model, layouts, root, root_type);
        let current = self.get_or_insert_profile_type(model, shape, root_type);
        layouts.update_layout(root_type, current, &layout_of(model, shape));
    }

    /// Records the edge `parent -> child`, first replaying every unnamed
    /// ancestor of `parent` from the root down.
    pub fn update_transition_layout<M: ShapeModel + ?Sized>(
        &mut self,
        model: &M,
        layouts: &mut ShapeLayoutTable,
        parent: ShapeHandle,
        child: ShapeHandle,
    ) {
        let root = model.root_of(parent);
        let root_type = self.get_profile_type(root, true);
        if !root_type.is_root() {
            return;
        }
        // A child promoted to prototype is a root of its own now.
        if self.get_profile_type(child, false).is_root() {
            return;
        }

        let mut stack = vec![child, parent];
        let mut top = parent;
        while !self.get_profile_type(top, false).is_root() {
            match model.parent(top) {
                Some(next) => {
                    top = next;
                    stack.push(top);
                }
                None => break,
            }
        }

        self.link_proto_root(model, layouts, root, root_type);

        let Some(mut from) = stack.pop() else {
            return;
        };
        let mut from_type = self.get_profile_type(from, false);
        while let Some(to) = stack.pop() {
            let to_type = self.get_or_insert_profile_type(model, to, root_type);
            layouts.update_transition_layout(
                root_type,
                (from_type, &layout_of(model, from)),
                (to_type, &layout_of(model, to)),
            );
            from = to;
            from_type = to_type;
        }
    }

    fn link_proto_root<M: ShapeModel + ?Sized>(
        &mut self,
        model: &M,
        layouts: &mut ShapeLayoutTable,
        root: ShapeHandle,
        root_type: ProfileType,
    ) {
        let Some(proto_root) = model.proto_root_of(root) else {
            return;
        };
        if proto_root == root {
            return;
        }
        let proto_type = self.get_profile_type(proto_root, true);
        if proto_type.is_root() {
            layouts.add_root_pt_type(root_type, proto_type);
            self.update_layout(model, layouts, proto_root);
        }
    }

    pub fn insert_skip_ctor(&mut self, ctor_id: u32) {
        self.skip_ctor_ids.insert(ctor_id);
    }

    /// Returns `false` when the constructor was already defined once.
    pub fn insert_defined_ctor(&mut self, ctor_id: u32) -> bool {
        self.defined_ctor_ids.insert(ctor_id)
    }

    pub fn is_skippable_ctor(&self, ctor_id: u32) -> bool {
        ctor_id == 0 || self.skip_ctor_ids.contains(&ctor_id)
    }

    /// Moves a root identity from `old` to `new`, e.g. when an object left
    /// fast mode and got a fresh shape.
    pub fn update_root_profile_type(&mut self, old: ShapeHandle, new: ShapeHandle) {
        let old_type = self.get_profile_type(old, false);
        if old_type.is_root() {
            self.types.remove(&old);
            self.types.insert(new, old_type);
        }
    }

    /// Rekeys moved shapes and forgets dead ones.
    pub fn process_weak_references<V: WeakVisitor + ?Sized>(&mut self, visitor: &V) {
        let types = std::mem::take(&mut self.types);
        for (shape, t) in types {
            match visitor.visit_shape(shape) {
                Liveness::Alive => {
                    self.types.insert(shape, t);
                }
                Liveness::Moved(moved) => {
                    self.types.insert(moved, t);
                }
                Liveness::Dead => {}
            }
        }
    }

    pub fn clear(&mut self) {
        self.types.clear();
        self.recorded_trans_roots.clear();
        self.skip_ctor_ids.clear();
        self.defined_ctor_ids.clear();
    }
}

pub(crate) fn layout_of<M: ShapeModel + ?Sized>(model: &M, shape: ShapeHandle) -> Vec<FieldDesc> {
    if model.is_dictionary(shape) {
        return Vec::new();
    }
    model.layout(shape)
}

/// Content address of a lineage member: root identity plus field layout.
fn child_id(root: ProfileType, fields: &[FieldDesc]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&root.to_raw().to_le_bytes());
    hasher.update(&root.abc_id().unwrap_or_default().to_le_bytes());
    for field in fields {
        hasher.update(&(field.key.len() as u32).to_le_bytes());
        hasher.update(field.key.as_bytes());
        hasher.update(&[field.rep.to_u8()]);
    }
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
