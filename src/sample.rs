//! Per-offset sample records collected for one method.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::ProfileType;

/// Bit set of primitive operand kinds seen by an arithmetic or comparison
/// site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct OpType(u32);

impl OpType {
    pub const NONE: Self = Self(0);
    pub const INT: Self = Self(1 << 0);
    pub const INT_OVERFLOW: Self = Self((1 << 1) | 1);
    pub const DOUBLE: Self = Self(1 << 2);
    pub const NUMBER: Self = Self(Self::INT.0 | Self::DOUBLE.0);
    pub const BOOLEAN: Self = Self(1 << 3);
    pub const UNDEFINED_OR_NULL: Self = Self(1 << 4);
    pub const SPECIAL: Self = Self(1 << 5);
    pub const STRING: Self = Self(1 << 6);
    pub const BIG_INT: Self = Self(1 << 7);
    pub const HEAP_OBJECT: Self = Self(1 << 8);
    pub const ANY: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Element tracking attached to array literal definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementsTrack {
    pub elements_kind: u32,
    pub length: u32,
    pub space_flag: u8,
}

/// Identity of a literal, class or function definition site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DefineOpType {
    pub profile_type: ProfileType,
    pub ctor: ProfileType,
    pub prototype: ProfileType,
    pub elements: Option<ElementsTrack>,
}

impl DefineOpType {
    pub fn new(profile_type: ProfileType) -> Self {
        Self {
            profile_type,
            ctor: ProfileType::None,
            prototype: ProfileType::None,
            elements: None,
        }
    }

    pub fn with_class_parts(mut self, ctor: ProfileType, prototype: ProfileType) -> Self {
        self.ctor = ctor;
        self.prototype = prototype;
        self
    }

    pub fn with_elements(mut self, elements: ElementsTrack) -> Self {
        self.elements = Some(elements);
        self
    }

    pub fn types(&self) -> [ProfileType; 3] {
        [self.profile_type, self.ctor, self.prototype]
    }

    fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        self.profile_type = f(self.profile_type);
        self.ctor = f(self.ctor);
        self.prototype = f(self.prototype);
    }
}

/// One property access observation.
///
/// Identity is the seven-field tuple; the prototype chain rides along and is
/// ignored when deduplicating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectInfo {
    pub receiver_root: ProfileType,
    pub receiver: ProfileType,
    pub holder_root: ProfileType,
    pub holder: ProfileType,
    pub holder_tra_root: ProfileType,
    pub holder_tra: ProfileType,
    pub accessor: ProfileType,
    /// `(root, shape)` pairs from the receiver up to, not including, the
    /// holder.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proto_chain: Vec<(ProfileType, ProfileType)>,
}

impl ObjectInfo {
    /// Receiver and holder are the same shape; no transition, no accessor.
    pub fn own(root: ProfileType, shape: ProfileType) -> Self {
        Self {
            receiver_root: root,
            receiver: shape,
            holder_root: root,
            holder: shape,
            holder_tra_root: root,
            holder_tra: shape,
            accessor: ProfileType::None,
            proto_chain: Vec::new(),
        }
    }

    pub fn key(&self) -> [ProfileType; 7] {
        [
            self.receiver_root,
            self.receiver,
            self.holder_root,
            self.holder,
            self.holder_tra_root,
            self.holder_tra,
            self.accessor,
        ]
    }

    fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        for slot in [
            &mut self.receiver_root,
            &mut self.receiver,
            &mut self.holder_root,
            &mut self.holder,
            &mut self.holder_tra_root,
            &mut self.holder_tra,
            &mut self.accessor,
        ] {
            *slot = f(*slot);
        }
        for (root, shape) in &mut self.proto_chain {
            *root = f(*root);
            *shape = f(*shape);
        }
    }
}

/// Read/write feedback at one offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RwSlot {
    /// Distinct tuples, sorted by [`ObjectInfo::key`].
    Poly(Vec<ObjectInfo>),
    Mega,
}

impl Default for RwSlot {
    fn default() -> Self {
        Self::Poly(Vec::new())
    }
}

impl RwSlot {
    pub fn is_mega(&self) -> bool {
        matches!(self, Self::Mega)
    }

    pub fn infos(&self) -> &[ObjectInfo] {
        match self {
            Self::Poly(infos) => infos,
            Self::Mega => &[],
        }
    }

    /// Adds one tuple. Exceeding `max_poly` distinct tuples escalates the
    /// slot to [`RwSlot::Mega`], which absorbs every later write.
    pub fn insert(&mut self, info: ObjectInfo, max_poly: usize) {
        let Self::Poly(infos) = self else {
            return;
        };
        let key = info.key();
        match infos.binary_search_by(|info| info.key().cmp(&key)) {
            Ok(pos) => {
                let existing = &mut infos[pos];
                if existing.proto_chain < info.proto_chain {
                    existing.proto_chain = info.proto_chain;
                }
            }
            Err(_) if infos.len() >= max_poly => *self = Self::Mega,
            Err(pos) => infos.insert(pos, info),
        }
    }

    pub fn merge(&mut self, other: &RwSlot, max_poly: usize) {
        match other {
            Self::Mega => *self = Self::Mega,
            Self::Poly(infos) => {
                for info in infos {
                    self.insert(info.clone(), max_poly);
                }
            }
        }
    }
}

/// Every sample recorded for one method, keyed by bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MethodTypeSet {
    pub op_types: BTreeMap<u32, OpType>,
    pub call_targets: BTreeMap<u32, ProfileType>,
    pub defines: BTreeMap<u32, DefineOpType>,
    pub rw_slots: BTreeMap<u32, RwSlot>,
}

impl MethodTypeSet {
    pub fn is_empty(&self) -> bool {
        self.op_types.is_empty()
            && self.call_targets.is_empty()
            && self.defines.is_empty()
            && self.rw_slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.op_types.len() + self.call_targets.len() + self.defines.len() + self.rw_slots.len()
    }

    pub fn add_op_type(&mut self, offset: u32, op: OpType) {
        self.op_types.insert(offset, op);
    }

    pub fn add_call_target(&mut self, offset: u32, target: ProfileType) {
        self.call_targets.insert(offset, target);
    }

    pub fn add_define(&mut self, offset: u32, define: DefineOpType) {
        self.defines.insert(offset, define);
    }

    pub fn add_object_info(&mut self, offset: u32, info: ObjectInfo, max_poly: usize) {
        self.rw_slots
            .entry(offset)
            .or_default()
            .insert(info, max_poly);
    }

    pub fn add_object_info_mega(&mut self, offset: u32) {
        self.rw_slots.insert(offset, RwSlot::Mega);
    }

    /// Folds `other` in: op types union, call/define conflicts keep the
    /// smaller value, read/write slots union with escalation.
    pub fn merge(&mut self, other: &MethodTypeSet, max_poly: usize) {
        for (&offset, &op) in &other.op_types {
            let entry = self.op_types.entry(offset).or_default();
            *entry = entry.union(op);
        }
        for (&offset, &target) in &other.call_targets {
            self.call_targets
                .entry(offset)
                .and_modify(|current| *current = (*current).min(target))
                .or_insert(target);
        }
        for (&offset, &define) in &other.defines {
            self.defines
                .entry(offset)
                .and_modify(|current| *current = (*current).min(define))
                .or_insert(define);
        }
        for (&offset, slot) in &other.rw_slots {
            self.rw_slots
                .entry(offset)
                .or_default()
                .merge(slot, max_poly);
        }
    }

    /// Rewrites every profile type through `f`. Read/write slots are rebuilt
    /// so their ordering stays canonical.
    pub fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType, max_poly: usize) {
        for target in self.call_targets.values_mut() {
            *target = f(*target);
        }
        for define in self.defines.values_mut() {
            define.map_types(f);
        }
        for slot in self.rw_slots.values_mut() {
            if let RwSlot::Poly(infos) = slot {
                let mut rebuilt = RwSlot::default();
                for mut info in std::mem::take(infos) {
                    info.map_types(f);
                    rebuilt.insert(info, max_poly);
                }
                *slot = rebuilt;
            }
        }
    }

    /// Every profile type referenced by this set, in serialization order.
    pub fn profile_types(&self) -> Vec<ProfileType> {
        let mut out = Vec::new();
        out.extend(self.call_targets.values().copied());
        for define in self.defines.values() {
            out.extend(define.types());
        }
        for slot in self.rw_slots.values() {
            for info in slot.infos() {
                out.extend(info.key());
                for (root, shape) in &info.proto_chain {
                    out.push(*root);
                    out.push(*shape);
                }
            }
        }
        out
    }
}
