//! Profile type identities: shape lineages, methods, records, builtins.
//!
//! A [`ProfileType`] names one thing the profiler observed. Shape kinds carry
//! a [`ShapeKey`] whose `root` bit separates lineage roots from the
//! content-addressed children derived inside a lineage.
//!
//! On the wire a profile type is a `u64` (id, kind, root bit) plus the
//! module (`abc`) id stored next to it:
//!
//! ```text
//! bits  0..32  id
//! bits 32..40  kind
//! bit  40      root
//! ```

use serde::Serialize;

use std::fmt;
use std::str::FromStr;

/// Dense id of an entity inside a profile: module ids, type-pool indices.
pub type ApEntityId = u32;

const KIND_SHIFT: u32 = 32;
const ROOT_BIT: u64 = 1 << 40;
const KNOWN_BITS: u64 = ROOT_BIT | (0xFF << KIND_SHIFT) | 0xFFFF_FFFF;

/// Kind tags. The discriminants are part of the `.ap` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProfileTypeKind {
    None = 0,
    Class = 1,
    ObjectLiteral = 2,
    ArrayLiteral = 3,
    Builtins = 4,
    Method = 5,
    BuiltinFunction = 6,
    RecordClass = 7,
    Prototype = 8,
    Constructor = 9,
    Mega = 10,
    Globals = 11,
    TransitionClass = 12,
    TransitionPrototype = 13,
    Napi = 14,
}

impl ProfileTypeKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::Class,
            2 => Self::ObjectLiteral,
            3 => Self::ArrayLiteral,
            4 => Self::Builtins,
            5 => Self::Method,
            6 => Self::BuiltinFunction,
            7 => Self::RecordClass,
            8 => Self::Prototype,
            9 => Self::Constructor,
            10 => Self::Mega,
            11 => Self::Globals,
            12 => Self::TransitionClass,
            13 => Self::TransitionPrototype,
            14 => Self::Napi,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Class => "class",
            Self::ObjectLiteral => "object_literal",
            Self::ArrayLiteral => "array_literal",
            Self::Builtins => "builtins",
            Self::Method => "method",
            Self::BuiltinFunction => "builtin_function",
            Self::RecordClass => "record",
            Self::Prototype => "prototype",
            Self::Constructor => "constructor",
            Self::Mega => "mega",
            Self::Globals => "globals",
            Self::TransitionClass => "transition_class",
            Self::TransitionPrototype => "transition_prototype",
            Self::Napi => "napi",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        (0..=14u8)
            .filter_map(Self::from_u8)
            .find(|kind| kind.name() == name)
    }
}

/// Identity fields of a shape lineage member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShapeKey {
    pub abc_id: ApEntityId,
    pub id: u32,
    pub root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileType {
    #[default]
    None,
    Class(ShapeKey),
    ObjectLiteral(ShapeKey),
    ArrayLiteral(ShapeKey),
    Prototype(ShapeKey),
    Constructor(ShapeKey),
    TransitionClass(ShapeKey),
    TransitionPrototype(ShapeKey),
    Napi(ShapeKey),
    Method { abc_id: ApEntityId, id: u32 },
    BuiltinFunction { abc_id: ApEntityId, id: u32 },
    RecordClass { abc_id: ApEntityId, id: u32 },
    Builtins { abc_id: ApEntityId, id: u32 },
    Globals { abc_id: ApEntityId, id: u32 },
    Mega,
}

impl ProfileType {
    /// Record id shared by every record of a bundled compiled unit.
    pub const RECORD_ID_FOR_BUNDLE: u32 = 1;

    /// Builds a profile type from its wire fields. `root` is ignored for
    /// kinds that are not shape lineages.
    pub fn from_parts(kind: ProfileTypeKind, abc_id: ApEntityId, id: u32, root: bool) -> Self {
        let key = ShapeKey { abc_id, id, root };
        match kind {
            ProfileTypeKind::None => Self::None,
            ProfileTypeKind::Mega => Self::Mega,
            ProfileTypeKind::Class => Self::Class(key),
            ProfileTypeKind::ObjectLiteral => Self::ObjectLiteral(key),
            ProfileTypeKind::ArrayLiteral => Self::ArrayLiteral(key),
            ProfileTypeKind::Prototype => Self::Prototype(key),
            ProfileTypeKind::Constructor => Self::Constructor(key),
            ProfileTypeKind::TransitionClass => Self::TransitionClass(key),
            ProfileTypeKind::TransitionPrototype => Self::TransitionPrototype(key),
            ProfileTypeKind::Napi => Self::Napi(key),
            ProfileTypeKind::Method => Self::Method { abc_id, id },
            ProfileTypeKind::BuiltinFunction => Self::BuiltinFunction { abc_id, id },
            ProfileTypeKind::RecordClass => Self::RecordClass { abc_id, id },
            ProfileTypeKind::Builtins => Self::Builtins { abc_id, id },
            ProfileTypeKind::Globals => Self::Globals { abc_id, id },
        }
    }

    /// A lineage root of the given kind.
    pub fn root(kind: ProfileTypeKind, abc_id: ApEntityId, id: u32) -> Self {
        Self::from_parts(kind, abc_id, id, true)
    }

    pub fn method(abc_id: ApEntityId, id: u32) -> Self {
        Self::Method { abc_id, id }
    }

    pub fn kind(&self) -> ProfileTypeKind {
        match self {
            Self::None => ProfileTypeKind::None,
            Self::Class(_) => ProfileTypeKind::Class,
            Self::ObjectLiteral(_) => ProfileTypeKind::ObjectLiteral,
            Self::ArrayLiteral(_) => ProfileTypeKind::ArrayLiteral,
            Self::Prototype(_) => ProfileTypeKind::Prototype,
            Self::Constructor(_) => ProfileTypeKind::Constructor,
            Self::TransitionClass(_) => ProfileTypeKind::TransitionClass,
            Self::TransitionPrototype(_) => ProfileTypeKind::TransitionPrototype,
            Self::Napi(_) => ProfileTypeKind::Napi,
            Self::Method { .. } => ProfileTypeKind::Method,
            Self::BuiltinFunction { .. } => ProfileTypeKind::BuiltinFunction,
            Self::RecordClass { .. } => ProfileTypeKind::RecordClass,
            Self::Builtins { .. } => ProfileTypeKind::Builtins,
            Self::Globals { .. } => ProfileTypeKind::Globals,
            Self::Mega => ProfileTypeKind::Mega,
        }
    }

    pub fn shape_key(&self) -> Option<ShapeKey> {
        match self {
            Self::Class(key)
            | Self::ObjectLiteral(key)
            | Self::ArrayLiteral(key)
            | Self::Prototype(key)
            | Self::Constructor(key)
            | Self::TransitionClass(key)
            | Self::TransitionPrototype(key)
            | Self::Napi(key) => Some(*key),
            _ => None,
        }
    }

    pub fn abc_id(&self) -> Option<ApEntityId> {
        match self {
            Self::None | Self::Mega => None,
            Self::Method { abc_id, .. }
            | Self::BuiltinFunction { abc_id, .. }
            | Self::RecordClass { abc_id, .. }
            | Self::Builtins { abc_id, .. }
            | Self::Globals { abc_id, .. } => Some(*abc_id),
            other => other.shape_key().map(|key| key.abc_id),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Self::None | Self::Mega => 0,
            Self::Method { id, .. }
            | Self::BuiltinFunction { id, .. }
            | Self::RecordClass { id, .. }
            | Self::Builtins { id, .. }
            | Self::Globals { id, .. } => *id,
            other => other.shape_key().map(|key| key.id).unwrap_or(0),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_mega(&self) -> bool {
        matches!(self, Self::Mega)
    }

    pub fn is_root(&self) -> bool {
        self.shape_key().is_some_and(|key| key.root)
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, Self::TransitionClass(_) | Self::TransitionPrototype(_))
    }

    pub fn is_transition_class(&self) -> bool {
        matches!(self, Self::TransitionClass(_))
    }

    pub fn is_generalized_class(&self) -> bool {
        matches!(self, Self::Class(_) | Self::TransitionClass(_))
    }

    pub fn is_generalized_prototype(&self) -> bool {
        matches!(self, Self::Prototype(_) | Self::TransitionPrototype(_))
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self, Self::Constructor(_))
    }

    /// A non-root member of this lineage with the given id.
    pub fn child(&self, id: u32) -> Self {
        match self.abc_id() {
            Some(abc_id) => Self::from_parts(self.kind(), abc_id, id, false),
            None => *self,
        }
    }

    /// Rewrites the module id through `map`.
    pub fn map_abc_id(self, map: impl Fn(ApEntityId) -> ApEntityId) -> Self {
        match self.abc_id() {
            Some(abc_id) => Self::from_parts(self.kind(), map(abc_id), self.id(), self.is_root()),
            None => self,
        }
    }

    pub fn to_raw(&self) -> u64 {
        let mut raw = u64::from(self.id()) | (u64::from(self.kind() as u8) << KIND_SHIFT);
        if self.is_root() {
            raw |= ROOT_BIT;
        }
        raw
    }

    /// Inverse of [`ProfileType::to_raw`]. Unknown kinds and stray bits are
    /// rejected.
    pub fn from_raw(raw: u64, abc_id: ApEntityId) -> Option<Self> {
        if raw & !KNOWN_BITS != 0 {
            return None;
        }
        let kind = ProfileTypeKind::from_u8(((raw >> KIND_SHIFT) & 0xFF) as u8)?;
        let id = (raw & 0xFFFF_FFFF) as u32;
        Some(Self::from_parts(kind, abc_id, id, raw & ROOT_BIT != 0))
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.abc_id() {
            None => f.write_str(self.kind().name()),
            Some(abc_id) => {
                write!(f, "{}({}.{}", self.kind().name(), abc_id, self.id())?;
                if self.is_root() {
                    f.write_str(".r")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for ProfileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((name, rest)) = s.split_once('(') else {
            return match ProfileTypeKind::from_name(s) {
                Some(ProfileTypeKind::None) => Ok(Self::None),
                Some(ProfileTypeKind::Mega) => Ok(Self::Mega),
                _ => Err(format!("invalid profile type {s:?}")),
            };
        };
        let kind = ProfileTypeKind::from_name(name)
            .filter(|k| !matches!(k, ProfileTypeKind::None | ProfileTypeKind::Mega))
            .ok_or_else(|| format!("unknown profile type kind {name:?}"))?;
        let body = rest
            .strip_suffix(')')
            .ok_or_else(|| format!("unterminated profile type {s:?}"))?;
        let mut parts = body.split('.');
        let abc_id = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| format!("invalid abc id in {s:?}"))?;
        let id = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| format!("invalid id in {s:?}"))?;
        let root = match parts.next() {
            None => false,
            Some("r") => true,
            Some(other) => return Err(format!("invalid root marker {other:?} in {s:?}")),
        };
        if parts.next().is_some() {
            return Err(format!("trailing fields in {s:?}"));
        }
        Ok(Self::from_parts(kind, abc_id, id, root))
    }
}
