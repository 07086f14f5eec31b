//! Feedback slot contents as the interpreter left them.

use super::{FunctionHandle, ShapeHandle, TrackHandle};

/// What an IC handler integer says about the cached access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerKind {
    #[default]
    Field,
    Accessor,
    NonExist,
    NormalElement,
    StringElement,
    TypedArrayElement { on_heap: bool },
    Other,
}

impl HandlerKind {
    pub fn is_element(self) -> bool {
        matches!(
            self,
            Self::NormalElement | Self::StringElement | Self::TypedArrayElement { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerInfo {
    pub kind: HandlerKind,
    /// A store went past the array length at least once.
    pub out_of_bounds: bool,
    /// Element loads the interpreter asked not to profile.
    pub skip_in_dump: bool,
}

impl HandlerInfo {
    pub fn new(kind: HandlerKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Second half of a monomorphic or polymorphic IC entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcHandler {
    Simple(HandlerInfo),
    Transition {
        target: Option<ShapeHandle>,
        info: Option<HandlerInfo>,
    },
    TransWithProto {
        target: Option<ShapeHandle>,
        info: Option<HandlerInfo>,
        proto_changed: bool,
    },
    Prototype {
        holder: ShapeHandle,
        accessor_method: u32,
        info: Option<HandlerInfo>,
        proto_changed: bool,
    },
    StoreAot {
        holder: ShapeHandle,
        proto_changed: bool,
    },
    /// Global load/store; never profiled.
    Global,
}

/// Contents of one feedback slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedbackValue {
    #[default]
    Undefined,
    /// The IC went megamorphic.
    Hole,
    /// Op-type bits, or a builtin id for call sites (zero or negative).
    Int(i32),
    /// Weak shape plus its handler in the next slot.
    Mono { shape: ShapeHandle, handler: IcHandler },
    Poly(Vec<(ShapeHandle, IcHandler)>),
    /// Polymorphic by-value entry keyed on a string or symbol.
    KeyedPoly(Vec<(ShapeHandle, IcHandler)>),
    Function(FunctionHandle),
    /// Weak reference to a class constructor.
    ClassCell(Option<FunctionHandle>),
    /// Weak reference to an object literal shape.
    LiteralShape(ShapeHandle),
    Track(TrackHandle),
}

/// Array literal metadata tracked across allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub elements_kind: u32,
    pub length: u32,
    pub space_flag: u8,
    pub cached_shape: Option<ShapeHandle>,
    /// Function whose literal site allocated the array.
    pub owner: Option<FunctionHandle>,
}

impl TrackInfo {
    pub const YOUNG_SPACE: u8 = 0;
}
