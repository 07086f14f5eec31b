//! Decoded bytecode as the recorder sees it.
//!
//! The host decodes its own instruction stream; only the opcode category,
//! the byte offset and the feedback slot operand matter here. Narrow and
//! wide encodings of one opcode map to the same [`Opcode`].

/// Feedback slot operand as encoded in the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOperand {
    Imm8(u8),
    Imm16(u16),
}

impl SlotOperand {
    /// `0xff` in an 8-bit slot means "no slot allocated".
    pub const NO_SLOT_IMM8: u8 = 0xFF;

    pub fn slot(self) -> Option<u32> {
        match self {
            Self::Imm8(Self::NO_SLOT_IMM8) => None,
            Self::Imm8(v) => Some(u32::from(v)),
            Self::Imm16(v) => Some(u32::from(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LoadByName,
    StoreByName,
    LoadByValue,
    StoreByValue,
    /// Arithmetic, comparison and truthiness sites with an op-type slot.
    Arith,
    Call,
    /// Calls without a feedback slot.
    CallInit,
    NewObjRange,
    DefineClass,
    DefineFunc,
    CreateObject,
    CreateArray,
    CreateEmptyArray,
    GetIterator,
    InstanceOf,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub slot: Option<SlotOperand>,
    /// Position of the literal inside its compiled unit, for object and
    /// array literal sites.
    pub trace_id: Option<u32>,
}

impl Instruction {
    pub fn new(offset: u32, opcode: Opcode, slot: SlotOperand) -> Self {
        Self {
            offset,
            opcode,
            slot: Some(slot),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: u32) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn slot_id(&self) -> Option<u32> {
        self.slot.and_then(SlotOperand::slot)
    }
}
