//! Method bodies as handed over by the binary parser.
//!
//! A [`MethodBody`] is a flat list of [`Instruction`]s plus a list of [`ExceptionRegion`]s
//! whose boundaries are expressed as *instruction indices* (not byte offsets). An end
//! position equal to the instruction count denotes the end of the method. Branch operands
//! are instruction indices as well.
//!
//! Besides the operands found in real bytecode, an [`Operand`] can carry one of the
//! [`PseudoOperand`]s the call-site rewriter inserts; they only ever appear in bodies that
//! went through the sandbox.

use bitflags::bitflags;
use strum::IntoStaticStr;

use crate::{
    metadata::{
        opcodes,
        references::MemberRef,
        signatures::{SignatureLocal, SignatureMethod, TypeSignature},
    },
    runtime::{RuntimeMethod, RuntimeType},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags describing the kind of an exception region, see ECMA-335 II.25.4.6
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

/// One exception region of a method body
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRegion {
    /// Kind of the handler
    pub flags: ExceptionHandlerFlags,
    /// Index of the first instruction of the protected block
    pub try_start: usize,
    /// Index one past the last instruction of the protected block
    pub try_end: usize,
    /// Index of the first instruction of the handler
    pub handler_start: usize,
    /// Index one past the last instruction of the handler
    pub handler_end: usize,
    /// Index of the first instruction of the filter, for filter regions
    pub filter_start: Option<usize>,
    /// The caught exception type, for typed catch regions
    pub catch_type: Option<TypeSignature>,
}

impl ExceptionRegion {
    /// True for a typed catch clause
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// True for a filter clause
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// True for a finally clause
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// True for a fault clause
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// True if both regions protect the same instruction range
    #[must_use]
    pub fn same_try(&self, other: &ExceptionRegion) -> bool {
        self.try_start == other.try_start && self.try_end == other.try_end
    }
}

/// Operands the sandbox inserts into rewritten bodies
#[derive(Debug, Clone, IntoStaticStr)]
pub enum PseudoOperand {
    /// The synthetic trailing argument holding the orchestrator
    OrchestratorArg,
    /// The general purpose temporary local
    TempObject,
    /// The temporary `object[]` local
    TempObjectArray,
    /// A callback method of the orchestrator, by name
    OrchestratorMethod(&'static str),
    /// The translated form of another sandboxed method, invoked through its wrapper
    TranslatedMethod(RuntimeMethod),
    /// An already resolved type
    ConcreteType(RuntimeType),
}

/// The operand of an instruction
#[derive(Debug, Clone, IntoStaticStr)]
pub enum Operand {
    /// No operand
    None,
    /// `ShortInlineI`
    Int8(i8),
    /// `InlineI`
    Int32(i32),
    /// `InlineI8`
    Int64(i64),
    /// `ShortInlineR`
    Float32(f32),
    /// `InlineR`
    Float64(f64),
    /// `InlineString`
    String(String),
    /// Branch target, an instruction index
    Target(usize),
    /// `InlineSwitch` targets, instruction indices
    Switch(Vec<usize>),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// A resolved member reference (`InlineMethod`, `InlineField`, `InlineType`, `InlineTok`)
    Member(MemberRef),
    /// A standalone signature (`InlineSig`)
    Signature(SignatureMethod),
    /// An operand inserted by the sandbox
    Pseudo(PseudoOperand),
}

impl Operand {
    /// The name of the operand kind, as reported in translation failures
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Pseudo(pseudo) => pseudo.into(),
            other => other.into(),
        }
    }
}

/// A single instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Byte offset in the original body, informational only
    pub offset: u32,
    /// The numeric opcode, two byte opcodes as `0xFEnn`
    pub opcode: u16,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction without a known offset
    #[must_use]
    pub fn new(opcode: u16, operand: Operand) -> Self {
        Instruction {
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Creates an instruction without operand
    #[must_use]
    pub fn simple(opcode: u16) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// The mnemonic of the opcode, `"???"` for opcodes outside the instruction set
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcodes::lookup(self.opcode).map_or("???", |info| info.mnemonic)
    }

    /// The member this instruction references, if any
    #[must_use]
    pub fn member(&self) -> Option<&MemberRef> {
        match &self.operand {
            Operand::Member(member) => Some(member),
            _ => None,
        }
    }
}

/// A method body: instructions, exception regions and locals
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// The instructions in order
    pub instructions: Vec<Instruction>,
    /// The exception regions, innermost first as in the metadata
    pub regions: Vec<ExceptionRegion>,
    /// Declared locals
    pub locals: Vec<SignatureLocal>,
    /// Declared maximum stack depth
    pub max_stack: u16,
}

impl MethodBody {
    /// Creates a body from instructions, without locals or regions
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        MethodBody {
            instructions,
            regions: Vec::new(),
            locals: Vec::new(),
            max_stack: 8,
        }
    }

    /// Sets the declared locals
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<SignatureLocal>) -> Self {
        self.locals = locals;
        self
    }

    /// Sets the exception regions
    #[must_use]
    pub fn with_regions(mut self, regions: Vec<ExceptionRegion>) -> Self {
        self.regions = regions;
        self
    }
}
