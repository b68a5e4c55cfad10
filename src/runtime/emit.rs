//! The dynamic code emission facility.
//!
//! [`MethodBuilder`] is the host's equivalent of an IL generator: it accepts [`OpCode`]s with
//! [`EmitOperand`]s, hands out [`Label`]s, declares locals and tracks exception blocks with the
//! usual begin/end protocol. [`MethodBuilder::finish`] produces an immutable
//! [`DynamicMethod`] the interpreter can run.
//!
//! The [`OpCode`] vocabulary is the subset of ECMA-335 the runtime executes. Opcodes that only
//! make sense for native code generation (`jmp`, `calli`, `localloc`, block copies, typed
//! references, `arglist`) are absent; code using them is emitted as `nop`.
//!
//! Exception blocks follow the emitter protocol: `begin_exception_block` opens a protected
//! block, each `begin_*_block` closes the previous part and opens a handler, and
//! `end_exception_block` closes the construct. Clauses are recorded when a construct closes,
//! so nested constructs precede the constructs enclosing them.

use std::{fmt, sync::Arc};

use strum::EnumIter;

use crate::{
    error::EmulationError,
    runtime::{
        types::{RuntimeField, RuntimeMethod, RuntimeType},
        value::FrameIdentity,
    },
    Result,
};

macro_rules! define_emit_opcodes {
    ($($name:ident = $value:literal, $mnemonic:literal;)*) => {
        /// An opcode the runtime can execute
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
        #[repr(u16)]
        pub enum OpCode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $name = $value,
            )*
        }

        impl OpCode {
            /// The textual mnemonic
            #[must_use]
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => $mnemonic,)*
                }
            }
        }
    };
}

define_emit_opcodes! {
    Nop = 0x00, "nop";
    Break = 0x01, "break";
    Ldarg0 = 0x02, "ldarg.0";
    Ldarg1 = 0x03, "ldarg.1";
    Ldarg2 = 0x04, "ldarg.2";
    Ldarg3 = 0x05, "ldarg.3";
    Ldloc0 = 0x06, "ldloc.0";
    Ldloc1 = 0x07, "ldloc.1";
    Ldloc2 = 0x08, "ldloc.2";
    Ldloc3 = 0x09, "ldloc.3";
    Stloc0 = 0x0A, "stloc.0";
    Stloc1 = 0x0B, "stloc.1";
    Stloc2 = 0x0C, "stloc.2";
    Stloc3 = 0x0D, "stloc.3";
    LdargS = 0x0E, "ldarg.s";
    LdargaS = 0x0F, "ldarga.s";
    StargS = 0x10, "starg.s";
    LdlocS = 0x11, "ldloc.s";
    LdlocaS = 0x12, "ldloca.s";
    StlocS = 0x13, "stloc.s";
    Ldnull = 0x14, "ldnull";
    LdcI4M1 = 0x15, "ldc.i4.m1";
    LdcI40 = 0x16, "ldc.i4.0";
    LdcI41 = 0x17, "ldc.i4.1";
    LdcI42 = 0x18, "ldc.i4.2";
    LdcI43 = 0x19, "ldc.i4.3";
    LdcI44 = 0x1A, "ldc.i4.4";
    LdcI45 = 0x1B, "ldc.i4.5";
    LdcI46 = 0x1C, "ldc.i4.6";
    LdcI47 = 0x1D, "ldc.i4.7";
    LdcI48 = 0x1E, "ldc.i4.8";
    LdcI4S = 0x1F, "ldc.i4.s";
    LdcI4 = 0x20, "ldc.i4";
    LdcI8 = 0x21, "ldc.i8";
    LdcR4 = 0x22, "ldc.r4";
    LdcR8 = 0x23, "ldc.r8";
    Dup = 0x25, "dup";
    Pop = 0x26, "pop";
    Call = 0x28, "call";
    Ret = 0x2A, "ret";
    BrS = 0x2B, "br.s";
    BrfalseS = 0x2C, "brfalse.s";
    BrtrueS = 0x2D, "brtrue.s";
    BeqS = 0x2E, "beq.s";
    BgeS = 0x2F, "bge.s";
    BgtS = 0x30, "bgt.s";
    BleS = 0x31, "ble.s";
    BltS = 0x32, "blt.s";
    BneUnS = 0x33, "bne.un.s";
    BgeUnS = 0x34, "bge.un.s";
    BgtUnS = 0x35, "bgt.un.s";
    BleUnS = 0x36, "ble.un.s";
    BltUnS = 0x37, "blt.un.s";
    Br = 0x38, "br";
    Brfalse = 0x39, "brfalse";
    Brtrue = 0x3A, "brtrue";
    Beq = 0x3B, "beq";
    Bge = 0x3C, "bge";
    Bgt = 0x3D, "bgt";
    Ble = 0x3E, "ble";
    Blt = 0x3F, "blt";
    BneUn = 0x40, "bne.un";
    BgeUn = 0x41, "bge.un";
    BgtUn = 0x42, "bgt.un";
    BleUn = 0x43, "ble.un";
    BltUn = 0x44, "blt.un";
    Switch = 0x45, "switch";
    LdindI1 = 0x46, "ldind.i1";
    LdindU1 = 0x47, "ldind.u1";
    LdindI2 = 0x48, "ldind.i2";
    LdindU2 = 0x49, "ldind.u2";
    LdindI4 = 0x4A, "ldind.i4";
    LdindU4 = 0x4B, "ldind.u4";
    LdindI8 = 0x4C, "ldind.i8";
    LdindI = 0x4D, "ldind.i";
    LdindR4 = 0x4E, "ldind.r4";
    LdindR8 = 0x4F, "ldind.r8";
    LdindRef = 0x50, "ldind.ref";
    StindRef = 0x51, "stind.ref";
    StindI1 = 0x52, "stind.i1";
    StindI2 = 0x53, "stind.i2";
    StindI4 = 0x54, "stind.i4";
    StindI8 = 0x55, "stind.i8";
    StindR4 = 0x56, "stind.r4";
    StindR8 = 0x57, "stind.r8";
    Add = 0x58, "add";
    Sub = 0x59, "sub";
    Mul = 0x5A, "mul";
    Div = 0x5B, "div";
    DivUn = 0x5C, "div.un";
    Rem = 0x5D, "rem";
    RemUn = 0x5E, "rem.un";
    And = 0x5F, "and";
    Or = 0x60, "or";
    Xor = 0x61, "xor";
    Shl = 0x62, "shl";
    Shr = 0x63, "shr";
    ShrUn = 0x64, "shr.un";
    Neg = 0x65, "neg";
    Not = 0x66, "not";
    ConvI1 = 0x67, "conv.i1";
    ConvI2 = 0x68, "conv.i2";
    ConvI4 = 0x69, "conv.i4";
    ConvI8 = 0x6A, "conv.i8";
    ConvR4 = 0x6B, "conv.r4";
    ConvR8 = 0x6C, "conv.r8";
    ConvU4 = 0x6D, "conv.u4";
    ConvU8 = 0x6E, "conv.u8";
    Callvirt = 0x6F, "callvirt";
    Ldobj = 0x71, "ldobj";
    Ldstr = 0x72, "ldstr";
    Newobj = 0x73, "newobj";
    Castclass = 0x74, "castclass";
    Isinst = 0x75, "isinst";
    ConvRUn = 0x76, "conv.r.un";
    Unbox = 0x79, "unbox";
    Throw = 0x7A, "throw";
    Ldfld = 0x7B, "ldfld";
    Ldflda = 0x7C, "ldflda";
    Stfld = 0x7D, "stfld";
    Ldsfld = 0x7E, "ldsfld";
    Ldsflda = 0x7F, "ldsflda";
    Stsfld = 0x80, "stsfld";
    Stobj = 0x81, "stobj";
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un";
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un";
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un";
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un";
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un";
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un";
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un";
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un";
    ConvOvfIUn = 0x8A, "conv.ovf.i.un";
    ConvOvfUUn = 0x8B, "conv.ovf.u.un";
    Box = 0x8C, "box";
    Newarr = 0x8D, "newarr";
    Ldlen = 0x8E, "ldlen";
    Ldelema = 0x8F, "ldelema";
    LdelemI1 = 0x90, "ldelem.i1";
    LdelemU1 = 0x91, "ldelem.u1";
    LdelemI2 = 0x92, "ldelem.i2";
    LdelemU2 = 0x93, "ldelem.u2";
    LdelemI4 = 0x94, "ldelem.i4";
    LdelemU4 = 0x95, "ldelem.u4";
    LdelemI8 = 0x96, "ldelem.i8";
    LdelemI = 0x97, "ldelem.i";
    LdelemR4 = 0x98, "ldelem.r4";
    LdelemR8 = 0x99, "ldelem.r8";
    LdelemRef = 0x9A, "ldelem.ref";
    StelemI = 0x9B, "stelem.i";
    StelemI1 = 0x9C, "stelem.i1";
    StelemI2 = 0x9D, "stelem.i2";
    StelemI4 = 0x9E, "stelem.i4";
    StelemI8 = 0x9F, "stelem.i8";
    StelemR4 = 0xA0, "stelem.r4";
    StelemR8 = 0xA1, "stelem.r8";
    StelemRef = 0xA2, "stelem.ref";
    Ldelem = 0xA3, "ldelem";
    Stelem = 0xA4, "stelem";
    UnboxAny = 0xA5, "unbox.any";
    ConvOvfI1 = 0xB3, "conv.ovf.i1";
    ConvOvfU1 = 0xB4, "conv.ovf.u1";
    ConvOvfI2 = 0xB5, "conv.ovf.i2";
    ConvOvfU2 = 0xB6, "conv.ovf.u2";
    ConvOvfI4 = 0xB7, "conv.ovf.i4";
    ConvOvfU4 = 0xB8, "conv.ovf.u4";
    ConvOvfI8 = 0xB9, "conv.ovf.i8";
    ConvOvfU8 = 0xBA, "conv.ovf.u8";
    Ckfinite = 0xC3, "ckfinite";
    Ldtoken = 0xD0, "ldtoken";
    ConvU2 = 0xD1, "conv.u2";
    ConvU1 = 0xD2, "conv.u1";
    ConvI = 0xD3, "conv.i";
    ConvOvfI = 0xD4, "conv.ovf.i";
    ConvOvfU = 0xD5, "conv.ovf.u";
    AddOvf = 0xD6, "add.ovf";
    AddOvfUn = 0xD7, "add.ovf.un";
    MulOvf = 0xD8, "mul.ovf";
    MulOvfUn = 0xD9, "mul.ovf.un";
    SubOvf = 0xDA, "sub.ovf";
    SubOvfUn = 0xDB, "sub.ovf.un";
    Endfinally = 0xDC, "endfinally";
    Leave = 0xDD, "leave";
    LeaveS = 0xDE, "leave.s";
    StindI = 0xDF, "stind.i";
    ConvU = 0xE0, "conv.u";
    Ceq = 0xFE01, "ceq";
    Cgt = 0xFE02, "cgt";
    CgtUn = 0xFE03, "cgt.un";
    Clt = 0xFE04, "clt";
    CltUn = 0xFE05, "clt.un";
    Ldftn = 0xFE06, "ldftn";
    Ldvirtftn = 0xFE07, "ldvirtftn";
    Ldarg = 0xFE09, "ldarg";
    Ldarga = 0xFE0A, "ldarga";
    Starg = 0xFE0B, "starg";
    Ldloc = 0xFE0C, "ldloc";
    Ldloca = 0xFE0D, "ldloca";
    Stloc = 0xFE0E, "stloc";
    Endfilter = 0xFE11, "endfilter";
    Unaligned = 0xFE12, "unaligned.";
    Volatile = 0xFE13, "volatile.";
    Tail = 0xFE14, "tail.";
    Initobj = 0xFE15, "initobj";
    Constrained = 0xFE16, "constrained.";
    No = 0xFE19, "no.";
    Rethrow = 0xFE1A, "rethrow";
    Sizeof = 0xFE1C, "sizeof";
    Readonly = 0xFE1E, "readonly.";
}

impl OpCode {
    /// The numeric value, `0xFEnn` for two byte opcodes
    #[must_use]
    pub fn value(self) -> u16 {
        self as u16
    }

    /// True for the prefixes, which execute as no-ops
    #[must_use]
    pub fn is_prefix(self) -> bool {
        matches!(
            self,
            OpCode::Unaligned
                | OpCode::Volatile
                | OpCode::Tail
                | OpCode::Constrained
                | OpCode::No
                | OpCode::Readonly
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A branch target, valid in the builder that defined it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    /// The label id
    #[must_use]
    pub fn id(self) -> usize {
        self.0
    }
}

/// The operand of an emitted instruction
#[derive(Debug, Clone)]
pub enum EmitOperand {
    /// No operand
    None,
    /// 32-bit integer, also the 8-bit immediate forms
    I4(i32),
    /// 64-bit integer
    I8(i64),
    /// Floating point, also `ldc.r4`
    R8(f64),
    /// String literal
    Str(Arc<str>),
    /// Branch target
    Label(Label),
    /// `switch` targets
    Labels(Vec<Label>),
    /// Local variable index
    Local(usize),
    /// Argument index
    Arg(usize),
    /// Method or constructor
    Method(RuntimeMethod),
    /// Field
    Field(RuntimeField),
    /// Type
    Type(RuntimeType),
    /// A method of the orchestrator, called with `arity` stack values
    Callback {
        /// Name of the orchestrator method
        name: &'static str,
        /// Number of values popped, the orchestrator itself included
        arity: usize,
    },
    /// Invokes the delegate below `arity` argument values on the stack
    Invoke {
        /// Pending index of the sandboxed method the delegate belongs to
        index: usize,
        /// Number of argument values
        arity: usize,
    },
}

impl EmitOperand {
    /// The operand kind, as reported in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            EmitOperand::None => "None",
            EmitOperand::I4(_) => "I4",
            EmitOperand::I8(_) => "I8",
            EmitOperand::R8(_) => "R8",
            EmitOperand::Str(_) => "Str",
            EmitOperand::Label(_) => "Label",
            EmitOperand::Labels(_) => "Labels",
            EmitOperand::Local(_) => "Local",
            EmitOperand::Arg(_) => "Arg",
            EmitOperand::Method(_) => "Method",
            EmitOperand::Field(_) => "Field",
            EmitOperand::Type(_) => "Type",
            EmitOperand::Callback { .. } => "Callback",
            EmitOperand::Invoke { .. } => "Invoke",
        }
    }
}

/// One emitted instruction
#[derive(Debug, Clone)]
pub struct EmittedInstruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand
    pub operand: EmitOperand,
}

/// The handler kind of an exception clause
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    /// Typed catch, `None` catches everything
    Catch(Option<RuntimeType>),
    /// Filtered catch
    Filter {
        /// Code index of the first filter instruction
        filter_start: usize,
    },
    /// Finally handler
    Finally,
    /// Fault handler, runs only when an exception leaves the protected block
    Fault,
}

/// An exception clause over code indices of a [`DynamicMethod`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionClause {
    /// The handler kind
    pub kind: ClauseKind,
    /// First protected instruction
    pub try_start: usize,
    /// One past the last protected instruction
    pub try_end: usize,
    /// First handler instruction
    pub handler_start: usize,
    /// One past the last handler instruction
    pub handler_end: usize,
}

impl ExceptionClause {
    /// True if the protected block covers `index`
    #[must_use]
    pub fn protects(&self, index: usize) -> bool {
        self.try_start <= index && index < self.try_end
    }

    /// True if the handler covers `index`
    #[must_use]
    pub fn handles(&self, index: usize) -> bool {
        self.handler_start <= index && index < self.handler_end
    }
}

/// Counters of the exception block protocol, kept for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    /// Protected blocks opened
    pub exception_blocks_begun: usize,
    /// Constructs closed
    pub exception_blocks_ended: usize,
    /// Handlers opened, filters included
    pub handlers_begun: usize,
}

/// A finished, runnable method
#[derive(Debug)]
pub struct DynamicMethod {
    name: Arc<str>,
    origin: Option<RuntimeMethod>,
    params: Vec<RuntimeType>,
    return_type: Option<RuntimeType>,
    locals: Vec<RuntimeType>,
    code: Vec<EmittedInstruction>,
    labels: Vec<usize>,
    clauses: Vec<ExceptionClause>,
    stats: EmitStats,
}

impl DynamicMethod {
    /// Name of the method
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The real method this code stands for, when it runs under its own identity
    #[must_use]
    pub fn origin(&self) -> Option<&RuntimeMethod> {
        self.origin.as_ref()
    }

    /// What a call stack frame running this method reports
    #[must_use]
    pub fn frame_identity(&self) -> FrameIdentity {
        match &self.origin {
            Some(method) => FrameIdentity::Method(method.clone()),
            None => FrameIdentity::Synthetic(self.name.clone()),
        }
    }

    /// Parameter types
    #[must_use]
    pub fn params(&self) -> &[RuntimeType] {
        &self.params
    }

    /// Return type, `None` for `void`
    #[must_use]
    pub fn return_type(&self) -> Option<&RuntimeType> {
        self.return_type.as_ref()
    }

    /// True if the method returns nothing
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.return_type.is_none()
    }

    /// Local variable types
    #[must_use]
    pub fn locals(&self) -> &[RuntimeType] {
        &self.locals
    }

    /// The instructions
    #[must_use]
    pub fn code(&self) -> &[EmittedInstruction] {
        &self.code
    }

    /// The exception clauses, nested constructs first
    #[must_use]
    pub fn clauses(&self) -> &[ExceptionClause] {
        &self.clauses
    }

    /// Exception block counters
    #[must_use]
    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    /// Code index a label was marked at
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidBranchTarget`] for labels of another method.
    pub fn target(&self, label: Label) -> Result<usize> {
        self.labels
            .get(label.0)
            .copied()
            .ok_or_else(|| EmulationError::InvalidBranchTarget { target: label.0 }.into())
    }
}

struct OpenHandler {
    kind: ClauseKind,
    handler_start: Option<usize>,
}

struct OpenBlock {
    try_start: usize,
    try_end: Option<usize>,
    end_label: Label,
    current: Option<OpenHandler>,
    finished: Vec<ExceptionClause>,
}

/// Builds a [`DynamicMethod`]
pub struct MethodBuilder {
    name: Arc<str>,
    origin: Option<RuntimeMethod>,
    params: Vec<RuntimeType>,
    return_type: Option<RuntimeType>,
    locals: Vec<RuntimeType>,
    code: Vec<EmittedInstruction>,
    labels: Vec<Option<usize>>,
    blocks: Vec<OpenBlock>,
    clauses: Vec<ExceptionClause>,
    stats: EmitStats,
}

impl MethodBuilder {
    /// Starts a method
    ///
    /// # Arguments
    /// * `name` - Name the method reports in stack frames
    /// * `params` - Parameter types, `this` included for instance methods
    /// * `return_type` - Return type, `None` for `void`
    pub fn new(name: impl Into<Arc<str>>, params: Vec<RuntimeType>, return_type: Option<RuntimeType>) -> Self {
        MethodBuilder {
            name: name.into(),
            origin: None,
            params,
            return_type,
            locals: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            blocks: Vec::new(),
            clauses: Vec::new(),
            stats: EmitStats::default(),
        }
    }

    /// Makes the method run under the identity of a real method
    #[must_use]
    pub fn with_origin(mut self, origin: RuntimeMethod) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Current code position
    #[must_use]
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Declares a local and returns its index
    pub fn declare_local(&mut self, ty: RuntimeType) -> usize {
        self.locals.push(ty);
        self.locals.len() - 1
    }

    /// Defines a label, to be marked later
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Marks a label at the current position
    ///
    /// # Errors
    /// Returns an error for unknown or already marked labels.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let position = self.code.len();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => {
                *slot = Some(position);
                Ok(())
            }
            Some(Some(_)) => Err(malformed_error!("Label {} marked twice", label.0)),
            None => Err(EmulationError::InvalidBranchTarget { target: label.0 }.into()),
        }
    }

    /// Appends an instruction
    pub fn emit(&mut self, opcode: OpCode, operand: EmitOperand) {
        self.code.push(EmittedInstruction { opcode, operand });
    }

    /// Appends an instruction without operand
    pub fn emit_simple(&mut self, opcode: OpCode) {
        self.emit(opcode, EmitOperand::None);
    }

    /// Opens a protected block, returning the label marked where the construct ends
    pub fn begin_exception_block(&mut self) -> Label {
        let end_label = self.define_label();
        self.blocks.push(OpenBlock {
            try_start: self.code.len(),
            try_end: None,
            end_label,
            current: None,
            finished: Vec::new(),
        });
        self.stats.exception_blocks_begun += 1;
        end_label
    }

    /// Opens a catch handler; after a filter, opens the filtered handler instead
    ///
    /// # Errors
    /// Returns an error outside an exception block.
    pub fn begin_catch_block(&mut self, catch_type: Option<RuntimeType>) -> Result<()> {
        let position = self.code.len();
        let block = self.open_block("catch")?;
        if let Some(OpenHandler {
            kind: ClauseKind::Filter { .. },
            handler_start: handler_start @ None,
        }) = &mut block.current
        {
            *handler_start = Some(position);
            return Ok(());
        }
        self.begin_handler(ClauseKind::Catch(catch_type), Some(position))
    }

    /// Opens a filter
    ///
    /// # Errors
    /// Returns an error outside an exception block.
    pub fn begin_filter_block(&mut self) -> Result<()> {
        let filter_start = self.code.len();
        self.begin_handler(ClauseKind::Filter { filter_start }, None)
    }

    /// Opens a finally handler
    ///
    /// # Errors
    /// Returns an error outside an exception block.
    pub fn begin_finally_block(&mut self) -> Result<()> {
        let position = self.code.len();
        self.begin_handler(ClauseKind::Finally, Some(position))
    }

    /// Opens a fault handler
    ///
    /// # Errors
    /// Returns an error outside an exception block.
    pub fn begin_fault_block(&mut self) -> Result<()> {
        let position = self.code.len();
        self.begin_handler(ClauseKind::Fault, Some(position))
    }

    /// Closes the innermost construct and marks its end label
    ///
    /// # Errors
    /// Returns an error outside an exception block or for a construct without handler.
    pub fn end_exception_block(&mut self) -> Result<()> {
        let position = self.code.len();
        let Some(mut block) = self.blocks.pop() else {
            return Err(EmulationError::InvalidExceptionHandler {
                description: "end of exception block without a block".to_string(),
            }
            .into());
        };
        Self::close_handler(&mut block, position)?;
        if block.finished.is_empty() {
            return Err(EmulationError::InvalidExceptionHandler {
                description: format!("protected block at {} has no handler", block.try_start),
            }
            .into());
        }

        self.clauses.append(&mut block.finished);
        self.mark_label(block.end_label)?;
        self.stats.exception_blocks_ended += 1;
        Ok(())
    }

    /// Produces the method
    ///
    /// # Errors
    /// Returns an error for exception blocks left open or labels never marked but used.
    pub fn finish(self) -> Result<DynamicMethod> {
        if !self.blocks.is_empty() {
            return Err(EmulationError::InvalidExceptionHandler {
                description: format!("{} exception blocks left open", self.blocks.len()),
            }
            .into());
        }

        let code_len = self.code.len();
        let labels = self
            .labels
            .iter()
            .map(|label| label.unwrap_or(code_len))
            .collect();

        Ok(DynamicMethod {
            name: self.name,
            origin: self.origin,
            params: self.params,
            return_type: self.return_type,
            locals: self.locals,
            code: self.code,
            labels,
            clauses: self.clauses,
            stats: self.stats,
        })
    }

    fn open_block(&mut self, what: &str) -> Result<&mut OpenBlock> {
        self.blocks.last_mut().ok_or_else(|| {
            EmulationError::InvalidExceptionHandler {
                description: format!("{what} handler outside an exception block"),
            }
            .into()
        })
    }

    fn begin_handler(&mut self, kind: ClauseKind, handler_start: Option<usize>) -> Result<()> {
        let position = self.code.len();
        let block = self.open_block("exception")?;
        Self::close_handler(block, position)?;
        if block.try_end.is_none() {
            block.try_end = Some(position);
        }
        block.current = Some(OpenHandler {
            kind,
            handler_start,
        });
        self.stats.handlers_begun += 1;
        Ok(())
    }

    fn close_handler(block: &mut OpenBlock, position: usize) -> Result<()> {
        let Some(handler) = block.current.take() else {
            return Ok(());
        };
        let Some(handler_start) = handler.handler_start else {
            return Err(EmulationError::InvalidExceptionHandler {
                description: "filter without a handler".to_string(),
            }
            .into());
        };
        block.finished.push(ExceptionClause {
            kind: handler.kind,
            try_start: block.try_start,
            try_end: block.try_end.unwrap_or(handler_start),
            handler_start,
            handler_end: position,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_opcode_values_match_instruction_set() {
        for opcode in OpCode::iter() {
            let info = crate::metadata::opcodes::lookup(opcode.value()).unwrap();
            assert_eq!(info.mnemonic, opcode.mnemonic());
        }
        assert_eq!(OpCode::Ceq.value(), 0xFE01);
        assert_eq!(OpCode::LdcI4.mnemonic(), "ldc.i4");
        assert!(OpCode::Volatile.is_prefix());
    }

    #[test]
    fn test_labels() {
        let mut builder = MethodBuilder::new("m", vec![], None);
        let label = builder.define_label();
        builder.emit(OpCode::Br, EmitOperand::Label(label));
        builder.emit_simple(OpCode::Nop);
        builder.mark_label(label).unwrap();
        assert!(builder.mark_label(label).is_err());
        builder.emit_simple(OpCode::Ret);

        let method = builder.finish().unwrap();
        assert_eq!(method.target(label).unwrap(), 2);
        assert!(method.returns_void());
        assert_eq!(method.code().len(), 3);
    }

    #[test]
    fn test_nested_blocks_record_inner_first() {
        let mut builder = MethodBuilder::new("m", vec![], None);
        builder.begin_exception_block();
        builder.emit_simple(OpCode::Nop);
        builder.begin_exception_block();
        builder.emit_simple(OpCode::Nop);
        builder.begin_catch_block(None).unwrap();
        builder.emit_simple(OpCode::Pop);
        builder.end_exception_block().unwrap();
        builder.begin_finally_block().unwrap();
        builder.emit_simple(OpCode::Endfinally);
        builder.end_exception_block().unwrap();
        builder.emit_simple(OpCode::Ret);

        let method = builder.finish().unwrap();
        let clauses = method.clauses();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].kind, ClauseKind::Catch(None));
        assert_eq!((clauses[0].try_start, clauses[0].try_end), (1, 2));
        assert_eq!((clauses[0].handler_start, clauses[0].handler_end), (2, 3));
        assert_eq!(clauses[1].kind, ClauseKind::Finally);
        assert_eq!((clauses[1].try_start, clauses[1].try_end), (0, 3));
        assert_eq!(method.stats().exception_blocks_begun, 2);
        assert_eq!(method.stats().exception_blocks_ended, 2);
    }

    #[test]
    fn test_filter_then_handler() {
        let mut builder = MethodBuilder::new("m", vec![], None);
        builder.begin_exception_block();
        builder.emit_simple(OpCode::Nop);
        builder.begin_filter_block().unwrap();
        builder.emit_simple(OpCode::Endfilter);
        builder.begin_catch_block(None).unwrap();
        builder.emit_simple(OpCode::Pop);
        builder.end_exception_block().unwrap();

        let method = builder.finish().unwrap();
        assert_eq!(
            method.clauses(),
            &[ExceptionClause {
                kind: ClauseKind::Filter { filter_start: 1 },
                try_start: 0,
                try_end: 1,
                handler_start: 2,
                handler_end: 3,
            }]
        );
        assert_eq!(method.stats().handlers_begun, 1);
    }

    #[test]
    fn test_protocol_errors() {
        let mut builder = MethodBuilder::new("m", vec![], None);
        assert!(builder.begin_catch_block(None).is_err());
        assert!(builder.end_exception_block().is_err());

        builder.begin_exception_block();
        assert!(builder.end_exception_block().is_err());

        let mut builder = MethodBuilder::new("m", vec![], None);
        builder.begin_exception_block();
        assert!(builder.finish().is_err());
    }
}
