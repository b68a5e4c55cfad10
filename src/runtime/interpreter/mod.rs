//! Interpreter for emitted methods.
//!
//! Every [`DynamicMethod`] runs here, translated bodies and uniform wrappers alike. The
//! interpreter keeps one call stack of [`FrameIdentity`] values that the platform library's
//! introspection natives observe, so that a frame executing a wrapper or a translated body
//! is visible exactly like it would be to managed code.
//!
//! Calls leave the interpreter through a [`MethodDispatcher`]: calls to managed methods and
//! calls into the orchestrator are resolved by whoever owns the translated code (the
//! sandbox), natives of the platform library are called directly.
//!
//! # Exceptions
//!
//! Runtime faults that correspond to platform exceptions (null dereference, division by
//! zero, failed casts, overflow, array bounds) become exception objects that the executing
//! method's handlers can catch. An exception that escapes every handler of a frame leaves
//! [`Interpreter::execute`] as [`Error::Exception`] and is rethrown at the call site of the
//! calling frame.

mod exceptions;
mod handlers;

use crate::{
    config::ExecutionLimits,
    runtime::{
        emit::{DynamicMethod, EmitOperand, EmittedInstruction, OpCode},
        host::Host,
        ops::{BinaryOp, CompareOp, ConversionType, UnaryOp},
        types::RuntimeMethod,
        value::{FrameIdentity, Value},
        NativeContext, NativeFn,
    },
    EmulationError, Error, Result,
};

use exceptions::HandlerState;

/// Resolves the calls emitted code makes outside of the platform library.
pub trait MethodDispatcher {
    /// Runs a managed method with its stack arguments, `this` first for instance methods
    ///
    /// # Errors
    /// Returns the error of the callee, [`Error::Exception`] for an escaping exception.
    fn invoke_managed(
        &self,
        interpreter: &mut Interpreter<'_>,
        method: &RuntimeMethod,
        args: Vec<Value>,
    ) -> Result<Value>;

    /// Runs an orchestrator method; `args` are the popped stack values
    ///
    /// # Errors
    /// Returns an error for unknown callbacks or failing ones.
    fn invoke_callback(
        &self,
        interpreter: &mut Interpreter<'_>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value>;
}

/// Dispatcher for code that only calls the platform library
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformOnly;

impl MethodDispatcher for PlatformOnly {
    fn invoke_managed(
        &self,
        _interpreter: &mut Interpreter<'_>,
        method: &RuntimeMethod,
        _args: Vec<Value>,
    ) -> Result<Value> {
        Err(EmulationError::NativeMethod {
            method: method.to_string(),
            reason: "managed calls are not dispatched".to_string(),
        }
        .into())
    }

    fn invoke_callback(
        &self,
        _interpreter: &mut Interpreter<'_>,
        name: &str,
        _args: Vec<Value>,
    ) -> Result<Value> {
        Err(EmulationError::NativeMethod {
            method: name.to_string(),
            reason: "no orchestrator".to_string(),
        }
        .into())
    }
}

/// How execution continues after one instruction
#[derive(Debug)]
pub(super) enum StepResult {
    /// Next instruction
    Continue,
    /// Jump to a code index
    Branch { target: usize },
    /// The method returns, `Void` for void methods
    Return { value: Value },
    /// An exception is thrown
    Throw { exception: Value },
    /// The exception of the enclosing catch handler is thrown again
    Rethrow,
    /// Exit of protected blocks towards a code index
    Leave { target: usize },
    /// End of a finally or fault handler
    EndFinally,
    /// End of a filter
    EndFilter { accepted: bool },
}

/// Evaluation stack of one frame
#[derive(Debug)]
pub(super) struct EvalStack {
    values: Vec<Value>,
    limit: usize,
}

impl EvalStack {
    fn new(limit: usize) -> Self {
        EvalStack {
            values: Vec::new(),
            limit,
        }
    }

    pub(super) fn push(&mut self, value: Value) -> Result<()> {
        if self.limit != 0 && self.values.len() >= self.limit {
            return Err(EmulationError::StackOverflow.into());
        }
        self.values.push(value);
        Ok(())
    }

    pub(super) fn pop(&mut self) -> Result<Value> {
        self.values
            .pop()
            .ok_or_else(|| EmulationError::StackUnderflow.into())
    }

    /// Pops `count` values, returned in push order
    pub(super) fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        if count > self.values.len() {
            return Err(EmulationError::StackUnderflow.into());
        }
        Ok(self.values.split_off(self.values.len() - count))
    }

    pub(super) fn peek(&self) -> Result<&Value> {
        self.values
            .last()
            .ok_or_else(|| EmulationError::StackUnderflow.into())
    }

    pub(super) fn clear(&mut self) {
        self.values.clear();
    }
}

/// Arguments and locals of an active frame
#[derive(Debug)]
struct FrameStorage {
    args: Vec<Value>,
    locals: Vec<Value>,
}

/// Executes emitted methods.
///
/// One interpreter serves one top-level invocation: the instruction budget of
/// [`ExecutionLimits::max_instructions`] is shared by every nested call it makes.
pub struct Interpreter<'a> {
    host: &'a Host,
    dispatcher: &'a dyn MethodDispatcher,
    limits: ExecutionLimits,
    /// Identities of the active frames, innermost last
    frames: Vec<FrameIdentity>,
    /// Storage of the active frames, parallel to `frames`
    storage: Vec<FrameStorage>,
    executed: u64,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter with an empty call stack
    ///
    /// # Arguments
    /// * `host` - The host process
    /// * `dispatcher` - Receives managed calls and orchestrator callbacks
    /// * `limits` - Execution limits of the invocation
    #[must_use]
    pub fn new(host: &'a Host, dispatcher: &'a dyn MethodDispatcher, limits: ExecutionLimits) -> Self {
        Interpreter {
            host,
            dispatcher,
            limits,
            frames: Vec::new(),
            storage: Vec::new(),
            executed: 0,
        }
    }

    /// The host process
    #[must_use]
    pub fn host(&self) -> &'a Host {
        self.host
    }

    /// The execution limits
    #[must_use]
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Instructions executed so far
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Identities of the active frames, innermost last
    #[must_use]
    pub fn frames(&self) -> &[FrameIdentity] {
        &self.frames
    }

    /// Number of active frames
    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Runs `method` in a new frame.
    ///
    /// # Arguments
    /// * `method` - The method to run
    /// * `args` - One value per parameter
    ///
    /// # Returns
    /// The return value, [`Value::Void`] for void methods.
    ///
    /// # Errors
    /// Returns [`Error::Exception`] for an exception no handler caught, or the
    /// [`EmulationError`] that stopped execution.
    pub fn execute(&mut self, method: &DynamicMethod, args: Vec<Value>) -> Result<Value> {
        let depth = self.frames.len();
        if self.limits.max_call_depth != 0 && depth >= self.limits.max_call_depth {
            return Err(EmulationError::CallDepthExceeded {
                depth,
                limit: self.limits.max_call_depth,
            }
            .into());
        }
        if args.len() != method.params().len() {
            return Err(malformed_error!(
                "{} takes {} arguments, {} given",
                method.name(),
                method.params().len(),
                args.len()
            ));
        }

        let locals = method.locals().iter().map(Value::default_for).collect();
        self.frames.push(method.frame_identity());
        self.storage.push(FrameStorage { args, locals });
        log::trace!("Entering {} at depth {}", method.name(), depth);

        let result = self.run(method, depth);

        self.frames.truncate(depth);
        self.storage.truncate(depth);
        result
    }

    /// Calls a native method on behalf of the innermost frame
    ///
    /// # Errors
    /// Returns the error of the native.
    pub fn call_native(&self, method: &RuntimeMethod, native: NativeFn, args: Vec<Value>) -> Result<Value> {
        let context = NativeContext {
            host: self.host,
            frames: &self.frames,
        };
        native(&context, method, args)
    }

    fn count_instruction(&mut self) -> Result<()> {
        self.executed += 1;
        let limit = self.limits.max_instructions;
        if limit != 0 && self.executed > limit {
            return Err(EmulationError::InstructionLimitExceeded {
                executed: self.executed,
                limit,
            }
            .into());
        }
        Ok(())
    }

    fn run(&mut self, method: &DynamicMethod, depth: usize) -> Result<Value> {
        let code = method.code();
        let mut stack = EvalStack::new(self.limits.max_stack_depth);
        let mut handlers = HandlerState::new(method.clauses());
        let mut pc = 0;

        loop {
            let Some(instruction) = code.get(pc) else {
                return Err(EmulationError::InvalidBranchTarget { target: pc }.into());
            };
            self.count_instruction()?;

            let result = match self.step(method, depth, instruction, &mut stack) {
                Ok(result) => result,
                Err(Error::Emulation(error)) if error.is_clr_exception() => {
                    let type_name = error.exception_type_name().unwrap_or("System.Exception");
                    StepResult::Throw {
                        exception: self.host.new_exception(type_name, &error.to_string())?,
                    }
                }
                Err(Error::Exception(thrown)) => StepResult::Throw { exception: thrown.0 },
                Err(error) => return Err(error),
            };

            pc = match result {
                StepResult::Continue => pc + 1,
                StepResult::Branch { target } => target,
                StepResult::Return { value } => return Ok(value),
                StepResult::Throw { exception } => {
                    log::trace!("{} throws {} at {}", method.name(), exception.type_name(), pc);
                    handlers.throw(self.host, &mut stack, exception, pc)?
                }
                StepResult::Rethrow => {
                    let exception = handlers.current_exception()?;
                    handlers.throw(self.host, &mut stack, exception, pc)?
                }
                StepResult::Leave { target } => handlers.leave(&mut stack, pc, target),
                StepResult::EndFinally => handlers.end_finally(self.host, &mut stack)?,
                StepResult::EndFilter { accepted } => {
                    handlers.end_filter(self.host, &mut stack, accepted)?
                }
            };
        }
    }

    /// Executes one instruction of `method`, running in the frame at `depth`
    fn step(
        &mut self,
        method: &DynamicMethod,
        depth: usize,
        instruction: &EmittedInstruction,
        stack: &mut EvalStack,
    ) -> Result<StepResult> {
        match instruction.opcode {
            // ================================================================
            // Stack operations
            // ================================================================
            OpCode::Nop | OpCode::Break => Ok(StepResult::Continue),
            OpCode::Dup => {
                let value = stack.peek()?.clone();
                stack.push(value)?;
                Ok(StepResult::Continue)
            }
            OpCode::Pop => {
                stack.pop()?;
                Ok(StepResult::Continue)
            }

            // Prefixes carry no semantics for the interpreter
            OpCode::Unaligned
            | OpCode::Volatile
            | OpCode::Tail
            | OpCode::Constrained
            | OpCode::No
            | OpCode::Readonly => Ok(StepResult::Continue),

            // ================================================================
            // Arguments
            // ================================================================
            OpCode::Ldarg0 => self.load_argument(stack, depth, 0),
            OpCode::Ldarg1 => self.load_argument(stack, depth, 1),
            OpCode::Ldarg2 => self.load_argument(stack, depth, 2),
            OpCode::Ldarg3 => self.load_argument(stack, depth, 3),
            OpCode::LdargS | OpCode::Ldarg => {
                let index = Self::argument_operand(instruction)?;
                self.load_argument(stack, depth, index)
            }
            OpCode::StargS | OpCode::Starg => {
                let index = Self::argument_operand(instruction)?;
                self.store_argument(stack, depth, index)
            }
            OpCode::LdargaS | OpCode::Ldarga => {
                let index = Self::argument_operand(instruction)?;
                self.load_argument_address(stack, depth, index)
            }

            // ================================================================
            // Locals
            // ================================================================
            OpCode::Ldloc0 => self.load_local(stack, depth, 0),
            OpCode::Ldloc1 => self.load_local(stack, depth, 1),
            OpCode::Ldloc2 => self.load_local(stack, depth, 2),
            OpCode::Ldloc3 => self.load_local(stack, depth, 3),
            OpCode::LdlocS | OpCode::Ldloc => {
                let index = Self::local_operand(instruction)?;
                self.load_local(stack, depth, index)
            }
            OpCode::Stloc0 => self.store_local(stack, depth, 0),
            OpCode::Stloc1 => self.store_local(stack, depth, 1),
            OpCode::Stloc2 => self.store_local(stack, depth, 2),
            OpCode::Stloc3 => self.store_local(stack, depth, 3),
            OpCode::StlocS | OpCode::Stloc => {
                let index = Self::local_operand(instruction)?;
                self.store_local(stack, depth, index)
            }
            OpCode::LdlocaS | OpCode::Ldloca => {
                let index = Self::local_operand(instruction)?;
                self.load_local_address(stack, depth, index)
            }

            // ================================================================
            // Constants
            // ================================================================
            OpCode::Ldnull => Self::push(stack, Value::Null),
            OpCode::LdcI4M1 => Self::push(stack, Value::I32(-1)),
            OpCode::LdcI40 => Self::push(stack, Value::I32(0)),
            OpCode::LdcI41 => Self::push(stack, Value::I32(1)),
            OpCode::LdcI42 => Self::push(stack, Value::I32(2)),
            OpCode::LdcI43 => Self::push(stack, Value::I32(3)),
            OpCode::LdcI44 => Self::push(stack, Value::I32(4)),
            OpCode::LdcI45 => Self::push(stack, Value::I32(5)),
            OpCode::LdcI46 => Self::push(stack, Value::I32(6)),
            OpCode::LdcI47 => Self::push(stack, Value::I32(7)),
            OpCode::LdcI48 => Self::push(stack, Value::I32(8)),
            OpCode::LdcI4S | OpCode::LdcI4 => match &instruction.operand {
                EmitOperand::I4(value) => Self::push(stack, Value::I32(*value)),
                _ => Err(Self::invalid_operand(instruction, "int32")),
            },
            OpCode::LdcI8 => match &instruction.operand {
                EmitOperand::I8(value) => Self::push(stack, Value::I64(*value)),
                _ => Err(Self::invalid_operand(instruction, "int64")),
            },
            OpCode::LdcR4 => match &instruction.operand {
                #[allow(clippy::cast_possible_truncation)]
                EmitOperand::R8(value) => Self::push(stack, Value::F64(f64::from(*value as f32))),
                _ => Err(Self::invalid_operand(instruction, "float")),
            },
            OpCode::LdcR8 => match &instruction.operand {
                EmitOperand::R8(value) => Self::push(stack, Value::F64(*value)),
                _ => Err(Self::invalid_operand(instruction, "float")),
            },
            OpCode::Ldstr => match &instruction.operand {
                EmitOperand::Str(value) => Self::push(stack, Value::String(value.clone())),
                _ => Err(Self::invalid_operand(instruction, "string")),
            },
            OpCode::Ldtoken => self.load_token(stack, instruction),

            // ================================================================
            // Arithmetic and bitwise
            // ================================================================
            OpCode::Add => Self::binary_op(stack, BinaryOp::Add),
            OpCode::AddOvf => Self::binary_op(stack, BinaryOp::AddOvf),
            OpCode::AddOvfUn => Self::binary_op(stack, BinaryOp::AddOvfUn),
            OpCode::Sub => Self::binary_op(stack, BinaryOp::Sub),
            OpCode::SubOvf => Self::binary_op(stack, BinaryOp::SubOvf),
            OpCode::SubOvfUn => Self::binary_op(stack, BinaryOp::SubOvfUn),
            OpCode::Mul => Self::binary_op(stack, BinaryOp::Mul),
            OpCode::MulOvf => Self::binary_op(stack, BinaryOp::MulOvf),
            OpCode::MulOvfUn => Self::binary_op(stack, BinaryOp::MulOvfUn),
            OpCode::Div => Self::binary_op(stack, BinaryOp::Div),
            OpCode::DivUn => Self::binary_op(stack, BinaryOp::DivUn),
            OpCode::Rem => Self::binary_op(stack, BinaryOp::Rem),
            OpCode::RemUn => Self::binary_op(stack, BinaryOp::RemUn),
            OpCode::And => Self::binary_op(stack, BinaryOp::And),
            OpCode::Or => Self::binary_op(stack, BinaryOp::Or),
            OpCode::Xor => Self::binary_op(stack, BinaryOp::Xor),
            OpCode::Shl => Self::binary_op(stack, BinaryOp::Shl),
            OpCode::Shr => Self::binary_op(stack, BinaryOp::Shr),
            OpCode::ShrUn => Self::binary_op(stack, BinaryOp::ShrUn),
            OpCode::Neg => Self::unary_op(stack, UnaryOp::Neg),
            OpCode::Not => Self::unary_op(stack, UnaryOp::Not),
            OpCode::Ckfinite => Self::check_finite(stack),

            // ================================================================
            // Comparison
            // ================================================================
            OpCode::Ceq => Self::compare(stack, CompareOp::Eq),
            OpCode::Cgt => Self::compare(stack, CompareOp::Gt),
            OpCode::CgtUn => Self::compare(stack, CompareOp::GtUn),
            OpCode::Clt => Self::compare(stack, CompareOp::Lt),
            OpCode::CltUn => Self::compare(stack, CompareOp::LtUn),

            // ================================================================
            // Conversion
            // ================================================================
            OpCode::ConvI1 => Self::convert(stack, ConversionType::I1),
            OpCode::ConvI2 => Self::convert(stack, ConversionType::I2),
            OpCode::ConvI4 => Self::convert(stack, ConversionType::I4),
            OpCode::ConvI8 => Self::convert(stack, ConversionType::I8),
            OpCode::ConvU1 => Self::convert(stack, ConversionType::U1),
            OpCode::ConvU2 => Self::convert(stack, ConversionType::U2),
            OpCode::ConvU4 => Self::convert(stack, ConversionType::U4),
            OpCode::ConvU8 => Self::convert(stack, ConversionType::U8),
            OpCode::ConvR4 => Self::convert(stack, ConversionType::R4),
            OpCode::ConvR8 => Self::convert(stack, ConversionType::R8),
            OpCode::ConvI => Self::convert(stack, ConversionType::I),
            OpCode::ConvU => Self::convert(stack, ConversionType::U),
            OpCode::ConvRUn => Self::convert(stack, ConversionType::RUn),
            OpCode::ConvOvfI1 => Self::convert(stack, ConversionType::I1Ovf),
            OpCode::ConvOvfI2 => Self::convert(stack, ConversionType::I2Ovf),
            OpCode::ConvOvfI4 => Self::convert(stack, ConversionType::I4Ovf),
            OpCode::ConvOvfI8 => Self::convert(stack, ConversionType::I8Ovf),
            OpCode::ConvOvfU1 => Self::convert(stack, ConversionType::U1Ovf),
            OpCode::ConvOvfU2 => Self::convert(stack, ConversionType::U2Ovf),
            OpCode::ConvOvfU4 => Self::convert(stack, ConversionType::U4Ovf),
            OpCode::ConvOvfU8 => Self::convert(stack, ConversionType::U8Ovf),
            OpCode::ConvOvfI => Self::convert(stack, ConversionType::IOvf),
            OpCode::ConvOvfU => Self::convert(stack, ConversionType::UOvf),
            OpCode::ConvOvfI1Un => Self::convert(stack, ConversionType::I1OvfUn),
            OpCode::ConvOvfI2Un => Self::convert(stack, ConversionType::I2OvfUn),
            OpCode::ConvOvfI4Un => Self::convert(stack, ConversionType::I4OvfUn),
            OpCode::ConvOvfI8Un => Self::convert(stack, ConversionType::I8OvfUn),
            OpCode::ConvOvfU1Un => Self::convert(stack, ConversionType::U1OvfUn),
            OpCode::ConvOvfU2Un => Self::convert(stack, ConversionType::U2OvfUn),
            OpCode::ConvOvfU4Un => Self::convert(stack, ConversionType::U4OvfUn),
            OpCode::ConvOvfU8Un => Self::convert(stack, ConversionType::U8OvfUn),
            OpCode::ConvOvfIUn => Self::convert(stack, ConversionType::IOvfUn),
            OpCode::ConvOvfUUn => Self::convert(stack, ConversionType::UOvfUn),

            // ================================================================
            // Branches
            // ================================================================
            OpCode::Br | OpCode::BrS => Ok(StepResult::Branch {
                target: Self::branch_target(method, instruction)?,
            }),
            OpCode::Brfalse | OpCode::BrfalseS => {
                let condition = stack.pop()?;
                Self::branch_if(method, instruction, !condition.is_true())
            }
            OpCode::Brtrue | OpCode::BrtrueS => {
                let condition = stack.pop()?;
                Self::branch_if(method, instruction, condition.is_true())
            }
            OpCode::Beq | OpCode::BeqS => Self::branch_compare(method, instruction, stack, CompareOp::Eq),
            OpCode::Bge | OpCode::BgeS => Self::branch_compare(method, instruction, stack, CompareOp::Ge),
            OpCode::Bgt | OpCode::BgtS => Self::branch_compare(method, instruction, stack, CompareOp::Gt),
            OpCode::Ble | OpCode::BleS => Self::branch_compare(method, instruction, stack, CompareOp::Le),
            OpCode::Blt | OpCode::BltS => Self::branch_compare(method, instruction, stack, CompareOp::Lt),
            OpCode::BneUn | OpCode::BneUnS => {
                Self::branch_compare(method, instruction, stack, CompareOp::Ne)
            }
            OpCode::BgeUn | OpCode::BgeUnS => {
                Self::branch_compare(method, instruction, stack, CompareOp::GeUn)
            }
            OpCode::BgtUn | OpCode::BgtUnS => {
                Self::branch_compare(method, instruction, stack, CompareOp::GtUn)
            }
            OpCode::BleUn | OpCode::BleUnS => {
                Self::branch_compare(method, instruction, stack, CompareOp::LeUn)
            }
            OpCode::BltUn | OpCode::BltUnS => {
                Self::branch_compare(method, instruction, stack, CompareOp::LtUn)
            }
            OpCode::Switch => Self::switch(method, instruction, stack),

            // ================================================================
            // Calls and returns
            // ================================================================
            OpCode::Call => self.call(instruction, stack, false),
            OpCode::Callvirt => self.call(instruction, stack, true),
            OpCode::Newobj => self.new_object(instruction, stack),
            OpCode::Ret => {
                if method.returns_void() {
                    Ok(StepResult::Return { value: Value::Void })
                } else {
                    Ok(StepResult::Return { value: stack.pop()? })
                }
            }
            OpCode::Ldftn | OpCode::Ldvirtftn => {
                if instruction.opcode == OpCode::Ldvirtftn {
                    stack.pop()?;
                }
                match &instruction.operand {
                    EmitOperand::Method(target) => Self::push(stack, Value::Method(target.clone())),
                    _ => Err(Self::invalid_operand(instruction, "method")),
                }
            }

            // ================================================================
            // Objects and types
            // ================================================================
            OpCode::Castclass => self.cast(instruction, stack, true),
            OpCode::Isinst => self.cast(instruction, stack, false),
            OpCode::Box => self.box_value(instruction, stack),
            OpCode::Unbox => self.unbox(instruction, stack),
            OpCode::UnboxAny => self.unbox_any(instruction, stack),
            OpCode::Initobj => {
                let ty = Self::type_operand(instruction)?;
                let address = stack.pop()?;
                self.store_through(&address, Value::default_for(ty))?;
                Ok(StepResult::Continue)
            }
            OpCode::Sizeof => {
                let ty = Self::type_operand(instruction)?;
                Self::push(stack, Value::I32(handlers::size_of(ty)))
            }

            // ================================================================
            // Fields
            // ================================================================
            OpCode::Ldfld => self.load_field(instruction, stack),
            OpCode::Ldflda => self.load_field_address(instruction, stack),
            OpCode::Stfld => self.store_field(instruction, stack),
            OpCode::Ldsfld => self.load_static_field(instruction, stack),
            OpCode::Ldsflda => self.load_static_field_address(instruction, stack),
            OpCode::Stsfld => self.store_static_field(instruction, stack),

            // ================================================================
            // Indirect access
            // ================================================================
            OpCode::LdindI1 => self.load_indirect(stack, Some(ConversionType::I1)),
            OpCode::LdindU1 => self.load_indirect(stack, Some(ConversionType::U1)),
            OpCode::LdindI2 => self.load_indirect(stack, Some(ConversionType::I2)),
            OpCode::LdindU2 => self.load_indirect(stack, Some(ConversionType::U2)),
            OpCode::LdindI4
            | OpCode::LdindU4
            | OpCode::LdindI8
            | OpCode::LdindI
            | OpCode::LdindR4
            | OpCode::LdindR8
            | OpCode::LdindRef
            | OpCode::Ldobj => self.load_indirect(stack, None),
            OpCode::StindI1 => self.store_indirect(stack, Some(ConversionType::I1)),
            OpCode::StindI2 => self.store_indirect(stack, Some(ConversionType::I2)),
            OpCode::StindI4
            | OpCode::StindI8
            | OpCode::StindI
            | OpCode::StindR4
            | OpCode::StindR8
            | OpCode::StindRef
            | OpCode::Stobj => self.store_indirect(stack, None),

            // ================================================================
            // Arrays
            // ================================================================
            OpCode::Newarr => self.new_array(instruction, stack),
            OpCode::Ldlen => Self::array_length(stack),
            OpCode::Ldelema => Self::load_element_address(stack),
            OpCode::LdelemI1 => Self::load_element(stack, Some(ConversionType::I1)),
            OpCode::LdelemU1 => Self::load_element(stack, Some(ConversionType::U1)),
            OpCode::LdelemI2 => Self::load_element(stack, Some(ConversionType::I2)),
            OpCode::LdelemU2 => Self::load_element(stack, Some(ConversionType::U2)),
            OpCode::LdelemI4
            | OpCode::LdelemU4
            | OpCode::LdelemI8
            | OpCode::LdelemI
            | OpCode::LdelemR4
            | OpCode::LdelemR8
            | OpCode::LdelemRef
            | OpCode::Ldelem => Self::load_element(stack, None),
            OpCode::StelemI1 => Self::store_element(stack, Some(ConversionType::I1)),
            OpCode::StelemI2 => Self::store_element(stack, Some(ConversionType::I2)),
            OpCode::StelemI
            | OpCode::StelemI4
            | OpCode::StelemI8
            | OpCode::StelemR4
            | OpCode::StelemR8
            | OpCode::StelemRef
            | OpCode::Stelem => Self::store_element(stack, None),

            // ================================================================
            // Exception handling
            // ================================================================
            OpCode::Throw => {
                let exception = stack.pop()?;
                if exception.is_null() {
                    return Err(EmulationError::NullReference.into());
                }
                Ok(StepResult::Throw { exception })
            }
            OpCode::Rethrow => Ok(StepResult::Rethrow),
            OpCode::Leave | OpCode::LeaveS => Ok(StepResult::Leave {
                target: Self::branch_target(method, instruction)?,
            }),
            OpCode::Endfinally => Ok(StepResult::EndFinally),
            OpCode::Endfilter => {
                let accepted = stack.pop()?.is_true();
                Ok(StepResult::EndFilter { accepted })
            }
        }
    }
}

impl std::fmt::Debug for Interpreter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("frames", &self.frames)
            .field("executed", &self.executed)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
