//! Handler methods for the interpreter.
//!
//! These are the helpers the dispatch in `step()` delegates to, organized by category:
//!
//! - **Operands**: `invalid_operand`, `argument_operand`, `local_operand`, `type_operand`, `field_operand`
//! - **Arguments and locals**: `load_argument`, `store_argument`, `load_local`, `store_local` and the address forms
//! - **Arithmetic**: `binary_op`, `unary_op`, `compare`, `convert`, `check_finite`
//! - **Branches**: `branch_target`, `branch_if`, `branch_compare`, `switch`
//! - **Calls**: `call`, `new_object`, `invoke`, `resolve_virtual`, `ensure_initialized`
//! - **Objects**: `cast`, `box_value`, `unbox`, `unbox_any`
//! - **Fields**: `load_field`, `store_field`, `load_static_field`, `store_static_field` and the address forms
//! - **Indirect**: `load_through`, `store_through`, `load_indirect`, `store_indirect`
//! - **Arrays**: `new_array`, `array_length`, `load_element`, `store_element`, `load_element_address`

use std::sync::Arc;

use crate::{
    metadata::{
        module::{MethodAttributes, TypeAttributes},
        signatures::TypeSignature,
    },
    runtime::{
        emit::{DynamicMethod, EmitOperand, EmittedInstruction},
        interpreter::{EvalStack, Interpreter, StepResult},
        ops::{BinaryOp, CompareOp, ConversionType, UnaryOp},
        types::{MethodImpl, RuntimeField, RuntimeMethod, RuntimeType},
        value::{ArrayRef, Pointer, Value},
    },
    EmulationError, Error, Result,
};

impl Interpreter<'_> {
    // ====================================================================
    // Operands
    // ====================================================================

    /// Creates an error for an invalid operand.
    ///
    /// # Arguments
    ///
    /// * `instruction` - The instruction with the invalid operand.
    /// * `expected` - Description of the expected operand type.
    pub(super) fn invalid_operand(instruction: &EmittedInstruction, expected: &'static str) -> Error {
        EmulationError::InvalidOperand {
            instruction: instruction.opcode.mnemonic(),
            expected,
        }
        .into()
    }

    pub(super) fn argument_operand(instruction: &EmittedInstruction) -> Result<usize> {
        match &instruction.operand {
            EmitOperand::Arg(index) => Ok(*index),
            _ => Err(Self::invalid_operand(instruction, "argument index")),
        }
    }

    pub(super) fn local_operand(instruction: &EmittedInstruction) -> Result<usize> {
        match &instruction.operand {
            EmitOperand::Local(index) => Ok(*index),
            _ => Err(Self::invalid_operand(instruction, "local index")),
        }
    }

    pub(super) fn type_operand(instruction: &EmittedInstruction) -> Result<&RuntimeType> {
        match &instruction.operand {
            EmitOperand::Type(ty) => Ok(ty),
            _ => Err(Self::invalid_operand(instruction, "type")),
        }
    }

    pub(super) fn field_operand(instruction: &EmittedInstruction) -> Result<&RuntimeField> {
        match &instruction.operand {
            EmitOperand::Field(field) => Ok(field),
            _ => Err(Self::invalid_operand(instruction, "field")),
        }
    }

    pub(super) fn push(stack: &mut EvalStack, value: Value) -> Result<StepResult> {
        stack.push(value)?;
        Ok(StepResult::Continue)
    }

    // ====================================================================
    // Arguments and locals
    // ====================================================================

    fn argument_slot(&mut self, frame: usize, index: usize) -> Result<&mut Value> {
        let args = &mut self.frame_storage(frame)?.args;
        let count = args.len();
        args.get_mut(index)
            .ok_or_else(|| EmulationError::ArgumentIndexOutOfBounds { index, count }.into())
    }

    fn local_slot(&mut self, frame: usize, index: usize) -> Result<&mut Value> {
        let locals = &mut self.frame_storage(frame)?.locals;
        let count = locals.len();
        locals
            .get_mut(index)
            .ok_or_else(|| EmulationError::LocalIndexOutOfBounds { index, count }.into())
    }

    fn frame_storage(&mut self, frame: usize) -> Result<&mut super::FrameStorage> {
        self.storage.get_mut(frame).ok_or_else(|| {
            EmulationError::InternalError {
                description: format!("pointer into frame {frame}, which is no longer active"),
            }
            .into()
        })
    }

    /// Pushes argument `index` of the frame at `depth`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::ArgumentIndexOutOfBounds`] for a missing argument.
    pub(super) fn load_argument(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        let value = self.argument_slot(depth, index)?.clone();
        Self::push(stack, value)
    }

    pub(super) fn store_argument(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        let value = stack.pop()?;
        *self.argument_slot(depth, index)? = value;
        Ok(StepResult::Continue)
    }

    pub(super) fn load_argument_address(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        self.argument_slot(depth, index)?;
        Self::push(stack, Value::Pointer(Pointer::Argument { frame: depth, index }))
    }

    /// Pushes local `index` of the frame at `depth`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::LocalIndexOutOfBounds`] for a missing local.
    pub(super) fn load_local(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        let value = self.local_slot(depth, index)?.clone();
        Self::push(stack, value)
    }

    pub(super) fn store_local(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        let value = stack.pop()?;
        *self.local_slot(depth, index)? = value;
        Ok(StepResult::Continue)
    }

    pub(super) fn load_local_address(&mut self, stack: &mut EvalStack, depth: usize, index: usize) -> Result<StepResult> {
        self.local_slot(depth, index)?;
        Self::push(stack, Value::Pointer(Pointer::Local { frame: depth, index }))
    }

    pub(super) fn load_token(&self, stack: &mut EvalStack, instruction: &EmittedInstruction) -> Result<StepResult> {
        let handle = match &instruction.operand {
            EmitOperand::Type(ty) => Value::Type(ty.clone()),
            EmitOperand::Method(method) => Value::Method(method.clone()),
            EmitOperand::Field(field) => Value::Field(field.clone()),
            _ => return Err(Self::invalid_operand(instruction, "type, method or field")),
        };
        Self::push(stack, handle)
    }

    // ====================================================================
    // Arithmetic
    // ====================================================================

    pub(super) fn binary_op(stack: &mut EvalStack, op: BinaryOp) -> Result<StepResult> {
        let right = stack.pop()?;
        let left = stack.pop()?;
        Self::push(stack, left.binary_op(&right, op)?)
    }

    pub(super) fn unary_op(stack: &mut EvalStack, op: UnaryOp) -> Result<StepResult> {
        let value = stack.pop()?;
        Self::push(stack, value.unary_op(op)?)
    }

    pub(super) fn compare(stack: &mut EvalStack, op: CompareOp) -> Result<StepResult> {
        let right = stack.pop()?;
        let left = stack.pop()?;
        Self::push(stack, left.compare(&right, op)?)
    }

    pub(super) fn convert(stack: &mut EvalStack, conv: ConversionType) -> Result<StepResult> {
        let value = stack.pop()?;
        Self::push(stack, value.convert(conv)?)
    }

    pub(super) fn check_finite(stack: &mut EvalStack) -> Result<StepResult> {
        match stack.peek()? {
            Value::F64(value) if !value.is_finite() => Err(EmulationError::ArithmeticOverflow.into()),
            Value::F64(_) => Ok(StepResult::Continue),
            other => Err(EmulationError::TypeMismatch {
                operation: "ckfinite",
                expected: "F",
                found: other.kind(),
            }
            .into()),
        }
    }

    // ====================================================================
    // Branches
    // ====================================================================

    pub(super) fn branch_target(method: &DynamicMethod, instruction: &EmittedInstruction) -> Result<usize> {
        match &instruction.operand {
            EmitOperand::Label(label) => method.target(*label),
            _ => Err(Self::invalid_operand(instruction, "label")),
        }
    }

    pub(super) fn branch_if(method: &DynamicMethod, instruction: &EmittedInstruction, condition: bool) -> Result<StepResult> {
        if condition {
            Ok(StepResult::Branch {
                target: Self::branch_target(method, instruction)?,
            })
        } else {
            Ok(StepResult::Continue)
        }
    }

    pub(super) fn branch_compare(
        method: &DynamicMethod,
        instruction: &EmittedInstruction,
        stack: &mut EvalStack,
        op: CompareOp,
    ) -> Result<StepResult> {
        let right = stack.pop()?;
        let left = stack.pop()?;
        let taken = left.compare(&right, op)?.is_true();
        Self::branch_if(method, instruction, taken)
    }

    pub(super) fn switch(method: &DynamicMethod, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let EmitOperand::Labels(labels) = &instruction.operand else {
            return Err(Self::invalid_operand(instruction, "label table"));
        };
        let selector = stack.pop()?;
        let Some(selector) = selector.as_i32() else {
            return Err(EmulationError::TypeMismatch {
                operation: "switch",
                expected: "int32",
                found: selector.kind(),
            }
            .into());
        };
        // The selector is unsigned, negative values fall through
        match usize::try_from(selector).ok().and_then(|index| labels.get(index)) {
            Some(label) => Ok(StepResult::Branch {
                target: method.target(*label)?,
            }),
            None => Ok(StepResult::Continue),
        }
    }

    // ====================================================================
    // Calls
    // ====================================================================

    /// Handles `call` and `callvirt` for every call operand.
    ///
    /// Besides real methods, a call can target an orchestrator callback or invoke a delegate
    /// the orchestrator handed out.
    pub(super) fn call(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack, is_virtual: bool) -> Result<StepResult> {
        match &instruction.operand {
            EmitOperand::Method(method) => {
                let mut args = stack.pop_n(method.stack_arguments())?;
                let mut target = method.clone();
                if method.has_this() {
                    let this = args.first_mut().ok_or(EmulationError::StackUnderflow)?;
                    if matches!(this, Value::Pointer(_)) {
                        *this = self.load_through(this)?;
                    }
                    if is_virtual {
                        if this.is_null() {
                            return Err(EmulationError::NullReference.into());
                        }
                        target = self.resolve_virtual(this, method)?;
                    }
                }
                let result = self.invoke(&target, args)?;
                if !target.returns_void() {
                    stack.push(result)?;
                }
                Ok(StepResult::Continue)
            }
            EmitOperand::Callback { name, arity } => {
                let args = stack.pop_n(*arity)?;
                let dispatcher = self.dispatcher;
                let result = dispatcher.invoke_callback(self, name, args)?;
                if !result.is_void() {
                    stack.push(result)?;
                }
                Ok(StepResult::Continue)
            }
            EmitOperand::Invoke { index, arity } => {
                let args = stack.pop_n(*arity)?;
                let delegate = stack.pop()?;
                let Value::Delegate(target) = delegate else {
                    return Err(EmulationError::TypeMismatch {
                        operation: "invoke",
                        expected: "delegate",
                        found: delegate.kind(),
                    }
                    .into());
                };
                log::trace!("Invoking {} for pending method {}", target.name(), index);
                let result = self.execute(&target, args)?;
                if !target.returns_void() {
                    stack.push(result)?;
                }
                Ok(StepResult::Continue)
            }
            _ => Err(Self::invalid_operand(instruction, "method")),
        }
    }

    /// Runs a method with its stack arguments.
    ///
    /// Natives are called directly, managed methods go through the dispatcher after the
    /// declaring type has been initialized.
    ///
    /// # Errors
    ///
    /// Returns the error of the callee, [`EmulationError::NativeMethod`] for methods without
    /// implementation.
    pub fn invoke(&mut self, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
        match method.implementation() {
            MethodImpl::Native(native) => self.call_native(method, *native, args),
            MethodImpl::Managed(_) => {
                if method.is_static() || method.is_constructor() {
                    self.ensure_initialized(method.declaring_type())?;
                }
                let dispatcher = self.dispatcher;
                dispatcher.invoke_managed(self, method, args)
            }
            MethodImpl::Abstract => Err(EmulationError::NativeMethod {
                method: method.to_string(),
                reason: "no implementation".to_string(),
            }
            .into()),
        }
    }

    /// Finds the override of `method` the live type of `this` carries.
    ///
    /// Walks from the live type towards the declaring type of `method`; the first virtual
    /// method with the same name and parameter types wins.
    pub(super) fn resolve_virtual(&self, this: &Value, method: &RuntimeMethod) -> Result<RuntimeMethod> {
        let Some(mut current) = self.host.type_of(this)? else {
            return Ok(method.clone());
        };
        let declaring = method.declaring_type().definition();

        loop {
            if let Some(def) = current.definition() {
                if declaring.is_some_and(|declaring| Arc::ptr_eq(declaring, def)) {
                    return Ok(method.clone());
                }
                let found = def.methods_named(method.name()).find(|candidate| {
                    candidate.flags.contains(MethodAttributes::VIRTUAL)
                        && !candidate.flags.contains(MethodAttributes::ABSTRACT)
                        && same_parameters(&candidate.signature.params, &method.signature().params)
                });
                if let Some(found) = found {
                    return Ok(RuntimeMethod::new(
                        found.clone(),
                        current.clone(),
                        method.method_args().to_vec(),
                    ));
                }
            }
            match self.host.base_type(&current)? {
                Some(base) => current = base,
                None => return Ok(method.clone()),
            }
        }
    }

    /// Runs the type initializer of `ty` unless it already started
    pub(super) fn ensure_initialized(&mut self, ty: &RuntimeType) -> Result<()> {
        let Some(def) = ty.definition() else {
            return Ok(());
        };
        let Some(initializer) = def.methods_named(".cctor").next().cloned() else {
            return Ok(());
        };
        if !self.host.begin_type_initialization(def) {
            return Ok(());
        }

        log::debug!("Running type initializer of {}", def.full_name());
        let initializer = RuntimeMethod::new(initializer, ty.clone(), Vec::new());
        self.invoke(&initializer, Vec::new())?;
        Ok(())
    }

    /// Handles `newobj`.
    ///
    /// Managed constructors receive a fresh object as `this`; natives receive `null` and
    /// return the new value themselves.
    pub(super) fn new_object(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let EmitOperand::Method(constructor) = &instruction.operand else {
            return Err(Self::invalid_operand(instruction, "constructor"));
        };
        let params = stack.pop_n(constructor.signature().params.len())?;

        let value = if let MethodImpl::Native(native) = constructor.implementation() {
            let mut args = Vec::with_capacity(params.len() + 1);
            args.push(Value::Null);
            args.extend(params);
            self.call_native(constructor, *native, args)?
        } else {
            let object = Value::new_object(constructor.declaring_type().clone());
            let mut args = Vec::with_capacity(params.len() + 1);
            args.push(object.clone());
            args.extend(params);
            self.invoke(constructor, args)?;
            object
        };
        Self::push(stack, value)
    }

    // ====================================================================
    // Objects
    // ====================================================================

    fn cast_value(&self, value: Value, ty: &RuntimeType, throwing: bool) -> Result<Value> {
        if value.is_null() || self.host.is_instance_of(&value, ty)? || is_interface(ty) {
            return Ok(value);
        }
        if throwing {
            return Err(EmulationError::InvalidCast {
                from_type: value.type_name(),
                to_type: ty.to_string(),
            }
            .into());
        }
        Ok(Value::Null)
    }

    /// Handles `castclass` (`throwing`) and `isinst`
    pub(super) fn cast(&self, instruction: &EmittedInstruction, stack: &mut EvalStack, throwing: bool) -> Result<StepResult> {
        let ty = Self::type_operand(instruction)?;
        let value = stack.pop()?;
        let result = self.cast_value(value, ty, throwing)?;
        Self::push(stack, result)
    }

    /// Boxes primitives; objects of user value types are already heap values
    pub(super) fn box_value(&self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let ty = Self::type_operand(instruction)?;
        let value = stack.pop()?;
        let boxed = if !ty.is_value_type()
            || matches!(value, Value::Null | Value::Object(_) | Value::Boxed(_))
        {
            value
        } else {
            Value::boxed(ty.clone(), value)
        };
        Self::push(stack, boxed)
    }

    /// Handles `unbox`; the pushed "address" is the boxed value itself
    pub(super) fn unbox(&self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        Self::type_operand(instruction)?;
        let value = match stack.pop()? {
            Value::Null => return Err(EmulationError::NullReference.into()),
            Value::Boxed(boxed) => boxed.value.clone(),
            other => other,
        };
        Self::push(stack, value)
    }

    /// Handles `unbox.any`.
    ///
    /// Unboxed primitives pass through unchanged, so a wrapper can unpack arguments that
    /// were never boxed.
    pub(super) fn unbox_any(&self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let ty = Self::type_operand(instruction)?;
        let value = stack.pop()?;
        if !ty.is_value_type() {
            let result = self.cast_value(value, ty, true)?;
            return Self::push(stack, result);
        }

        let result = match value {
            Value::Null => return Err(EmulationError::NullReference.into()),
            Value::Boxed(boxed) => {
                if boxed.ty != *ty && !is_enum(&boxed.ty) && !is_enum(ty) {
                    return Err(EmulationError::InvalidCast {
                        from_type: boxed.ty.to_string(),
                        to_type: ty.to_string(),
                    }
                    .into());
                }
                boxed.value.clone()
            }
            other => other,
        };
        Self::push(stack, result)
    }

    // ====================================================================
    // Fields
    // ====================================================================

    fn dereference(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Pointer(_) => self.load_through(&value),
            Value::Boxed(boxed) if matches!(boxed.value, Value::Object(_)) => Ok(boxed.value.clone()),
            other => Ok(other),
        }
    }

    pub(super) fn load_field(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        let target = stack.pop()?;
        if field.is_static() {
            self.ensure_initialized(field.declaring_type())?;
            return Self::push(stack, self.host.load_static(field)?);
        }

        let value = match self.dereference(target)? {
            Value::Object(object) => {
                let stored = read_lock!(object).fields.get(&field.slot()).cloned();
                match stored {
                    Some(value) => value,
                    None => self.host.field_default(field)?,
                }
            }
            Value::Null => return Err(EmulationError::NullReference.into()),
            other => {
                return Err(EmulationError::TypeMismatch {
                    operation: "ldfld",
                    expected: "object",
                    found: other.kind(),
                }
                .into())
            }
        };
        Self::push(stack, value)
    }

    pub(super) fn store_field(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        let value = stack.pop()?;
        let target = stack.pop()?;
        if field.is_static() {
            self.ensure_initialized(field.declaring_type())?;
            self.host.store_static(field.slot(), value);
            return Ok(StepResult::Continue);
        }

        match self.dereference(target)? {
            Value::Object(object) => {
                write_lock!(object).fields.insert(field.slot(), value);
                Ok(StepResult::Continue)
            }
            Value::Null => Err(EmulationError::NullReference.into()),
            other => Err(EmulationError::TypeMismatch {
                operation: "stfld",
                expected: "object",
                found: other.kind(),
            }
            .into()),
        }
    }

    /// Pushes a pointer to an instance field, storing the default first if the field is unset
    pub(super) fn load_field_address(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        let target = stack.pop()?;
        let Value::Object(object) = self.dereference(target)? else {
            return Err(EmulationError::NullReference.into());
        };

        let slot = field.slot();
        let unset = !read_lock!(object).fields.contains_key(&slot);
        if unset {
            let default = self.host.field_default(field)?;
            write_lock!(object).fields.entry(slot).or_insert(default);
        }
        Self::push(stack, Value::Pointer(Pointer::Field { object, field: slot }))
    }

    pub(super) fn load_static_field(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        self.ensure_initialized(field.declaring_type())?;
        Self::push(stack, self.host.load_static(field)?)
    }

    pub(super) fn store_static_field(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        self.ensure_initialized(field.declaring_type())?;
        let value = stack.pop()?;
        self.host.store_static(field.slot(), value);
        Ok(StepResult::Continue)
    }

    pub(super) fn load_static_field_address(&mut self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let field = Self::field_operand(instruction)?;
        self.ensure_initialized(field.declaring_type())?;
        let slot = field.slot();
        if self.host.static_value(slot).is_none() {
            self.host.store_static(slot, self.host.field_default(field)?);
        }
        Self::push(stack, Value::Pointer(Pointer::Static(slot)))
    }

    // ====================================================================
    // Indirect access
    // ====================================================================

    /// Reads through a managed pointer.
    ///
    /// Values that are not pointers read as themselves, which is what `unbox` hands out.
    pub(super) fn load_through(&mut self, address: &Value) -> Result<Value> {
        let Value::Pointer(pointer) = address else {
            return match address {
                Value::Null => Err(EmulationError::NullReference.into()),
                other => Ok(other.clone()),
            };
        };
        match pointer {
            Pointer::Local { frame, index } => Ok(self.local_slot(*frame, *index)?.clone()),
            Pointer::Argument { frame, index } => Ok(self.argument_slot(*frame, *index)?.clone()),
            Pointer::Element { array, index } => {
                let array = read_lock!(array);
                array.items.get(*index).cloned().ok_or_else(|| {
                    EmulationError::ArrayIndexOutOfBounds {
                        index: i64::try_from(*index).unwrap_or(i64::MAX),
                        length: array.items.len(),
                    }
                    .into()
                })
            }
            Pointer::Field { object, field } => Ok(read_lock!(object)
                .fields
                .get(field)
                .cloned()
                .unwrap_or(Value::Null)),
            Pointer::Static(slot) => Ok(self.host.static_value(*slot).unwrap_or(Value::Null)),
        }
    }

    /// Writes through a managed pointer
    pub(super) fn store_through(&mut self, address: &Value, value: Value) -> Result<()> {
        let Value::Pointer(pointer) = address else {
            return Err(match address {
                Value::Null => EmulationError::NullReference,
                other => EmulationError::TypeMismatch {
                    operation: "indirect store",
                    expected: "managed pointer",
                    found: other.kind(),
                },
            }
            .into());
        };
        match pointer {
            Pointer::Local { frame, index } => *self.local_slot(*frame, *index)? = value,
            Pointer::Argument { frame, index } => *self.argument_slot(*frame, *index)? = value,
            Pointer::Element { array, index } => {
                let mut array = write_lock!(array);
                let length = array.items.len();
                let Some(element) = array.items.get_mut(*index) else {
                    return Err(EmulationError::ArrayIndexOutOfBounds {
                        index: i64::try_from(*index).unwrap_or(i64::MAX),
                        length,
                    }
                    .into());
                };
                *element = value;
            }
            Pointer::Field { object, field } => {
                write_lock!(object).fields.insert(*field, value);
            }
            Pointer::Static(slot) => self.host.store_static(*slot, value),
        }
        Ok(())
    }

    pub(super) fn load_indirect(&mut self, stack: &mut EvalStack, conv: Option<ConversionType>) -> Result<StepResult> {
        let address = stack.pop()?;
        let value = self.load_through(&address)?;
        let value = match conv {
            Some(conv) => value.convert(conv)?,
            None => value,
        };
        Self::push(stack, value)
    }

    pub(super) fn store_indirect(&mut self, stack: &mut EvalStack, conv: Option<ConversionType>) -> Result<StepResult> {
        let value = stack.pop()?;
        let address = stack.pop()?;
        let value = match conv {
            Some(conv) => value.convert(conv)?,
            None => value,
        };
        self.store_through(&address, value)?;
        Ok(StepResult::Continue)
    }

    // ====================================================================
    // Arrays
    // ====================================================================

    pub(super) fn new_array(&self, instruction: &EmittedInstruction, stack: &mut EvalStack) -> Result<StepResult> {
        let element = Self::type_operand(instruction)?;
        let length = stack.pop()?;
        let Some(length) = length.as_i64() else {
            return Err(EmulationError::TypeMismatch {
                operation: "newarr",
                expected: "integer",
                found: length.kind(),
            }
            .into());
        };
        let length = usize::try_from(length).map_err(|_| EmulationError::ArithmeticOverflow)?;

        let items = (0..length).map(|_| Value::default_for(element)).collect();
        Self::push(stack, Value::new_array(element.clone(), items))
    }

    pub(super) fn array_length(stack: &mut EvalStack) -> Result<StepResult> {
        let array = array_operand(stack.pop()?)?;
        let length = read_lock!(array).items.len();
        Self::push(stack, Value::NativeInt(i64::try_from(length).unwrap_or(i64::MAX)))
    }

    pub(super) fn load_element(stack: &mut EvalStack, conv: Option<ConversionType>) -> Result<StepResult> {
        let index = stack.pop()?;
        let array = array_operand(stack.pop()?)?;
        let value = {
            let array = read_lock!(array);
            let index = element_index(&index, array.items.len())?;
            array.items[index].clone()
        };
        let value = match conv {
            Some(conv) => value.convert(conv)?,
            None => value,
        };
        Self::push(stack, value)
    }

    pub(super) fn store_element(stack: &mut EvalStack, conv: Option<ConversionType>) -> Result<StepResult> {
        let value = stack.pop()?;
        let index = stack.pop()?;
        let array = array_operand(stack.pop()?)?;
        let value = match conv {
            Some(conv) => value.convert(conv)?,
            None => value,
        };
        let mut array = write_lock!(array);
        let index = element_index(&index, array.items.len())?;
        array.items[index] = value;
        Ok(StepResult::Continue)
    }

    pub(super) fn load_element_address(stack: &mut EvalStack) -> Result<StepResult> {
        let index = stack.pop()?;
        let array = array_operand(stack.pop()?)?;
        let index = element_index(&index, read_lock!(array).items.len())?;
        Self::push(stack, Value::Pointer(Pointer::Element { array, index }))
    }
}

fn array_operand(value: Value) -> Result<ArrayRef> {
    match value {
        Value::Array(array) => Ok(array),
        Value::Null => Err(EmulationError::NullReference.into()),
        other => Err(EmulationError::TypeMismatch {
            operation: "array access",
            expected: "array",
            found: other.kind(),
        }
        .into()),
    }
}

fn element_index(index: &Value, length: usize) -> Result<usize> {
    let Some(index) = index.as_i64() else {
        return Err(EmulationError::TypeMismatch {
            operation: "array access",
            expected: "integer",
            found: index.kind(),
        }
        .into());
    };
    match usize::try_from(index) {
        Ok(position) if position < length => Ok(position),
        _ => Err(EmulationError::ArrayIndexOutOfBounds { index, length }.into()),
    }
}

fn same_parameters(left: &[TypeSignature], right: &[TypeSignature]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(left, right)| left.to_string() == right.to_string())
}

fn is_interface(ty: &RuntimeType) -> bool {
    ty.definition()
        .is_some_and(|def| def.flags.contains(TypeAttributes::INTERFACE))
}

fn is_enum(ty: &RuntimeType) -> bool {
    ty.definition().is_some_and(|def| {
        def.base
            .as_ref()
            .and_then(|base| base.type_ref())
            .is_some_and(|base| base.namespace == "System" && base.name == "Enum")
    })
}

/// Size in bytes `sizeof` reports, references and native integers take 8
pub(super) fn size_of(ty: &RuntimeType) -> i32 {
    let Some(def) = ty.definition() else {
        return 8;
    };
    if def.namespace != "System" {
        return 8;
    }
    match def.name.as_str() {
        "Boolean" | "SByte" | "Byte" => 1,
        "Char" | "Int16" | "UInt16" => 2,
        "Int32" | "UInt32" | "Single" => 4,
        _ => 8,
    }
}
