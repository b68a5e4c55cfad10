//! The built-in platform library.
//!
//! Sandboxed code runs against a small native rendition of `mscorlib`: the primitive and
//! exception types, strings, reflection handles and the introspection surface obfuscators
//! query (stack traces, stack frames and the calling/executing/entry component). Every
//! method is a [`NativeFn`]; natives do not push call stack frames, so the innermost frame a
//! native observes is the managed code that called it.
//!
//! Constructors follow one convention: for `newobj` the native receives `null` as `this` and
//! returns the new value, for a base constructor `call` it receives the existing object.

use std::sync::Arc;

use crate::{
    metadata::{
        identity::AssemblyIdentity,
        references::TypeRef,
        signatures::{SignatureMethod, TypeSignature},
        token::Token,
    },
    runtime::{
        component::{Component, ComponentBuilder},
        types::{ComponentId, FieldSlot, RuntimeMethod, RuntimeType, RuntimeTypeDefRc},
        value::{FrameIdentity, Value},
        NativeContext, NativeFn,
    },
    EmulationError, Error, Result,
};

/// Storage of `System.Exception::_message`, the first field the platform library defines
pub(crate) const EXCEPTION_MESSAGE: FieldSlot = FieldSlot {
    component: 0,
    token: Token::new(0x0400_0001),
};

const PRIMITIVES: &[&str] = &[
    "Void",
    "Boolean",
    "Char",
    "SByte",
    "Byte",
    "Int16",
    "UInt16",
    "Int32",
    "UInt32",
    "Int64",
    "UInt64",
    "Single",
    "Double",
    "IntPtr",
    "UIntPtr",
    "TypedReference",
    "RuntimeTypeHandle",
    "RuntimeMethodHandle",
    "RuntimeFieldHandle",
];

const SYSTEM_EXCEPTIONS: &[&str] = &[
    "NullReferenceException",
    "IndexOutOfRangeException",
    "InvalidCastException",
    "InvalidOperationException",
    "NotSupportedException",
    "ArgumentException",
];

struct Library {
    builder: ComponentBuilder,
}

impl Library {
    fn class(&self, namespace: &str, name: &str) -> TypeSignature {
        TypeSignature::Class(Arc::new(TypeRef::new(
            self.builder.identity().clone(),
            namespace,
            name,
        )))
    }

    fn value_type(&self, namespace: &str, name: &str) -> TypeSignature {
        TypeSignature::ValueType(Arc::new(TypeRef::new(
            self.builder.identity().clone(),
            namespace,
            name,
        )))
    }

    fn add_class(&mut self, namespace: &str, name: &str, base: TypeSignature) -> RuntimeTypeDefRc {
        self.builder.add_type(namespace, name, Some(base), false)
    }

    fn instance(&mut self, ty: &RuntimeTypeDefRc, name: &str, ret: TypeSignature, params: Vec<TypeSignature>, native: NativeFn) {
        self.builder
            .add_method(ty, name, SignatureMethod::new_instance(ret, params), native);
    }

    fn static_(&mut self, ty: &RuntimeTypeDefRc, name: &str, ret: TypeSignature, params: Vec<TypeSignature>, native: NativeFn) {
        self.builder
            .add_method(ty, name, SignatureMethod::new_static(ret, params), native);
    }
}

/// Builds the platform library as component `id`
#[must_use]
pub fn build(id: ComponentId, identity: AssemblyIdentity) -> Component {
    let mut lib = Library {
        builder: ComponentBuilder::new(id, identity),
    };

    let object = lib.builder.add_type("System", "Object", None, false);
    // Must stay the first field, see EXCEPTION_MESSAGE
    let exception = lib.add_class("System", "Exception", TypeSignature::Object);
    lib.builder
        .add_field(&exception, "_message", TypeSignature::String, false);

    lib.instance(&object, ".ctor", TypeSignature::Void, vec![], object_ctor);
    lib.instance(&object, "GetType", lib.class("System", "Type"), vec![], object_get_type);
    lib.instance(&object, "ToString", TypeSignature::String, vec![], object_to_string);
    lib.instance(&object, "Equals", TypeSignature::Boolean, vec![TypeSignature::Object], object_equals);

    let value_type = lib.add_class("System", "ValueType", TypeSignature::Object);
    lib.add_class("System", "Enum", lib.class("System", "ValueType"));
    for name in PRIMITIVES {
        lib.builder
            .add_type("System", name, Some(lib.class("System", "ValueType")), true);
    }
    lib.instance(&value_type, "ToString", TypeSignature::String, vec![], object_to_string);

    let array = lib.add_class("System", "Array", TypeSignature::Object);
    lib.instance(&array, "get_Length", TypeSignature::I4, vec![], array_get_length);

    build_string(&mut lib);
    build_exceptions(&mut lib, &exception);
    build_reflection(&mut lib);
    build_diagnostics(&mut lib);

    lib.add_class("System", "Delegate", TypeSignature::Object);
    lib.add_class("System", "MulticastDelegate", lib.class("System", "Delegate"));

    let encoding = lib.add_class("System.Text", "Encoding", TypeSignature::Object);
    let encoding_sig = lib.class("System.Text", "Encoding");
    lib.static_(&encoding, "get_UTF8", encoding_sig, vec![], encoding_get_utf8);
    lib.instance(
        &encoding,
        "GetString",
        TypeSignature::String,
        vec![TypeSignature::SzArray(Box::new(TypeSignature::U1))],
        encoding_get_string,
    );
    lib.instance(
        &encoding,
        "GetBytes",
        TypeSignature::SzArray(Box::new(TypeSignature::U1)),
        vec![TypeSignature::String],
        encoding_get_bytes,
    );

    lib.builder.build()
}

fn build_string(lib: &mut Library) {
    let string = lib.add_class("System", "String", TypeSignature::Object);
    let chars = TypeSignature::SzArray(Box::new(TypeSignature::Char));

    lib.instance(&string, ".ctor", TypeSignature::Void, vec![chars.clone()], string_ctor_chars);
    lib.instance(&string, "get_Length", TypeSignature::I4, vec![], string_get_length);
    lib.instance(&string, "get_Chars", TypeSignature::Char, vec![TypeSignature::I4], string_get_chars);
    lib.instance(&string, "ToCharArray", chars, vec![], string_to_char_array);
    lib.instance(&string, "ToString", TypeSignature::String, vec![], object_to_string);
    lib.instance(&string, "Substring", TypeSignature::String, vec![TypeSignature::I4], string_substring);
    lib.instance(
        &string,
        "Substring",
        TypeSignature::String,
        vec![TypeSignature::I4, TypeSignature::I4],
        string_substring,
    );
    lib.static_(
        &string,
        "Concat",
        TypeSignature::String,
        vec![TypeSignature::String, TypeSignature::String],
        string_concat,
    );
    lib.static_(
        &string,
        "Concat",
        TypeSignature::String,
        vec![TypeSignature::String, TypeSignature::String, TypeSignature::String],
        string_concat,
    );
    lib.static_(
        &string,
        "Concat",
        TypeSignature::String,
        vec![TypeSignature::Object, TypeSignature::Object],
        string_concat,
    );
    lib.static_(
        &string,
        "op_Equality",
        TypeSignature::Boolean,
        vec![TypeSignature::String, TypeSignature::String],
        string_equality,
    );
    lib.static_(
        &string,
        "op_Inequality",
        TypeSignature::Boolean,
        vec![TypeSignature::String, TypeSignature::String],
        string_inequality,
    );
    lib.static_(
        &string,
        "IsNullOrEmpty",
        TypeSignature::Boolean,
        vec![TypeSignature::String],
        string_is_null_or_empty,
    );
}

fn build_exceptions(lib: &mut Library, exception: &RuntimeTypeDefRc) {
    let string_ctor = vec![TypeSignature::String];

    lib.instance(exception, ".ctor", TypeSignature::Void, vec![], exception_ctor);
    lib.instance(exception, ".ctor", TypeSignature::Void, string_ctor.clone(), exception_ctor);
    lib.instance(exception, "get_Message", TypeSignature::String, vec![], exception_get_message);

    let derive = |lib: &mut Library, name: &str, base: &str| {
        let ty = lib.add_class("System", name, lib.class("System", base));
        lib.instance(&ty, ".ctor", TypeSignature::Void, vec![], exception_ctor);
        lib.instance(&ty, ".ctor", TypeSignature::Void, string_ctor.clone(), exception_ctor);
    };

    derive(lib, "SystemException", "Exception");
    derive(lib, "ArithmeticException", "SystemException");
    derive(lib, "DivideByZeroException", "ArithmeticException");
    derive(lib, "OverflowException", "ArithmeticException");
    for name in SYSTEM_EXCEPTIONS {
        derive(lib, name, "SystemException");
    }
    derive(lib, "ArgumentNullException", "ArgumentException");
    derive(lib, "ArgumentOutOfRangeException", "ArgumentException");
}

fn build_reflection(lib: &mut Library) {
    const REFLECTION: &str = "System.Reflection";

    let member_info = lib.add_class(REFLECTION, "MemberInfo", TypeSignature::Object);
    let type_sig = lib.class("System", "Type");
    lib.instance(&member_info, "get_Name", TypeSignature::String, vec![], member_get_name);
    lib.instance(&member_info, "get_DeclaringType", type_sig.clone(), vec![], member_get_declaring_type);

    let method_base = lib.add_class(REFLECTION, "MethodBase", lib.class(REFLECTION, "MemberInfo"));
    let method_base_sig = lib.class(REFLECTION, "MethodBase");
    lib.static_(&method_base, "GetCurrentMethod", method_base_sig, vec![], method_get_current);
    lib.add_class(REFLECTION, "MethodInfo", lib.class(REFLECTION, "MethodBase"));
    lib.add_class(REFLECTION, "ConstructorInfo", lib.class(REFLECTION, "MethodBase"));
    lib.add_class(REFLECTION, "FieldInfo", lib.class(REFLECTION, "MemberInfo"));

    let ty = lib.add_class("System", "Type", lib.class(REFLECTION, "MemberInfo"));
    let assembly_sig = lib.class(REFLECTION, "Assembly");
    let handle = lib.value_type("System", "RuntimeTypeHandle");
    lib.static_(&ty, "GetTypeFromHandle", type_sig.clone(), vec![handle], type_from_handle);
    lib.instance(&ty, "get_FullName", TypeSignature::String, vec![], type_get_full_name);
    lib.instance(&ty, "get_Assembly", assembly_sig.clone(), vec![], type_get_assembly);

    let assembly = lib.add_class(REFLECTION, "Assembly", TypeSignature::Object);
    lib.static_(&assembly, "GetCallingAssembly", assembly_sig.clone(), vec![], assembly_get_calling);
    lib.static_(&assembly, "GetExecutingAssembly", assembly_sig.clone(), vec![], assembly_get_executing);
    lib.static_(&assembly, "GetEntryAssembly", assembly_sig.clone(), vec![], assembly_get_entry);
    lib.static_(&assembly, "GetAssembly", assembly_sig, vec![type_sig], assembly_get_assembly);
    lib.instance(&assembly, "get_FullName", TypeSignature::String, vec![], assembly_get_full_name);
}

fn build_diagnostics(lib: &mut Library) {
    const DIAGNOSTICS: &str = "System.Diagnostics";

    let stack_trace = lib.add_class(DIAGNOSTICS, "StackTrace", TypeSignature::Object);
    let frame_sig = lib.class(DIAGNOSTICS, "StackFrame");
    lib.instance(&stack_trace, ".ctor", TypeSignature::Void, vec![], stack_trace_ctor);
    lib.instance(&stack_trace, ".ctor", TypeSignature::Void, vec![TypeSignature::I4], stack_trace_ctor);
    lib.instance(&stack_trace, "get_FrameCount", TypeSignature::I4, vec![], stack_trace_frame_count);
    lib.instance(&stack_trace, "GetFrame", frame_sig, vec![TypeSignature::I4], stack_trace_get_frame);

    let stack_frame = lib.add_class(DIAGNOSTICS, "StackFrame", TypeSignature::Object);
    let method_base_sig = lib.class("System.Reflection", "MethodBase");
    lib.instance(&stack_frame, ".ctor", TypeSignature::Void, vec![], stack_frame_ctor);
    lib.instance(&stack_frame, ".ctor", TypeSignature::Void, vec![TypeSignature::I4], stack_frame_ctor);
    lib.instance(&stack_frame, "GetMethod", method_base_sig, vec![], stack_frame_get_method);
}

fn native_error(method: &RuntimeMethod, reason: impl Into<String>) -> Error {
    Error::Emulation(EmulationError::NativeMethod {
        method: method.to_string(),
        reason: reason.into(),
    })
}

fn arg<'v>(method: &RuntimeMethod, args: &'v [Value], index: usize) -> Result<&'v Value> {
    args.get(index)
        .ok_or_else(|| native_error(method, format!("missing argument {index}")))
}

/// Instance receiver, `null` raises a `NullReferenceException`
fn receiver<'v>(method: &RuntimeMethod, args: &'v [Value]) -> Result<&'v Value> {
    let this = arg(method, args, 0)?;
    if this.is_null() {
        return Err(EmulationError::NullReference.into());
    }
    Ok(this)
}

fn string_arg<'v>(method: &RuntimeMethod, args: &'v [Value], index: usize) -> Result<&'v str> {
    match arg(method, args, index)? {
        Value::String(value) => Ok(value),
        Value::Null => Err(EmulationError::NullReference.into()),
        other => Err(native_error(
            method,
            format!("expected a string, found {}", other.type_name()),
        )),
    }
}

fn int_arg(method: &RuntimeMethod, args: &[Value], index: usize) -> Result<i32> {
    arg(method, args, index)?
        .as_i32()
        .ok_or_else(|| native_error(method, format!("argument {index} is not an int32")))
}

fn utf16(value: &str) -> Vec<u16> {
    value.encode_utf16().collect()
}

/// The text `String.Concat(object, ...)` uses for a value
fn concat_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Call stack innermost first, the way `StackTrace` enumerates it
fn frames_from(ctx: &NativeContext<'_>, skip: usize) -> Arc<[FrameIdentity]> {
    ctx.frames.iter().rev().skip(skip).cloned().collect()
}

fn frame_assembly(ctx: &NativeContext<'_>, depth: usize) -> Value {
    let from_frame = ctx
        .frames
        .iter()
        .rev()
        .nth(depth)
        .and_then(|frame| match frame {
            FrameIdentity::Method(method) => method.declaring_type().assembly().cloned(),
            FrameIdentity::Synthetic(_) => None,
        });
    match from_frame {
        Some(identity) => Value::Assembly(identity),
        None => entry_assembly(ctx),
    }
}

fn entry_assembly(ctx: &NativeContext<'_>) -> Value {
    ctx.host
        .entry_component()
        .map_or(Value::Null, |component| Value::Assembly(component.identity().clone()))
}

fn object_ctor(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    match args.into_iter().next() {
        Some(this) if !this.is_null() => Ok(this),
        _ => Ok(Value::new_object(method.declaring_type().clone())),
    }
}

fn object_get_type(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let this = receiver(method, &args)?;
    Ok(ctx.host.type_of(this)?.map_or(Value::Null, Value::Type))
}

fn object_to_string(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let this = receiver(method, &args)?;
    Ok(match this {
        Value::String(_) => this.clone(),
        other => Value::string(&other.to_string()),
    })
}

fn object_equals(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let this = receiver(method, &args)?;
    Ok(Value::from(this == arg(method, &args, 1)?))
}

fn array_get_length(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let array = receiver(method, &args)?
        .as_array()
        .ok_or_else(|| native_error(method, "receiver is not an array"))?;
    Ok(Value::I32(read_lock!(array).items.len() as i32))
}

fn string_ctor_chars(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let units = match arg(method, &args, 1)? {
        Value::Array(array) => read_lock!(array)
            .items
            .iter()
            .map(|item| item.as_i64().unwrap_or_default() as u16)
            .collect::<Vec<_>>(),
        Value::Null => Vec::new(),
        other => {
            return Err(native_error(
                method,
                format!("expected char[], found {}", other.type_name()),
            ))
        }
    };
    Ok(Value::string(&String::from_utf16_lossy(&units)))
}

fn string_get_length(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let this = string_arg(method, &args, 0)?;
    Ok(Value::I32(this.encode_utf16().count() as i32))
}

fn string_get_chars(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let units = utf16(string_arg(method, &args, 0)?);
    let index = int_arg(method, &args, 1)?;
    usize::try_from(index)
        .ok()
        .and_then(|index| units.get(index))
        .map(|unit| Value::I32(i32::from(*unit)))
        .ok_or_else(|| {
            EmulationError::ArrayIndexOutOfBounds {
                index: i64::from(index),
                length: units.len(),
            }
            .into()
        })
}

fn string_to_char_array(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let items = string_arg(method, &args, 0)?
        .encode_utf16()
        .map(|unit| Value::I32(i32::from(unit)))
        .collect();
    Ok(Value::new_array(ctx.host.corlib_type("System", "Char")?, items))
}

fn string_substring(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let units = utf16(string_arg(method, &args, 0)?);
    let start = int_arg(method, &args, 1)?;
    let length = match args.get(2) {
        Some(_) => int_arg(method, &args, 2)?,
        None => units.len() as i32 - start,
    };

    let out_of_range = || -> Error {
        EmulationError::ArrayIndexOutOfBounds {
            index: i64::from(start) + i64::from(length),
            length: units.len(),
        }
        .into()
    };
    let start = usize::try_from(start).map_err(|_| out_of_range())?;
    let length = usize::try_from(length).map_err(|_| out_of_range())?;
    let slice = units
        .get(start..start + length)
        .ok_or_else(out_of_range)?;
    Ok(Value::string(&String::from_utf16_lossy(slice)))
}

fn string_concat(_ctx: &NativeContext<'_>, _method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let text: String = args.iter().map(concat_text).collect();
    Ok(Value::string(&text))
}

fn string_equality(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(Value::from(arg(method, &args, 0)? == arg(method, &args, 1)?))
}

fn string_inequality(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(Value::from(arg(method, &args, 0)? != arg(method, &args, 1)?))
}

fn string_is_null_or_empty(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(Value::from(match arg(method, &args, 0)? {
        Value::String(value) => value.is_empty(),
        _ => true,
    }))
}

fn exception_ctor(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let message = match args.get(1) {
        Some(Value::String(message)) => Value::String(message.clone()),
        _ => Value::string(&format!(
            "Exception of type '{}' was thrown.",
            method.declaring_type()
        )),
    };
    let this = match args.into_iter().next() {
        Some(this) if !this.is_null() => this,
        _ => Value::new_object(method.declaring_type().clone()),
    };

    let object = this
        .as_object()
        .ok_or_else(|| native_error(method, "receiver is not an exception object"))?;
    write_lock!(object).fields.insert(EXCEPTION_MESSAGE, message);
    Ok(this)
}

fn exception_get_message(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let this = receiver(method, &args)?;
    Ok(this
        .exception_message()
        .map_or(Value::Null, |message| Value::string(&message)))
}

fn member_get_name(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(match receiver(method, &args)? {
        Value::Method(member) => Value::string(member.name()),
        Value::DynamicMethod(name) => Value::String(name.clone()),
        Value::Field(field) => Value::string(field.name()),
        Value::Type(RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _)) => {
            Value::string(&def.name)
        }
        Value::Type(other) => Value::string(&other.to_string()),
        other => {
            return Err(native_error(
                method,
                format!("{} is not a member", other.type_name()),
            ))
        }
    })
}

fn member_get_declaring_type(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(match receiver(method, &args)? {
        Value::Method(member) => Value::Type(member.declaring_type().clone()),
        Value::Field(field) => Value::Type(field.declaring_type().clone()),
        Value::Type(ty) => ty
            .definition()
            .and_then(|def| def.enclosing_type())
            .map_or(Value::Null, |outer| Value::Type(RuntimeType::Definition(outer))),
        _ => Value::Null,
    })
}

fn method_get_current(ctx: &NativeContext<'_>, _method: &RuntimeMethod, _args: Vec<Value>) -> Result<Value> {
    Ok(match ctx.frames.last() {
        Some(FrameIdentity::Method(method)) => Value::Method(method.clone()),
        Some(FrameIdentity::Synthetic(name)) => Value::DynamicMethod(name.clone()),
        None => Value::Null,
    })
}

fn type_from_handle(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    Ok(arg(method, &args, 0)?.clone())
}

fn type_get_full_name(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    match receiver(method, &args)? {
        Value::Type(ty) => Ok(Value::string(&ty.to_string())),
        other => Err(native_error(method, format!("{} is not a type", other.type_name()))),
    }
}

fn type_get_assembly(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    assembly_get_assembly(ctx, method, args)
}

fn assembly_get_calling(ctx: &NativeContext<'_>, _method: &RuntimeMethod, _args: Vec<Value>) -> Result<Value> {
    Ok(frame_assembly(ctx, 1))
}

fn assembly_get_executing(ctx: &NativeContext<'_>, _method: &RuntimeMethod, _args: Vec<Value>) -> Result<Value> {
    Ok(frame_assembly(ctx, 0))
}

fn assembly_get_entry(ctx: &NativeContext<'_>, _method: &RuntimeMethod, _args: Vec<Value>) -> Result<Value> {
    Ok(entry_assembly(ctx))
}

fn assembly_get_assembly(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    match receiver(method, &args)? {
        Value::Type(ty) => Ok(ty
            .assembly()
            .map_or(Value::Null, |identity| Value::Assembly(identity.clone()))),
        other => Err(native_error(method, format!("{} is not a type", other.type_name()))),
    }
}

fn assembly_get_full_name(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    match receiver(method, &args)? {
        Value::Assembly(identity) => Ok(Value::string(&identity.full_name())),
        other => Err(native_error(
            method,
            format!("{} is not an assembly", other.type_name()),
        )),
    }
}

fn stack_trace_ctor(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let skip = match args.get(1) {
        Some(_) => usize::try_from(int_arg(method, &args, 1)?).unwrap_or_default(),
        None => 0,
    };
    Ok(Value::StackTrace(frames_from(ctx, skip)))
}

fn stack_trace_frame_count(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    match receiver(method, &args)? {
        Value::StackTrace(frames) => Ok(Value::I32(frames.len() as i32)),
        other => Err(native_error(method, format!("{} is not a stack trace", other.type_name()))),
    }
}

fn stack_trace_get_frame(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let Value::StackTrace(frames) = receiver(method, &args)? else {
        return Err(native_error(method, "receiver is not a stack trace"));
    };
    let index = int_arg(method, &args, 1)?;
    let frame = usize::try_from(index)
        .ok()
        .and_then(|index| frames.get(index))
        .map(|frame| Arc::new(frame.clone()));
    Ok(Value::StackFrame(frame))
}

fn stack_frame_ctor(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let skip = match args.get(1) {
        Some(_) => usize::try_from(int_arg(method, &args, 1)?).unwrap_or_default(),
        None => 0,
    };
    let frame = ctx.frames.iter().rev().nth(skip).cloned().map(Arc::new);
    Ok(Value::StackFrame(frame))
}

fn stack_frame_get_method(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    let Value::StackFrame(frame) = receiver(method, &args)? else {
        return Err(native_error(method, "receiver is not a stack frame"));
    };
    Ok(match frame.as_deref() {
        Some(FrameIdentity::Method(method)) => Value::Method(method.clone()),
        Some(FrameIdentity::Synthetic(name)) => Value::DynamicMethod(name.clone()),
        None => Value::Null,
    })
}

fn encoding_get_utf8(_ctx: &NativeContext<'_>, method: &RuntimeMethod, _args: Vec<Value>) -> Result<Value> {
    Ok(Value::new_object(method.declaring_type().clone()))
}

fn encoding_get_string(_ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    receiver(method, &args)?;
    let bytes = match arg(method, &args, 1)? {
        Value::Array(array) => read_lock!(array)
            .items
            .iter()
            .map(|item| item.as_i64().unwrap_or_default() as u8)
            .collect::<Vec<_>>(),
        Value::Null => return Err(EmulationError::NullReference.into()),
        other => {
            return Err(native_error(
                method,
                format!("expected byte[], found {}", other.type_name()),
            ))
        }
    };
    Ok(Value::string(&String::from_utf8_lossy(&bytes)))
}

fn encoding_get_bytes(ctx: &NativeContext<'_>, method: &RuntimeMethod, args: Vec<Value>) -> Result<Value> {
    receiver(method, &args)?;
    let items = string_arg(method, &args, 1)?
        .bytes()
        .map(|byte| Value::I32(i32::from(byte)))
        .collect();
    Ok(Value::new_array(ctx.host.corlib_type("System", "Byte")?, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HostConfig,
        metadata::module::MethodAttributes,
        runtime::{types::MethodImpl, Host},
        test::create_runtime_method,
    };

    fn find_native(host: &Host, namespace: &str, ty: &str, name: &str, arity: usize) -> (RuntimeMethod, NativeFn) {
        let corlib = host.corlib().unwrap();
        let def = corlib
            .type_named(namespace, ty)
            .unwrap()
            .methods_named(name)
            .find(|method| method.signature.params.len() == arity)
            .cloned()
            .unwrap();
        let MethodImpl::Native(native) = def.implementation else {
            panic!("{name} is not native");
        };
        (RuntimeMethod::from_def(&def).unwrap(), native)
    }

    #[test]
    fn test_exception_message_slot() {
        let host = Host::new(HostConfig::default());
        let exception = host.corlib().unwrap().type_named("System", "Exception").unwrap();
        let field = exception.field_named("_message").unwrap();
        assert_eq!(field.slot(), EXCEPTION_MESSAGE);
    }

    #[test]
    fn test_exception_ctor_allocates_for_newobj() {
        let host = Host::new(HostConfig::default());
        let ctx = NativeContext {
            host: &host,
            frames: &[],
        };
        let (ctor, native) = find_native(&host, "System", "InvalidOperationException", ".ctor", 1);
        assert!(ctor.def().flags.contains(MethodAttributes::RT_SPECIAL_NAME));

        let exception = native(&ctx, &ctor, vec![Value::Null, Value::string("bad state")]).unwrap();
        assert_eq!(exception.type_name(), "System.InvalidOperationException");
        assert_eq!(exception.exception_message().as_deref(), Some("bad state"));
    }

    #[test]
    fn test_string_natives() {
        let host = Host::new(HostConfig::default());
        let ctx = NativeContext {
            host: &host,
            frames: &[],
        };

        let (concat, native) = find_native(&host, "System", "String", "Concat", 2);
        let joined = native(&ctx, &concat, vec![Value::string("ab"), Value::Null]).unwrap();
        assert_eq!(joined, Value::string("ab"));

        let (substring, native) = find_native(&host, "System", "String", "Substring", 2);
        let part = native(&ctx, &substring, vec![Value::string("hello"), 1.into(), 3.into()]).unwrap();
        assert_eq!(part, Value::string("ell"));
        let out_of_range = native(&ctx, &substring, vec![Value::string("hello"), 4.into(), 3.into()]);
        assert!(matches!(
            out_of_range,
            Err(Error::Emulation(EmulationError::ArrayIndexOutOfBounds { .. }))
        ));

        let (ctor, native) = find_native(&host, "System", "String", ".ctor", 1);
        let chars = Value::new_array(
            host.corlib_type("System", "Char").unwrap(),
            vec![Value::I32(0x48), Value::I32(0x69)],
        );
        assert_eq!(native(&ctx, &ctor, vec![Value::Null, chars]).unwrap(), Value::string("Hi"));

        let (length, native) = find_native(&host, "System", "String", "get_Length", 0);
        assert!(matches!(
            native(&ctx, &length, vec![Value::Null]),
            Err(Error::Emulation(EmulationError::NullReference))
        ));
    }

    #[test]
    fn test_stack_introspection_sees_callers_innermost_first() {
        let host = Host::new(HostConfig::default());
        let outer = crate::test::create_runtime_type("App", "Outer", 0);
        let caller = RuntimeMethod::from_def(&create_runtime_method(&outer, "Caller", true)).unwrap();
        let frames = [
            FrameIdentity::Method(caller.clone()),
            FrameIdentity::Synthetic(Arc::from("sandbox_body_0")),
        ];
        let ctx = NativeContext {
            host: &host,
            frames: &frames,
        };

        let (ctor, native_ctor) = find_native(&host, "System.Diagnostics", "StackTrace", ".ctor", 0);
        let trace = native_ctor(&ctx, &ctor, vec![Value::Null]).unwrap();
        let (get_frame, native_get_frame) = find_native(&host, "System.Diagnostics", "StackTrace", "GetFrame", 1);
        let frame = native_get_frame(&ctx, &get_frame, vec![trace, 1.into()]).unwrap();
        let (get_method, native_get_method) = find_native(&host, "System.Diagnostics", "StackFrame", "GetMethod", 0);
        assert_eq!(
            native_get_method(&ctx, &get_method, vec![frame]).unwrap(),
            Value::Method(caller)
        );

        let (get_calling, native_get_calling) =
            find_native(&host, "System.Reflection", "Assembly", "GetCallingAssembly", 0);
        let calling = native_get_calling(&ctx, &get_calling, vec![]).unwrap();
        assert_eq!(calling, Value::Assembly(outer.assembly.clone()));
    }
}
