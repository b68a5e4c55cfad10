//! Runtime values of the evaluation stack, locals, arguments and the heap.
//!
//! [`Value`] covers everything emitted code can hold:
//!
//! | CIL stack type | Variant |
//! |----------------|---------|
//! | `int32` (and the narrower integers, `bool`, `char`) | [`Value::I32`] |
//! | `int64` | [`Value::I64`] |
//! | `native int` | [`Value::NativeInt`] |
//! | `F` | [`Value::F64`] |
//! | object reference | [`Value::String`], [`Value::Array`], [`Value::Object`], [`Value::Boxed`], reflection handles |
//! | managed pointer | [`Value::Pointer`] |
//!
//! Heap values are reference counted and compare by identity, strings compare by content.
//! Reflection objects the platform library hands out (types, methods, assemblies, stack
//! traces) are carried directly as handles rather than as heap objects.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use rustc_hash::FxHashMap;

use crate::{
    metadata::identity::AssemblyIdentity,
    runtime::{
        corlib::EXCEPTION_MESSAGE,
        emit::DynamicMethod,
        types::{FieldSlot, RuntimeField, RuntimeMethod, RuntimeType},
    },
};

/// A shared, mutable array
pub type ArrayRef = Arc<RwLock<ManagedArray>>;
/// A shared, mutable object
pub type ObjectRef = Arc<RwLock<ManagedObject>>;

/// An array on the heap
#[derive(Debug)]
pub struct ManagedArray {
    /// The element type
    pub element: RuntimeType,
    /// The elements
    pub items: Vec<Value>,
}

/// An object on the heap
#[derive(Debug)]
pub struct ManagedObject {
    /// The exact type of the object
    pub ty: RuntimeType,
    /// Instance field values, unset fields read as their default
    pub fields: FxHashMap<FieldSlot, Value>,
}

impl ManagedObject {
    /// Creates an object without field values
    #[must_use]
    pub fn new(ty: RuntimeType) -> Self {
        ManagedObject {
            ty,
            fields: FxHashMap::default(),
        }
    }
}

/// A boxed value type
#[derive(Debug)]
pub struct BoxedValue {
    /// The value type
    pub ty: RuntimeType,
    /// The unboxed value
    pub value: Value,
}

/// Target of a managed pointer
#[derive(Debug, Clone)]
pub enum Pointer {
    /// A local variable of an active frame
    Local {
        /// Depth of the frame
        frame: usize,
        /// Index of the local
        index: usize,
    },
    /// An argument of an active frame
    Argument {
        /// Depth of the frame
        frame: usize,
        /// Index of the argument
        index: usize,
    },
    /// An array element
    Element {
        /// The array
        array: ArrayRef,
        /// Index of the element
        index: usize,
    },
    /// An instance field
    Field {
        /// The object
        object: ObjectRef,
        /// The field
        field: FieldSlot,
    },
    /// A static field
    Static(FieldSlot),
}

/// What a call stack frame executes
#[derive(Debug, Clone, PartialEq)]
pub enum FrameIdentity {
    /// A real method
    Method(RuntimeMethod),
    /// An emitted method, known only by its synthetic name
    Synthetic(Arc<str>),
}

impl fmt::Display for FrameIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameIdentity::Method(method) => write!(f, "{method}"),
            FrameIdentity::Synthetic(name) => f.write_str(name),
        }
    }
}

/// A runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// No value, the result of a `void` method
    #[default]
    Void,
    /// The null reference
    Null,
    /// 32-bit integer, also `bool`, `char` and the narrower integers
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Native integer
    NativeInt(i64),
    /// Floating point, both `float32` and `float64`
    F64(f64),
    /// An immutable string
    String(Arc<str>),
    /// An array
    Array(ArrayRef),
    /// An object
    Object(ObjectRef),
    /// A boxed value type
    Boxed(Arc<BoxedValue>),
    /// A managed pointer
    Pointer(Pointer),
    /// A `System.Type`
    Type(RuntimeType),
    /// A `System.Reflection.MethodBase`
    Method(RuntimeMethod),
    /// A `System.Reflection.FieldInfo`
    Field(RuntimeField),
    /// The `MethodBase` of an emitted method
    DynamicMethod(Arc<str>),
    /// A `System.Reflection.Assembly`
    Assembly(AssemblyIdentity),
    /// A `System.Diagnostics.StackTrace`, innermost frame first
    StackTrace(Arc<[FrameIdentity]>),
    /// A `System.Diagnostics.StackFrame`, `None` past the end of the stack
    StackFrame(Option<Arc<FrameIdentity>>),
    /// A delegate bound to an emitted method
    Delegate(Arc<DynamicMethod>),
    /// The orchestrator instance passed to emitted methods
    Orchestrator,
}

impl Value {
    /// Creates a string value
    #[must_use]
    pub fn string(value: &str) -> Self {
        Value::String(Arc::from(value))
    }

    /// Allocates an object without field values
    #[must_use]
    pub fn new_object(ty: RuntimeType) -> Self {
        Value::Object(Arc::new(RwLock::new(ManagedObject::new(ty))))
    }

    /// Allocates an array
    #[must_use]
    pub fn new_array(element: RuntimeType, items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(ManagedArray { element, items })))
    }

    /// Boxes a value
    #[must_use]
    pub fn boxed(ty: RuntimeType, value: Value) -> Self {
        Value::Boxed(Arc::new(BoxedValue { ty, value }))
    }

    /// The zero value of a type, as stored in fresh locals, fields and array elements
    #[must_use]
    pub fn default_for(ty: &RuntimeType) -> Self {
        let RuntimeType::Definition(def) = ty else {
            return Value::Null;
        };
        if def.namespace != "System" {
            return if def.value_type {
                Value::new_object(ty.clone())
            } else {
                Value::Null
            };
        }
        match def.name.as_str() {
            "Boolean" | "Char" | "SByte" | "Byte" | "Int16" | "UInt16" | "Int32" | "UInt32" => {
                Value::I32(0)
            }
            "Int64" | "UInt64" => Value::I64(0),
            "Single" | "Double" => Value::F64(0.0),
            "IntPtr" | "UIntPtr" => Value::NativeInt(0),
            _ if def.value_type => Value::new_object(ty.clone()),
            _ => Value::Null,
        }
    }

    /// True for `null`
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Interprets the value as a condition, the way `brtrue` does
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Value::Void | Value::Null => false,
            Value::I32(value) => *value != 0,
            Value::I64(value) | Value::NativeInt(value) => *value != 0,
            Value::F64(value) => *value != 0.0,
            _ => true,
        }
    }

    /// Returns the value of an `int32`
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns any integer value widened to 64 bits
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(value) => Some(i64::from(*value)),
            Value::I64(value) | Value::NativeInt(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns a floating point value
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the content of a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns an array reference
    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Returns an object reference
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the method a reflection handle denotes
    #[must_use]
    pub fn as_method(&self) -> Option<&RuntimeMethod> {
        match self {
            Value::Method(method) => Some(method),
            _ => None,
        }
    }

    /// The exact type of an object, boxed value or array
    #[must_use]
    pub fn runtime_type(&self) -> Option<RuntimeType> {
        match self {
            Value::Object(object) => object.read().ok().map(|object| object.ty.clone()),
            Value::Boxed(boxed) => Some(boxed.ty.clone()),
            Value::Array(array) => array
                .read()
                .ok()
                .map(|array| RuntimeType::SzArray(Box::new(array.element.clone()))),
            _ => None,
        }
    }

    /// Printable type name, used in diagnostics and cast failures
    #[must_use]
    pub fn type_name(&self) -> String {
        if let Some(ty) = self.runtime_type() {
            return ty.to_string();
        }
        match self {
            Value::Void => "System.Void",
            Value::Null => "null",
            Value::I32(_) => "System.Int32",
            Value::I64(_) => "System.Int64",
            Value::NativeInt(_) => "System.IntPtr",
            Value::F64(_) => "System.Double",
            Value::String(_) => "System.String",
            Value::Pointer(_) => "pointer",
            Value::Type(_) => "System.Type",
            Value::Method(_) | Value::DynamicMethod(_) => "System.Reflection.MethodBase",
            Value::Field(_) => "System.Reflection.FieldInfo",
            Value::Assembly(_) => "System.Reflection.Assembly",
            Value::StackTrace(_) => "System.Diagnostics.StackTrace",
            Value::StackFrame(_) => "System.Diagnostics.StackFrame",
            Value::Delegate(_) => "System.Delegate",
            Value::Orchestrator => "orchestrator",
            Value::Array(_) | Value::Object(_) | Value::Boxed(_) => "object",
        }
        .to_string()
    }

    /// The message of an exception object
    #[must_use]
    pub fn exception_message(&self) -> Option<String> {
        let object = self.as_object()?.read().ok()?;
        object
            .fields
            .get(&EXCEPTION_MESSAGE)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Short stack-type name used in type mismatch errors
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::NativeInt(_) => "native int",
            Value::F64(_) => "F",
            Value::Pointer(_) => "managed pointer",
            _ => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void)
            | (Value::Null, Value::Null)
            | (Value::Orchestrator, Value::Orchestrator) => true,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) | (Value::NativeInt(a), Value::NativeInt(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Boxed(a), Value::Boxed(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => a == b,
            (Value::Field(a), Value::Field(b)) => a == b,
            (Value::DynamicMethod(a), Value::DynamicMethod(b)) => a == b,
            (Value::Assembly(a), Value::Assembly(b)) => a == b,
            (Value::StackTrace(a), Value::StackTrace(b)) => a == b,
            (Value::StackFrame(a), Value::StackFrame(b)) => a == b,
            (Value::Delegate(a), Value::Delegate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("Void"),
            Value::Null => f.write_str("Null"),
            Value::I32(value) => write!(f, "I32({value})"),
            Value::I64(value) => write!(f, "I64({value})"),
            Value::NativeInt(value) => write!(f, "NativeInt({value})"),
            Value::F64(value) => write!(f, "F64({value})"),
            Value::String(value) => write!(f, "String({value:?})"),
            Value::Array(array) => match array.read() {
                Ok(array) => write!(f, "Array({}[{}])", array.element, array.items.len()),
                Err(_) => f.write_str("Array(<poisoned>)"),
            },
            Value::Object(_) => write!(f, "Object({})", self.type_name()),
            Value::Boxed(boxed) => write!(f, "Boxed({}, {:?})", boxed.ty, boxed.value),
            Value::Pointer(pointer) => write!(f, "Pointer({pointer:?})"),
            Value::Type(ty) => write!(f, "Type({ty})"),
            Value::Method(method) => write!(f, "Method({method})"),
            Value::Field(field) => write!(f, "Field({field})"),
            Value::DynamicMethod(name) => write!(f, "DynamicMethod({name})"),
            Value::Assembly(identity) => write!(f, "Assembly({})", identity.full_name()),
            Value::StackTrace(frames) => write!(f, "StackTrace({} frames)", frames.len()),
            Value::StackFrame(Some(frame)) => write!(f, "StackFrame({frame})"),
            Value::StackFrame(None) => f.write_str("StackFrame(<none>)"),
            Value::Delegate(method) => write!(f, "Delegate({})", method.name()),
            Value::Orchestrator => f.write_str("Orchestrator"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::I32(value) => write!(f, "{value}"),
            Value::I64(value) | Value::NativeInt(value) => write!(f, "{value}"),
            Value::F64(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
            Value::Boxed(boxed) => write!(f, "{}", boxed.value),
            Value::Type(ty) => write!(f, "{ty}"),
            Value::Method(method) => write!(f, "{method}"),
            Value::DynamicMethod(name) => f.write_str(name),
            Value::Assembly(identity) => f.write_str(&identity.full_name()),
            other => f.write_str(&other.type_name()),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::I32(i32::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        assert_eq!(Value::I32(5), Value::I32(5));
        assert_ne!(Value::I32(5), Value::I64(5));
        assert_eq!(Value::string("abc"), Value::from("abc"));
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Void);
    }

    #[test]
    fn test_conditions() {
        assert!(!Value::Null.is_true());
        assert!(!Value::I32(0).is_true());
        assert!(Value::I64(-1).is_true());
        assert!(Value::string("").is_true());
    }

    #[test]
    fn test_widening_accessors() {
        assert_eq!(Value::I32(-3).as_i64(), Some(-3));
        assert_eq!(Value::I64(7).as_i32(), None);
        assert_eq!(Value::from(true), Value::I32(1));
        assert_eq!(Value::string("x").as_str(), Some("x"));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::I32(1).type_name(), "System.Int32");
        assert_eq!(Value::string("a").type_name(), "System.String");
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::F64(1.5).kind(), "F");
    }
}
