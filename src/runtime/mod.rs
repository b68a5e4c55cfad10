//! Execution substrate of the sandbox.
//!
//! The runtime models the managed host process just far enough to run interpreted code:
//!
//! - [`host`] - The component table, the static field store and type initialization
//! - [`component`] - Runtime type tables built from parsed metadata or natively
//! - [`corlib`] - The built-in platform library
//! - [`types`] - Runtime types, methods and fields
//! - [`value`] - Values and heap objects
//! - [`emit`] - The dynamic method builder and the emitted instruction set
//! - [`interpreter`] - Executes emitted methods
//!
//! All emitted code is interpreted. Methods of the platform library are native functions
//! ([`NativeFn`]) that observe the managed call stack through a [`NativeContext`].

pub mod component;
pub mod corlib;
pub mod emit;
pub mod host;
pub mod interpreter;
pub mod ops;
pub mod types;
pub mod value;

pub use component::{Component, ComponentBuilder, ComponentRc};
pub use emit::{
    ClauseKind, DynamicMethod, EmitOperand, EmittedInstruction, ExceptionClause, Label,
    MethodBuilder, OpCode,
};
pub use host::{ComponentProvider, Host};
pub use interpreter::{Interpreter, MethodDispatcher};
pub use types::{
    ComponentId, GenericContext, MethodImpl, RuntimeField, RuntimeMethod, RuntimeType,
    RuntimeTypeDef, RuntimeTypeDefRc,
};
pub use value::{FrameIdentity, Value};

use crate::Result;

/// What a native method sees of the process calling it.
pub struct NativeContext<'a> {
    /// The host process
    pub host: &'a Host,
    /// The managed call stack, innermost frame last
    pub frames: &'a [FrameIdentity],
}

/// A method implemented natively.
///
/// Receives the called method (with its generic instantiation) and the stack arguments,
/// `this` first for instance methods.
pub type NativeFn = fn(&NativeContext<'_>, &RuntimeMethod, Vec<Value>) -> Result<Value>;
