//! # dotsandbox Prelude
//!
//! The types needed to load components, resolve references, translate bodies and run them in
//! a sandbox, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotsandbox operations
pub use crate::Error;

/// The result type used throughout dotsandbox
pub use crate::Result;

/// Failures of the interpreter
pub use crate::{EmulationError, ThrownException};

/// Configuration
pub use crate::{ExecutionLimits, HostConfig, SandboxConfig};

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Parsed modules and their members
pub use crate::metadata::module::{MethodDef, ModuleDef, TypeDef};

/// Method bodies
pub use crate::metadata::method::{ExceptionRegion, Instruction, MethodBody, Operand};

/// Structural references
pub use crate::metadata::references::{FieldRef, MemberRef, MethodRef, TypeRef};

/// Signatures
pub use crate::metadata::signatures::{SignatureMethod, TypeSignature};

/// Assembly identities
pub use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

// ================================================================================================
// Runtime
// ================================================================================================

/// The host process and its live handles
pub use crate::runtime::{
    ComponentId, DynamicMethod, FrameIdentity, GenericContext, Host, Interpreter, RuntimeField,
    RuntimeMethod, RuntimeType, Value,
};

// ================================================================================================
// Resolution, Translation and Sandboxing
// ================================================================================================

/// Symbol resolution
pub use crate::resolver::{ResolvedMember, Resolver};

/// Translation
pub use crate::translator::{MethodContext, Translator};

/// The orchestrator
pub use crate::sandbox::{PendingState, Sandbox, SandboxStats};

/// The decrypter facade
pub use crate::service::DecrypterService;
