use std::fmt;

use thiserror::Error;

use crate::{metadata::token::Token, runtime::Value};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure of the resolver, the translator and the sandbox surfaces through this enum.
/// None of them is retried or replaced with a default value inside the library: a decryption
/// strategy that receives one of these errors is expected to abandon the current attempt.
///
/// # Error Categories
///
/// ## Sandboxing Errors
/// - [`Error::Unresolved`] - A structural reference names nothing reachable
/// - [`Error::Translation`] - An opcode/operand combination the translator does not understand
/// - [`Error::MissingBody`] - A method selected for sandboxing has no bytecode
/// - [`Error::IntrospectionInvariant`] - A stack frame carries an unknown synthetic name
///
/// ## Execution Errors
/// - [`Error::Emulation`] - The interpreter failed (stack underflow, limits, invalid casts)
/// - [`Error::Exception`] - A managed exception escaped the sandboxed code
///
/// ## Miscellaneous
/// - [`Error::Malformed`] - Input metadata or bodies are internally inconsistent
/// - [`Error::LockError`] - Thread synchronization failure
/// - [`Error::Error`] - Anything else
///
/// # Examples
///
/// ```rust,no_run
/// use dotsandbox::{Error, prelude::*};
///
/// # fn run(sandbox: &Sandbox, method: &RuntimeMethod) {
/// let result = sandbox
///     .create_method(method)
///     .and_then(|index| sandbox.invoke_uniform(index, vec![]));
/// match result {
///     Ok(value) => println!("decrypted: {value:?}"),
///     Err(Error::Unresolved { reference, component }) => {
///         eprintln!("cannot resolve {reference} in {component}");
///     }
///     Err(e) => eprintln!("sandbox failed: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A structural reference could not be resolved to a live handle.
    ///
    /// Carries the printable form of the reference and the identity of the component
    /// the reference was expected to live in.
    #[error("Could not resolve {reference} in {component}")]
    Unresolved {
        /// Printable form of the unresolvable reference
        reference: String,
        /// Identity of the owning component
        component: String,
    },

    /// The translator met an opcode/operand combination it cannot emit.
    #[error("Unsupported instruction {opcode} with operand kind {operand}")]
    Translation {
        /// Mnemonic of the instruction
        opcode: String,
        /// Name of the operand kind
        operand: &'static str,
    },

    /// A method selected for sandboxing has no bytecode.
    #[error("Method {name} ({token}) has no body")]
    MissingBody {
        /// Full name of the method
        name: String,
        /// Definition token of the method
        token: Token,
    },

    /// A stack frame reported a synthetic method name that belongs to no pending method.
    ///
    /// This means a call site escaped rewriting and the stack can not be repaired.
    #[error("Stack frame reports unknown synthetic method {0}")]
    IntrospectionInvariant(String),

    /// The interpreter failed to execute an emitted method.
    #[error("{0}")]
    Emulation(#[from] EmulationError),

    /// A managed exception was thrown and not caught by any handler.
    #[error("Unhandled managed exception: {0}")]
    Exception(ThrownException),

    /// The input is damaged and could not be processed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}

/// A managed exception object that escaped all handlers.
///
/// Wraps the thrown value so that it can travel through [`Error`] and be re-caught by an
/// outer frame of the interpreter.
#[derive(Clone)]
pub struct ThrownException(pub Value);

impl ThrownException {
    /// Returns the thrown exception object
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.exception_message() {
            Some(message) => write!(f, "{} ({message})", self.0.type_name()),
            None => write!(f, "{}", self.0.type_name()),
        }
    }
}

impl fmt::Debug for ThrownException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThrownException({self})")
    }
}

/// Errors that can occur while interpreting an emitted method.
///
/// A subset of these correspond to runtime exceptions of the platform library and can be
/// caught by handlers in the sandboxed code, see [`EmulationError::exception_type_name`].
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Evaluation stack overflow.
    StackOverflow,
    /// Evaluation stack underflow (pop from empty stack).
    StackUnderflow,
    /// Local variable index out of bounds.
    LocalIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of locals available.
        count: usize,
    },
    /// Argument index out of bounds.
    ArgumentIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of arguments available.
        count: usize,
    },
    /// Null reference access.
    NullReference,
    /// Division by zero.
    DivisionByZero,
    /// Arithmetic overflow.
    ArithmeticOverflow,
    /// Type mismatch in operation.
    TypeMismatch {
        /// Operation being performed.
        operation: &'static str,
        /// Expected type.
        expected: &'static str,
        /// Actual type found.
        found: &'static str,
    },
    /// Invalid cast operation.
    InvalidCast {
        /// Source type.
        from_type: String,
        /// Target type.
        to_type: String,
    },
    /// Invalid branch target.
    InvalidBranchTarget {
        /// The invalid target index.
        target: usize,
    },
    /// Call depth limit exceeded.
    CallDepthExceeded {
        /// Current call depth.
        depth: usize,
        /// Maximum allowed depth.
        limit: usize,
    },
    /// Instruction count limit exceeded.
    InstructionLimitExceeded {
        /// Number of instructions executed.
        executed: u64,
        /// Maximum allowed.
        limit: u64,
    },
    /// The interpreter has no implementation for an emitted opcode.
    UnsupportedOpcode {
        /// Instruction mnemonic.
        mnemonic: &'static str,
    },
    /// Invalid operand for instruction.
    InvalidOperand {
        /// Instruction mnemonic.
        instruction: &'static str,
        /// Description of what was expected.
        expected: &'static str,
    },
    /// Array index out of bounds.
    ArrayIndexOutOfBounds {
        /// The invalid index.
        index: i64,
        /// Array length.
        length: usize,
    },
    /// A native platform method received arguments it cannot handle.
    NativeMethod {
        /// Name of the native method.
        method: String,
        /// Description of the problem.
        reason: String,
    },
    /// Invalid exception handler state.
    InvalidExceptionHandler {
        /// Description of the problem.
        description: String,
    },
    /// Internal emulation error (bug in the interpreter).
    InternalError {
        /// Description of the error.
        description: String,
    },
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::StackOverflow => write!(f, "evaluation stack overflow"),
            EmulationError::StackUnderflow => write!(f, "evaluation stack underflow"),
            EmulationError::LocalIndexOutOfBounds { index, count } => {
                write!(
                    f,
                    "local variable index {index} out of bounds (count: {count})"
                )
            }
            EmulationError::ArgumentIndexOutOfBounds { index, count } => {
                write!(f, "argument index {index} out of bounds (count: {count})")
            }
            EmulationError::NullReference => write!(f, "null reference"),
            EmulationError::DivisionByZero => write!(f, "division by zero"),
            EmulationError::ArithmeticOverflow => write!(f, "arithmetic overflow"),
            EmulationError::TypeMismatch {
                operation,
                expected,
                found,
            } => {
                write!(
                    f,
                    "type mismatch in {operation}: expected {expected}, found {found}"
                )
            }
            EmulationError::InvalidCast { from_type, to_type } => {
                write!(f, "invalid cast from {from_type} to {to_type}")
            }
            EmulationError::InvalidBranchTarget { target } => {
                write!(f, "invalid branch target: {target}")
            }
            EmulationError::CallDepthExceeded { depth, limit } => {
                write!(f, "call depth exceeded: {depth} (limit: {limit})")
            }
            EmulationError::InstructionLimitExceeded { executed, limit } => {
                write!(f, "instruction limit exceeded: {executed} (limit: {limit})")
            }
            EmulationError::UnsupportedOpcode { mnemonic } => {
                write!(f, "unsupported opcode: {mnemonic}")
            }
            EmulationError::InvalidOperand {
                instruction,
                expected,
            } => {
                write!(f, "invalid operand for {instruction}: expected {expected}")
            }
            EmulationError::ArrayIndexOutOfBounds { index, length } => {
                write!(f, "array index {index} out of bounds (length: {length})")
            }
            EmulationError::NativeMethod { method, reason } => {
                write!(f, "native method {method} failed: {reason}")
            }
            EmulationError::InvalidExceptionHandler { description } => {
                write!(f, "invalid exception handler: {description}")
            }
            EmulationError::InternalError { description } => {
                write!(f, "internal emulation error: {description}")
            }
        }
    }
}

impl std::error::Error for EmulationError {}

impl EmulationError {
    /// Checks if this error should be treated as a managed exception.
    ///
    /// Certain emulation errors correspond to runtime exceptions:
    /// - `ArrayIndexOutOfBounds` -> `IndexOutOfRangeException`
    /// - `NullReference` -> `NullReferenceException`
    /// - `DivisionByZero` -> `DivideByZeroException`
    /// - `ArithmeticOverflow` -> `OverflowException`
    /// - `InvalidCast` -> `InvalidCastException`
    ///
    /// These errors can be caught by exception handlers of the sandboxed code.
    #[must_use]
    pub fn is_clr_exception(&self) -> bool {
        self.exception_type_name().is_some()
    }

    /// Maps this error to the full name of the platform exception type it raises.
    ///
    /// # Returns
    ///
    /// The exception type name, or `None` for errors that are interpreter failures.
    #[must_use]
    pub fn exception_type_name(&self) -> Option<&'static str> {
        match self {
            EmulationError::ArrayIndexOutOfBounds { .. } => {
                Some("System.IndexOutOfRangeException")
            }
            EmulationError::NullReference => Some("System.NullReferenceException"),
            EmulationError::DivisionByZero => Some("System.DivideByZeroException"),
            EmulationError::ArithmeticOverflow => Some("System.OverflowException"),
            EmulationError::InvalidCast { .. } => Some("System.InvalidCastException"),
            _ => None,
        }
    }
}
