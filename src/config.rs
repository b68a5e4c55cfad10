//! Configuration types.
//!
//! - [`HostConfig`] - Identity of the built-in platform library
//! - [`SandboxConfig`] - Synthetic naming and execution limits of a sandbox session
//! - [`ExecutionLimits`] - Instruction budget, call depth and evaluation stack depth
//!
//! # Example
//!
//! ```rust
//! use dotsandbox::{ExecutionLimits, SandboxConfig};
//!
//! let config = SandboxConfig {
//!     limits: ExecutionLimits::new()
//!         .with_max_instructions(5_000_000)
//!         .with_max_call_depth(128),
//!     ..Default::default()
//! };
//! assert_eq!(config.limits.max_call_depth, 128);
//! ```

use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

/// Configuration of the host process.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Simple name of the platform library, the scope platform types are referenced with
    pub corlib_name: String,

    /// Version reported for the platform library
    pub corlib_version: AssemblyVersion,
}

impl HostConfig {
    /// Identity of the platform library
    #[must_use]
    pub fn corlib_identity(&self) -> AssemblyIdentity {
        AssemblyIdentity::new(self.corlib_name.clone(), self.corlib_version)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            corlib_name: "mscorlib".to_string(),
            corlib_version: AssemblyVersion::new(4, 0, 0, 0),
        }
    }
}

/// Limits applied while sandboxed code runs.
///
/// When a limit is exceeded, execution stops with the matching
/// [`crate::EmulationError`]. A limit of 0 disables the check.
///
/// # Presets
///
/// - [`ExecutionLimits::strict()`] - Small budgets for short decrypter routines
/// - [`ExecutionLimits::permissive()`] - Large budgets for initialization heavy code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum instructions executed per top-level invocation.
    ///
    /// Set to 0 for unlimited execution.
    pub max_instructions: u64,

    /// Maximum call stack depth.
    ///
    /// Nested calls through wrappers count like any other call.
    pub max_call_depth: usize,

    /// Maximum evaluation stack depth of a single frame.
    pub max_stack_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_instructions: 10_000_000,
            max_call_depth: 256,
            max_stack_depth: 1024,
        }
    }
}

impl ExecutionLimits {
    /// Creates new limits with default values.
    ///
    /// Equivalent to [`ExecutionLimits::default()`]. Use the `with_*` methods
    /// to customize individual limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Small budgets, for decrypter routines expected to finish quickly
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_instructions: 100_000,
            max_call_depth: 32,
            max_stack_depth: 256,
        }
    }

    /// Large budgets, for code running big type initializers
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_instructions: 0,
            max_call_depth: 1024,
            max_stack_depth: 8192,
        }
    }

    /// Sets the maximum instruction count.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum instructions to execute (0 for unlimited)
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the maximum call stack depth.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum nested method calls
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    /// Sets the maximum evaluation stack depth.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum values on the evaluation stack of one frame
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_stack_depth(mut self, max: usize) -> Self {
        self.max_stack_depth = max;
        self
    }
}

/// Configuration of a sandbox session.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Prefix of the synthetic names given to uniform wrappers
    pub wrapper_prefix: String,

    /// Prefix of the synthetic names given to translated bodies
    pub body_prefix: String,

    /// Limits applied to every invocation
    pub limits: ExecutionLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            wrapper_prefix: "sandbox_wrapper".to_string(),
            body_prefix: "sandbox_body".to_string(),
            limits: ExecutionLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Default naming with the given limits
    #[must_use]
    pub fn with_limits(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }
}
