// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

//! # dotsandbox
//!
//! Sandboxed re-execution of CIL methods for .NET deobfuscation.
//!
//! Obfuscated binaries commonly hide their strings and constants behind decrypter methods.
//! Rather than re-implementing every decrypter, `dotsandbox` runs the original method: its
//! body is translated into a freshly emitted method and interpreted, with every call back into
//! the analysed binary routed through the sandbox as well. Code that inspects its own call
//! stack or asks for its assembly sees the original methods, never the emitted ones.
//!
//! ## Features
//!
//! - **Cross-component resolution** - Type, method and field references resolved across every
//!   loaded component by canonical signature keys, with definition tokens as a fast path
//! - **Single-pass translation** - Method bodies with nested exception regions replayed through
//!   a dynamic method builder
//! - **Uniform invocation** - Every sandboxed method callable as
//!   `(object[] args, orchestrator) -> object`
//! - **Introspection repair** - Stack traces, stack frames and assembly queries report the
//!   original methods
//!
//! ## Architecture
//!
//! - [`metadata`] - Parsed method bodies, signatures and structural references
//! - [`runtime`] - The host process: components, live handles, the platform library and the
//!   interpreter emitted methods run on
//! - [`resolver`] - Maps structural references to live handles
//! - [`translator`] - Replays method bodies into emitted methods
//! - [`sandbox`] - The orchestrator owning one session's pending methods
//! - [`service`] - The decrypter facade
//!
//! All caches live in explicit context objects ([`runtime::Host`], [`resolver::Resolver`],
//! [`sandbox::Sandbox`]); nothing is global apart from the counter synthetic names are drawn
//! from.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsandbox::prelude::*;
//!
//! # fn run(module: ModuleDef) -> dotsandbox::Result<()> {
//! let resolver = Arc::new(Resolver::new(Arc::new(Host::new(HostConfig::default()))));
//! let component = resolver.track(Arc::new(module))?.component().id();
//!
//! let service = DecrypterService::new(resolver, SandboxConfig::default());
//! let decrypter = service.define_decrypter(component, Token::new(0x0600_0012))?;
//! let strings = service.decrypt(decrypter, vec![vec![Value::I32(0x2a)]], None)?;
//! println!("{strings:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Failures are never retried or
//! replaced with defaults inside the library:
//!
//! ```rust,no_run
//! use dotsandbox::{prelude::*, Error};
//!
//! # fn run(sandbox: &Sandbox, method: &RuntimeMethod) {
//! match sandbox.create_method(method) {
//!     Ok(index) => println!("pending method {index}"),
//!     Err(Error::MissingBody { name, .. }) => println!("{name} has no body"),
//!     Err(Error::Unresolved { reference, component }) => println!("{reference} not in {component}"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger itself: `debug` for
//! registration, rewriting and translation milestones, `trace` for resolver cache misses and
//! individual rewrites, `warn` for opcodes translated as no-ops.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use dotsandbox::prelude::*;
///
/// let host = Host::new(HostConfig::default());
/// println!("{:?}", host.corlib().map(|corlib| corlib.identity().clone()));
/// ```
pub mod prelude;

/// Configuration of the host and of sandbox sessions
pub mod config;

/// Parsed metadata: method bodies, signatures, structural references and identities
pub mod metadata;

/// The host process emitted methods execute in
pub mod runtime;

/// Cross-component symbol resolution
pub mod resolver;

/// Translation of method bodies into emitted methods
pub mod translator;

/// The sandbox orchestrator
pub mod sandbox;

/// The decrypter facade
pub mod service;

/// `dotsandbox` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotsandbox` Error type
///
/// Every failure of the resolver, the translator, the sandbox and the interpreter.
pub use error::{EmulationError, Error, ThrownException};

/// Configuration types, see [`config`]
pub use config::{ExecutionLimits, HostConfig, SandboxConfig};
