//! Parsed metadata as consumed by the sandbox.
//!
//! The binary reader is an external collaborator; this module defines the shape of what it
//! hands over:
//!
//! - [`module`] - Component symbol tables ([`module::ModuleDef`], types, methods, fields)
//! - [`method`] - Method bodies: instructions, operands and exception regions
//! - [`references`] - Structural references to types, methods and fields
//! - [`signatures`] - Type and method signatures
//! - [`opcodes`] - The CIL instruction set
//! - [`identity`] - Component identities
//! - [`token`] - Metadata tokens

pub mod identity;
pub mod method;
pub mod module;
pub mod opcodes;
pub mod references;
pub mod signatures;
pub mod token;
