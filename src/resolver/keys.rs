//! Canonical signature keys.
//!
//! Two references name the same member when their keys are equal. Keys are built from the
//! structural form only, so a reference read from one component compares equal to the
//! definition in another: custom modifiers and pinning are dropped, primitives spelled as
//! named platform types collapse into the primitive, and component scopes compare by simple
//! name without case or version.

use std::fmt;

use crate::metadata::{
    references::TypeRef,
    signatures::{SignatureMethod, TypeSignature},
};

/// Canonical form of a type signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A platform primitive by its `System` type name
    Primitive(&'static str),
    /// A named type: lower case component name and `Namespace.Outer/Inner` path
    Named {
        /// Simple name of the declaring component, lower case
        scope: String,
        /// Full path of the type
        path: String,
    },
    /// A generic instantiation
    GenericInst(Box<TypeKey>, Vec<TypeKey>),
    /// A generic parameter of a type (`!n`) or of a method (`!!n`)
    GenericParam {
        /// Position of the parameter
        index: u32,
        /// True for method parameters
        method: bool,
    },
    /// A single dimension, zero based array
    SzArray(Box<TypeKey>),
    /// A multi dimensional array
    Array(Box<TypeKey>, u32),
    /// An unmanaged pointer
    Pointer(Box<TypeKey>),
    /// A managed reference
    ByRef(Box<TypeKey>),
    /// A function pointer
    FnPtr(Box<MethodKey>),
}

impl TypeKey {
    /// Builds the key of a type signature
    #[must_use]
    pub fn of(signature: &TypeSignature) -> TypeKey {
        if let Some(name) = signature.primitive_name() {
            return TypeKey::Primitive(name);
        }

        match signature {
            TypeSignature::Modified { inner, .. } | TypeSignature::Pinned(inner) => TypeKey::of(inner),
            TypeSignature::Class(type_ref) | TypeSignature::ValueType(type_ref) => TypeKey::named(type_ref),
            TypeSignature::GenericInst(definition, args) => TypeKey::GenericInst(
                Box::new(TypeKey::of(definition)),
                args.iter().map(TypeKey::of).collect(),
            ),
            TypeSignature::GenericParamType(index) => TypeKey::GenericParam {
                index: *index,
                method: false,
            },
            TypeSignature::GenericParamMethod(index) => TypeKey::GenericParam {
                index: *index,
                method: true,
            },
            TypeSignature::SzArray(element) => TypeKey::SzArray(Box::new(TypeKey::of(element))),
            TypeSignature::Array(element, rank) => TypeKey::Array(Box::new(TypeKey::of(element)), *rank),
            TypeSignature::Ptr(inner) => TypeKey::Pointer(Box::new(TypeKey::of(inner))),
            TypeSignature::ByRef(inner) => TypeKey::ByRef(Box::new(TypeKey::of(inner))),
            TypeSignature::FnPtr(method) => TypeKey::FnPtr(Box::new(MethodKey::of("", method))),
            // Primitives were handled above
            _ => TypeKey::Primitive("Void"),
        }
    }

    /// Builds the key of a named type reference
    #[must_use]
    pub fn named(type_ref: &TypeRef) -> TypeKey {
        if type_ref.enclosing.is_none() && type_ref.namespace == "System" {
            if let Some(primitive) = TypeSignature::from_primitive_name(&type_ref.name) {
                if let Some(name) = primitive.primitive_name() {
                    return TypeKey::Primitive(name);
                }
            }
        }

        TypeKey::Named {
            scope: type_ref.scope.name.to_ascii_lowercase(),
            path: type_ref.to_string(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKey::Primitive(name) => write!(f, "System.{name}"),
            TypeKey::Named { scope, path } => write!(f, "[{scope}]{path}"),
            TypeKey::GenericInst(definition, args) => {
                write!(f, "{definition}<")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            TypeKey::GenericParam { index, method } => {
                write!(f, "{}{index}", if *method { "!!" } else { "!" })
            }
            TypeKey::SzArray(element) => write!(f, "{element}[]"),
            TypeKey::Array(element, rank) => {
                write!(f, "{element}[{}]", ",".repeat(rank.saturating_sub(1) as usize))
            }
            TypeKey::Pointer(inner) => write!(f, "{inner}*"),
            TypeKey::ByRef(inner) => write!(f, "{inner}&"),
            TypeKey::FnPtr(method) => write!(f, "method {method}"),
        }
    }
}

/// Canonical form of a method reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    /// Name of the method
    pub name: String,
    /// Instance method
    pub has_this: bool,
    /// `this` is passed explicitly
    pub explicit_this: bool,
    /// Variable argument calling convention
    pub vararg: bool,
    /// Number of generic parameters
    pub generic_arity: u32,
    /// Key of the return type
    pub return_type: TypeKey,
    /// Keys of the parameters
    pub params: Vec<TypeKey>,
}

impl MethodKey {
    /// Builds the key of a method from its name and unbound signature
    #[must_use]
    pub fn of(name: &str, signature: &SignatureMethod) -> MethodKey {
        MethodKey {
            name: name.to_string(),
            has_this: signature.has_this,
            explicit_this: signature.explicit_this,
            vararg: signature.vararg,
            generic_arity: signature.generic_param_count,
            return_type: TypeKey::of(&signature.return_type),
            params: signature.params.iter().map(TypeKey::of).collect(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.return_type, self.name)?;
        if self.generic_arity > 0 {
            write!(f, "`{}", self.generic_arity)?;
        }
        f.write_str("(")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// Canonical form of a field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey {
    /// Name of the field
    pub name: String,
    /// Key of the field type
    pub field_type: TypeKey,
}

impl FieldKey {
    /// Builds the key of a field from its name and unbound type
    #[must_use]
    pub fn of(name: &str, signature: &TypeSignature) -> FieldKey {
        FieldKey {
            name: name.to_string(),
            field_type: TypeKey::of(signature),
        }
    }
}
