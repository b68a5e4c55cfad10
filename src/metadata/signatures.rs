//! Structural type and method signatures.
//!
//! Signatures as they appear in a method's bytecode after the binary parser resolved the
//! blob encoding: type references are carried structurally ([`TypeRefRc`]) rather than as
//! coded tokens, so that a signature from one component can be compared with a signature
//! from another one.
//!
//! The printable forms produced by the [`std::fmt::Display`] implementations follow the
//! conventional `System.Void Ns.Type::Method(System.Int32)` notation and are what resolution
//! failures report.

use std::fmt;

use crate::metadata::references::TypeRefRc;

/// A type as it appears in a signature (ECMA-335 II.23.2.12)
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSignature {
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// System.String
    String,
    /// System.Object
    Object,
    /// System.TypedReference
    TypedByRef,
    /// CIL class
    Class(TypeRefRc),
    /// CIL value-type
    ValueType(TypeRefRc),
    /// Generic type and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Generic type parameter (`!n`)
    GenericParamType(u32),
    /// Generic method parameter (`!!n`)
    GenericParamMethod(u32),
    /// Single dimension, zero based array
    SzArray(Box<TypeSignature>),
    /// Multi dimensional array and its rank
    Array(Box<TypeSignature>, u32),
    /// A pointer to a type
    Ptr(Box<TypeSignature>),
    /// Type by reference
    ByRef(Box<TypeSignature>),
    /// A pinned local
    Pinned(Box<TypeSignature>),
    /// A type with a custom modifier
    Modified {
        /// The modifier type
        modifier: TypeRefRc,
        /// `modreq` when true, `modopt` otherwise
        required: bool,
        /// The modified type
        inner: Box<TypeSignature>,
    },
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
}

impl TypeSignature {
    /// Returns the platform library type name of a primitive signature, `None` if this is
    /// not a primitive.
    #[must_use]
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeSignature::Void => "Void",
            TypeSignature::Boolean => "Boolean",
            TypeSignature::Char => "Char",
            TypeSignature::I1 => "SByte",
            TypeSignature::U1 => "Byte",
            TypeSignature::I2 => "Int16",
            TypeSignature::U2 => "UInt16",
            TypeSignature::I4 => "Int32",
            TypeSignature::U4 => "UInt32",
            TypeSignature::I8 => "Int64",
            TypeSignature::U8 => "UInt64",
            TypeSignature::R4 => "Single",
            TypeSignature::R8 => "Double",
            TypeSignature::I => "IntPtr",
            TypeSignature::U => "UIntPtr",
            TypeSignature::String => "String",
            TypeSignature::Object => "Object",
            TypeSignature::TypedByRef => "TypedReference",
            _ => return None,
        })
    }

    /// Returns the primitive signature for a platform library type name (`System`
    /// namespace), the inverse of [`TypeSignature::primitive_name`].
    #[must_use]
    pub fn from_primitive_name(name: &str) -> Option<TypeSignature> {
        Some(match name {
            "Void" => TypeSignature::Void,
            "Boolean" => TypeSignature::Boolean,
            "Char" => TypeSignature::Char,
            "SByte" => TypeSignature::I1,
            "Byte" => TypeSignature::U1,
            "Int16" => TypeSignature::I2,
            "UInt16" => TypeSignature::U2,
            "Int32" => TypeSignature::I4,
            "UInt32" => TypeSignature::U4,
            "Int64" => TypeSignature::I8,
            "UInt64" => TypeSignature::U8,
            "Single" => TypeSignature::R4,
            "Double" => TypeSignature::R8,
            "IntPtr" => TypeSignature::I,
            "UIntPtr" => TypeSignature::U,
            "String" => TypeSignature::String,
            "Object" => TypeSignature::Object,
            "TypedReference" => TypeSignature::TypedByRef,
            _ => return None,
        })
    }

    /// True for `void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self.strip_modifiers(), TypeSignature::Void)
    }

    /// True if values of this type live on the stack unboxed
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self.strip_modifiers() {
            TypeSignature::Boolean
            | TypeSignature::Char
            | TypeSignature::I1
            | TypeSignature::U1
            | TypeSignature::I2
            | TypeSignature::U2
            | TypeSignature::I4
            | TypeSignature::U4
            | TypeSignature::I8
            | TypeSignature::U8
            | TypeSignature::R4
            | TypeSignature::R8
            | TypeSignature::I
            | TypeSignature::U
            | TypeSignature::TypedByRef
            | TypeSignature::ValueType(_) => true,
            TypeSignature::GenericInst(def, _) => def.is_value_type(),
            _ => false,
        }
    }

    /// Removes custom modifiers and pinning, which do not take part in type identity
    #[must_use]
    pub fn strip_modifiers(&self) -> &TypeSignature {
        match self {
            TypeSignature::Modified { inner, .. } | TypeSignature::Pinned(inner) => {
                inner.strip_modifiers()
            }
            other => other,
        }
    }

    /// Returns the named type reference at the core of this signature, looking through
    /// generic instantiations but not through arrays, pointers or references.
    #[must_use]
    pub fn type_ref(&self) -> Option<&TypeRefRc> {
        match self.strip_modifiers() {
            TypeSignature::Class(type_ref) | TypeSignature::ValueType(type_ref) => Some(type_ref),
            TypeSignature::GenericInst(def, _) => def.type_ref(),
            _ => None,
        }
    }

    /// True if this signature is an unbound generic parameter (`!n` or `!!n`)
    #[must_use]
    pub fn is_generic_param(&self) -> bool {
        matches!(
            self.strip_modifiers(),
            TypeSignature::GenericParamType(_) | TypeSignature::GenericParamMethod(_)
        )
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.primitive_name() {
            return write!(f, "System.{name}");
        }

        match self {
            TypeSignature::Class(type_ref) | TypeSignature::ValueType(type_ref) => {
                write!(f, "{type_ref}")
            }
            TypeSignature::GenericInst(def, args) => {
                write!(f, "{def}<")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            TypeSignature::GenericParamType(index) => write!(f, "!{index}"),
            TypeSignature::GenericParamMethod(index) => write!(f, "!!{index}"),
            TypeSignature::SzArray(element) => write!(f, "{element}[]"),
            TypeSignature::Array(element, rank) => {
                write!(f, "{element}[")?;
                for _ in 1..*rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            TypeSignature::Ptr(inner) => write!(f, "{inner}*"),
            TypeSignature::ByRef(inner) => write!(f, "{inner}&"),
            TypeSignature::Pinned(inner) => write!(f, "{inner} pinned"),
            TypeSignature::Modified {
                modifier,
                required,
                inner,
            } => {
                let kind = if *required { "modreq" } else { "modopt" };
                write!(f, "{inner} {kind}({modifier})")
            }
            TypeSignature::FnPtr(method) => write!(f, "method {method}"),
            _ => Ok(()),
        }
    }
}

/// Method signature (II.23.2.1 - II.23.2.3)
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMethod {
    /// Used to encode the keyword instance in the calling convention, see §II.15.3
    pub has_this: bool,
    /// Used to encode the keyword explicit in the calling convention, see §II.15.3
    pub explicit_this: bool,
    /// Used to encode the keyword vararg in the calling convention, see §II.15.3
    pub vararg: bool,
    /// Number of generic parameters of the method
    pub generic_param_count: u32,
    /// The return type
    pub return_type: TypeSignature,
    /// The parameter types, `this` excluded
    pub params: Vec<TypeSignature>,
}

impl SignatureMethod {
    /// Signature of a static method
    #[must_use]
    pub fn new_static(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: false,
            explicit_this: false,
            vararg: false,
            generic_param_count: 0,
            return_type,
            params,
        }
    }

    /// Signature of an instance method
    #[must_use]
    pub fn new_instance(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: true,
            ..SignatureMethod::new_static(return_type, params)
        }
    }

    /// Sets the generic arity
    #[must_use]
    pub fn with_generic_params(mut self, count: u32) -> Self {
        self.generic_param_count = count;
        self
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.return_type)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A local variable declaration of a method body
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureLocal {
    /// Type of the local
    pub base: TypeSignature,
    /// `pinned` locals keep their referent from moving
    pub pinned: bool,
}

impl SignatureLocal {
    /// Creates an unpinned local of the given type
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        SignatureLocal {
            base,
            pinned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::type_ref;

    #[test]
    fn test_primitive_names_roundtrip() {
        for sig in [
            TypeSignature::I4,
            TypeSignature::String,
            TypeSignature::Object,
            TypeSignature::R8,
            TypeSignature::U,
        ] {
            let name = sig.primitive_name().unwrap();
            assert_eq!(TypeSignature::from_primitive_name(name), Some(sig));
        }
        assert!(TypeSignature::SzArray(Box::new(TypeSignature::I4))
            .primitive_name()
            .is_none());
    }

    #[test]
    fn test_display() {
        let list = type_ref("mscorlib", "System.Collections.Generic", "List`1");
        let sig = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(list)),
            vec![TypeSignature::I4],
        );
        assert_eq!(
            sig.to_string(),
            "System.Collections.Generic.List`1<System.Int32>"
        );

        let sig = TypeSignature::Array(Box::new(TypeSignature::U1), 3);
        assert_eq!(sig.to_string(), "System.Byte[,,]");

        let sig = TypeSignature::ByRef(Box::new(TypeSignature::SzArray(Box::new(
            TypeSignature::GenericParamMethod(1),
        ))));
        assert_eq!(sig.to_string(), "!!1[]&");
    }

    #[test]
    fn test_value_type_detection() {
        let point = type_ref("Target", "Geometry", "Point");
        assert!(TypeSignature::ValueType(point.clone()).is_value_type());
        assert!(!TypeSignature::Class(point).is_value_type());
        assert!(TypeSignature::I8.is_value_type());
        assert!(!TypeSignature::String.is_value_type());
        assert!(TypeSignature::Pinned(Box::new(TypeSignature::I4)).is_value_type());
    }

    #[test]
    fn test_strip_modifiers() {
        let volatile = type_ref("mscorlib", "System.Runtime.CompilerServices", "IsVolatile");
        let sig = TypeSignature::Modified {
            modifier: volatile,
            required: true,
            inner: Box::new(TypeSignature::I4),
        };
        assert_eq!(sig.strip_modifiers(), &TypeSignature::I4);
        assert!(!sig.is_void());
    }
}
