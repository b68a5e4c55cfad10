//! Structural references to types, methods and fields.
//!
//! A structural reference is how a method's bytecode names something it touches: by the
//! owning component, namespace, name and signature, optionally accompanied by the metadata
//! token it had in the component it was read from. References are immutable and cheap to
//! clone; the resolver turns them into live handles.

use std::{fmt, sync::Arc};

use crate::metadata::{
    identity::AssemblyIdentity,
    signatures::{SignatureMethod, TypeSignature},
    token::Token,
};

/// A reference to a [`TypeRef`]
pub type TypeRefRc = Arc<TypeRef>;
/// A reference to a [`MethodRef`]
pub type MethodRefRc = Arc<MethodRef>;
/// A reference to a [`FieldRef`]
pub type FieldRefRc = Arc<FieldRef>;

/// A reference to a named type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    /// The component declaring the type
    pub scope: AssemblyIdentity,
    /// Namespace of the type, empty for nested types and the global namespace
    pub namespace: String,
    /// Name of the type
    pub name: String,
    /// The enclosing type of a nested type
    pub enclosing: Option<TypeRefRc>,
    /// Token of the reference, valid only inside the component it was read from
    pub token: Option<Token>,
}

impl TypeRef {
    /// Creates a reference to a top-level type
    ///
    /// # Arguments
    /// * `scope` - The component declaring the type
    /// * `namespace` - Namespace of the type
    /// * `name` - Name of the type
    pub fn new(scope: AssemblyIdentity, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef {
            scope,
            namespace: namespace.into(),
            name: name.into(),
            enclosing: None,
            token: None,
        }
    }

    /// Creates a reference to a type nested in `enclosing`
    pub fn nested(enclosing: TypeRefRc, name: impl Into<String>) -> Self {
        TypeRef {
            scope: enclosing.scope.clone(),
            namespace: String::new(),
            name: name.into(),
            enclosing: Some(enclosing),
            token: None,
        }
    }

    /// Attaches a token to the reference
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the namespace of the outermost enclosing type
    #[must_use]
    pub fn root_namespace(&self) -> &str {
        match &self.enclosing {
            Some(enclosing) => enclosing.root_namespace(),
            None => &self.namespace,
        }
    }

    /// Returns the `Namespace.Name` key used for the cheap first lookup of a type
    #[must_use]
    pub fn short_key(&self) -> String {
        short_key(&self.namespace, &self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.enclosing {
            Some(enclosing) => write!(f, "{enclosing}/{}", self.name),
            None if self.namespace.is_empty() => f.write_str(&self.name),
            None => write!(f, "{}.{}", self.namespace, self.name),
        }
    }
}

/// Builds the `Namespace.Name` lookup key
#[must_use]
pub fn short_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// A reference to a method or constructor
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    /// The declaring type, possibly a generic instantiation
    pub declaring: TypeSignature,
    /// Name of the method
    pub name: String,
    /// The method's own signature, generic parameters left unbound
    pub signature: SignatureMethod,
    /// Arguments of a generic method instantiation (`MethodSpec`)
    pub generic_args: Vec<TypeSignature>,
    /// Token of the reference, valid only inside the component it was read from
    pub token: Option<Token>,
}

impl MethodRef {
    /// Creates a method reference
    ///
    /// # Arguments
    /// * `declaring` - The declaring type
    /// * `name` - Name of the method
    /// * `signature` - The method signature
    pub fn new(declaring: TypeSignature, name: impl Into<String>, signature: SignatureMethod) -> Self {
        MethodRef {
            declaring,
            name: name.into(),
            signature,
            generic_args: Vec::new(),
            token: None,
        }
    }

    /// Attaches a token to the reference
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Instantiates a generic method reference
    #[must_use]
    pub fn with_generic_args(mut self, args: Vec<TypeSignature>) -> Self {
        self.generic_args = args;
        self
    }

    /// True for instance and static constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    /// Number of values a call to this method pops, `this` included
    #[must_use]
    pub fn stack_arguments(&self) -> usize {
        self.signature.params.len() + usize::from(self.signature.has_this)
    }

    /// Returns the `Namespace.Name::Method` form without signature
    #[must_use]
    pub fn short_name(&self) -> String {
        format!("{}::{}", self.declaring, self.name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}",
            self.signature.return_type, self.declaring, self.name
        )?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            for (index, arg) in self.generic_args.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (index, param) in self.signature.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A reference to a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// The declaring type, possibly a generic instantiation
    pub declaring: TypeSignature,
    /// Name of the field
    pub name: String,
    /// Type of the field, generic parameters left unbound
    pub signature: TypeSignature,
    /// Token of the reference, valid only inside the component it was read from
    pub token: Option<Token>,
}

impl FieldRef {
    /// Creates a field reference
    pub fn new(declaring: TypeSignature, name: impl Into<String>, signature: TypeSignature) -> Self {
        FieldRef {
            declaring,
            name: name.into(),
            signature,
            token: None,
        }
    }

    /// Attaches a token to the reference
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.signature, self.declaring, self.name)
    }
}

/// Any member a token operand can refer to
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRef {
    /// A type (`TypeDef`, `TypeRef` or `TypeSpec`)
    Type(TypeSignature),
    /// A method (`MethodDef`, `MemberRef` or `MethodSpec`)
    Method(MethodRefRc),
    /// A field (`Field` or `MemberRef`)
    Field(FieldRefRc),
}

impl MemberRef {
    /// Returns the method reference, if this is one
    #[must_use]
    pub fn as_method(&self) -> Option<&MethodRefRc> {
        match self {
            MemberRef::Method(method) => Some(method),
            _ => None,
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Type(sig) => write!(f, "{sig}"),
            MemberRef::Method(method) => write!(f, "{method}"),
            MemberRef::Field(field) => write!(f, "{field}"),
        }
    }
}
