//! Parsed component definitions.
//!
//! A [`ModuleDef`] is the parsed symbol table of one component, as produced by the binary
//! reader collaborator: its types, their methods and fields, and the method bodies. The host
//! builds live handles from it ([`crate::runtime::Component`]), and the resolver keeps both
//! side by side so that a live handle can always be paired with the definition it came from.

use std::sync::Arc;

use bitflags::bitflags;

use crate::metadata::{
    identity::AssemblyIdentity,
    method::MethodBody,
    signatures::{SignatureMethod, TypeSignature},
    token::Token,
};

/// A reference to a [`ModuleDef`]
pub type ModuleDefRc = Arc<ModuleDef>;
/// A reference to a [`TypeDef`]
pub type TypeDefRc = Arc<TypeDef>;
/// A reference to a [`MethodDef`]
pub type MethodDefRc = Arc<MethodDef>;
/// A reference to a [`FieldDef`]
pub type FieldDefRc = Arc<FieldDef>;

/// Name of the type owning a component's global members
pub const GLOBAL_TYPE_NAME: &str = "<Module>";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Type attributes, ECMA-335 II.23.1.15
    pub struct TypeAttributes: u32 {
        /// Visible outside the component
        const PUBLIC = 0x0000_0001;
        /// Nested and publicly visible
        const NESTED_PUBLIC = 0x0000_0002;
        /// The type is an interface
        const INTERFACE = 0x0000_0020;
        /// The type is abstract
        const ABSTRACT = 0x0000_0080;
        /// The type can not be derived from
        const SEALED = 0x0000_0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method attributes, ECMA-335 II.23.1.10
    pub struct MethodAttributes: u32 {
        /// Visible outside the component
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Can not be overridden
        const FINAL = 0x0020;
        /// Virtual method
        const VIRTUAL = 0x0040;
        /// Has no implementation
        const ABSTRACT = 0x0400;
        /// Name has a special meaning
        const SPECIAL_NAME = 0x0800;
        /// Implementation forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
        /// Name is special to the runtime (`.ctor`, `.cctor`)
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field attributes, ECMA-335 II.23.1.5
    pub struct FieldAttributes: u32 {
        /// Visible outside the component
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Only assignable in a constructor
        const INIT_ONLY = 0x0020;
        /// Compile time constant
        const LITERAL = 0x0040;
    }
}

/// The parsed symbol table of one component
#[derive(Debug, Clone)]
pub struct ModuleDef {
    /// Identity of the component
    pub identity: AssemblyIdentity,
    /// All types, nested types included, in table order
    pub types: Vec<TypeDefRc>,
    /// Token of the entry point method
    pub entry_point: Option<Token>,
}

impl ModuleDef {
    /// Creates an empty module
    #[must_use]
    pub fn new(identity: AssemblyIdentity) -> Self {
        ModuleDef {
            identity,
            types: Vec::new(),
            entry_point: None,
        }
    }

    /// Returns the type owning the global members, if the module has one
    #[must_use]
    pub fn global_type(&self) -> Option<&TypeDefRc> {
        self.types.iter().find(|ty| ty.is_global())
    }

    /// Finds a type by its definition token
    #[must_use]
    pub fn type_by_token(&self, token: Token) -> Option<&TypeDefRc> {
        self.types.iter().find(|ty| ty.token == token)
    }

    /// Finds a method by its definition token
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<&MethodDefRc> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter())
            .find(|method| method.token == token)
    }
}

/// A parsed type definition
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// `TypeDef` token
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: TypeAttributes,
    /// Token of the enclosing type of a nested type
    pub enclosing: Option<Token>,
    /// Base type
    pub base: Option<TypeSignature>,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
    /// Methods in table order
    pub methods: Vec<MethodDefRc>,
    /// Fields in table order
    pub fields: Vec<FieldDefRc>,
}

impl TypeDef {
    /// Creates an empty, non-generic, top-level type
    pub fn new(token: Token, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            token,
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeAttributes::PUBLIC,
            enclosing: None,
            base: Some(TypeSignature::Object),
            generic_params: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// True for value types, the types deriving from `System.ValueType` or `System.Enum`
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.base
            .as_ref()
            .and_then(TypeSignature::type_ref)
            .is_some_and(|base| {
                base.namespace == "System" && (base.name == "ValueType" || base.name == "Enum")
            })
    }

    /// True for the `<Module>` type
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.enclosing.is_none() && self.namespace.is_empty() && self.name == GLOBAL_TYPE_NAME
    }
}

/// A parsed method definition
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// `MethodDef` token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: MethodAttributes,
    /// Signature, generic parameters unbound
    pub signature: SignatureMethod,
    /// The body, `None` for abstract, runtime or PInvoke methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Creates a method, static or instance according to the signature
    pub fn new(token: Token, name: impl Into<String>, signature: SignatureMethod, body: Option<MethodBody>) -> Self {
        let mut flags = MethodAttributes::PUBLIC;
        if !signature.has_this {
            flags |= MethodAttributes::STATIC;
        }
        let name = name.into();
        if name == ".ctor" || name == ".cctor" {
            flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        }

        MethodDef {
            token,
            name,
            flags,
            signature,
            body,
        }
    }

    /// True for instance and type constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodAttributes::RT_SPECIAL_NAME)
            && (self.name == ".ctor" || self.name == ".cctor")
    }

    /// True for the type initializer
    #[must_use]
    pub fn is_type_initializer(&self) -> bool {
        self.name == ".cctor" && self.flags.contains(MethodAttributes::STATIC)
    }
}

/// A parsed field definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// `Field` token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: FieldAttributes,
    /// Type of the field
    pub signature: TypeSignature,
}

impl FieldDef {
    /// Creates a field
    pub fn new(token: Token, name: impl Into<String>, signature: TypeSignature, is_static: bool) -> Self {
        let mut flags = FieldAttributes::PUBLIC;
        if is_static {
            flags |= FieldAttributes::STATIC;
        }
        FieldDef {
            token,
            name: name.into(),
            flags,
            signature,
        }
    }

    /// True for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}
