//! Live type, method and field handles.
//!
//! These are the host's equivalent of reflection objects: every loaded component owns its
//! [`RuntimeTypeDef`]s, each type owns its methods and fields, and members point back at
//! their declaring type through a weak [`RuntimeTypeRef`] so that no reference cycle keeps a
//! component alive.
//!
//! On top of the definitions sit the *handles* used everywhere else:
//!
//! - [`RuntimeType`] - A definition, a generic instantiation, an unbound generic parameter,
//!   or an array/pointer/by-ref wrapping of another type
//! - [`RuntimeMethod`] - A method definition together with the instantiation of its
//!   declaring type and its own generic arguments
//! - [`RuntimeField`] - A field definition together with its declaring type
//!
//! Identity of definitions is pointer identity: resolving the same reference twice yields
//! handles that compare equal because they share the same `Arc`.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock, Weak},
};

use crate::{
    metadata::{
        identity::AssemblyIdentity,
        module::{FieldAttributes, MethodAttributes, MethodDefRc, TypeAttributes},
        signatures::{SignatureMethod, TypeSignature},
        token::Token,
    },
    runtime::NativeFn,
};

/// Index of a component in the host's component table
pub type ComponentId = usize;

/// A reference to a [`RuntimeTypeDef`]
pub type RuntimeTypeDefRc = Arc<RuntimeTypeDef>;
/// A reference to a [`RuntimeMethodDef`]
pub type RuntimeMethodDefRc = Arc<RuntimeMethodDef>;
/// A reference to a [`RuntimeFieldDef`]
pub type RuntimeFieldDefRc = Arc<RuntimeFieldDef>;

/// A weak reference to a [`RuntimeTypeDef`], used by members to point at their owner
#[derive(Clone, Debug)]
pub struct RuntimeTypeRef {
    weak_ref: Weak<RuntimeTypeDef>,
}

impl RuntimeTypeRef {
    /// Creates a weak reference to the given type
    #[must_use]
    pub fn new(strong_ref: &RuntimeTypeDefRc) -> Self {
        Self {
            weak_ref: Arc::downgrade(strong_ref),
        }
    }

    /// Upgrades to a strong reference, `None` once the owning component is gone
    #[must_use]
    pub fn upgrade(&self) -> Option<RuntimeTypeDefRc> {
        self.weak_ref.upgrade()
    }
}

/// How a method is implemented
#[derive(Clone)]
pub enum MethodImpl {
    /// CIL bytecode, executed through the sandbox
    Managed(MethodDefRc),
    /// Implemented by the host itself
    Native(NativeFn),
    /// No implementation (abstract or interface method)
    Abstract,
}

impl fmt::Debug for MethodImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodImpl::Managed(def) => write!(f, "Managed({})", def.token),
            MethodImpl::Native(_) => f.write_str("Native"),
            MethodImpl::Abstract => f.write_str("Abstract"),
        }
    }
}

/// A type defined by a loaded component
pub struct RuntimeTypeDef {
    /// The owning component
    pub component: ComponentId,
    /// Identity of the owning component
    pub assembly: AssemblyIdentity,
    /// `TypeDef` token inside the owning component
    pub token: Token,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: TypeAttributes,
    /// Number of generic parameters
    pub generic_param_count: u32,
    /// Base type, bound lazily by the host
    pub base: Option<TypeSignature>,
    /// True for value types
    pub value_type: bool,
    /// The enclosing type of a nested type
    pub enclosing: OnceLock<RuntimeTypeRef>,
    /// Methods in definition order
    pub methods: boxcar::Vec<RuntimeMethodDefRc>,
    /// Fields in definition order
    pub fields: boxcar::Vec<RuntimeFieldDefRc>,
}

impl RuntimeTypeDef {
    /// Returns the enclosing type of a nested type
    #[must_use]
    pub fn enclosing_type(&self) -> Option<RuntimeTypeDefRc> {
        self.enclosing.get().and_then(RuntimeTypeRef::upgrade)
    }

    /// Full name in `Namespace.Outer/Inner` notation
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.enclosing_type() {
            Some(enclosing) => format!("{}/{}", enclosing.full_name(), self.name),
            None if self.namespace.is_empty() => self.name.clone(),
            None => format!("{}.{}", self.namespace, self.name),
        }
    }

    /// True if the type lives in namespace `namespace` with name `name`
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    /// True for the `<Module>` type owning the global members
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.enclosing.get().is_none()
            && self.namespace.is_empty()
            && self.name == crate::metadata::module::GLOBAL_TYPE_NAME
    }

    /// Finds a method by name
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RuntimeMethodDefRc> + 'a {
        self.methods.iter().map(|(_, method)| method).filter(move |method| method.name == name)
    }

    /// Finds a field by name
    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<RuntimeFieldDefRc> {
        self.fields
            .iter()
            .map(|(_, field)| field)
            .find(|field| field.name == name)
            .cloned()
    }
}

impl fmt::Debug for RuntimeTypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeTypeDef({}, {})", self.full_name(), self.token)
    }
}

/// A method defined by a loaded component
pub struct RuntimeMethodDef {
    /// `MethodDef` token inside the owning component
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: MethodAttributes,
    /// Signature, generic parameters unbound
    pub signature: SignatureMethod,
    /// The implementation
    pub implementation: MethodImpl,
    /// The declaring type
    pub declaring: RuntimeTypeRef,
}

impl RuntimeMethodDef {
    /// Returns the declaring type definition
    #[must_use]
    pub fn declaring_type(&self) -> Option<RuntimeTypeDefRc> {
        self.declaring.upgrade()
    }

    /// True for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }
}

impl fmt::Debug for RuntimeMethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeMethodDef({}, {}, {:?})",
            self.name, self.token, self.implementation
        )
    }
}

/// A field defined by a loaded component
#[derive(Debug)]
pub struct RuntimeFieldDef {
    /// The owning component
    pub component: ComponentId,
    /// `Field` token inside the owning component
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub flags: FieldAttributes,
    /// Type of the field, generic parameters unbound
    pub signature: TypeSignature,
    /// The declaring type
    pub declaring: RuntimeTypeRef,
}

impl RuntimeFieldDef {
    /// True for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }

    /// The storage slot of this field in objects and in the static store
    #[must_use]
    pub fn slot(&self) -> FieldSlot {
        FieldSlot {
            component: self.component,
            token: self.token,
        }
    }
}

/// Identifies the storage of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSlot {
    /// The component declaring the field
    pub component: ComponentId,
    /// The `Field` token
    pub token: Token,
}

/// A live type handle
#[derive(Clone)]
pub enum RuntimeType {
    /// A type definition; for generic types this is the unbound generic definition
    Definition(RuntimeTypeDefRc),
    /// A generic type instantiated with arguments
    GenericInstance(RuntimeTypeDefRc, Vec<RuntimeType>),
    /// An unbound generic parameter
    GenericParameter {
        /// Position of the parameter
        index: u32,
        /// True for a method generic parameter
        method: bool,
    },
    /// Single dimension, zero based array
    SzArray(Box<RuntimeType>),
    /// Multi dimensional array of the given rank
    Array(Box<RuntimeType>, u32),
    /// Unmanaged pointer
    Pointer(Box<RuntimeType>),
    /// Managed reference
    ByRef(Box<RuntimeType>),
}

impl RuntimeType {
    /// Instantiates a generic definition.
    ///
    /// When every argument is itself an unbound generic parameter the instantiation denotes
    /// the open definition, which is returned unchanged.
    #[must_use]
    pub fn instantiate(definition: RuntimeTypeDefRc, args: Vec<RuntimeType>) -> RuntimeType {
        if args
            .iter()
            .all(|arg| matches!(arg, RuntimeType::GenericParameter { .. }))
        {
            RuntimeType::Definition(definition)
        } else {
            RuntimeType::GenericInstance(definition, args)
        }
    }

    /// Returns the definition at the core of this type, looking through instantiations
    #[must_use]
    pub fn definition(&self) -> Option<&RuntimeTypeDefRc> {
        match self {
            RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _) => Some(def),
            _ => None,
        }
    }

    /// Returns the generic arguments of an instantiated type
    #[must_use]
    pub fn generic_args(&self) -> &[RuntimeType] {
        match self {
            RuntimeType::GenericInstance(_, args) => args,
            _ => &[],
        }
    }

    /// True for an unbound generic type definition (`List<>`)
    #[must_use]
    pub fn is_generic_definition(&self) -> bool {
        matches!(self, RuntimeType::Definition(def) if def.generic_param_count > 0)
    }

    /// True if values of this type are value types
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _) => def.value_type,
            RuntimeType::Pointer(_) => true,
            _ => false,
        }
    }

    /// Element type of arrays, pointers and references
    #[must_use]
    pub fn element_type(&self) -> Option<&RuntimeType> {
        match self {
            RuntimeType::SzArray(element)
            | RuntimeType::Array(element, _)
            | RuntimeType::Pointer(element)
            | RuntimeType::ByRef(element) => Some(element),
            _ => None,
        }
    }

    /// True if this is the named type of the given component-independent name
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        matches!(self, RuntimeType::Definition(def) if def.is(namespace, name))
    }

    /// The component defining the core type, `None` for generic parameters
    #[must_use]
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _) => {
                Some(def.component)
            }
            RuntimeType::GenericParameter { .. } => None,
            RuntimeType::SzArray(inner)
            | RuntimeType::Array(inner, _)
            | RuntimeType::Pointer(inner)
            | RuntimeType::ByRef(inner) => inner.component(),
        }
    }

    /// Identity of the component defining the core type
    #[must_use]
    pub fn assembly(&self) -> Option<&AssemblyIdentity> {
        match self {
            RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _) => {
                Some(&def.assembly)
            }
            RuntimeType::GenericParameter { .. } => None,
            RuntimeType::SzArray(inner)
            | RuntimeType::Array(inner, _)
            | RuntimeType::Pointer(inner)
            | RuntimeType::ByRef(inner) => inner.assembly(),
        }
    }

    /// True if this type mentions an unbound generic parameter anywhere
    #[must_use]
    pub fn contains_generic_parameters(&self) -> bool {
        match self {
            RuntimeType::Definition(def) => def.generic_param_count > 0,
            RuntimeType::GenericInstance(_, args) => {
                args.iter().any(RuntimeType::contains_generic_parameters)
            }
            RuntimeType::GenericParameter { .. } => true,
            RuntimeType::SzArray(inner)
            | RuntimeType::Array(inner, _)
            | RuntimeType::Pointer(inner)
            | RuntimeType::ByRef(inner) => inner.contains_generic_parameters(),
        }
    }

    /// Replaces generic parameters with the arguments of `context`
    #[must_use]
    pub fn substitute(&self, context: &GenericContext) -> RuntimeType {
        match self {
            RuntimeType::GenericParameter { index, method } => {
                let args = if *method {
                    &context.method_args
                } else {
                    &context.type_args
                };
                args.get(*index as usize)
                    .cloned()
                    .unwrap_or_else(|| self.clone())
            }
            RuntimeType::GenericInstance(def, args) => RuntimeType::GenericInstance(
                def.clone(),
                args.iter().map(|arg| arg.substitute(context)).collect(),
            ),
            RuntimeType::SzArray(inner) => RuntimeType::SzArray(Box::new(inner.substitute(context))),
            RuntimeType::Array(inner, rank) => {
                RuntimeType::Array(Box::new(inner.substitute(context)), *rank)
            }
            RuntimeType::Pointer(inner) => RuntimeType::Pointer(Box::new(inner.substitute(context))),
            RuntimeType::ByRef(inner) => RuntimeType::ByRef(Box::new(inner.substitute(context))),
            RuntimeType::Definition(_) => self.clone(),
        }
    }
}

impl PartialEq for RuntimeType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeType::Definition(a), RuntimeType::Definition(b)) => Arc::ptr_eq(a, b),
            (RuntimeType::GenericInstance(a, a_args), RuntimeType::GenericInstance(b, b_args)) => {
                Arc::ptr_eq(a, b) && a_args == b_args
            }
            (
                RuntimeType::GenericParameter {
                    index: a,
                    method: a_method,
                },
                RuntimeType::GenericParameter {
                    index: b,
                    method: b_method,
                },
            ) => a == b && a_method == b_method,
            (RuntimeType::SzArray(a), RuntimeType::SzArray(b))
            | (RuntimeType::Pointer(a), RuntimeType::Pointer(b))
            | (RuntimeType::ByRef(a), RuntimeType::ByRef(b)) => a == b,
            (RuntimeType::Array(a, a_rank), RuntimeType::Array(b, b_rank)) => {
                a_rank == b_rank && a == b
            }
            _ => false,
        }
    }
}

impl Eq for RuntimeType {}

impl Hash for RuntimeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            RuntimeType::Definition(def) => Arc::as_ptr(def).hash(state),
            RuntimeType::GenericInstance(def, args) => {
                Arc::as_ptr(def).hash(state);
                args.hash(state);
            }
            RuntimeType::GenericParameter { index, method } => {
                index.hash(state);
                method.hash(state);
            }
            RuntimeType::SzArray(inner) | RuntimeType::Pointer(inner) | RuntimeType::ByRef(inner) => {
                inner.hash(state);
            }
            RuntimeType::Array(inner, rank) => {
                inner.hash(state);
                rank.hash(state);
            }
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeType::Definition(def) => f.write_str(&def.full_name()),
            RuntimeType::GenericInstance(def, args) => {
                write!(f, "{}<", def.full_name())?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            RuntimeType::GenericParameter { index, method } => {
                write!(f, "{}{index}", if *method { "!!" } else { "!" })
            }
            RuntimeType::SzArray(inner) => write!(f, "{inner}[]"),
            RuntimeType::Array(inner, rank) => {
                write!(f, "{inner}[")?;
                for _ in 1..*rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            RuntimeType::Pointer(inner) => write!(f, "{inner}*"),
            RuntimeType::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}

impl fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeType({self})")
    }
}

/// Generic arguments in scope while binding a signature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericContext {
    /// Arguments for `!n`
    pub type_args: Vec<RuntimeType>,
    /// Arguments for `!!n`
    pub method_args: Vec<RuntimeType>,
}

impl GenericContext {
    /// A context without arguments; generic parameters stay unbound
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if there is nothing to substitute
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }
}

/// A live method handle
#[derive(Clone)]
pub struct RuntimeMethod {
    def: RuntimeMethodDefRc,
    declaring: RuntimeType,
    method_args: Vec<RuntimeType>,
}

impl RuntimeMethod {
    /// Creates a handle
    ///
    /// # Arguments
    /// * `def` - The method definition
    /// * `declaring` - The declaring type, instantiated or not
    /// * `method_args` - Generic arguments of the method, empty for the unbound form
    #[must_use]
    pub fn new(def: RuntimeMethodDefRc, declaring: RuntimeType, method_args: Vec<RuntimeType>) -> Self {
        RuntimeMethod {
            def,
            declaring,
            method_args,
        }
    }

    /// Creates the handle of a method on its uninstantiated declaring type, `None` when the
    /// declaring type is gone
    #[must_use]
    pub fn from_def(def: &RuntimeMethodDefRc) -> Option<Self> {
        let declaring = def.declaring_type()?;
        Some(RuntimeMethod::new(
            def.clone(),
            RuntimeType::Definition(declaring),
            Vec::new(),
        ))
    }

    /// The method definition
    #[must_use]
    pub fn def(&self) -> &RuntimeMethodDefRc {
        &self.def
    }

    /// The declaring type
    #[must_use]
    pub fn declaring_type(&self) -> &RuntimeType {
        &self.declaring
    }

    /// The generic arguments of the method
    #[must_use]
    pub fn method_args(&self) -> &[RuntimeType] {
        &self.method_args
    }

    /// Name of the method
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Definition token
    #[must_use]
    pub fn token(&self) -> Token {
        self.def.token
    }

    /// The signature, generic parameters unbound
    #[must_use]
    pub fn signature(&self) -> &SignatureMethod {
        &self.def.signature
    }

    /// True for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.def.is_static()
    }

    /// True for instance methods
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.def.signature.has_this
    }

    /// True for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.def.name == ".ctor" && self.def.flags.contains(MethodAttributes::RT_SPECIAL_NAME)
    }

    /// True for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.def.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// True if the method returns `void`
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.def.signature.return_type.is_void()
    }

    /// The component declaring the method
    #[must_use]
    pub fn component(&self) -> Option<ComponentId> {
        self.declaring.component()
    }

    /// The implementation
    #[must_use]
    pub fn implementation(&self) -> &MethodImpl {
        &self.def.implementation
    }

    /// The generic context of this instantiation
    #[must_use]
    pub fn generic_context(&self) -> GenericContext {
        GenericContext {
            type_args: self.declaring.generic_args().to_vec(),
            method_args: self.method_args.clone(),
        }
    }

    /// The value stack arity of a call, `this` included
    #[must_use]
    pub fn stack_arguments(&self) -> usize {
        self.def.signature.params.len() + usize::from(self.has_this())
    }
}

impl PartialEq for RuntimeMethod {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
            && self.declaring == other.declaring
            && self.method_args == other.method_args
    }
}

impl Eq for RuntimeMethod {}

impl Hash for RuntimeMethod {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.def).hash(state);
        self.declaring.hash(state);
        self.method_args.hash(state);
    }
}

impl fmt::Display for RuntimeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}",
            self.def.signature.return_type, self.declaring, self.def.name
        )?;
        if !self.method_args.is_empty() {
            f.write_str("<")?;
            for (index, arg) in self.method_args.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (index, param) in self.def.signature.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for RuntimeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeMethod({self})")
    }
}

/// A live field handle
#[derive(Clone)]
pub struct RuntimeField {
    def: RuntimeFieldDefRc,
    declaring: RuntimeType,
}

impl RuntimeField {
    /// Creates a handle
    #[must_use]
    pub fn new(def: RuntimeFieldDefRc, declaring: RuntimeType) -> Self {
        RuntimeField { def, declaring }
    }

    /// The field definition
    #[must_use]
    pub fn def(&self) -> &RuntimeFieldDefRc {
        &self.def
    }

    /// The declaring type
    #[must_use]
    pub fn declaring_type(&self) -> &RuntimeType {
        &self.declaring
    }

    /// Name of the field
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// True for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.def.is_static()
    }

    /// The storage slot of the field
    #[must_use]
    pub fn slot(&self) -> FieldSlot {
        self.def.slot()
    }
}

impl PartialEq for RuntimeField {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.def, &other.def) && self.declaring == other.declaring
    }
}

impl Eq for RuntimeField {}

impl fmt::Display for RuntimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.def.signature, self.declaring, self.def.name)
    }
}

impl fmt::Debug for RuntimeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeField({self})")
    }
}
