//! Shared fixtures for unit tests.
//!
//! [`ModuleBuilder`] produces parsed modules the way the binary reader would hand them over,
//! with sequential tokens per table. Types are addressed by `Namespace.Name`, nested types
//! by `Outer/Inner`, or by their simple name when that is unambiguous.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, OnceLock,
};

use crate::{
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion},
        method::MethodBody,
        module::{FieldDef, MethodAttributes, MethodDef, ModuleDef, TypeAttributes, TypeDef},
        references::{TypeRef, TypeRefRc},
        signatures::{SignatureMethod, TypeSignature},
        token::Token,
    },
    runtime::types::{
        MethodImpl, RuntimeMethodDef, RuntimeMethodDefRc, RuntimeTypeDef, RuntimeTypeDefRc,
        RuntimeTypeRef,
    },
};

/// Identity of the platform library
pub fn corlib() -> AssemblyIdentity {
    AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
}

/// Identity of the component under analysis
pub fn target() -> AssemblyIdentity {
    AssemblyIdentity::new("Target", AssemblyVersion::new(1, 0, 0, 0))
}

/// A reference to a top-level type, `scope` being the simple name of its component
pub fn type_ref(scope: &str, namespace: &str, name: &str) -> TypeRefRc {
    let scope = match scope {
        "mscorlib" => corlib(),
        "Target" => target(),
        other => AssemblyIdentity::new(other, AssemblyVersion::default()),
    };
    Arc::new(TypeRef::new(scope, namespace, name))
}

/// A class signature for a platform library type
pub fn corlib_class(namespace: &str, name: &str) -> TypeSignature {
    TypeSignature::Class(type_ref("mscorlib", namespace, name))
}

static NEXT_TOKEN: AtomicU32 = AtomicU32::new(1);

/// A free standing live type of component 1 (`Target`), not registered with any host
pub fn create_runtime_type(namespace: &str, name: &str, generic_param_count: u32) -> RuntimeTypeDefRc {
    let row = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    Arc::new(RuntimeTypeDef {
        component: 1,
        assembly: target(),
        token: Token::new(0x0200_0000 | row),
        namespace: namespace.to_string(),
        name: name.to_string(),
        flags: TypeAttributes::PUBLIC,
        generic_param_count,
        base: Some(TypeSignature::Object),
        value_type: false,
        enclosing: OnceLock::new(),
        methods: boxcar::Vec::new(),
        fields: boxcar::Vec::new(),
    })
}

/// Adds a managed `void ()` method without a body to `ty`
pub fn create_runtime_method(ty: &RuntimeTypeDefRc, name: &str, is_static: bool) -> RuntimeMethodDefRc {
    let row = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let signature = if is_static {
        SignatureMethod::new_static(TypeSignature::Void, vec![])
    } else {
        SignatureMethod::new_instance(TypeSignature::Void, vec![])
    };
    let def = Arc::new(MethodDef::new(
        Token::new(0x0600_0000 | row),
        name,
        signature.clone(),
        None,
    ));
    let method = Arc::new(RuntimeMethodDef {
        token: def.token,
        name: name.to_string(),
        flags: def.flags,
        signature,
        implementation: MethodImpl::Managed(def),
        declaring: RuntimeTypeRef::new(ty),
    });
    ty.methods.push(method.clone());
    method
}

/// Builds a [`ModuleDef`] fluently
pub struct ModuleBuilder {
    identity: AssemblyIdentity,
    types: Vec<(String, TypeDef)>,
    entry_point: Option<Token>,
    next_method: u32,
    next_field: u32,
}

impl ModuleBuilder {
    /// Starts an empty module
    pub fn new(identity: AssemblyIdentity) -> Self {
        ModuleBuilder {
            identity,
            types: Vec::new(),
            entry_point: None,
            next_method: 1,
            next_field: 1,
        }
    }

    fn push_type(mut self, path: String, mut def: TypeDef) -> Self {
        def.token = Token::new(0x0200_0001 + self.types.len() as u32);
        self.types.push((path, def));
        self
    }

    fn type_mut(&mut self, path: &str) -> &mut TypeDef {
        let index = self
            .types
            .iter()
            .position(|(key, _)| key == path)
            .or_else(|| self.types.iter().position(|(_, def)| def.name == path))
            .unwrap_or_else(|| panic!("no type {path} in module"));
        &mut self.types[index].1
    }

    /// Adds the `<Module>` type
    pub fn global(self) -> Self {
        self.push_type("<Module>".to_string(), TypeDef::new(Token::new(0), "", "<Module>"))
    }

    /// Adds a class deriving from `System.Object`
    pub fn class(self, namespace: &str, name: &str) -> Self {
        let path = crate::metadata::references::short_key(namespace, name);
        self.push_type(path, TypeDef::new(Token::new(0), namespace, name))
    }

    /// Adds a class with an explicit base type
    pub fn class_extending(self, namespace: &str, name: &str, base: TypeSignature) -> Self {
        let path = crate::metadata::references::short_key(namespace, name);
        let mut def = TypeDef::new(Token::new(0), namespace, name);
        def.base = Some(base);
        self.push_type(path, def)
    }

    /// Adds a struct
    pub fn value_type(self, namespace: &str, name: &str) -> Self {
        self.class_extending(namespace, name, corlib_class("System", "ValueType"))
    }

    /// Adds an interface
    pub fn interface(self, namespace: &str, name: &str) -> Self {
        let path = crate::metadata::references::short_key(namespace, name);
        let mut def = TypeDef::new(Token::new(0), namespace, name);
        def.flags |= TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT;
        def.base = None;
        self.push_type(path, def)
    }

    /// Adds a generic class with the given parameter names
    pub fn generic_class(self, namespace: &str, name: &str, params: &[&str]) -> Self {
        let path = crate::metadata::references::short_key(namespace, name);
        let mut def = TypeDef::new(Token::new(0), namespace, name);
        def.generic_params = params.iter().map(|param| (*param).to_string()).collect();
        self.push_type(path, def)
    }

    /// Adds a class nested in `outer`
    pub fn nested(mut self, outer: &str, name: &str) -> Self {
        let outer_def = self.type_mut(outer);
        let enclosing = outer_def.token;
        let path = format!(
            "{}/{name}",
            crate::metadata::references::short_key(&outer_def.namespace, &outer_def.name)
        );
        let mut def = TypeDef::new(Token::new(0), "", name);
        def.flags = TypeAttributes::NESTED_PUBLIC;
        def.enclosing = Some(enclosing);
        self.push_type(path, def)
    }

    /// Adds a method to `ty`
    pub fn method(mut self, ty: &str, name: &str, signature: SignatureMethod, body: Option<MethodBody>) -> Self {
        let token = Token::new(0x0600_0000 | self.next_method);
        self.next_method += 1;
        let def = MethodDef::new(token, name, signature, body);
        self.type_mut(ty).methods.push(Arc::new(def));
        self
    }

    /// Adds a virtual instance method to `ty`, abstract when `body` is `None`
    pub fn virtual_method(mut self, ty: &str, name: &str, signature: SignatureMethod, body: Option<MethodBody>) -> Self {
        let token = Token::new(0x0600_0000 | self.next_method);
        self.next_method += 1;
        let mut def = MethodDef::new(token, name, signature, body);
        def.flags |= MethodAttributes::VIRTUAL;
        if def.body.is_none() {
            def.flags |= MethodAttributes::ABSTRACT;
        }
        self.type_mut(ty).methods.push(Arc::new(def));
        self
    }

    /// Adds a static method without a body
    pub fn static_method(self, ty: &str, name: &str, return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        self.method(ty, name, SignatureMethod::new_static(return_type, params), None)
    }

    /// Adds a static method with a body
    pub fn static_body(self, ty: &str, name: &str, return_type: TypeSignature, params: Vec<TypeSignature>, body: MethodBody) -> Self {
        self.method(ty, name, SignatureMethod::new_static(return_type, params), Some(body))
    }

    /// Adds an instance method with a body
    pub fn instance_body(self, ty: &str, name: &str, return_type: TypeSignature, params: Vec<TypeSignature>, body: MethodBody) -> Self {
        self.method(ty, name, SignatureMethod::new_instance(return_type, params), Some(body))
    }

    fn push_field(mut self, ty: &str, name: &str, signature: TypeSignature, is_static: bool) -> Self {
        let token = Token::new(0x0400_0000 | self.next_field);
        self.next_field += 1;
        self.type_mut(ty)
            .fields
            .push(Arc::new(FieldDef::new(token, name, signature, is_static)));
        self
    }

    /// Adds a static field to `ty`
    pub fn static_field(self, ty: &str, name: &str, signature: TypeSignature) -> Self {
        self.push_field(ty, name, signature, true)
    }

    /// Adds an instance field to `ty`
    pub fn field(self, ty: &str, name: &str, signature: TypeSignature) -> Self {
        self.push_field(ty, name, signature, false)
    }

    /// Marks a method of `ty` as the entry point
    pub fn entry_point(mut self, ty: &str, name: &str) -> Self {
        let token = self
            .type_mut(ty)
            .methods
            .iter()
            .find(|method| method.name == name)
            .map(|method| method.token)
            .unwrap_or_else(|| panic!("no method {name} on {ty}"));
        self.entry_point = Some(token);
        self
    }

    /// Finishes the module
    pub fn build(self) -> ModuleDef {
        ModuleDef {
            identity: self.identity,
            types: self.types.into_iter().map(|(_, def)| Arc::new(def)).collect(),
            entry_point: self.entry_point,
        }
    }
}
