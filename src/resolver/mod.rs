//! Cross-component symbol resolution.
//!
//! The [`Resolver`] maps the structural references found in method bodies to live handles
//! of the host. References into a *tracked* component (one registered through
//! [`Resolver::track`], typically the binary under analysis) are resolved through its
//! [`ModuleRecord`], where a definition token on the reference is an exact fast path.
//! References into any other component are resolved against a copy of that component loaded
//! independently by name ([`ExternalModule`]), by name and canonical signature key.
//!
//! # Architecture
//!
//! - [`keys`] - Canonical type, method and field keys
//! - [`module`] - Lookup over a tracked component
//! - [`types`] - Lazily built member tables of one type
//! - [`external`] - Lookup over independently loaded components
//!
//! Signatures are bound layer by layer: generic instantiations resolve the definition and
//! then every argument, arrays, pointers and references wrap the resolved element, and
//! custom modifiers and pinning are ignored. Generic parameters are taken from the
//! [`GenericContext`] of the method being translated and stay unbound when it has no
//! argument for them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsandbox::{prelude::*, HostConfig};
//!
//! # fn run(module: ModuleDef, reference: MethodRef) -> dotsandbox::Result<()> {
//! let host = Arc::new(Host::new(HostConfig::default()));
//! let resolver = Resolver::new(host);
//! resolver.track(Arc::new(module))?;
//!
//! let method = resolver.resolve_method(&reference, &GenericContext::empty())?;
//! println!("resolved {method}");
//! # Ok(())
//! # }
//! ```

pub mod external;
pub mod keys;
pub mod module;
pub mod types;

pub use external::ExternalModule;
pub use keys::{FieldKey, MethodKey, TypeKey};
pub use module::{ModuleRecord, ModuleRecordRc};
pub use types::{TypeRecord, TypeRecordRc};

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    metadata::{
        module::{MethodDefRc, ModuleDefRc},
        references::{FieldRef, MemberRef, MethodRef, TypeRef},
        signatures::TypeSignature,
        token::Token,
    },
    runtime::{
        host::{bind_with, Named},
        types::{ComponentId, MethodImpl, RuntimeTypeDefRc},
        GenericContext, Host, RuntimeField, RuntimeMethod, RuntimeType,
    },
    Error, Result,
};

/// What a member token operand resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedMember {
    /// An instance constructor
    Constructor(RuntimeMethod),
    /// Any other method
    Method(RuntimeMethod),
    /// A field
    Field(RuntimeField),
    /// A type
    Type(RuntimeType),
}

/// Resolves structural references to live handles
pub struct Resolver {
    host: Arc<Host>,
    tracked: DashMap<ComponentId, ModuleRecordRc>,
    tracked_names: DashMap<String, ComponentId>,
    external: DashMap<ComponentId, Arc<ExternalModule>>,
    named: DashMap<TypeKey, RuntimeTypeDefRc>,
}

impl Resolver {
    /// Creates a resolver tracking no component
    #[must_use]
    pub fn new(host: Arc<Host>) -> Self {
        Resolver {
            host,
            tracked: DashMap::new(),
            tracked_names: DashMap::new(),
            external: DashMap::new(),
            named: DashMap::new(),
        }
    }

    /// The host handles are resolved in
    #[must_use]
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Loads a component into the host and tracks it.
    ///
    /// Tracking the same component twice returns the existing record.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the host already holds a natively built component of the
    /// same name, which has no parsed definition to track.
    pub fn track(&self, module: ModuleDefRc) -> Result<ModuleRecordRc> {
        let component = self.host.load(module)?;
        if let Some(record) = self.tracked.get(&component.id()) {
            return Ok(record.clone());
        }

        let Some(definition) = component.definition().cloned() else {
            return Err(Error::Error(format!(
                "Component {} has no parsed definition to track",
                component.identity()
            )));
        };
        let record = Arc::new(ModuleRecord::new(component.clone(), definition));
        self.tracked_names
            .insert(component.identity().name.to_ascii_lowercase(), component.id());
        self.tracked.insert(component.id(), record.clone());

        log::debug!("tracking component {} as #{}", component.identity(), component.id());
        Ok(record)
    }

    /// True if `component` is tracked
    #[must_use]
    pub fn is_tracked(&self, component: ComponentId) -> bool {
        self.tracked.contains_key(&component)
    }

    /// Returns the record of a tracked component
    #[must_use]
    pub fn module(&self, component: ComponentId) -> Option<ModuleRecordRc> {
        self.tracked.get(&component).map(|record| record.clone())
    }

    fn tracked_scope(&self, type_ref: &TypeRef) -> Option<ModuleRecordRc> {
        let id = *self
            .tracked_names
            .get(&type_ref.scope.name.to_ascii_lowercase())?;
        self.module(id)
    }

    fn external(&self, component: ComponentId) -> Result<Arc<ExternalModule>> {
        if let Some(external) = self.external.get(&component) {
            return Ok(external.clone());
        }
        let loaded = self
            .host
            .component(component)
            .ok_or_else(|| Error::Error(format!("Host has no component #{component}")))?;
        Ok(self
            .external
            .entry(component)
            .or_insert_with(|| Arc::new(ExternalModule::new(loaded)))
            .clone())
    }

    /// Resolves a named type reference to its definition.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the component or the type can not be found.
    pub fn resolve_type_ref(&self, type_ref: &TypeRef) -> Result<RuntimeTypeDefRc> {
        let key = TypeKey::named(type_ref);
        if let Some(found) = self.named.get(&key) {
            return Ok(found.clone());
        }
        log::trace!("resolving type {key}");

        let found = match self.tracked_scope(type_ref) {
            Some(record) => record
                .find_type(type_ref)
                .map(|found| found.live().clone())
                .ok_or_else(|| Error::Unresolved {
                    reference: type_ref.to_string(),
                    component: type_ref.scope.full_name(),
                })?,
            None => self.host.find_type(type_ref)?,
        };
        Ok(self.named.entry(key).or_insert(found).clone())
    }

    /// Resolves a type signature.
    ///
    /// # Arguments
    /// * `signature` - The signature to bind
    /// * `context` - Generic arguments of the enclosing method
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if a named type can not be found.
    pub fn resolve_type(&self, signature: &TypeSignature, context: &GenericContext) -> Result<RuntimeType> {
        bind_with(signature, context, &mut |named: Named<'_>| match named {
            Named::Primitive(name) => self.host.corlib_type("System", name),
            Named::Reference(type_ref) => self.resolve_type_ref(type_ref).map(RuntimeType::Definition),
        })
    }

    fn declaring_definition(&self, declaring: &TypeSignature, context: &GenericContext, member: &dyn std::fmt::Display) -> Result<(RuntimeType, RuntimeTypeDefRc)> {
        let ty = self.resolve_type(declaring, context)?;
        match ty.definition().cloned() {
            Some(def) => Ok((ty, def)),
            None => Err(Error::Unresolved {
                reference: member.to_string(),
                component: ty
                    .assembly()
                    .map_or_else(|| "<unknown>".to_string(), |identity| identity.full_name()),
            }),
        }
    }

    /// Resolves a method reference.
    ///
    /// # Arguments
    /// * `method_ref` - The reference
    /// * `context` - Generic arguments of the enclosing method
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the declaring type or the method can not be found.
    pub fn resolve_method(&self, method_ref: &MethodRef, context: &GenericContext) -> Result<RuntimeMethod> {
        let (declaring, def) = self.declaring_definition(&method_ref.declaring, context, method_ref)?;

        let found = match self.module(def.component) {
            Some(record) => record.find_method(&def, method_ref),
            None => self.external(def.component)?.find_method(&def, method_ref),
        };
        let Some(found) = found else {
            return Err(Error::Unresolved {
                reference: method_ref.to_string(),
                component: def.assembly.full_name(),
            });
        };

        let method_args = method_ref
            .generic_args
            .iter()
            .map(|arg| self.resolve_type(arg, context))
            .collect::<Result<Vec<_>>>()?;
        Ok(RuntimeMethod::new(found, declaring, method_args))
    }

    /// Resolves a field reference.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the declaring type or the field can not be found.
    pub fn resolve_field(&self, field_ref: &FieldRef, context: &GenericContext) -> Result<RuntimeField> {
        let (declaring, def) = self.declaring_definition(&field_ref.declaring, context, field_ref)?;

        let found = match self.module(def.component) {
            Some(record) => record.find_field(&def, field_ref),
            None => self.external(def.component)?.find_field(&def, field_ref),
        };
        match found {
            Some(found) => Ok(RuntimeField::new(found, declaring)),
            None => Err(Error::Unresolved {
                reference: field_ref.to_string(),
                component: def.assembly.full_name(),
            }),
        }
    }

    /// Resolves a member token operand, telling constructors from other methods.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the member can not be found.
    pub fn resolve_member(&self, member: &MemberRef, context: &GenericContext) -> Result<ResolvedMember> {
        Ok(match member {
            MemberRef::Type(signature) => ResolvedMember::Type(self.resolve_type(signature, context)?),
            MemberRef::Field(field_ref) => ResolvedMember::Field(self.resolve_field(field_ref, context)?),
            MemberRef::Method(method_ref) => {
                let method = self.resolve_method(method_ref, context)?;
                if method.is_constructor() {
                    ResolvedMember::Constructor(method)
                } else {
                    ResolvedMember::Method(method)
                }
            }
        })
    }

    /// Resolves a method reference only if it is declared in a tracked component.
    ///
    /// References into other components are not resolved at all, so asking never loads a
    /// component.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the reference names a tracked component but can
    /// not be resolved in it.
    pub fn tracked_method(&self, method_ref: &MethodRef, context: &GenericContext) -> Result<Option<RuntimeMethod>> {
        let Some(type_ref) = method_ref.declaring.type_ref() else {
            return Ok(None);
        };
        if self.tracked_scope(type_ref).is_none() {
            return Ok(None);
        }
        self.resolve_method(method_ref, context).map(Some)
    }

    /// Finds a method of a tracked component by its `MethodDef` token.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the component is not tracked or has no such method.
    pub fn method_by_token(&self, component: ComponentId, token: Token) -> Result<RuntimeMethod> {
        let unresolved = || Error::Unresolved {
            reference: token.to_string(),
            component: self
                .host
                .component(component)
                .map_or_else(|| format!("#{component}"), |found| found.identity().full_name()),
        };

        let record = self.module(component).ok_or_else(unresolved)?;
        record
            .component()
            .method_by_token(token)
            .and_then(|def| RuntimeMethod::from_def(&def))
            .ok_or_else(unresolved)
    }

    /// Returns the parsed definition of a tracked method that has a body.
    ///
    /// # Errors
    /// Returns [`Error::MissingBody`] for methods of untracked components, native methods
    /// and methods without bytecode.
    pub fn method_body(&self, method: &RuntimeMethod) -> Result<MethodDefRc> {
        let tracked = method.component().is_some_and(|id| self.is_tracked(id));
        match method.implementation() {
            MethodImpl::Managed(def) if tracked && def.body.is_some() => Ok(def.clone()),
            _ => Err(Error::MissingBody {
                name: method.to_string(),
                token: method.token(),
            }),
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("tracked", &self.tracked.len())
            .field("external", &self.external.len())
            .field("named", &self.named.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HostConfig,
        metadata::{
            identity::AssemblyIdentity,
            method::{Instruction, MethodBody},
            opcodes::RET,
            signatures::SignatureMethod,
        },
        runtime::ComponentProvider,
        test::{corlib_class, target, type_ref, ModuleBuilder},
    };

    struct HelperProvider(ModuleDefRc);

    impl ComponentProvider for HelperProvider {
        fn provide(&self, identity: &AssemblyIdentity) -> Option<ModuleDefRc> {
            self.0.identity.same_name(identity).then(|| self.0.clone())
        }
    }

    fn resolver() -> Resolver {
        let body = MethodBody::new(vec![Instruction::simple(RET)]);
        let module = ModuleBuilder::new(target())
            .class("App", "Program")
            .static_body("App.Program", "Main", TypeSignature::Void, vec![], body.clone())
            .static_method("App.Program", "Decrypt", TypeSignature::String, vec![TypeSignature::I4])
            .static_method("App.Program", "Decrypt", TypeSignature::String, vec![TypeSignature::String])
            .generic_class("App", "Box`1", &["T"])
            .field("App.Box`1", "value", TypeSignature::GenericParamType(0))
            .instance_body("App.Box`1", "Get", TypeSignature::GenericParamType(0), vec![], body.clone())
            .instance_body("App.Box`1", "Set", TypeSignature::Void, vec![TypeSignature::GenericParamType(0)], body)
            .build();

        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        resolver.track(Arc::new(module)).unwrap();
        resolver
    }

    fn program() -> TypeSignature {
        TypeSignature::Class(type_ref("Target", "App", "Program"))
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = resolver();
        let reference = MethodRef::new(
            program(),
            "Decrypt",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String]),
        );

        let first = resolver.resolve_method(&reference, &GenericContext::empty()).unwrap();
        let second = resolver.resolve_method(&reference, &GenericContext::empty()).unwrap();
        assert!(Arc::ptr_eq(first.def(), second.def()));
        assert_eq!(first.token(), Token::new(0x0600_0003));

        let ty = resolver.resolve_type(&program(), &GenericContext::empty()).unwrap();
        let again = resolver.resolve_type(&program(), &GenericContext::empty()).unwrap();
        assert!(Arc::ptr_eq(ty.definition().unwrap(), again.definition().unwrap()));
    }

    #[test]
    fn test_token_fast_path() {
        let resolver = resolver();
        // The token wins over the signature
        let reference = MethodRef::new(
            program(),
            "Decrypt",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String]),
        )
        .with_token(Token::new(0x0600_0002));
        let method = resolver.resolve_method(&reference, &GenericContext::empty()).unwrap();
        assert_eq!(method.token(), Token::new(0x0600_0002));
    }

    #[test]
    fn test_unresolved_names_reference_and_component() {
        let resolver = resolver();
        let reference = MethodRef::new(
            program(),
            "Missing",
            SignatureMethod::new_static(TypeSignature::Void, vec![]),
        );
        match resolver.resolve_method(&reference, &GenericContext::empty()) {
            Err(Error::Unresolved { reference, component }) => {
                assert_eq!(reference, "System.Void App.Program::Missing()");
                assert_eq!(component, "Target, Version=1.0.0.0");
            }
            other => panic!("unexpected {other:?}"),
        }

        let missing_type = TypeSignature::Class(type_ref("Target", "App", "Gone"));
        assert!(matches!(
            resolver.resolve_type(&missing_type, &GenericContext::empty()),
            Err(Error::Unresolved { .. })
        ));
    }

    #[test]
    fn test_generic_substitution() {
        let resolver = resolver();
        let int = resolver.host().corlib_type("System", "Int32").unwrap();
        let boxed = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(type_ref("Target", "App", "Box`1"))),
            vec![TypeSignature::GenericParamMethod(0)],
        );

        let context = GenericContext {
            type_args: vec![],
            method_args: vec![int.clone()],
        };
        let closed = resolver.resolve_type(&boxed, &context).unwrap();
        assert_eq!(closed.to_string(), "App.Box`1<System.Int32>");

        // Only unbound parameters: the definition itself
        let open = resolver.resolve_type(&boxed, &GenericContext::empty()).unwrap();
        assert!(open.is_generic_definition());

        let get = MethodRef::new(
            boxed.clone(),
            "Get",
            SignatureMethod::new_instance(TypeSignature::GenericParamType(0), vec![]),
        );
        let method = resolver.resolve_method(&get, &context).unwrap();
        assert_eq!(method.generic_context().type_args, vec![int.clone()]);

        let set = MethodRef::new(
            boxed.clone(),
            "Set",
            SignatureMethod::new_instance(TypeSignature::Void, vec![TypeSignature::GenericParamType(0)]),
        );
        let method = resolver.resolve_method(&set, &context).unwrap();
        let params = crate::translator::parameter_types(&resolver, &method).unwrap();
        assert_eq!(params, vec![closed.clone(), int]);

        let field = FieldRef::new(boxed, "value", TypeSignature::GenericParamType(0));
        let field = resolver.resolve_field(&field, &context).unwrap();
        assert_eq!(field.declaring_type(), &closed);
    }

    #[test]
    fn test_layers_are_reproduced() {
        let resolver = resolver();
        let signature = TypeSignature::ByRef(Box::new(TypeSignature::Array(
            Box::new(TypeSignature::SzArray(Box::new(program()))),
            2,
        )));
        let resolved = resolver.resolve_type(&signature, &GenericContext::empty()).unwrap();
        assert_eq!(resolved.to_string(), "App.Program[][,]&");
    }

    #[test]
    fn test_external_component_loaded_by_name() {
        let resolver = resolver();
        let helper_identity = AssemblyIdentity::new("Helper", Default::default());
        let helper = ModuleBuilder::new(helper_identity)
            .class("Helper", "Util")
            .static_method("Helper.Util", "Mix", TypeSignature::I4, vec![TypeSignature::I4])
            .static_field("Helper.Util", "seed", TypeSignature::I4)
            .build();
        resolver
            .host()
            .add_provider(Box::new(HelperProvider(Arc::new(helper))));

        let util = TypeSignature::Class(type_ref("Helper", "Helper", "Util"));
        let mix = MethodRef::new(
            util.clone(),
            "Mix",
            SignatureMethod::new_static(corlib_class("System", "Int32"), vec![TypeSignature::I4]),
        )
        // Tokens of untracked components are never used
        .with_token(Token::new(0x0600_0042));
        let method = resolver.resolve_method(&mix, &GenericContext::empty()).unwrap();
        assert_eq!(method.name(), "Mix");
        assert!(!resolver.is_tracked(method.component().unwrap()));
        assert!(resolver.tracked_method(&mix, &GenericContext::empty()).unwrap().is_none());
        assert!(matches!(resolver.method_body(&method), Err(Error::MissingBody { .. })));

        let seed = FieldRef::new(util, "seed", TypeSignature::I4);
        assert!(resolver.resolve_field(&seed, &GenericContext::empty()).unwrap().is_static());
    }

    #[test]
    fn test_resolve_member_kinds() {
        let resolver = resolver();
        let ctor = MemberRef::Method(Arc::new(MethodRef::new(
            corlib_class("System", "Exception"),
            ".ctor",
            SignatureMethod::new_instance(TypeSignature::Void, vec![TypeSignature::String]),
        )));
        assert!(matches!(
            resolver.resolve_member(&ctor, &GenericContext::empty()).unwrap(),
            ResolvedMember::Constructor(_)
        ));

        let concat = MemberRef::Method(Arc::new(MethodRef::new(
            TypeSignature::String,
            "Concat",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::Object, TypeSignature::Object]),
        )));
        assert!(matches!(
            resolver.resolve_member(&concat, &GenericContext::empty()).unwrap(),
            ResolvedMember::Method(_)
        ));

        let ty = MemberRef::Type(TypeSignature::SzArray(Box::new(TypeSignature::U1)));
        match resolver.resolve_member(&ty, &GenericContext::empty()).unwrap() {
            ResolvedMember::Type(ty) => assert_eq!(ty.to_string(), "System.Byte[]"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tracked_method_and_body() {
        let resolver = resolver();
        let main = MethodRef::new(program(), "Main", SignatureMethod::new_static(TypeSignature::Void, vec![]));
        let method = resolver
            .tracked_method(&main, &GenericContext::empty())
            .unwrap()
            .unwrap();
        assert!(resolver.method_body(&method).unwrap().body.is_some());

        let by_token = resolver.method_by_token(method.component().unwrap(), method.token()).unwrap();
        assert_eq!(by_token, method);

        // Declared without a body
        let decrypt = resolver.method_by_token(method.component().unwrap(), Token::new(0x0600_0002)).unwrap();
        assert!(matches!(resolver.method_body(&decrypt), Err(Error::MissingBody { .. })));
    }
}
