//! The host process.
//!
//! The [`Host`] owns everything that outlives a single sandbox session: the table of loaded
//! components, the built-in platform library, the providers used to load a component
//! independently by name, the static field store and the type initializer bookkeeping.
//!
//! Components are append-only. A component is never unloaded and its index in the table
//! ([`ComponentId`]) stays valid for the lifetime of the host. The platform library is
//! always component `0`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsandbox::{prelude::*, HostConfig};
//!
//! # fn load(module: ModuleDef) -> dotsandbox::Result<()> {
//! let host = Host::new(HostConfig::default());
//! let component = host.load(Arc::new(module))?;
//! host.set_entry_component(component.id());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, OnceLock, RwLock};

use dashmap::{DashMap, DashSet};

use crate::{
    config::HostConfig,
    metadata::{
        identity::AssemblyIdentity,
        module::ModuleDefRc,
        references::{short_key, TypeRef},
        signatures::TypeSignature,
        token::Token,
    },
    runtime::{
        component::{Component, ComponentRc},
        corlib::{self, EXCEPTION_MESSAGE},
        types::{
            ComponentId, FieldSlot, GenericContext, RuntimeField, RuntimeType, RuntimeTypeDef,
            RuntimeTypeDefRc,
        },
        value::Value,
    },
    Error, Result,
};

/// Supplies the parsed metadata of components that are not loaded yet.
///
/// The host asks its providers in registration order whenever a reference names a component
/// it does not know. A provider typically wraps the binary reader and a search path.
pub trait ComponentProvider: Send + Sync {
    /// Returns the parsed metadata of the component, `None` if this provider does not know it
    fn provide(&self, identity: &AssemblyIdentity) -> Option<ModuleDefRc>;
}

/// The host process
pub struct Host {
    config: HostConfig,
    components: boxcar::Vec<ComponentRc>,
    by_name: DashMap<String, ComponentId>,
    providers: RwLock<Vec<Box<dyn ComponentProvider>>>,
    load_lock: Mutex<()>,
    statics: DashMap<FieldSlot, Value>,
    initialized: DashSet<(ComponentId, Token)>,
    entry: OnceLock<ComponentId>,
}

impl Host {
    /// Creates a host with the platform library loaded as component `0`
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        let host = Host {
            components: boxcar::Vec::new(),
            by_name: DashMap::new(),
            providers: RwLock::new(Vec::new()),
            load_lock: Mutex::new(()),
            statics: DashMap::new(),
            initialized: DashSet::new(),
            entry: OnceLock::new(),
            config,
        };

        let corlib = corlib::build(0, host.config.corlib_identity());
        host.by_name
            .insert(corlib.identity().name.to_ascii_lowercase(), 0);
        host.components.push(Arc::new(corlib));
        host
    }

    /// The configuration the host was created with
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Loads a component from parsed metadata.
    ///
    /// Loading is idempotent by simple name: a second module with the name of an already
    /// loaded component returns the existing component.
    ///
    /// # Arguments
    /// * `module` - The parsed metadata
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the component table is inconsistent and
    /// [`Error::LockError`] if the load lock is poisoned.
    pub fn load(&self, module: ModuleDefRc) -> Result<ComponentRc> {
        let _guard = self.load_lock.lock().map_err(|_| Error::LockError)?;

        let key = module.identity.name.to_ascii_lowercase();
        if let Some(id) = self.by_name.get(&key).map(|id| *id) {
            return self.component(id).ok_or_else(|| {
                Error::Error(format!("Component table has no entry {id} for {key}"))
            });
        }

        let id = self.components.count();
        let component = Arc::new(Component::from_module(id, module));
        self.components.push(component.clone());
        self.by_name.insert(key, id);

        log::debug!(
            "loaded component {} as #{} ({} types)",
            component.identity(),
            id,
            component.types().len()
        );
        Ok(component)
    }

    /// Registers a provider for components loaded by name
    pub fn add_provider(&self, provider: Box<dyn ComponentProvider>) {
        write_lock!(self.providers).push(provider);
    }

    /// Returns a loaded component
    #[must_use]
    pub fn component(&self, id: ComponentId) -> Option<ComponentRc> {
        self.components.get(id).cloned()
    }

    /// Returns the loaded component with the simple name of `identity`
    #[must_use]
    pub fn component_by_name(&self, identity: &AssemblyIdentity) -> Option<ComponentRc> {
        let id = *self.by_name.get(&identity.name.to_ascii_lowercase())?;
        self.component(id)
    }

    /// Returns the named component, loading it through the providers if needed.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if no provider knows the component.
    pub fn load_by_name(&self, identity: &AssemblyIdentity) -> Result<ComponentRc> {
        if let Some(component) = self.component_by_name(identity) {
            return Ok(component);
        }

        let module = read_lock!(self.providers)
            .iter()
            .find_map(|provider| provider.provide(identity));
        match module {
            Some(module) => self.load(module),
            None => Err(Error::Unresolved {
                reference: identity.full_name(),
                component: identity.full_name(),
            }),
        }
    }

    /// The platform library
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the component table lost its first entry.
    pub fn corlib(&self) -> Result<ComponentRc> {
        self.component(0)
            .ok_or_else(|| Error::Error("Platform library is not loaded".to_string()))
    }

    /// Marks the component the process was started from, the first call wins
    pub fn set_entry_component(&self, id: ComponentId) -> bool {
        self.entry.set(id).is_ok()
    }

    /// The component the process was started from
    #[must_use]
    pub fn entry_component(&self) -> Option<ComponentRc> {
        self.entry.get().and_then(|id| self.component(*id))
    }

    /// Returns a platform library type.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the platform library does not define the type.
    pub fn corlib_type(&self, namespace: &str, name: &str) -> Result<RuntimeType> {
        let corlib = self.corlib()?;
        corlib
            .type_named(namespace, name)
            .map(RuntimeType::Definition)
            .ok_or_else(|| Error::Unresolved {
                reference: short_key(namespace, name),
                component: corlib.identity().full_name(),
            })
    }

    /// Finds the definition a type reference names, loading its component if needed.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the component or the type can not be found.
    pub fn find_type(&self, type_ref: &TypeRef) -> Result<RuntimeTypeDefRc> {
        let component = self.load_by_name(&type_ref.scope)?;
        component
            .find_type(type_ref)
            .ok_or_else(|| Error::Unresolved {
                reference: type_ref.to_string(),
                component: component.identity().full_name(),
            })
    }

    /// Binds a signature to a live type, looking named types up through the host.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if a named type can not be found.
    pub fn bind(&self, signature: &TypeSignature, context: &GenericContext) -> Result<RuntimeType> {
        bind_with(signature, context, &mut |named: Named<'_>| match named {
            Named::Primitive(name) => self.corlib_type("System", name),
            Named::Reference(type_ref) => self.find_type(type_ref).map(RuntimeType::Definition),
        })
    }

    /// The base type of `ty`, instantiated like `ty`.
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the base type can not be found.
    pub fn base_type(&self, ty: &RuntimeType) -> Result<Option<RuntimeType>> {
        match ty {
            RuntimeType::Definition(def) | RuntimeType::GenericInstance(def, _) => match &def.base {
                Some(base) => {
                    let context = GenericContext {
                        type_args: ty.generic_args().to_vec(),
                        method_args: Vec::new(),
                    };
                    self.bind(base, &context).map(Some)
                }
                None => Ok(None),
            },
            RuntimeType::SzArray(_) | RuntimeType::Array(_, _) => {
                self.corlib_type("System", "Array").map(Some)
            }
            _ => Ok(None),
        }
    }

    /// True if `actual` is `target` or derives from it
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if a base type can not be found.
    pub fn is_subtype(&self, actual: &RuntimeType, target: &RuntimeType) -> Result<bool> {
        if let (RuntimeType::SzArray(actual), RuntimeType::SzArray(target)) = (actual, target) {
            if actual.is_value_type() || target.is_value_type() {
                return Ok(actual == target);
            }
            return self.is_subtype(actual, target);
        }

        let mut current = Some(actual.clone());
        while let Some(ty) = current {
            if &ty == target {
                return Ok(true);
            }
            current = self.base_type(&ty)?;
        }
        Ok(false)
    }

    /// The live type of a value, `None` for `null`, `void` and pointers
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the platform library lacks the type.
    pub fn type_of(&self, value: &Value) -> Result<Option<RuntimeType>> {
        if let Some(ty) = value.runtime_type() {
            return Ok(Some(ty));
        }
        let (namespace, name) = match value {
            Value::I32(_) => ("System", "Int32"),
            Value::I64(_) => ("System", "Int64"),
            Value::NativeInt(_) => ("System", "IntPtr"),
            Value::F64(_) => ("System", "Double"),
            Value::String(_) => ("System", "String"),
            Value::Type(_) => ("System", "Type"),
            Value::Method(_) | Value::DynamicMethod(_) => ("System.Reflection", "MethodInfo"),
            Value::Field(_) => ("System.Reflection", "FieldInfo"),
            Value::Assembly(_) => ("System.Reflection", "Assembly"),
            Value::StackTrace(_) => ("System.Diagnostics", "StackTrace"),
            Value::StackFrame(_) => ("System.Diagnostics", "StackFrame"),
            Value::Delegate(_) => ("System", "Delegate"),
            _ => return Ok(None),
        };
        self.corlib_type(namespace, name).map(Some)
    }

    /// True if `value` is a non-null instance of `target`
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if a type involved can not be found.
    pub fn is_instance_of(&self, value: &Value, target: &RuntimeType) -> Result<bool> {
        match self.type_of(value)? {
            Some(actual) => self.is_subtype(&actual, target),
            None => Ok(false),
        }
    }

    /// Creates a platform exception object with the given message.
    ///
    /// Unknown exception type names fall back to `System.Exception`.
    ///
    /// # Arguments
    /// * `type_name` - Full name of the exception type, `System.NullReferenceException`
    /// * `message` - The exception message
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the platform library lacks `System.Exception`.
    pub fn new_exception(&self, type_name: &str, message: &str) -> Result<Value> {
        let (namespace, name) = type_name.rsplit_once('.').unwrap_or(("", type_name));
        let ty = self
            .corlib_type(namespace, name)
            .or_else(|_| self.corlib_type("System", "Exception"))?;

        let exception = Value::new_object(ty);
        if let Some(object) = exception.as_object() {
            write_lock!(object)
                .fields
                .insert(EXCEPTION_MESSAGE, Value::string(message));
        }
        Ok(exception)
    }

    /// The default value of a field, as observed before its first store
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the field type can not be bound.
    pub fn field_default(&self, field: &RuntimeField) -> Result<Value> {
        let context = GenericContext {
            type_args: field.declaring_type().generic_args().to_vec(),
            method_args: Vec::new(),
        };
        let ty = self.bind(&field.def().signature, &context)?;
        Ok(Value::default_for(&ty))
    }

    /// Reads a static field
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the field type can not be bound.
    pub fn load_static(&self, field: &RuntimeField) -> Result<Value> {
        if let Some(value) = self.statics.get(&field.slot()) {
            return Ok(value.clone());
        }
        self.field_default(field)
    }

    /// The stored value of a static field, `None` before its first store
    #[must_use]
    pub fn static_value(&self, slot: FieldSlot) -> Option<Value> {
        self.statics.get(&slot).map(|value| value.clone())
    }

    /// Writes a static field
    pub fn store_static(&self, slot: FieldSlot, value: Value) {
        self.statics.insert(slot, value);
    }

    /// Marks the type initializer of `def` as started, true only for the first call
    pub fn begin_type_initialization(&self, def: &RuntimeTypeDef) -> bool {
        self.initialized.insert((def.component, def.token))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("components", &self.components.count())
            .field("statics", &self.statics.len())
            .finish_non_exhaustive()
    }
}

/// A named type met while binding a signature
pub enum Named<'a> {
    /// A primitive, by its `System` type name
    Primitive(&'static str),
    /// A type reference
    Reference(&'a TypeRef),
}

/// Binds a signature layer by layer, asking `lookup` for the named types at its core.
///
/// Generic parameters are replaced from `context`; parameters without an argument stay
/// unbound. Custom modifiers and pinning are transparent. Function pointers bind to
/// `System.IntPtr`.
///
/// # Errors
/// Propagates the errors of `lookup`.
pub fn bind_with<F>(signature: &TypeSignature, context: &GenericContext, lookup: &mut F) -> Result<RuntimeType>
where
    F: FnMut(Named<'_>) -> Result<RuntimeType>,
{
    if let Some(name) = signature.primitive_name() {
        return lookup(Named::Primitive(name));
    }

    Ok(match signature {
        TypeSignature::Modified { inner, .. } | TypeSignature::Pinned(inner) => {
            return bind_with(inner, context, lookup);
        }
        TypeSignature::Class(type_ref) | TypeSignature::ValueType(type_ref) => {
            return lookup(Named::Reference(type_ref));
        }
        TypeSignature::GenericInst(definition, args) => {
            let definition = match bind_with(definition, context, lookup)? {
                RuntimeType::Definition(def) => def,
                other => {
                    return Err(malformed_error!(
                        "Generic instantiation of non-definition {}",
                        other
                    ))
                }
            };
            let args = args
                .iter()
                .map(|arg| bind_with(arg, context, lookup))
                .collect::<Result<Vec<_>>>()?;
            RuntimeType::instantiate(definition, args)
        }
        TypeSignature::GenericParamType(index) => context
            .type_args
            .get(*index as usize)
            .cloned()
            .unwrap_or(RuntimeType::GenericParameter {
                index: *index,
                method: false,
            }),
        TypeSignature::GenericParamMethod(index) => context
            .method_args
            .get(*index as usize)
            .cloned()
            .unwrap_or(RuntimeType::GenericParameter {
                index: *index,
                method: true,
            }),
        TypeSignature::SzArray(element) => {
            RuntimeType::SzArray(Box::new(bind_with(element, context, lookup)?))
        }
        TypeSignature::Array(element, rank) => {
            RuntimeType::Array(Box::new(bind_with(element, context, lookup)?), *rank)
        }
        TypeSignature::Ptr(inner) => RuntimeType::Pointer(Box::new(bind_with(inner, context, lookup)?)),
        TypeSignature::ByRef(inner) => RuntimeType::ByRef(Box::new(bind_with(inner, context, lookup)?)),
        TypeSignature::FnPtr(_) => return lookup(Named::Primitive("IntPtr")),
        _ => return Err(malformed_error!("Unexpected signature {}", signature)),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test::{corlib, target, type_ref, ModuleBuilder};

    struct StaticProvider(ModuleDefRc);

    impl ComponentProvider for StaticProvider {
        fn provide(&self, identity: &AssemblyIdentity) -> Option<ModuleDefRc> {
            self.0.identity.same_name(identity).then(|| self.0.clone())
        }
    }

    #[test]
    fn test_corlib_is_component_zero() {
        let host = Host::new(HostConfig::default());
        let component = host.corlib().unwrap();
        assert_eq!(component.id(), 0);
        assert!(host.component_by_name(&corlib()).is_some());

        let string = host.corlib_type("System", "String").unwrap();
        assert_eq!(host.bind(&TypeSignature::String, &GenericContext::empty()).unwrap(), string);
    }

    #[test]
    fn test_poisoned_load_lock() {
        let host = Host::new(HostConfig::default());
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = host.load_lock.lock().unwrap();
            panic!("loader crashed");
        }));
        assert!(poisoned.is_err());

        let module = Arc::new(ModuleBuilder::new(target()).class("App", "Program").build());
        assert!(matches!(host.load(module), Err(Error::LockError)));
    }

    #[test]
    fn test_load_is_idempotent() {
        let host = Host::new(HostConfig::default());
        let module = Arc::new(ModuleBuilder::new(target()).class("App", "Program").build());

        let first = host.load(module.clone()).unwrap();
        let second = host.load(module).unwrap();
        assert_eq!(first.id(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_load_by_name_through_provider() {
        let host = Host::new(HostConfig::default());
        let missing = AssemblyIdentity::new("Helper", Default::default());
        assert!(matches!(host.load_by_name(&missing), Err(Error::Unresolved { .. })));

        let module = Arc::new(
            ModuleBuilder::new(missing.clone())
                .class("Helper", "Util")
                .build(),
        );
        host.add_provider(Box::new(StaticProvider(module)));

        let util = host.find_type(&type_ref("Helper", "Helper", "Util")).unwrap();
        assert_eq!(util.full_name(), "Helper.Util");
        assert_eq!(host.load_by_name(&missing).unwrap().id(), util.component);
    }

    #[test]
    fn test_bind_reproduces_layers() {
        let host = Host::new(HostConfig::default());
        let context = GenericContext {
            type_args: vec![host.corlib_type("System", "Int32").unwrap()],
            method_args: vec![],
        };

        let signature = TypeSignature::ByRef(Box::new(TypeSignature::SzArray(Box::new(
            TypeSignature::Pinned(Box::new(TypeSignature::GenericParamType(0))),
        ))));
        let bound = host.bind(&signature, &context).unwrap();
        assert_eq!(bound.to_string(), "System.Int32[]&");

        let unbound = host
            .bind(&TypeSignature::GenericParamMethod(1), &context)
            .unwrap();
        assert_eq!(
            unbound,
            RuntimeType::GenericParameter {
                index: 1,
                method: true
            }
        );
    }

    #[test]
    fn test_subtyping() {
        let host = Host::new(HostConfig::default());
        let module = Arc::new(
            ModuleBuilder::new(target())
                .class("App", "Base")
                .class_extending("App", "Derived", TypeSignature::Class(type_ref("Target", "App", "Base")))
                .build(),
        );
        let component = host.load(module).unwrap();
        let base = RuntimeType::Definition(component.type_named("App", "Base").unwrap());
        let derived = RuntimeType::Definition(component.type_named("App", "Derived").unwrap());
        let object = host.corlib_type("System", "Object").unwrap();

        assert!(host.is_subtype(&derived, &base).unwrap());
        assert!(host.is_subtype(&derived, &object).unwrap());
        assert!(!host.is_subtype(&base, &derived).unwrap());

        let derived_array = RuntimeType::SzArray(Box::new(derived));
        let base_array = RuntimeType::SzArray(Box::new(base));
        assert!(host.is_subtype(&derived_array, &base_array).unwrap());

        let instance = Value::string("text");
        assert!(host.is_instance_of(&instance, &object).unwrap());
        assert!(!host.is_instance_of(&Value::Null, &object).unwrap());
    }

    #[test]
    fn test_new_exception_carries_message() {
        let host = Host::new(HostConfig::default());
        let exception = host
            .new_exception("System.InvalidOperationException", "broken")
            .unwrap();
        assert_eq!(exception.exception_message().as_deref(), Some("broken"));
        assert_eq!(exception.type_name(), "System.InvalidOperationException");

        let fallback = host.new_exception("Custom.Failure", "x").unwrap();
        assert_eq!(fallback.type_name(), "System.Exception");
    }

    #[test]
    fn test_statics_and_initialization() {
        let host = Host::new(HostConfig::default());
        let module = Arc::new(
            ModuleBuilder::new(target())
                .class("App", "Holder")
                .static_field("App.Holder", "Counter", TypeSignature::I4)
                .build(),
        );
        let component = host.load(module).unwrap();
        let holder = component.type_named("App", "Holder").unwrap();
        let field = RuntimeField::new(
            holder.field_named("Counter").unwrap(),
            RuntimeType::Definition(holder.clone()),
        );

        assert_eq!(host.load_static(&field).unwrap(), Value::I32(0));
        host.store_static(field.slot(), Value::I32(7));
        assert_eq!(host.load_static(&field).unwrap(), Value::I32(7));

        assert!(host.begin_type_initialization(&holder));
        assert!(!host.begin_type_initialization(&holder));
    }

    #[test]
    fn test_entry_component_first_wins() {
        let host = Host::new(HostConfig::default());
        assert!(host.set_entry_component(0));
        assert!(!host.set_entry_component(1));
        assert_eq!(host.entry_component().unwrap().id(), 0);
    }
}
