//! Lookup over components the resolver does not track.
//!
//! References into the platform library or into any other component the target names are
//! resolved against a copy of that component loaded independently by name. Tokens of such
//! references are meaningless there, so members are found by name first and then by
//! comparing canonical keys. The name indexes are built lazily per type, and separately for
//! the global members.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        references::{FieldRef, MethodRef},
        token::Token,
    },
    resolver::keys::{FieldKey, MethodKey},
    runtime::{
        component::ComponentRc,
        types::{RuntimeFieldDefRc, RuntimeMethodDefRc, RuntimeTypeDefRc},
    },
};

/// Name indexes over the members of one type
struct NameIndex {
    methods: FxHashMap<String, Vec<RuntimeMethodDefRc>>,
    fields: FxHashMap<String, Vec<RuntimeFieldDefRc>>,
}

impl NameIndex {
    fn build(ty: &RuntimeTypeDefRc, skip_initializer: bool) -> Self {
        let mut methods: FxHashMap<String, Vec<RuntimeMethodDefRc>> = FxHashMap::default();
        for (_, method) in ty.methods.iter() {
            if skip_initializer && method.name == ".cctor" {
                continue;
            }
            methods.entry(method.name.clone()).or_default().push(method.clone());
        }

        let mut fields: FxHashMap<String, Vec<RuntimeFieldDefRc>> = FxHashMap::default();
        for (_, field) in ty.fields.iter() {
            fields.entry(field.name.clone()).or_default().push(field.clone());
        }
        NameIndex { methods, fields }
    }

    fn method(&self, method_ref: &MethodRef) -> Option<RuntimeMethodDefRc> {
        let key = MethodKey::of(&method_ref.name, &method_ref.signature);
        self.methods
            .get(&method_ref.name)?
            .iter()
            .find(|method| MethodKey::of(&method.name, &method.signature) == key)
            .cloned()
    }

    fn field(&self, field_ref: &FieldRef) -> Option<RuntimeFieldDefRc> {
        let key = FieldKey::of(&field_ref.name, &field_ref.signature);
        self.fields
            .get(&field_ref.name)?
            .iter()
            .find(|field| FieldKey::of(&field.name, &field.signature) == key)
            .cloned()
    }
}

/// A component loaded independently by name
pub struct ExternalModule {
    component: ComponentRc,
    types: DashMap<Token, Arc<NameIndex>>,
    globals: OnceLock<Option<NameIndex>>,
}

impl ExternalModule {
    /// Wraps a loaded component
    #[must_use]
    pub fn new(component: ComponentRc) -> Self {
        ExternalModule {
            component,
            types: DashMap::new(),
            globals: OnceLock::new(),
        }
    }

    /// The live component
    #[must_use]
    pub fn component(&self) -> &ComponentRc {
        &self.component
    }

    fn index(&self, ty: &RuntimeTypeDefRc) -> Arc<NameIndex> {
        self.types
            .entry(ty.token)
            .or_insert_with(|| {
                log::trace!("indexing members of external type {}", ty.full_name());
                Arc::new(NameIndex::build(ty, false))
            })
            .clone()
    }

    fn globals(&self) -> Option<&NameIndex> {
        self.globals
            .get_or_init(|| {
                self.component
                    .global_type()
                    .map(|global| NameIndex::build(&global, true))
            })
            .as_ref()
    }

    /// Finds a method declared by `ty` by name and signature
    #[must_use]
    pub fn find_method(&self, ty: &RuntimeTypeDefRc, method_ref: &MethodRef) -> Option<RuntimeMethodDefRc> {
        if ty.is_global() {
            return self.globals()?.method(method_ref);
        }
        self.index(ty).method(method_ref)
    }

    /// Finds a field declared by `ty` by name and type
    #[must_use]
    pub fn find_field(&self, ty: &RuntimeTypeDefRc, field_ref: &FieldRef) -> Option<RuntimeFieldDefRc> {
        if ty.is_global() {
            return self.globals()?.field(field_ref);
        }
        self.index(ty).field(field_ref)
    }
}

impl std::fmt::Debug for ExternalModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExternalModule({})", self.component.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HostConfig,
        metadata::signatures::{SignatureMethod, TypeSignature},
        runtime::Host,
        test::corlib_class,
    };

    #[test]
    fn test_overloads_by_signature() {
        let host = Host::new(HostConfig::default());
        let external = ExternalModule::new(host.corlib().unwrap());
        let string = host.corlib().unwrap().type_named("System", "String").unwrap();

        let two = MethodRef::new(
            TypeSignature::String,
            "Concat",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String, TypeSignature::String]),
        );
        let found = external.find_method(&string, &two).unwrap();
        assert_eq!(found.signature.params.len(), 2);

        // Primitive spelled as a named platform type
        let named = MethodRef::new(
            TypeSignature::String,
            "Concat",
            SignatureMethod::new_static(
                corlib_class("System", "String"),
                vec![corlib_class("System", "String"), corlib_class("System", "String")],
            ),
        );
        assert!(Arc::ptr_eq(&external.find_method(&string, &named).unwrap(), &found));

        let missing = MethodRef::new(
            TypeSignature::String,
            "Concat",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::I8]),
        );
        assert!(external.find_method(&string, &missing).is_none());
    }
}
