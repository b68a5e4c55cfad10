//! Lookup over one tracked component.
//!
//! A [`ModuleRecord`] pairs every live type of a component with its parsed definition and
//! answers the lookups the resolver needs for references into that component: types by
//! declared key or token, members by token or canonical key. The member tables of a type
//! are built the first time the type is asked for a member; the global member tables the
//! first time a global member is asked for.

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        module::ModuleDefRc,
        references::{short_key, FieldRef, MethodRef, TypeRef},
        token::Token,
    },
    resolver::{
        keys::{FieldKey, MethodKey},
        types::{TypeRecord, TypeRecordRc},
    },
    runtime::{
        component::{type_matches, ComponentRc},
        types::{RuntimeFieldDefRc, RuntimeMethodDefRc, RuntimeTypeDefRc},
    },
};

/// A reference to a [`ModuleRecord`]
pub type ModuleRecordRc = Arc<ModuleRecord>;

/// Global (`<Module>` owned) members
#[derive(Default)]
struct GlobalMembers {
    methods_by_token: FxHashMap<Token, RuntimeMethodDefRc>,
    fields_by_token: FxHashMap<Token, RuntimeFieldDefRc>,
    methods_by_key: FxHashMap<MethodKey, RuntimeMethodDefRc>,
    fields_by_key: FxHashMap<FieldKey, RuntimeFieldDefRc>,
}

/// A tracked component
pub struct ModuleRecord {
    component: ComponentRc,
    definition: ModuleDefRc,
    by_key: FxHashMap<String, Vec<TypeRecordRc>>,
    by_token: FxHashMap<Token, TypeRecordRc>,
    globals: OnceLock<GlobalMembers>,
}

impl ModuleRecord {
    /// Builds the record of a loaded component from the definition it was loaded from
    ///
    /// # Arguments
    /// * `component` - The live component
    /// * `definition` - The parsed metadata of the component
    #[must_use]
    pub fn new(component: ComponentRc, definition: ModuleDefRc) -> Self {
        let mut by_key: FxHashMap<String, Vec<TypeRecordRc>> = FxHashMap::default();
        let mut by_token = FxHashMap::default();
        for def in &definition.types {
            let Some(ty) = component.type_by_token(def.token) else {
                continue;
            };
            let record = Arc::new(TypeRecord::new(ty, def.clone()));
            by_key
                .entry(short_key(&def.namespace, &def.name))
                .or_default()
                .push(record.clone());
            by_token.insert(def.token, record);
        }

        ModuleRecord {
            component,
            definition,
            by_key,
            by_token,
            globals: OnceLock::new(),
        }
    }

    /// The live component
    #[must_use]
    pub fn component(&self) -> &ComponentRc {
        &self.component
    }

    /// The parsed metadata
    #[must_use]
    pub fn definition(&self) -> &ModuleDefRc {
        &self.definition
    }

    /// Finds the record of a type by its `TypeDef` token
    #[must_use]
    pub fn type_by_token(&self, token: Token) -> Option<&TypeRecordRc> {
        self.by_token.get(&token)
    }

    /// Finds the record of a live type of this component
    #[must_use]
    pub fn type_record(&self, ty: &RuntimeTypeDefRc) -> Option<&TypeRecordRc> {
        self.by_token
            .get(&ty.token)
            .filter(|record| Arc::ptr_eq(record.live(), ty))
    }

    /// Finds the type a reference names.
    ///
    /// A `TypeDef` token on the reference is only meaningful inside this component and is
    /// tried first; otherwise the candidates sharing the declared key are compared by name,
    /// namespace, enclosing chain and scope.
    #[must_use]
    pub fn find_type(&self, type_ref: &TypeRef) -> Option<&TypeRecordRc> {
        if let Some(record) = type_ref
            .token
            .filter(|token| token.table() == 0x02)
            .and_then(|token| self.by_token.get(&token))
        {
            if record.live().name == type_ref.name {
                return Some(record);
            }
        }

        self.by_key
            .get(&type_ref.short_key())?
            .iter()
            .find(|record| type_matches(record.live(), type_ref))
    }

    /// Finds a method declared by `ty`, by `MethodDef` token when the reference carries one
    /// and by canonical key otherwise
    #[must_use]
    pub fn find_method(&self, ty: &RuntimeTypeDefRc, method_ref: &MethodRef) -> Option<RuntimeMethodDefRc> {
        if ty.is_global() {
            return self.global_method(method_ref);
        }

        let record = self.type_record(ty)?;
        if let Some(method) = method_ref
            .token
            .filter(|token| token.table() == 0x06)
            .and_then(|token| record.method_by_token(token))
        {
            return Some(method);
        }
        record.method_by_key(&MethodKey::of(&method_ref.name, &method_ref.signature))
    }

    /// Finds a field declared by `ty`, by `Field` token when the reference carries one and
    /// by canonical key otherwise
    #[must_use]
    pub fn find_field(&self, ty: &RuntimeTypeDefRc, field_ref: &FieldRef) -> Option<RuntimeFieldDefRc> {
        if ty.is_global() {
            return self.global_field(field_ref);
        }

        let record = self.type_record(ty)?;
        if let Some(field) = field_ref
            .token
            .filter(|token| token.table() == 0x04)
            .and_then(|token| record.field_by_token(token))
        {
            return Some(field);
        }
        record.field_by_key(&FieldKey::of(&field_ref.name, &field_ref.signature))
    }

    fn globals(&self) -> &GlobalMembers {
        self.globals.get_or_init(|| {
            let mut globals = GlobalMembers::default();
            let Some(global) = self.component.global_type() else {
                return globals;
            };
            log::trace!("indexing global members of {}", self.component.identity());

            for (_, method) in global.methods.iter() {
                if method.name == ".cctor" {
                    continue;
                }
                globals.methods_by_token.insert(method.token, method.clone());
                globals
                    .methods_by_key
                    .entry(MethodKey::of(&method.name, &method.signature))
                    .or_insert_with(|| method.clone());
            }
            for (_, field) in global.fields.iter() {
                globals.fields_by_token.insert(field.token, field.clone());
                globals
                    .fields_by_key
                    .entry(FieldKey::of(&field.name, &field.signature))
                    .or_insert_with(|| field.clone());
            }
            globals
        })
    }

    /// Finds a global method, the type initializer excluded
    #[must_use]
    pub fn global_method(&self, method_ref: &MethodRef) -> Option<RuntimeMethodDefRc> {
        let globals = self.globals();
        method_ref
            .token
            .and_then(|token| globals.methods_by_token.get(&token))
            .or_else(|| {
                globals
                    .methods_by_key
                    .get(&MethodKey::of(&method_ref.name, &method_ref.signature))
            })
            .cloned()
    }

    /// Finds a global field
    #[must_use]
    pub fn global_field(&self, field_ref: &FieldRef) -> Option<RuntimeFieldDefRc> {
        let globals = self.globals();
        field_ref
            .token
            .and_then(|token| globals.fields_by_token.get(&token))
            .or_else(|| {
                globals
                    .fields_by_key
                    .get(&FieldKey::of(&field_ref.name, &field_ref.signature))
            })
            .cloned()
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ModuleRecord({}, {} types)",
            self.component.identity(),
            self.by_token.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            method::{Instruction, MethodBody},
            opcodes::RET,
            signatures::{SignatureMethod, TypeSignature},
        },
        runtime::Component,
        test::{target, type_ref, ModuleBuilder},
    };

    fn record() -> ModuleRecord {
        let body = MethodBody::new(vec![Instruction::simple(RET)]);
        let module = Arc::new(
            ModuleBuilder::new(target())
                .global()
                .static_body("<Module>", ".cctor", TypeSignature::Void, vec![], body.clone())
                .static_body("<Module>", "Decode", TypeSignature::String, vec![TypeSignature::I4], body)
                .static_field("<Module>", "table", TypeSignature::Object)
                .class("App", "Outer")
                .nested("App.Outer", "Inner")
                .class("Other", "Inner")
                .build(),
        );
        let component = Arc::new(Component::from_module(1, module.clone()));
        ModuleRecord::new(component, module)
    }

    #[test]
    fn test_type_lookup_prefers_token() {
        let record = record();
        let inner = record.find_type(&TypeRef::nested(type_ref("Target", "App", "Outer"), "Inner")).unwrap();
        assert_eq!(inner.live().full_name(), "App.Outer/Inner");

        let other = record.find_type(&type_ref("Target", "Other", "Inner")).unwrap();
        assert_eq!(other.live().full_name(), "Other.Inner");

        // A token pointing at a type of the same name wins over the key scan
        let by_token = (*type_ref("Target", "Other", "Inner")).clone().with_token(inner.live().token);
        let found = record.find_type(&by_token).unwrap();
        assert!(Arc::ptr_eq(found.live(), inner.live()));
    }

    #[test]
    fn test_global_members_skip_type_initializer() {
        let record = record();
        let global = record.component().global_type().unwrap();
        let declaring = TypeSignature::Class(type_ref("Target", "", "<Module>"));

        let decode = MethodRef::new(
            declaring.clone(),
            "Decode",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::I4]),
        );
        assert_eq!(record.find_method(&global, &decode).unwrap().name, "Decode");

        let cctor = MethodRef::new(
            declaring.clone(),
            ".cctor",
            SignatureMethod::new_static(TypeSignature::Void, vec![]),
        );
        assert!(record.find_method(&global, &cctor).is_none());

        let table = FieldRef::new(declaring, "table", TypeSignature::Object);
        assert!(record.find_field(&global, &table).is_some());
    }
}
