//! Member lookup on one type of a tracked component.

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::{
    metadata::{module::TypeDefRc, token::Token},
    resolver::keys::{FieldKey, MethodKey},
    runtime::types::{RuntimeFieldDefRc, RuntimeMethodDefRc, RuntimeTypeDefRc},
};

/// A reference to a [`TypeRecord`]
pub type TypeRecordRc = Arc<TypeRecord>;

/// Lookup tables over the declared members of a type
#[derive(Default)]
struct MemberMaps {
    methods_by_token: FxHashMap<Token, RuntimeMethodDefRc>,
    fields_by_token: FxHashMap<Token, RuntimeFieldDefRc>,
    methods_by_key: FxHashMap<MethodKey, RuntimeMethodDefRc>,
    fields_by_key: FxHashMap<FieldKey, RuntimeFieldDefRc>,
}

/// A live type of a tracked component, paired with the definition it was built from
pub struct TypeRecord {
    ty: RuntimeTypeDefRc,
    def: TypeDefRc,
    members: OnceLock<MemberMaps>,
}

impl TypeRecord {
    /// Pairs a live type with its definition
    #[must_use]
    pub fn new(ty: RuntimeTypeDefRc, def: TypeDefRc) -> Self {
        TypeRecord {
            ty,
            def,
            members: OnceLock::new(),
        }
    }

    /// The live type
    #[must_use]
    pub fn live(&self) -> &RuntimeTypeDefRc {
        &self.ty
    }

    /// The parsed definition
    #[must_use]
    pub fn definition(&self) -> &TypeDefRc {
        &self.def
    }

    fn members(&self) -> &MemberMaps {
        self.members.get_or_init(|| {
            log::trace!("indexing members of {}", self.ty.full_name());

            let mut maps = MemberMaps::default();
            for (_, method) in self.ty.methods.iter() {
                maps.methods_by_token.insert(method.token, method.clone());
                maps.methods_by_key
                    .entry(MethodKey::of(&method.name, &method.signature))
                    .or_insert_with(|| method.clone());
            }
            for (_, field) in self.ty.fields.iter() {
                maps.fields_by_token.insert(field.token, field.clone());
                maps.fields_by_key
                    .entry(FieldKey::of(&field.name, &field.signature))
                    .or_insert_with(|| field.clone());
            }
            maps
        })
    }

    /// Finds a declared method by its `MethodDef` token
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<RuntimeMethodDefRc> {
        self.members().methods_by_token.get(&token).cloned()
    }

    /// Finds a declared method by its canonical key
    #[must_use]
    pub fn method_by_key(&self, key: &MethodKey) -> Option<RuntimeMethodDefRc> {
        self.members().methods_by_key.get(key).cloned()
    }

    /// Finds a declared field by its `Field` token
    #[must_use]
    pub fn field_by_token(&self, token: Token) -> Option<RuntimeFieldDefRc> {
        self.members().fields_by_token.get(&token).cloned()
    }

    /// Finds a declared field by its canonical key
    #[must_use]
    pub fn field_by_key(&self, key: &FieldKey) -> Option<RuntimeFieldDefRc> {
        self.members().fields_by_key.get(key).cloned()
    }
}

impl std::fmt::Debug for TypeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeRecord({})", self.ty.full_name())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::signatures::{SignatureMethod, TypeSignature},
        runtime::Component,
        test::{target, ModuleBuilder},
    };

    #[test]
    fn test_members_by_token_and_key() {
        let module = Arc::new(
            ModuleBuilder::new(target())
                .class("App", "Strings")
                .static_method("App.Strings", "Get", TypeSignature::String, vec![TypeSignature::I4])
                .static_method("App.Strings", "Get", TypeSignature::String, vec![TypeSignature::String])
                .static_field("App.Strings", "cache", TypeSignature::Object)
                .build(),
        );
        let component = Component::from_module(1, module.clone());
        let record = TypeRecord::new(component.type_named("App", "Strings").unwrap(), module.types[0].clone());

        let by_int = record
            .method_by_key(&MethodKey::of(
                "Get",
                &SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::I4]),
            ))
            .unwrap();
        assert_eq!(by_int.token, Token::new(0x0600_0001));
        assert!(Arc::ptr_eq(&by_int, &record.method_by_token(Token::new(0x0600_0001)).unwrap()));

        let by_string = record
            .method_by_key(&MethodKey::of(
                "Get",
                &SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String]),
            ))
            .unwrap();
        assert_eq!(by_string.token, Token::new(0x0600_0002));

        assert!(record.method_by_token(Token::new(0x0600_0003)).is_none());
        assert_eq!(
            record.field_by_key(&FieldKey::of("cache", &TypeSignature::Object)).unwrap().token,
            Token::new(0x0400_0001)
        );
        assert!(record.field_by_token(Token::new(0x0400_0001)).is_some());
        assert_eq!(record.definition().name, "Strings");
    }
}
