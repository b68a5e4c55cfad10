//! Loaded components and their live type tables.
//!
//! A [`Component`] is one loaded binary unit. Managed components are built from parsed
//! metadata ([`Component::from_module`]) and keep the [`ModuleDef`] next to the live handles;
//! the platform library is assembled in code with a [`ComponentBuilder`].

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        identity::AssemblyIdentity,
        module::{FieldAttributes, MethodAttributes, ModuleDef, ModuleDefRc, TypeAttributes},
        references::{short_key, TypeRef},
        signatures::{SignatureMethod, TypeSignature},
        token::{table, Token},
    },
    runtime::{
        types::{
            ComponentId, MethodImpl, RuntimeFieldDef, RuntimeFieldDefRc, RuntimeMethodDef,
            RuntimeMethodDefRc, RuntimeTypeDef, RuntimeTypeDefRc, RuntimeTypeRef,
        },
        NativeFn,
    },
};

/// A reference to a [`Component`]
pub type ComponentRc = Arc<Component>;

/// One loaded component
pub struct Component {
    id: ComponentId,
    identity: AssemblyIdentity,
    types: Vec<RuntimeTypeDefRc>,
    by_key: FxHashMap<String, Vec<RuntimeTypeDefRc>>,
    definition: Option<ModuleDefRc>,
    entry_point: Option<Token>,
}

impl Component {
    /// Builds the live types of a parsed module
    ///
    /// # Arguments
    /// * `id` - Index the component gets in the host
    /// * `module` - The parsed metadata
    #[must_use]
    pub fn from_module(id: ComponentId, module: ModuleDefRc) -> Self {
        let mut types = Vec::with_capacity(module.types.len());
        for type_def in &module.types {
            let ty = Arc::new(RuntimeTypeDef {
                component: id,
                assembly: module.identity.clone(),
                token: type_def.token,
                namespace: type_def.namespace.clone(),
                name: type_def.name.clone(),
                flags: type_def.flags,
                generic_param_count: type_def.generic_params.len() as u32,
                base: type_def.base.clone(),
                value_type: type_def.is_value_type(),
                enclosing: OnceLock::new(),
                methods: boxcar::Vec::new(),
                fields: boxcar::Vec::new(),
            });

            for method in &type_def.methods {
                ty.methods.push(Arc::new(RuntimeMethodDef {
                    token: method.token,
                    name: method.name.clone(),
                    flags: method.flags,
                    signature: method.signature.clone(),
                    implementation: MethodImpl::Managed(method.clone()),
                    declaring: RuntimeTypeRef::new(&ty),
                }));
            }
            for field in &type_def.fields {
                ty.fields.push(Arc::new(RuntimeFieldDef {
                    component: id,
                    token: field.token,
                    name: field.name.clone(),
                    flags: field.flags,
                    signature: field.signature.clone(),
                    declaring: RuntimeTypeRef::new(&ty),
                }));
            }
            types.push(ty);
        }

        for (type_def, ty) in module.types.iter().zip(&types) {
            if let Some(enclosing) = type_def
                .enclosing
                .and_then(|token| types.iter().find(|candidate| candidate.token == token))
            {
                let _ = ty.enclosing.set(RuntimeTypeRef::new(enclosing));
            }
        }

        Component {
            id,
            identity: module.identity.clone(),
            by_key: index_types(&types),
            types,
            entry_point: module.entry_point,
            definition: Some(module),
        }
    }

    /// Index of the component in the host
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Identity of the component
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// All types, nested ones included, in definition order
    #[must_use]
    pub fn types(&self) -> &[RuntimeTypeDefRc] {
        &self.types
    }

    /// The parsed metadata, `None` for components implemented by the host
    #[must_use]
    pub fn definition(&self) -> Option<&ModuleDefRc> {
        self.definition.as_ref()
    }

    /// Candidate types for a `Namespace.Name` key, nested types are keyed by name only
    #[must_use]
    pub fn candidates(&self, key: &str) -> &[RuntimeTypeDefRc] {
        self.by_key.get(key).map_or(&[], Vec::as_slice)
    }

    /// Finds the type a reference names, comparing the enclosing chain
    #[must_use]
    pub fn find_type(&self, type_ref: &TypeRef) -> Option<RuntimeTypeDefRc> {
        self.candidates(&type_ref.short_key())
            .iter()
            .find(|candidate| type_matches(candidate, type_ref))
            .cloned()
    }

    /// Finds a top-level type by namespace and name
    #[must_use]
    pub fn type_named(&self, namespace: &str, name: &str) -> Option<RuntimeTypeDefRc> {
        self.candidates(&short_key(namespace, name))
            .iter()
            .find(|candidate| candidate.enclosing.get().is_none())
            .cloned()
    }

    /// Finds a type by its `TypeDef` token
    #[must_use]
    pub fn type_by_token(&self, token: Token) -> Option<RuntimeTypeDefRc> {
        self.types.iter().find(|ty| ty.token == token).cloned()
    }

    /// Finds a method by its `MethodDef` token
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<RuntimeMethodDefRc> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter().map(|(_, method)| method))
            .find(|method| method.token == token)
            .cloned()
    }

    /// The type owning the global members
    #[must_use]
    pub fn global_type(&self) -> Option<RuntimeTypeDefRc> {
        self.type_named("", crate::metadata::module::GLOBAL_TYPE_NAME)
    }

    /// The entry point method
    #[must_use]
    pub fn entry_point(&self) -> Option<RuntimeMethodDefRc> {
        self.entry_point.and_then(|token| self.method_by_token(token))
    }

    /// The first method the component defines, in table order
    #[must_use]
    pub fn first_method(&self) -> Option<RuntimeMethodDefRc> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter().map(|(_, method)| method))
            .min_by_key(|method| method.token)
            .cloned()
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Component({}, {}, {} types)",
            self.id,
            self.identity.full_name(),
            self.types.len()
        )
    }
}

fn index_types(types: &[RuntimeTypeDefRc]) -> FxHashMap<String, Vec<RuntimeTypeDefRc>> {
    let mut by_key: FxHashMap<String, Vec<RuntimeTypeDefRc>> = FxHashMap::default();
    for ty in types {
        by_key
            .entry(short_key(&ty.namespace, &ty.name))
            .or_default()
            .push(ty.clone());
    }
    by_key
}

/// True if `ty` is the type `type_ref` names: same name, namespace, enclosing chain and
/// declaring component
#[must_use]
pub fn type_matches(ty: &RuntimeTypeDef, type_ref: &TypeRef) -> bool {
    if ty.name != type_ref.name || ty.namespace != type_ref.namespace {
        return false;
    }
    if !ty.assembly.same_name(&type_ref.scope) {
        return false;
    }
    match (ty.enclosing_type(), &type_ref.enclosing) {
        (None, None) => true,
        (Some(outer), Some(outer_ref)) => type_matches(&outer, outer_ref),
        _ => false,
    }
}

/// Assembles a component implemented by the host
pub struct ComponentBuilder {
    id: ComponentId,
    identity: AssemblyIdentity,
    types: Vec<RuntimeTypeDefRc>,
    next_method: u32,
    next_field: u32,
}

impl ComponentBuilder {
    /// Starts a component
    #[must_use]
    pub fn new(id: ComponentId, identity: AssemblyIdentity) -> Self {
        ComponentBuilder {
            id,
            identity,
            types: Vec::new(),
            next_method: 1,
            next_field: 1,
        }
    }

    /// Identity of the component being built
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// Adds a top-level type
    ///
    /// # Arguments
    /// * `namespace` - Namespace of the type
    /// * `name` - Name of the type
    /// * `base` - Base type, `None` only for `System.Object` and interfaces
    /// * `value_type` - True for value types
    pub fn add_type(&mut self, namespace: &str, name: &str, base: Option<TypeSignature>, value_type: bool) -> RuntimeTypeDefRc {
        let ty = Arc::new(RuntimeTypeDef {
            component: self.id,
            assembly: self.identity.clone(),
            token: Token::from_parts(table::TYPE_DEF, self.types.len() as u32 + 1),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeAttributes::PUBLIC,
            generic_param_count: 0,
            base,
            value_type,
            enclosing: OnceLock::new(),
            methods: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
        });
        self.types.push(ty.clone());
        ty
    }

    /// Adds a method implemented by `native`
    pub fn add_method(&mut self, ty: &RuntimeTypeDefRc, name: &str, signature: SignatureMethod, native: NativeFn) -> RuntimeMethodDefRc {
        let mut flags = MethodAttributes::PUBLIC;
        if !signature.has_this {
            flags |= MethodAttributes::STATIC;
        }
        if name == ".ctor" || name == ".cctor" {
            flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        }

        let method = Arc::new(RuntimeMethodDef {
            token: Token::from_parts(table::METHOD_DEF, self.next_method),
            name: name.to_string(),
            flags,
            signature,
            implementation: MethodImpl::Native(native),
            declaring: RuntimeTypeRef::new(ty),
        });
        self.next_method += 1;
        ty.methods.push(method.clone());
        method
    }

    /// Adds a field
    pub fn add_field(&mut self, ty: &RuntimeTypeDefRc, name: &str, signature: TypeSignature, is_static: bool) -> RuntimeFieldDefRc {
        let mut flags = FieldAttributes::PUBLIC;
        if is_static {
            flags |= FieldAttributes::STATIC;
        }

        let field = Arc::new(RuntimeFieldDef {
            component: self.id,
            token: Token::from_parts(table::FIELD, self.next_field),
            name: name.to_string(),
            flags,
            signature,
            declaring: RuntimeTypeRef::new(ty),
        });
        self.next_field += 1;
        ty.fields.push(field.clone());
        field
    }

    /// Finishes the component
    #[must_use]
    pub fn build(self) -> Component {
        Component {
            id: self.id,
            identity: self.identity,
            by_key: index_types(&self.types),
            types: self.types,
            definition: None,
            entry_point: None,
        }
    }
}

/// Builds a component from a parsed module outside a host, for inspection
impl From<ModuleDef> for Component {
    fn from(module: ModuleDef) -> Self {
        Component::from_module(0, Arc::new(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{target, type_ref, ModuleBuilder};

    #[test]
    fn test_nested_type_lookup() {
        let module = ModuleBuilder::new(target())
            .class("App", "Outer")
            .nested("Outer", "Inner")
            .class("Other", "Inner")
            .build();
        let component = Component::from(module);

        let outer = type_ref("Target", "App", "Outer");
        let inner_ref = TypeRef::nested(outer, "Inner");
        let inner = component.find_type(&inner_ref).unwrap();
        assert_eq!(inner.full_name(), "App.Outer/Inner");

        let other = component.find_type(&type_ref("Target", "Other", "Inner")).unwrap();
        assert_eq!(other.full_name(), "Other.Inner");

        // Same name, wrong component
        assert!(component.find_type(&type_ref("mscorlib", "Other", "Inner")).is_none());
    }

    #[test]
    fn test_members_point_back_at_their_type() {
        let module = ModuleBuilder::new(target())
            .class("App", "Program")
            .static_method("App.Program", "Main", TypeSignature::Void, vec![])
            .entry_point("App.Program", "Main")
            .build();
        let component = Component::from(module);

        let entry = component.entry_point().unwrap();
        assert_eq!(entry.name, "Main");
        assert_eq!(entry.declaring_type().unwrap().name, "Program");
        assert_eq!(component.first_method().unwrap().token, entry.token);
        assert!(component.definition().is_some());
    }

    #[test]
    fn test_builder_assigns_tokens() {
        let mut builder = ComponentBuilder::new(3, target());
        let ty = builder.add_type("System", "Thing", Some(TypeSignature::Object), false);
        let field = builder.add_field(&ty, "_value", TypeSignature::I4, false);
        fn native(
            _: &crate::runtime::NativeContext<'_>,
            _: &crate::runtime::RuntimeMethod,
            _: Vec<crate::runtime::Value>,
        ) -> crate::Result<crate::runtime::Value> {
            Ok(crate::runtime::Value::Void)
        }
        let method = builder.add_method(
            &ty,
            ".ctor",
            SignatureMethod::new_instance(TypeSignature::Void, vec![]),
            native,
        );
        let component = builder.build();

        assert_eq!(field.token, Token::new(0x0400_0001));
        assert_eq!(field.slot().component, 3);
        assert_eq!(method.token, Token::new(0x0600_0001));
        assert!(method.flags.contains(MethodAttributes::RT_SPECIAL_NAME));
        assert!(component.definition().is_none());
        assert!(component.type_named("System", "Thing").is_some());
    }
}
