//! Per-translation state.

use std::sync::Arc;

use crate::{
    metadata::method::{ExceptionRegion, Instruction, MethodBody},
    resolver::Resolver,
    runtime::{
        emit::{Label, MethodBuilder},
        GenericContext, RuntimeMethod, RuntimeType,
    },
    Result,
};

/// The stack argument types of `method`, `this` first for instance methods.
///
/// `this` of a value type is passed by reference.
///
/// # Errors
/// Returns [`crate::Error::Unresolved`] for parameter types that can not be resolved.
pub fn parameter_types(resolver: &Resolver, method: &RuntimeMethod) -> Result<Vec<RuntimeType>> {
    let generic = method.generic_context();
    let mut params = Vec::with_capacity(method.stack_arguments() + 1);
    if method.has_this() {
        let declaring = method.declaring_type().clone();
        if declaring.is_value_type() {
            params.push(RuntimeType::ByRef(Box::new(declaring)));
        } else {
            params.push(declaring);
        }
    }
    for param in &method.signature().params {
        params.push(resolver.resolve_type(param, &generic)?);
    }
    Ok(params)
}

/// The return type of `method`, `None` for `void`
///
/// # Errors
/// Returns [`crate::Error::Unresolved`] if the return type can not be resolved.
pub fn return_type(resolver: &Resolver, method: &RuntimeMethod) -> Result<Option<RuntimeType>> {
    if method.returns_void() {
        return Ok(None);
    }
    resolver
        .resolve_type(&method.signature().return_type, &method.generic_context())
        .map(Some)
}

/// Everything one translation needs, discarded once the method is produced.
///
/// The parameter list is the one of the live method, `this` first for instance methods,
/// followed by one synthetic parameter receiving the orchestrator. Besides the declared
/// locals the method gets two temporaries, an `object` and an `object[]`, used by rewritten
/// call sites.
pub struct MethodContext {
    pub(super) method: RuntimeMethod,
    pub(super) generic: GenericContext,
    pub(super) instructions: Vec<Instruction>,
    pub(super) regions: Vec<ExceptionRegion>,
    pub(super) builder: MethodBuilder,
    pub(super) labels: Vec<Label>,
    pub(super) orchestrator_arg: usize,
    pub(super) temp_object: usize,
    pub(super) temp_array: usize,
    /// Indices into `regions` of the regions open at the current position
    pub(super) open_regions: Vec<usize>,
}

impl MethodContext {
    /// Prepares the translation of `body` on behalf of `method`
    ///
    /// # Arguments
    /// * `resolver` - Resolves parameter, return and local types
    /// * `method` - The live method the body belongs to
    /// * `name` - Name the produced method reports in stack frames
    /// * `body` - The instructions to translate, possibly rewritten
    ///
    /// # Errors
    /// Returns [`crate::Error::Unresolved`] if a parameter, return or local type can not
    /// be resolved.
    pub fn new(resolver: &Resolver, method: &RuntimeMethod, name: impl Into<Arc<str>>, body: &MethodBody) -> Result<Self> {
        let generic = method.generic_context();

        let mut params = parameter_types(resolver, method)?;
        let orchestrator_arg = params.len();
        let object = resolver.host().corlib_type("System", "Object")?;
        params.push(object.clone());
        let return_type = return_type(resolver, method)?;

        let mut builder = MethodBuilder::new(name, params, return_type);
        for local in &body.locals {
            builder.declare_local(resolver.resolve_type(&local.base, &generic)?);
        }
        let temp_object = builder.declare_local(object.clone());
        let temp_array = builder.declare_local(RuntimeType::SzArray(Box::new(object)));
        let labels = body.instructions.iter().map(|_| builder.define_label()).collect();

        Ok(MethodContext {
            method: method.clone(),
            generic,
            instructions: body.instructions.clone(),
            regions: body.regions.clone(),
            builder,
            labels,
            orchestrator_arg,
            temp_object,
            temp_array,
            open_regions: Vec::new(),
        })
    }

    /// Makes the produced method report `method` itself in stack frames
    #[must_use]
    pub fn with_origin(mut self) -> Self {
        self.builder = self.builder.with_origin(self.method.clone());
        self
    }

    /// The method being translated
    #[must_use]
    pub fn method(&self) -> &RuntimeMethod {
        &self.method
    }

    /// Index of the synthetic orchestrator parameter
    #[must_use]
    pub fn orchestrator_arg(&self) -> usize {
        self.orchestrator_arg
    }

    /// Indices of the `object` and `object[]` temporaries
    #[must_use]
    pub fn temp_locals(&self) -> (usize, usize) {
        (self.temp_object, self.temp_array)
    }

    /// Number of source instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True for a body without instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl std::fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodContext")
            .field("method", &self.method)
            .field("instructions", &self.instructions.len())
            .field("regions", &self.regions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HostConfig,
        metadata::{
            method::MethodBody,
            opcodes::RET,
            signatures::{SignatureLocal, TypeSignature},
            token::Token,
        },
        runtime::Host,
        test::{target, ModuleBuilder},
    };

    #[test]
    fn test_parameters_and_locals() {
        let body = MethodBody::new(vec![Instruction::simple(RET)])
            .with_locals(vec![SignatureLocal::new(TypeSignature::I4)]);
        let module = ModuleBuilder::new(target())
            .value_type("App", "Point")
            .instance_body("App.Point", "Scale", TypeSignature::I8, vec![TypeSignature::String], body.clone())
            .build();
        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        let record = resolver.track(Arc::new(module)).unwrap();
        let method = resolver
            .method_by_token(record.component().id(), Token::new(0x0600_0001))
            .unwrap();

        let context = MethodContext::new(&resolver, &method, "body_0", &body).unwrap();
        assert_eq!(context.orchestrator_arg(), 2);
        assert_eq!(context.temp_locals(), (1, 2));
        assert_eq!(context.len(), 1);

        let produced = context.builder.finish().unwrap();
        let params: Vec<String> = produced.params().iter().map(ToString::to_string).collect();
        assert_eq!(params, ["App.Point&", "System.String", "System.Object"]);
        assert_eq!(produced.return_type().unwrap().to_string(), "System.Int64");
        assert_eq!(produced.locals()[2].to_string(), "System.Object[]");
        assert!(produced.origin().is_none());
    }
}
