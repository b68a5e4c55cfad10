//! The uniform wrapper of a pending method.
//!
//! Every sandboxed method is invoked the same way, `(object[] args, orchestrator) -> object`.
//! The wrapper fetches the translated body from the orchestrator, unpacks the argument array
//! into the body's parameter types and hands the result back as an object, `null` for
//! methods returning nothing.

use crate::{
    resolver::Resolver,
    runtime::{
        emit::{DynamicMethod, EmitOperand, MethodBuilder, OpCode},
        RuntimeType,
    },
    sandbox::{callbacks, pending::PendingMethod},
    translator, Result,
};

/// Emits the uniform wrapper of `pending`
///
/// # Errors
/// Returns [`crate::Error::Unresolved`] for parameter or return types that can not be
/// resolved.
pub fn emit_wrapper(resolver: &Resolver, pending: &PendingMethod) -> Result<DynamicMethod> {
    let method = pending.method();
    let params = translator::parameter_types(resolver, method)?;
    let return_type = translator::return_type(resolver, method)?;
    let object = resolver.host().corlib_type("System", "Object")?;
    let index = index_operand(pending.index())?;

    let mut builder = MethodBuilder::new(
        pending.wrapper_name().clone(),
        vec![RuntimeType::SzArray(Box::new(object.clone())), object.clone()],
        Some(object),
    );

    builder.emit_simple(OpCode::Ldarg1);
    builder.emit(OpCode::LdcI4, index.clone());
    builder.emit(
        OpCode::Call,
        EmitOperand::Callback {
            name: callbacks::RT_GET_BODY,
            arity: 2,
        },
    );

    for (slot, param) in params.iter().enumerate() {
        builder.emit_simple(OpCode::Ldarg0);
        builder.emit(OpCode::LdcI4, index_operand(slot)?);
        builder.emit_simple(OpCode::LdelemRef);
        match param {
            RuntimeType::ByRef(_) => {}
            ty if ty.is_value_type() => builder.emit(OpCode::UnboxAny, EmitOperand::Type(ty.clone())),
            ty if ty.contains_generic_parameters() || ty.is("System", "Object") => {}
            ty => builder.emit(OpCode::Castclass, EmitOperand::Type(ty.clone())),
        }
    }
    builder.emit_simple(OpCode::Ldarg1);
    builder.emit(
        OpCode::Call,
        EmitOperand::Invoke {
            index: pending.index(),
            arity: params.len() + 1,
        },
    );

    match return_type {
        None => builder.emit_simple(OpCode::Ldnull),
        Some(ty) if ty.is_value_type() => builder.emit(OpCode::Box, EmitOperand::Type(ty)),
        Some(_) => {}
    }
    builder.emit_simple(OpCode::Ret);

    log::debug!("Emitted wrapper {} for {}", pending.wrapper_name(), method);
    builder.finish()
}

fn index_operand(index: usize) -> Result<EmitOperand> {
    i32::try_from(index)
        .map(EmitOperand::I4)
        .map_err(|_| malformed_error!("Index {} does not fit an int32", index))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::HostConfig,
        metadata::{method::MethodBody, signatures::TypeSignature, token::Token},
        runtime::Host,
        test::{target, ModuleBuilder},
    };

    #[test]
    fn test_wrapper_shape() {
        let module = ModuleBuilder::new(target())
            .class("App", "Decrypter")
            .static_body(
                "App.Decrypter",
                "Decrypt",
                TypeSignature::I4,
                vec![TypeSignature::String, TypeSignature::I4],
                MethodBody::default(),
            )
            .build();
        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        let record = resolver.track(Arc::new(module)).unwrap();
        let method = resolver
            .method_by_token(record.component().id(), Token::new(0x0600_0001))
            .unwrap();
        let pending = PendingMethod::new(method, 4, "w_4".into(), "b_4".into());

        let wrapper = emit_wrapper(&resolver, &pending).unwrap();
        let opcodes: Vec<OpCode> = wrapper.code().iter().map(|instruction| instruction.opcode).collect();
        assert_eq!(
            opcodes,
            [
                OpCode::Ldarg1,
                OpCode::LdcI4,
                OpCode::Call,
                OpCode::Ldarg0,
                OpCode::LdcI4,
                OpCode::LdelemRef,
                OpCode::Castclass,
                OpCode::Ldarg0,
                OpCode::LdcI4,
                OpCode::LdelemRef,
                OpCode::UnboxAny,
                OpCode::Ldarg1,
                OpCode::Call,
                OpCode::Box,
                OpCode::Ret,
            ]
        );
        assert!(matches!(
            wrapper.code()[12].operand,
            EmitOperand::Invoke { index: 4, arity: 3 }
        ));
        assert_eq!(wrapper.name().as_ref(), "w_4");
        assert_eq!(wrapper.params().len(), 2);
    }
}
