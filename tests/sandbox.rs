//! End-to-end sandbox tests over two tracked components.
//!
//! `Target` holds the methods under analysis, `Helper` a library `Target` calls into. Both
//! are built as parsed modules the way a binary reader hands them over and run through the
//! public API only.

use std::sync::Arc;

use dotsandbox::{
    metadata::{
        method::ExceptionHandlerFlags,
        opcodes::*,
        signatures::SignatureLocal,
    },
    prelude::*,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn corlib() -> AssemblyIdentity {
    AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
}

fn class(scope: AssemblyIdentity, namespace: &str, name: &str) -> TypeSignature {
    TypeSignature::Class(Arc::new(TypeRef::new(scope, namespace, name)))
}

fn member(method: MethodRef) -> Operand {
    Operand::Member(MemberRef::Method(Arc::new(method)))
}

fn method(token: u32, name: &str, signature: SignatureMethod, body: MethodBody) -> Arc<MethodDef> {
    Arc::new(MethodDef::new(Token::new(0x0600_0000 | token), name, signature, Some(body)))
}

fn helper() -> ModuleDef {
    let substring = MethodRef::new(
        TypeSignature::String,
        "Substring",
        SignatureMethod::new_instance(TypeSignature::String, vec![TypeSignature::I4]),
    );

    let mut text = TypeDef::new(Token::new(0x0200_0001), "Lib", "Text");
    text.methods.push(method(
        1,
        "Tail",
        SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String, TypeSignature::I4]),
        MethodBody::new(vec![
            Instruction::simple(LDARG_0),
            Instruction::simple(LDARG_1),
            Instruction::new(CALLVIRT, member(substring)),
            Instruction::simple(RET),
        ]),
    ));

    let mut module = ModuleDef::new(AssemblyIdentity::new("Helper", AssemblyVersion::new(1, 0, 0, 0)));
    module.types.push(Arc::new(text));
    module
}

/// `App.Strings` with
/// - 1 `string Decrypt(int32)` returning `Lib.Text.Tail("xxhidden", n)`
/// - 2 `int32 Safe(int32)` dividing 10 by its argument, -1 on division by zero
/// - 3 `object Who()` returning the method of the second frame of a fresh stack trace
/// - 4 `int32 Spin()` looping forever
fn target() -> ModuleDef {
    let helper = AssemblyIdentity::new("Helper", AssemblyVersion::new(1, 0, 0, 0));
    let tail = MethodRef::new(
        class(helper, "Lib", "Text"),
        "Tail",
        SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String, TypeSignature::I4]),
    );
    let trace_ctor = MethodRef::new(
        class(corlib(), "System.Diagnostics", "StackTrace"),
        ".ctor",
        SignatureMethod::new_instance(TypeSignature::Void, vec![]),
    );
    let get_frame = MethodRef::new(
        class(corlib(), "System.Diagnostics", "StackTrace"),
        "GetFrame",
        SignatureMethod::new_instance(class(corlib(), "System.Diagnostics", "StackFrame"), vec![TypeSignature::I4]),
    );
    let get_method = MethodRef::new(
        class(corlib(), "System.Diagnostics", "StackFrame"),
        "GetMethod",
        SignatureMethod::new_instance(class(corlib(), "System.Reflection", "MethodBase"), vec![]),
    );

    let mut strings = TypeDef::new(Token::new(0x0200_0001), "App", "Strings");
    strings.methods.push(method(
        1,
        "Decrypt",
        SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::I4]),
        MethodBody::new(vec![
            Instruction::new(LDSTR, Operand::String("xxhidden".into())),
            Instruction::simple(LDARG_0),
            Instruction::new(CALL, member(tail)),
            Instruction::simple(RET),
        ]),
    ));

    let catch = ExceptionRegion {
        flags: ExceptionHandlerFlags::EXCEPTION,
        try_start: 0,
        try_end: 5,
        handler_start: 5,
        handler_end: 9,
        filter_start: None,
        catch_type: Some(class(corlib(), "System", "DivideByZeroException")),
    };
    strings.methods.push(method(
        2,
        "Safe",
        SignatureMethod::new_static(TypeSignature::I4, vec![TypeSignature::I4]),
        MethodBody::new(vec![
            Instruction::new(LDC_I4_S, Operand::Int8(10)),
            Instruction::simple(LDARG_0),
            Instruction::simple(DIV),
            Instruction::simple(STLOC_0),
            Instruction::new(LEAVE_S, Operand::Target(9)),
            Instruction::simple(POP),
            Instruction::simple(LDC_I4_M1),
            Instruction::simple(STLOC_0),
            Instruction::new(LEAVE_S, Operand::Target(9)),
            Instruction::simple(LDLOC_0),
            Instruction::simple(RET),
        ])
        .with_locals(vec![SignatureLocal::new(TypeSignature::I4)])
        .with_regions(vec![catch]),
    ));

    strings.methods.push(method(
        3,
        "Who",
        SignatureMethod::new_static(TypeSignature::Object, vec![]),
        MethodBody::new(vec![
            Instruction::new(NEWOBJ, member(trace_ctor)),
            Instruction::simple(LDC_I4_1),
            Instruction::new(CALLVIRT, member(get_frame)),
            Instruction::new(CALLVIRT, member(get_method)),
            Instruction::simple(RET),
        ]),
    ));

    strings.methods.push(method(
        4,
        "Spin",
        SignatureMethod::new_static(TypeSignature::I4, vec![]),
        MethodBody::new(vec![Instruction::new(BR_S, Operand::Target(0))]),
    ));

    let mut module = ModuleDef::new(AssemblyIdentity::new("Target", AssemblyVersion::new(1, 0, 0, 0)));
    module.types.push(Arc::new(strings));
    module
}

fn resolver() -> (Arc<Resolver>, ComponentId) {
    let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
    resolver.track(Arc::new(helper())).unwrap();
    let component = resolver.track(Arc::new(target())).unwrap().component().id();
    (Arc::new(resolver), component)
}

fn lookup(resolver: &Resolver, component: ComponentId, row: u32) -> RuntimeMethod {
    resolver
        .method_by_token(component, Token::new(0x0600_0000 | row))
        .unwrap()
}

#[test]
fn call_into_other_component() {
    init_logging();
    let (resolver, component) = resolver();
    let decrypt = lookup(&resolver, component, 1);
    let sandbox = Sandbox::new(resolver, SandboxConfig::default());

    let index = sandbox.create_method(&decrypt).unwrap();
    assert_eq!(sandbox.invoke_uniform(index, vec![Value::I32(2)]).unwrap().as_str(), Some("hidden"));
    assert_eq!(sandbox.invoke_uniform(index, vec![Value::I32(6)]).unwrap().as_str(), Some("en"));

    let stats = sandbox.stats();
    assert_eq!(stats.registered, 2);
    assert_eq!(stats.call_sites_rewritten, 1);
    assert_eq!(stats.bodies_translated, 2);
    assert_eq!(stats.wrappers_emitted, 2);
}

#[test]
fn value_type_results_are_boxed() {
    init_logging();
    let (resolver, component) = resolver();
    let safe = lookup(&resolver, component, 2);
    let sandbox = Sandbox::new(resolver, SandboxConfig::default());
    let index = sandbox.create_method(&safe).unwrap();

    let unboxed = |value: Value| match value {
        Value::Boxed(boxed) => boxed.value.clone(),
        other => panic!("expected a boxed value, got {other:?}"),
    };
    assert_eq!(unboxed(sandbox.invoke_uniform(index, vec![Value::I32(5)]).unwrap()), Value::I32(2));
    assert_eq!(unboxed(sandbox.invoke_uniform(index, vec![Value::I32(0)]).unwrap()), Value::I32(-1));
}

#[test]
fn wrapper_frames_report_the_original() {
    init_logging();
    let (resolver, component) = resolver();
    let who = lookup(&resolver, component, 3);
    let sandbox = Sandbox::new(resolver, SandboxConfig::default());

    let index = sandbox.create_method(&who).unwrap();
    assert_eq!(sandbox.invoke_uniform(index, vec![]).unwrap(), Value::Method(who));
}

#[test]
fn instruction_budget_stops_runaway_code() {
    init_logging();
    let (resolver, component) = resolver();
    let spin = lookup(&resolver, component, 4);
    let sandbox = Sandbox::new(resolver, SandboxConfig::with_limits(ExecutionLimits::strict()));

    let index = sandbox.create_method(&spin).unwrap();
    assert!(matches!(
        sandbox.invoke_uniform(index, vec![]),
        Err(Error::Emulation(EmulationError::InstructionLimitExceeded { .. }))
    ));
}

#[test]
fn decrypter_service() {
    init_logging();
    let (resolver, component) = resolver();
    let service = DecrypterService::new(resolver, SandboxConfig::default());

    let handle = service.define_decrypter(component, Token::new(0x0600_0001)).unwrap();
    let strings = service
        .decrypt(handle, vec![vec![Value::I32(2)], vec![Value::I32(4)]], None)
        .unwrap();
    let strings: Vec<_> = strings.iter().map(|value| value.as_str()).collect();
    assert_eq!(strings, [Some("hidden"), Some("dden")]);

    assert!(service.define_decrypter(component, Token::new(0x0600_0002)).is_err());
    assert_eq!(
        service.invoke(component, Token::new(0x0600_0002), vec![Value::I32(0)]).ok().map(|value| match value {
            Value::Boxed(boxed) => boxed.value.clone(),
            other => other,
        }),
        Some(Value::I32(-1))
    );
}
