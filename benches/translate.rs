//! Benchmarks for translation and sandboxed execution.
//!
//! - Translation of a straight-line body
//! - Translation of a body with a try/catch region
//! - A full sandbox session: rewrite, translate, wrap and invoke

extern crate dotsandbox;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use dotsandbox::{
    metadata::{method::ExceptionHandlerFlags, opcodes::*, signatures::SignatureLocal},
    prelude::*,
};

fn resolver_with(body: MethodBody, return_type: TypeSignature) -> (Arc<Resolver>, RuntimeMethod) {
    let mut program = TypeDef::new(Token::new(0x0200_0001), "App", "Program");
    program.methods.push(Arc::new(MethodDef::new(
        Token::new(0x0600_0001),
        "Run",
        SignatureMethod::new_static(return_type, vec![TypeSignature::I4]),
        Some(body),
    )));
    let mut module = ModuleDef::new(AssemblyIdentity::new("Bench", AssemblyVersion::new(1, 0, 0, 0)));
    module.types.push(Arc::new(program));

    let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
    let component = resolver.track(Arc::new(module)).unwrap().component().id();
    let method = resolver.method_by_token(component, Token::new(0x0600_0001)).unwrap();
    (Arc::new(resolver), method)
}

/// `x * 3 + 7` repeated with the result fed back, 50 times
fn straight_line() -> MethodBody {
    let mut instructions = vec![Instruction::simple(LDARG_0)];
    for _ in 0..50 {
        instructions.push(Instruction::new(LDC_I4_S, Operand::Int8(3)));
        instructions.push(Instruction::simple(MUL));
        instructions.push(Instruction::new(LDC_I4_S, Operand::Int8(7)));
        instructions.push(Instruction::simple(ADD));
    }
    instructions.push(Instruction::simple(RET));
    MethodBody::new(instructions)
}

/// `try { 100 / x } catch { -1 }`
fn guarded() -> MethodBody {
    let catch = ExceptionRegion {
        flags: ExceptionHandlerFlags::EXCEPTION,
        try_start: 0,
        try_end: 5,
        handler_start: 5,
        handler_end: 9,
        filter_start: None,
        catch_type: Some(TypeSignature::Object),
    };
    MethodBody::new(vec![
        Instruction::new(LDC_I4_S, Operand::Int8(100)),
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
    .with_regions(vec![catch])
}

fn bench_translate_straight_line(c: &mut Criterion) {
    let body = straight_line();
    let (resolver, method) = resolver_with(body.clone(), TypeSignature::I4);

    c.bench_function("translate_straight_line", |b| {
        b.iter(|| {
            let context = MethodContext::new(&resolver, &method, "bench", black_box(&body)).unwrap();
            black_box(Translator::new(&resolver, &()).translate(context).unwrap())
        });
    });
}

fn bench_translate_guarded(c: &mut Criterion) {
    let body = guarded();
    let (resolver, method) = resolver_with(body.clone(), TypeSignature::I4);

    c.bench_function("translate_guarded", |b| {
        b.iter(|| {
            let context = MethodContext::new(&resolver, &method, "bench", black_box(&body)).unwrap();
            black_box(Translator::new(&resolver, &()).translate(context).unwrap())
        });
    });
}

fn bench_sandbox_session(c: &mut Criterion) {
    let (resolver, method) = resolver_with(straight_line(), TypeSignature::I4);

    c.bench_function("sandbox_session", |b| {
        b.iter(|| {
            let sandbox = Sandbox::new(resolver.clone(), SandboxConfig::default());
            let index = sandbox.create_method(&method).unwrap();
            black_box(sandbox.invoke_uniform(index, vec![Value::I32(1)]).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_translate_straight_line,
    bench_translate_guarded,
    bench_sandbox_session,
);
criterion_main!(benches);
