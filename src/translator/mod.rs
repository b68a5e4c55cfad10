//! Translation of method bodies into runnable emitted methods.
//!
//! The translator takes one method's flat instruction list together with its exception
//! regions and replays it through a [`MethodBuilder`] in a single linear pass. Every
//! structural operand goes through the [`Resolver`], every operand the sandbox inserted
//! ([`PseudoOperand`]) is threaded through the [`Orchestrator`] that owns the translation.
//!
//! # Architecture
//!
//! - [`opcodes`] - The lazily built table from source opcodes to emitted opcodes
//! - [`context`] - Parameters, locals, labels and the open region stack of one translation
//! - [`Translator`] - The pass itself
//!
//! Exception regions are reconstructed from instruction indices: before the instruction at
//! each index, and once more past the last instruction, handlers ending there are closed,
//! protected blocks starting there are opened and handlers starting there are begun. Regions
//! sharing one protected range become handlers of a single construct.
//!
//! Opcodes the runtime has no equivalent for are emitted as `nop` with a warning, so a body
//! using them still translates as long as the unsupported instruction is never needed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsandbox::prelude::*;
//!
//! # fn example(module: Arc<ModuleDef>) -> dotsandbox::Result<()> {
//! let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
//! let record = resolver.track(module)?;
//! let method = resolver.method_by_token(record.component().id(), Token::new(0x0600_0001))?;
//! let def = resolver.method_body(&method)?;
//!
//! if let Some(body) = &def.body {
//!     let context = MethodContext::new(&resolver, &method, "translated", body)?;
//!     let emitted = Translator::new(&resolver, &()).translate(context)?;
//!     println!("{} instructions", emitted.code().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod opcodes;

pub use context::{parameter_types, return_type, MethodContext};

use crate::{
    metadata::{
        method::{Instruction, Operand, PseudoOperand},
        opcodes::{self as source, OperandType},
    },
    resolver::{ResolvedMember, Resolver},
    runtime::{
        emit::{DynamicMethod, EmitOperand, Label, OpCode},
        RuntimeMethod,
    },
    Error, Result,
};

/// The owner of translated code, answering for the operands the sandbox inserts
pub trait Orchestrator {
    /// Number of stack values the named callback takes, `None` if there is no such callback
    fn callback_arity(&self, name: &str) -> Option<usize>;

    /// Pending index of the sandboxed method, `None` if it was never registered
    fn pending_index(&self, method: &RuntimeMethod) -> Option<usize>;
}

/// Translation without a sandbox, only plain bodies translate
impl Orchestrator for () {
    fn callback_arity(&self, _name: &str) -> Option<usize> {
        None
    }

    fn pending_index(&self, _method: &RuntimeMethod) -> Option<usize> {
        None
    }
}

/// Runs the translation pass
pub struct Translator<'a> {
    resolver: &'a Resolver,
    orchestrator: &'a dyn Orchestrator,
}

impl<'a> Translator<'a> {
    /// Creates a translator resolving through `resolver`
    #[must_use]
    pub fn new(resolver: &'a Resolver, orchestrator: &'a dyn Orchestrator) -> Self {
        Translator {
            resolver,
            orchestrator,
        }
    }

    /// Translates the body held by `context`
    ///
    /// # Errors
    /// - [`Error::Translation`] for operands that do not fit their opcode and for inline
    ///   signatures
    /// - [`Error::Unresolved`] for member operands naming nothing reachable
    /// - An emulation error for regions that do not nest
    pub fn translate(&self, mut context: MethodContext) -> Result<DynamicMethod> {
        log::debug!(
            "Translating {} ({} instructions, {} regions)",
            context.method,
            context.instructions.len(),
            context.regions.len()
        );

        let instructions = std::mem::take(&mut context.instructions);
        for (index, instruction) in instructions.iter().enumerate() {
            Self::update_regions(&mut context, index, self.resolver)?;
            let label = context.labels[index];
            context.builder.mark_label(label)?;
            self.emit(&mut context, instruction)?;
        }
        Self::update_regions(&mut context, instructions.len(), self.resolver)?;

        context.builder.finish()
    }

    /// Region bookkeeping before the instruction at `index`
    fn update_regions(context: &mut MethodContext, index: usize, resolver: &Resolver) -> Result<()> {
        Self::update_handlers(context, index, resolver)?;
        if Self::open_protected_blocks(context, index) {
            Self::update_handlers(context, index, resolver)?;
        }
        Ok(())
    }

    fn update_handlers(context: &mut MethodContext, index: usize, resolver: &Resolver) -> Result<()> {
        while let Some(&top) = context.open_regions.last() {
            let region = &context.regions[top];
            if region.filter_start == Some(index) {
                context.builder.begin_filter_block()?;
            }
            if region.handler_start == index {
                if region.is_finally() {
                    context.builder.begin_finally_block()?;
                } else if region.is_fault() {
                    context.builder.begin_fault_block()?;
                } else if region.is_filter() {
                    context.builder.begin_catch_block(None)?;
                } else {
                    let catch_type = match &region.catch_type {
                        Some(signature) => Some(resolver.resolve_type(signature, &context.generic)?),
                        None => None,
                    };
                    context.builder.begin_catch_block(catch_type)?;
                }
            }
            if region.handler_end != index {
                break;
            }

            context.open_regions.pop();
            let shares_try = context
                .open_regions
                .last()
                .is_some_and(|&next| context.regions[next].same_try(&context.regions[top]));
            if !shares_try {
                context.builder.end_exception_block()?;
            }
        }
        Ok(())
    }

    /// Pushes the regions whose protected block starts at `index`, last declared first
    fn open_protected_blocks(context: &mut MethodContext, index: usize) -> bool {
        let starting: Vec<usize> = (0..context.regions.len())
            .rev()
            .filter(|&region| context.regions[region].try_start == index)
            .collect();

        for &region in &starting {
            let shares_try = context
                .open_regions
                .last()
                .is_some_and(|&top| context.regions[top].same_try(&context.regions[region]));
            if !shares_try {
                context.builder.begin_exception_block();
            }
            context.open_regions.push(region);
        }
        !starting.is_empty()
    }

    fn emit(&self, context: &mut MethodContext, instruction: &Instruction) -> Result<()> {
        let Some(opcode) = opcodes::convert(instruction.opcode) else {
            if matches!(instruction.operand, Operand::Signature(_)) {
                return Err(Self::mismatch(instruction));
            }
            log::warn!(
                "{}: {} has no runtime equivalent, emitting nop",
                context.method,
                instruction.mnemonic()
            );
            context.builder.emit_simple(OpCode::Nop);
            return Ok(());
        };

        let operand = match &instruction.operand {
            Operand::Pseudo(pseudo) => self.pseudo_operand(context, instruction, pseudo)?,
            _ => self.operand(context, instruction)?,
        };
        context.builder.emit(opcode, operand);
        Ok(())
    }

    fn operand(&self, context: &MethodContext, instruction: &Instruction) -> Result<EmitOperand> {
        let operand_type = source::lookup(instruction.opcode).map_or(OperandType::InlineNone, |info| info.operand);

        Ok(match (operand_type, &instruction.operand) {
            (OperandType::InlineNone, Operand::None) => EmitOperand::None,
            (OperandType::ShortInlineI, Operand::Int8(value)) => EmitOperand::I4(i32::from(*value)),
            (OperandType::InlineI, Operand::Int32(value)) => EmitOperand::I4(*value),
            (OperandType::InlineI8, Operand::Int64(value)) => EmitOperand::I8(*value),
            (OperandType::ShortInlineR, Operand::Float32(value)) => EmitOperand::R8(f64::from(*value)),
            (OperandType::InlineR, Operand::Float64(value)) => EmitOperand::R8(*value),
            (OperandType::InlineString, Operand::String(value)) => EmitOperand::Str(value.as_str().into()),
            (OperandType::InlineBrTarget | OperandType::ShortInlineBrTarget, Operand::Target(target)) => {
                EmitOperand::Label(Self::label(context, *target)?)
            }
            (OperandType::InlineSwitch, Operand::Switch(targets)) => EmitOperand::Labels(
                targets
                    .iter()
                    .map(|target| Self::label(context, *target))
                    .collect::<Result<_>>()?,
            ),
            (OperandType::InlineVar | OperandType::ShortInlineVar, Operand::Local(index)) => {
                EmitOperand::Local(usize::from(*index))
            }
            (OperandType::InlineArg | OperandType::ShortInlineArg, Operand::Argument(index)) => {
                EmitOperand::Arg(usize::from(*index))
            }
            (
                OperandType::InlineMethod | OperandType::InlineField | OperandType::InlineType | OperandType::InlineTok,
                Operand::Member(member),
            ) => match self.resolver.resolve_member(member, &context.generic)? {
                ResolvedMember::Constructor(method) | ResolvedMember::Method(method) => EmitOperand::Method(method),
                ResolvedMember::Field(field) => EmitOperand::Field(field),
                ResolvedMember::Type(ty) => EmitOperand::Type(ty),
            },
            _ => return Err(Self::mismatch(instruction)),
        })
    }

    fn pseudo_operand(
        &self,
        context: &MethodContext,
        instruction: &Instruction,
        pseudo: &PseudoOperand,
    ) -> Result<EmitOperand> {
        let operand_type = source::lookup(instruction.opcode).map_or(OperandType::InlineNone, |info| info.operand);

        Ok(match (operand_type, pseudo) {
            (OperandType::InlineArg | OperandType::ShortInlineArg, PseudoOperand::OrchestratorArg) => {
                EmitOperand::Arg(context.orchestrator_arg)
            }
            (OperandType::InlineVar | OperandType::ShortInlineVar, PseudoOperand::TempObject) => {
                EmitOperand::Local(context.temp_object)
            }
            (OperandType::InlineVar | OperandType::ShortInlineVar, PseudoOperand::TempObjectArray) => {
                EmitOperand::Local(context.temp_array)
            }
            (OperandType::InlineMethod, PseudoOperand::OrchestratorMethod(name)) => {
                let Some(arity) = self.orchestrator.callback_arity(name) else {
                    return Err(Self::mismatch(instruction));
                };
                EmitOperand::Callback { name, arity }
            }
            (OperandType::InlineMethod, PseudoOperand::TranslatedMethod(method)) => {
                let Some(index) = self.orchestrator.pending_index(method) else {
                    return Err(Error::Unresolved {
                        reference: method.to_string(),
                        component: "pending methods".to_string(),
                    });
                };
                // The wrapper takes the argument array and the orchestrator
                EmitOperand::Invoke { index, arity: 2 }
            }
            (OperandType::InlineType | OperandType::InlineTok, PseudoOperand::ConcreteType(ty)) => {
                EmitOperand::Type(ty.clone())
            }
            _ => return Err(Self::mismatch(instruction)),
        })
    }

    fn label(context: &MethodContext, target: usize) -> Result<Label> {
        context
            .labels
            .get(target)
            .copied()
            .ok_or_else(|| malformed_error!("Branch target {} outside of {}", target, context.method))
    }

    fn mismatch(instruction: &Instruction) -> Error {
        Error::Translation {
            opcode: instruction.mnemonic().to_string(),
            operand: instruction.operand.kind_name(),
        }
    }
}

impl std::fmt::Debug for Translator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{ExecutionLimits, HostConfig},
        metadata::{
            method::{ExceptionHandlerFlags, ExceptionRegion, MethodBody},
            opcodes::*,
            references::{MemberRef, MethodRef},
            signatures::{SignatureLocal, SignatureMethod, TypeSignature},
            token::Token,
        },
        runtime::{
            interpreter::{Interpreter, PlatformOnly},
            ClauseKind, Host, Value,
        },
        test::{corlib_class, target, ModuleBuilder},
    };

    fn translate_static(return_type: TypeSignature, body: MethodBody, orchestrator: &dyn Orchestrator) -> (Resolver, Result<DynamicMethod>) {
        let module = ModuleBuilder::new(target())
            .class("App", "Program")
            .static_body("App.Program", "Run", return_type, vec![], body.clone())
            .build();
        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        let record = resolver.track(Arc::new(module)).unwrap();
        let method = resolver
            .method_by_token(record.component().id(), Token::new(0x0600_0001))
            .unwrap();

        let context = MethodContext::new(&resolver, &method, "Run_body", &body).unwrap();
        let result = Translator::new(&resolver, orchestrator).translate(context);
        (resolver, result)
    }

    fn run(resolver: &Resolver, method: &DynamicMethod, orchestrator: Value) -> Result<Value> {
        let mut interpreter = Interpreter::new(resolver.host(), &PlatformOnly, ExecutionLimits::default());
        interpreter.execute(method, vec![orchestrator])
    }

    fn region(flags: ExceptionHandlerFlags, try_range: (usize, usize), handler: (usize, usize)) -> ExceptionRegion {
        ExceptionRegion {
            flags,
            try_start: try_range.0,
            try_end: try_range.1,
            handler_start: handler.0,
            handler_end: handler.1,
            filter_start: None,
            catch_type: None,
        }
    }

    struct Fixed;

    impl Orchestrator for Fixed {
        fn callback_arity(&self, name: &str) -> Option<usize> {
            (name == "rt_get_body").then_some(2)
        }

        fn pending_index(&self, _method: &RuntimeMethod) -> Option<usize> {
            Some(3)
        }
    }

    #[test]
    fn test_arithmetic() {
        let body = MethodBody::new(vec![
            Instruction::new(LDC_I4, Operand::Int32(2)),
            Instruction::new(LDC_I4_S, Operand::Int8(3)),
            Instruction::simple(ADD),
            Instruction::simple(RET),
        ]);
        let (resolver, method) = translate_static(TypeSignature::I4, body, &());
        let method = method.unwrap();

        assert_eq!(method.code().len(), 4);
        assert_eq!(method.code()[1].opcode, OpCode::LdcI4S);
        assert_eq!(run(&resolver, &method, Value::Null).unwrap(), Value::I32(5));
    }

    #[test]
    fn test_branches_and_platform_calls() {
        let concat = MethodRef::new(
            TypeSignature::String,
            "Concat",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String, TypeSignature::String]),
        );
        let body = MethodBody::new(vec![
            Instruction::new(LDSTR, Operand::String("a".into())),
            Instruction::simple(LDC_I4_0),
            Instruction::new(BRTRUE_S, Operand::Target(4)),
            Instruction::new(BR_S, Operand::Target(5)),
            Instruction::new(LDSTR, Operand::String("x".into())),
            Instruction::new(LDSTR, Operand::String("b".into())),
            Instruction::new(CALL, Operand::Member(MemberRef::Method(Arc::new(concat)))),
            Instruction::simple(RET),
        ]);
        let (resolver, method) = translate_static(TypeSignature::String, body, &());
        let method = method.unwrap();

        let result = run(&resolver, &method, Value::Null).unwrap();
        assert_eq!(result.as_str(), Some("ab"));
    }

    #[test]
    fn test_try_catch_runs() {
        let mut handler = region(ExceptionHandlerFlags::EXCEPTION, (0, 5), (5, 9));
        handler.catch_type = Some(corlib_class("System", "Exception"));
        let body = MethodBody::new(vec![
            Instruction::simple(LDC_I4_1),
            Instruction::simple(LDC_I4_0),
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
        .with_regions(vec![handler]);
        let (resolver, method) = translate_static(TypeSignature::I4, body, &());
        let method = method.unwrap();

        let clauses = method.clauses();
        assert_eq!(clauses.len(), 1);
        assert!(matches!(&clauses[0].kind, ClauseKind::Catch(Some(ty)) if ty.is("System", "Exception")));
        assert_eq!(run(&resolver, &method, Value::Null).unwrap(), Value::I32(-1));
    }

    #[test]
    fn test_shared_try_becomes_one_construct() {
        // try { } catch { } finally { } declared as two regions over the same range,
        // wrapped in an outer fault region
        let body = MethodBody::new(vec![
            Instruction::simple(NOP),
            Instruction::new(LEAVE_S, Operand::Target(7)),
            Instruction::simple(POP),
            Instruction::new(LEAVE_S, Operand::Target(7)),
            Instruction::simple(ENDFINALLY),
            Instruction::simple(ENDFINALLY),
            Instruction::simple(NOP),
            Instruction::simple(RET),
        ])
        .with_regions(vec![
            region(ExceptionHandlerFlags::EXCEPTION, (1, 2), (2, 4)),
            region(ExceptionHandlerFlags::FINALLY, (1, 2), (4, 5)),
            region(ExceptionHandlerFlags::FAULT, (0, 5), (5, 6)),
        ]);
        let (_, method) = translate_static(TypeSignature::Void, body, &());
        let method = method.unwrap();

        let stats = method.stats();
        assert_eq!(stats.exception_blocks_begun, 2);
        assert_eq!(stats.exception_blocks_ended, 2);
        assert_eq!(stats.handlers_begun, 3);

        let kinds: Vec<_> = method.clauses().iter().map(|clause| clause.kind.clone()).collect();
        assert_eq!(kinds, [ClauseKind::Catch(None), ClauseKind::Finally, ClauseKind::Fault]);
        assert_eq!((method.clauses()[2].try_start, method.clauses()[2].try_end), (0, 5));
    }

    #[test]
    fn test_filter_region() {
        let mut filter = region(ExceptionHandlerFlags::FILTER, (0, 2), (4, 6));
        filter.filter_start = Some(2);
        let body = MethodBody::new(vec![
            Instruction::simple(NOP),
            Instruction::new(LEAVE_S, Operand::Target(6)),
            Instruction::simple(POP),
            Instruction::simple(LDC_I4_1),
            Instruction::simple(ENDFILTER),
            Instruction::new(LEAVE_S, Operand::Target(6)),
            Instruction::simple(RET),
        ])
        .with_regions(vec![filter]);
        let (_, method) = translate_static(TypeSignature::Void, body, &());
        let method = method.unwrap();

        assert_eq!(method.clauses()[0].kind, ClauseKind::Filter { filter_start: 2 });
        assert_eq!(method.clauses()[0].handler_start, 4);
    }

    #[test]
    fn test_unmapped_opcode_becomes_nop() {
        let body = MethodBody::new(vec![Instruction::simple(ARGLIST), Instruction::simple(RET)]);
        let (_, method) = translate_static(TypeSignature::Void, body, &());
        let method = method.unwrap();
        assert_eq!(method.code()[0].opcode, OpCode::Nop);
    }

    #[test]
    fn test_operand_mismatch() {
        let body = MethodBody::new(vec![
            Instruction::new(CALLI, Operand::Signature(SignatureMethod::new_static(TypeSignature::Void, vec![]))),
            Instruction::simple(RET),
        ]);
        let (_, result) = translate_static(TypeSignature::Void, body, &());
        assert!(matches!(
            result,
            Err(Error::Translation { ref opcode, operand: "Signature" }) if opcode == "calli"
        ));

        let body = MethodBody::new(vec![Instruction::new(LDC_I4, Operand::Int8(1)), Instruction::simple(RET)]);
        let (_, result) = translate_static(TypeSignature::I4, body, &());
        assert!(matches!(result, Err(Error::Translation { operand: "Int8", .. })));
    }

    #[test]
    fn test_pseudo_operands() {
        let body = MethodBody::new(vec![
            Instruction::new(LDARG, Operand::Pseudo(PseudoOperand::OrchestratorArg)),
            Instruction::new(STLOC_S, Operand::Pseudo(PseudoOperand::TempObject)),
            Instruction::new(LDLOC_S, Operand::Pseudo(PseudoOperand::TempObject)),
            Instruction::simple(RET),
        ]);
        let (resolver, method) = translate_static(TypeSignature::Object, body, &Fixed);
        let method = method.unwrap();
        assert!(matches!(method.code()[0].operand, EmitOperand::Arg(0)));
        assert!(matches!(method.code()[1].operand, EmitOperand::Local(0)));
        assert_eq!(run(&resolver, &method, Value::I32(7)).unwrap(), Value::I32(7));

        let body = MethodBody::new(vec![
            Instruction::new(CALL, Operand::Pseudo(PseudoOperand::OrchestratorMethod("rt_get_body"))),
            Instruction::simple(RET),
        ]);
        let (_, method) = translate_static(TypeSignature::Void, body.clone(), &Fixed);
        assert!(matches!(
            method.unwrap().code()[0].operand,
            EmitOperand::Callback { name: "rt_get_body", arity: 2 }
        ));
        let (_, result) = translate_static(TypeSignature::Void, body, &());
        assert!(matches!(result, Err(Error::Translation { operand: "OrchestratorMethod", .. })));

        let body = MethodBody::new(vec![
            Instruction::new(LDLOC, Operand::Pseudo(PseudoOperand::OrchestratorArg)),
            Instruction::simple(RET),
        ]);
        let (_, result) = translate_static(TypeSignature::Object, body, &Fixed);
        assert!(matches!(result, Err(Error::Translation { operand: "OrchestratorArg", .. })));
    }

    #[test]
    fn test_branch_outside_body() {
        let body = MethodBody::new(vec![Instruction::new(BR, Operand::Target(9)), Instruction::simple(RET)]);
        let (_, result) = translate_static(TypeSignature::Void, body, &());
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
