//! Call-site rewriting ahead of translation.
//!
//! A method body is rewritten once, before it is translated, so that:
//!
//! - constructions of `StackTrace` and `StackFrame` are followed by a repair callback,
//! - queries for the calling, executing or entry assembly answer with the assembly of the
//!   original method, and `Assembly.GetAssembly(Type)` goes through the orchestrator,
//! - calls to methods of tracked components go through the uniform wrapper of the callee.
//!
//! Replaced instructions become a `nop` followed by their replacement. Branch targets and
//! exception region boundaries are remapped to the first instruction emitted for each
//! original instruction, so a branch to a rewritten call lands on its `nop`.

use crate::{
    metadata::{
        method::{ExceptionRegion, Instruction, MethodBody, Operand, PseudoOperand},
        opcodes::{
            BOX, CALL, CALLVIRT, LDARG, LDC_I4, LDLOC, LDNULL, NEWARR, NEWOBJ, NOP, POP,
            STELEM_REF, STLOC, UNBOX_ANY,
        },
        references::{MemberRef, MethodRef},
    },
    runtime::{types::MethodImpl, ComponentId, RuntimeMethod, RuntimeType},
    sandbox::{callbacks, pending::PendingMethod, Sandbox},
    translator, Result,
};

const DIAGNOSTICS: &str = "System.Diagnostics";
const REFLECTION: &str = "System.Reflection";

/// A rewritten body and the number of call sites that were replaced
#[derive(Debug)]
pub struct RewrittenBody {
    /// The body to translate
    pub body: MethodBody,
    /// Calls routed through a uniform wrapper
    pub call_sites: usize,
}

/// Rewrites the body of one pending method
pub struct CallSiteRewriter<'a> {
    sandbox: &'a Sandbox,
    pending: &'a PendingMethod,
    corlib: ComponentId,
    object: RuntimeType,
    out: Vec<Instruction>,
    call_sites: usize,
}

impl<'a> CallSiteRewriter<'a> {
    /// Prepares rewriting on behalf of `pending`
    ///
    /// # Errors
    /// Returns an error if the platform library is not available.
    pub fn new(sandbox: &'a Sandbox, pending: &'a PendingMethod) -> Result<Self> {
        let host = sandbox.resolver().host();
        Ok(CallSiteRewriter {
            sandbox,
            pending,
            corlib: host.corlib()?.id(),
            object: host.corlib_type("System", "Object")?,
            out: Vec::new(),
            call_sites: 0,
        })
    }

    /// Rewrites `body`
    ///
    /// # Errors
    /// Returns [`crate::Error::Unresolved`] for call targets that can not be resolved.
    pub fn rewrite(mut self, body: &MethodBody) -> Result<RewrittenBody> {
        let sandbox = self.sandbox;
        let resolver = sandbox.resolver();
        let context = self.pending.method().generic_context();
        let mut starts = Vec::with_capacity(body.instructions.len() + 1);
        self.out.reserve(body.instructions.len());

        for instruction in &body.instructions {
            starts.push(self.out.len());
            let Some(method_ref) = instruction.member().and_then(MemberRef::as_method) else {
                self.out.push(instruction.clone());
                continue;
            };

            match instruction.opcode {
                NEWOBJ => {
                    self.out.push(instruction.clone());
                    let constructor = resolver.resolve_method(method_ref, &context)?;
                    let declaring = constructor.declaring_type();
                    if self.is_platform_type(declaring, DIAGNOSTICS, "StackTrace") {
                        self.call_orchestrator(callbacks::RT_FIX_STACK_TRACE);
                    } else if self.is_platform_type(declaring, DIAGNOSTICS, "StackFrame") {
                        self.call_orchestrator(callbacks::RT_FIX_STACK_FRAME);
                    }
                }
                CALL | CALLVIRT => {
                    if !self.rewrite_call(method_ref)? {
                        self.out.push(instruction.clone());
                    }
                }
                _ => self.out.push(instruction.clone()),
            }
        }
        starts.push(self.out.len());

        // Targets outside the body stay outside and fail translation
        let remap = |target: usize| starts.get(target).copied().unwrap_or(usize::MAX);
        for instruction in &mut self.out {
            match &mut instruction.operand {
                Operand::Target(target) => *target = remap(*target),
                Operand::Switch(targets) => targets.iter_mut().for_each(|target| *target = remap(*target)),
                _ => {}
            }
        }
        let regions = body
            .regions
            .iter()
            .map(|region| remap_region(region, &starts))
            .collect();

        log::debug!(
            "Rewrote {}: {} instructions became {}, {} call sites",
            self.pending.method(),
            body.instructions.len(),
            self.out.len(),
            self.call_sites
        );

        Ok(RewrittenBody {
            body: MethodBody {
                instructions: self.out,
                regions,
                locals: body.locals.clone(),
                max_stack: body.max_stack,
            },
            call_sites: self.call_sites,
        })
    }

    /// Replaces a call when its target needs it; returns false to keep the call
    fn rewrite_call(&mut self, method_ref: &MethodRef) -> Result<bool> {
        let sandbox = self.sandbox;
        let resolver = sandbox.resolver();
        let context = self.pending.method().generic_context();

        if let Some(callee) = resolver.tracked_method(method_ref, &context)? {
            if !has_body(&callee) {
                // Abstract and runtime provided methods keep their dispatch
                return Ok(false);
            }
            self.route_through_wrapper(&callee)?;
            return Ok(true);
        }

        let target = resolver.resolve_method(method_ref, &context)?;
        if !self.is_platform_type(target.declaring_type(), REFLECTION, "Assembly") {
            return Ok(false);
        }
        match (target.name(), target.signature().params.len()) {
            ("GetCallingAssembly" | "GetExecutingAssembly" | "GetEntryAssembly", 0) => {
                log::trace!("{}: replacing {}", self.pending.method(), target);
                self.out.push(Instruction::simple(NOP));
                self.load_orchestrator();
                self.load_index(self.pending.index())?;
                self.call(callbacks::RT_GET_ASSEMBLY);
                Ok(true)
            }
            ("GetAssembly", 1) => {
                self.out.push(Instruction::simple(NOP));
                self.call_orchestrator(callbacks::RT_GET_ASSEMBLY_TYPE_ARG);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Moves the stack arguments into an `object[]` and invokes the callee's wrapper
    fn route_through_wrapper(&mut self, callee: &RuntimeMethod) -> Result<()> {
        let sandbox = self.sandbox;
        let resolver = sandbox.resolver();
        let pending = sandbox.register(callee)?;
        if callee != self.pending.method() {
            pending.record_caller(self.pending.method());
        }
        let params = translator::parameter_types(resolver, callee)?;
        let return_type = translator::return_type(resolver, callee)?;

        self.out.push(Instruction::simple(NOP));
        if !params.is_empty() {
            self.load_index(params.len())?;
            self.out.push(type_instruction(NEWARR, self.object.clone()));
            self.out.push(pseudo(STLOC, PseudoOperand::TempObjectArray));

            for (slot, param) in params.iter().enumerate().rev() {
                if param.is_value_type() {
                    self.out.push(type_instruction(BOX, param.clone()));
                }
                self.out.push(pseudo(STLOC, PseudoOperand::TempObject));
                self.out.push(pseudo(LDLOC, PseudoOperand::TempObjectArray));
                self.load_index(slot)?;
                self.out.push(pseudo(LDLOC, PseudoOperand::TempObject));
                self.out.push(Instruction::simple(STELEM_REF));
            }
        }

        self.load_orchestrator();
        self.load_index(pending.index())?;
        self.call(callbacks::RT_GET_WRAPPER);
        if params.is_empty() {
            self.out.push(Instruction::simple(LDNULL));
        } else {
            self.out.push(pseudo(LDLOC, PseudoOperand::TempObjectArray));
        }
        self.load_orchestrator();
        self.out
            .push(pseudo(CALL, PseudoOperand::TranslatedMethod(callee.clone())));

        match return_type {
            None => self.out.push(Instruction::simple(POP)),
            Some(ty) if ty.is_value_type() => self.out.push(type_instruction(UNBOX_ANY, ty)),
            Some(_) => {}
        }

        self.call_sites += 1;
        log::trace!("{}: call to {} goes through pending method {}", self.pending.method(), callee, pending.index());
        Ok(())
    }

    fn is_platform_type(&self, ty: &RuntimeType, namespace: &str, name: &str) -> bool {
        ty.component() == Some(self.corlib) && ty.is(namespace, name)
    }

    fn load_orchestrator(&mut self) {
        self.out.push(pseudo(LDARG, PseudoOperand::OrchestratorArg));
    }

    fn load_index(&mut self, index: usize) -> Result<()> {
        let value = i32::try_from(index).map_err(|_| malformed_error!("Index {} does not fit an int32", index))?;
        self.out.push(Instruction::new(LDC_I4, Operand::Int32(value)));
        Ok(())
    }

    fn call(&mut self, name: &'static str) {
        self.out.push(pseudo(CALL, PseudoOperand::OrchestratorMethod(name)));
    }

    fn call_orchestrator(&mut self, name: &'static str) {
        self.load_orchestrator();
        self.call(name);
    }
}

fn pseudo(opcode: u16, operand: PseudoOperand) -> Instruction {
    Instruction::new(opcode, Operand::Pseudo(operand))
}

fn type_instruction(opcode: u16, ty: RuntimeType) -> Instruction {
    pseudo(opcode, PseudoOperand::ConcreteType(ty))
}

fn has_body(method: &RuntimeMethod) -> bool {
    matches!(method.implementation(), MethodImpl::Managed(def) if def.body.is_some())
}

fn remap_region(region: &ExceptionRegion, starts: &[usize]) -> ExceptionRegion {
    let last = starts.len() - 1;
    let map = |position: usize| starts[position.min(last)];
    ExceptionRegion {
        flags: region.flags,
        try_start: map(region.try_start),
        try_end: map(region.try_end),
        handler_start: map(region.handler_start),
        handler_end: map(region.handler_end),
        filter_start: region.filter_start.map(map),
        catch_type: region.catch_type.clone(),
    }
}
