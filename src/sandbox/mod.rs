//! The sandbox orchestrator.
//!
//! A [`Sandbox`] owns everything one session produced: the pending table, the registry of
//! synthetic names and the emitted methods themselves. Sandboxing a method means giving it a
//! record in the pending table; its translated body and its uniform wrapper follow lazily,
//! each at most once.
//!
//! # Architecture
//!
//! - [`pending`] - The per-method record and its states
//! - [`rewriter`] - Call-site rewriting ahead of translation
//! - [`wrapper`] - The uniform `(object[], orchestrator) -> object` wrapper
//! - [`callbacks`] - The orchestrator methods emitted code calls back into
//! - Stack-trace repair, implemented on [`Sandbox`] itself
//!
//! A pending method moves from *registered* to *translated* to *wrapped*, never back.
//! Callees discovered while rewriting a body are only registered; their own body is
//! translated the first time emitted code asks for it through `rt_get_body`.
//!
//! Emitted code runs on the [`Interpreter`], with the sandbox as its [`MethodDispatcher`]:
//! orchestrator callbacks are answered from the pending table, managed calls that were not
//! rewritten (type initializers, calls into untracked components) are translated as they
//! are, without rewriting, and report their original method in stack frames.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsandbox::{prelude::*, SandboxConfig};
//!
//! # fn example(resolver: Arc<Resolver>, method: RuntimeMethod) -> dotsandbox::Result<()> {
//! let sandbox = Sandbox::new(resolver, SandboxConfig::default());
//! let index = sandbox.create_method(&method)?;
//!
//! let result = sandbox.invoke_uniform(index, vec![Value::string("payload"), Value::I32(3)])?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod pending;
pub mod rewriter;
mod stacktrace;
pub mod wrapper;

pub use pending::{PendingMethod, PendingMethodRc, PendingState, SyntheticRole};

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;

use crate::{
    config::SandboxConfig,
    resolver::Resolver,
    runtime::{
        emit::DynamicMethod, types::MethodImpl, Interpreter, MethodDispatcher, RuntimeMethod,
        RuntimeType, Value,
    },
    translator::{MethodContext, Orchestrator, Translator},
    EmulationError, Error, Result,
};

use rewriter::CallSiteRewriter;

static NEXT_SYNTHETIC: AtomicUsize = AtomicUsize::new(0);

/// Hands out a name no other emitted method of this process carries
fn synthetic_name(prefix: &str) -> Arc<str> {
    let id = NEXT_SYNTHETIC.fetch_add(1, Ordering::Relaxed);
    Arc::from(format!("{prefix}_{id}"))
}

/// Counters of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStats {
    /// Methods given a pending record
    pub registered: usize,
    /// Call sites routed through a uniform wrapper
    pub call_sites_rewritten: usize,
    /// Bodies rewritten and translated
    pub bodies_translated: usize,
    /// Uniform wrappers emitted
    pub wrappers_emitted: usize,
    /// Managed methods translated without rewriting for direct dispatch
    pub direct_translations: usize,
}

/// One sandbox session
pub struct Sandbox {
    resolver: Arc<Resolver>,
    config: SandboxConfig,
    pending: boxcar::Vec<PendingMethodRc>,
    by_method: DashMap<RuntimeMethod, usize>,
    registering: Mutex<()>,
    names: SkipMap<Arc<str>, SyntheticRole>,
    direct: DashMap<RuntimeMethod, Arc<DynamicMethod>>,
    stats: RwLock<SandboxStats>,
}

impl Sandbox {
    /// Creates an empty session resolving through `resolver`
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, config: SandboxConfig) -> Self {
        Sandbox {
            resolver,
            config,
            pending: boxcar::Vec::new(),
            by_method: DashMap::new(),
            registering: Mutex::new(()),
            names: SkipMap::new(),
            direct: DashMap::new(),
            stats: RwLock::new(SandboxStats::default()),
        }
    }

    /// The resolver of the session
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The configuration of the session
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Returns the pending record of `method`, creating it on first use.
    ///
    /// Registration reserves the pending index and both synthetic names; nothing is
    /// translated yet.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the registration lock is poisoned.
    pub fn register(&self, method: &RuntimeMethod) -> Result<PendingMethodRc> {
        if let Some(index) = self.pending_of(method) {
            return self.pending(index);
        }

        let _guard = self.registering.lock().map_err(|_| Error::LockError)?;
        if let Some(index) = self.pending_of(method) {
            return self.pending(index);
        }

        let index = self.pending.count();
        let wrapper_name = synthetic_name(&self.config.wrapper_prefix);
        let body_name = synthetic_name(&self.config.body_prefix);
        let pending = Arc::new(PendingMethod::new(
            method.clone(),
            index,
            wrapper_name.clone(),
            body_name.clone(),
        ));
        self.pending.push(pending.clone());
        self.names.insert(wrapper_name, SyntheticRole::Wrapper(index));
        self.names.insert(body_name, SyntheticRole::Body(index));
        self.by_method.insert(method.clone(), index);
        write_lock!(self.stats).registered += 1;

        log::debug!("Registered {} as pending method {}", method, index);
        Ok(pending)
    }

    /// Sandboxes `method` and translates its body, returning its pending index.
    ///
    /// Calling this again for the same method returns the same index and translates nothing.
    ///
    /// # Errors
    /// - [`Error::MissingBody`] for methods without bytecode
    /// - [`Error::Unresolved`] or [`Error::Translation`] if the body can not be translated
    pub fn create_method(&self, method: &RuntimeMethod) -> Result<usize> {
        let pending = self.register(method)?;
        self.body(pending.index())?;
        Ok(pending.index())
    }

    /// The pending record at `index`
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for indices this session never handed out.
    pub fn pending(&self, index: usize) -> Result<PendingMethodRc> {
        self.pending
            .get(index)
            .cloned()
            .ok_or_else(|| malformed_error!("No pending method {}", index))
    }

    /// Pending index of `method`, `None` if it was never registered
    #[must_use]
    pub fn pending_of(&self, method: &RuntimeMethod) -> Option<usize> {
        self.by_method.get(method).map(|index| *index)
    }

    /// What the synthetic name `name` stands for
    #[must_use]
    pub fn role_of(&self, name: &str) -> Option<SyntheticRole> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// Number of pending methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.count()
    }

    /// True if nothing was registered yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.count() == 0
    }

    /// The translated body of the pending method at `index`, rewriting and translating it
    /// on first request
    ///
    /// # Errors
    /// - [`Error::MissingBody`] for methods without bytecode
    /// - [`Error::Unresolved`] or [`Error::Translation`] if the body can not be translated
    pub fn body(&self, index: usize) -> Result<Arc<DynamicMethod>> {
        let pending = self.pending(index)?;
        if let Some(body) = pending.body() {
            return Ok(body.clone());
        }

        let method = pending.method();
        let def = self.resolver.method_body(method)?;
        let Some(body) = def.body.as_ref().filter(|body| !body.instructions.is_empty()) else {
            return Err(Error::MissingBody {
                name: method.to_string(),
                token: method.token(),
            });
        };

        let rewritten = CallSiteRewriter::new(self, &pending)?.rewrite(body)?;
        let context = MethodContext::new(&self.resolver, method, pending.body_name().clone(), &rewritten.body)?;
        let translated = Translator::new(&self.resolver, self).translate(context)?;

        {
            let mut stats = write_lock!(self.stats);
            stats.bodies_translated += 1;
            stats.call_sites_rewritten += rewritten.call_sites;
        }
        log::debug!(
            "Translated {} as {} ({} instructions)",
            method,
            pending.body_name(),
            translated.code().len()
        );
        Ok(pending.store_body(translated))
    }

    /// The uniform wrapper of the pending method at `index`, emitted on first request
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] for parameter or return types that can not be resolved.
    pub fn wrapper(&self, index: usize) -> Result<Arc<DynamicMethod>> {
        let pending = self.pending(index)?;
        if let Some(wrapper) = pending.wrapper() {
            return Ok(wrapper.clone());
        }

        let emitted = wrapper::emit_wrapper(&self.resolver, &pending)?;
        write_lock!(self.stats).wrappers_emitted += 1;
        Ok(pending.store_wrapper(emitted))
    }

    /// Invokes the pending method at `index` through its uniform wrapper.
    ///
    /// `args` holds one value per parameter, `this` first for instance methods, value types
    /// unboxed. The result is `null` for methods returning nothing and boxed for methods
    /// returning a value type.
    ///
    /// # Errors
    /// Returns [`Error::Exception`] for an exception escaping the method, an emulation error
    /// if execution stopped, or the error of translating the method.
    pub fn invoke_uniform(&self, index: usize, args: Vec<Value>) -> Result<Value> {
        let wrapper = self.wrapper(index)?;
        let object = self.resolver.host().corlib_type("System", "Object")?;
        let array = Value::new_array(object, args);

        let mut interpreter = Interpreter::new(self.resolver.host(), self, self.config.limits.clone());
        let result = interpreter.execute(&wrapper, vec![array, Value::Orchestrator]);
        log::debug!(
            "Invoked pending method {} ({} instructions executed)",
            index,
            interpreter.executed()
        );
        result
    }

    /// Makes frames of the body at `index` report `caller`
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for indices this session never handed out.
    pub fn set_apparent_caller(&self, index: usize, caller: RuntimeMethod) -> Result<()> {
        let pending = self.pending(index)?;
        log::debug!("Frames of pending method {} now report {}", index, caller);
        pending.set_caller(caller);
        Ok(())
    }

    /// A snapshot of the session counters
    #[must_use]
    pub fn stats(&self) -> SandboxStats {
        read_lock!(self.stats).clone()
    }

    /// The translation of a managed method called without rewriting
    fn direct(&self, method: &RuntimeMethod) -> Result<Arc<DynamicMethod>> {
        if let Some(translated) = self.direct.get(method) {
            return Ok(translated.clone());
        }

        let missing = || Error::MissingBody {
            name: method.to_string(),
            token: method.token(),
        };
        let MethodImpl::Managed(def) = method.implementation() else {
            return Err(missing());
        };
        let body = def.body.as_ref().ok_or_else(missing)?;

        let context = MethodContext::new(&self.resolver, method, method.to_string(), body)?.with_origin();
        let translated = Arc::new(Translator::new(&self.resolver, self).translate(context)?);
        write_lock!(self.stats).direct_translations += 1;
        log::debug!("Translated {} for direct dispatch", method);

        Ok(self
            .direct
            .entry(method.clone())
            .or_insert(translated)
            .clone())
    }

    fn fix_stack_trace(&self, trace: Value) -> Result<Value> {
        match trace {
            Value::StackTrace(frames) => Ok(Value::StackTrace(self.repair_frames(&frames)?)),
            other => Ok(other),
        }
    }

    fn fix_stack_frame(&self, frame: Value) -> Result<Value> {
        match frame {
            Value::StackFrame(Some(frame)) => Ok(Value::StackFrame(Some(Arc::new(self.repair_frame(&frame)?)))),
            other => Ok(other),
        }
    }

    fn assembly_of(&self, index: usize) -> Result<Value> {
        let pending = self.pending(index)?;
        Ok(pending
            .method()
            .declaring_type()
            .assembly()
            .map_or(Value::Null, |identity| Value::Assembly(identity.clone())))
    }
}

/// Reads the pending index a callback received
fn index_arg(callback: &str, value: &Value) -> Result<usize> {
    value
        .as_i32()
        .and_then(|index| usize::try_from(index).ok())
        .ok_or_else(|| {
            EmulationError::NativeMethod {
                method: callback.to_string(),
                reason: format!("{} is not a pending index", value.kind()),
            }
            .into()
        })
}

fn assembly_of_type(ty: &RuntimeType) -> Value {
    ty.assembly()
        .map_or(Value::Null, |identity| Value::Assembly(identity.clone()))
}

impl Orchestrator for Sandbox {
    fn callback_arity(&self, name: &str) -> Option<usize> {
        callbacks::find(name, callbacks::EMITTED_LOOKUP).map(|callback| callback.arity)
    }

    fn pending_index(&self, method: &RuntimeMethod) -> Option<usize> {
        self.pending_of(method)
    }
}

impl MethodDispatcher for Sandbox {
    fn invoke_managed(
        &self,
        interpreter: &mut Interpreter<'_>,
        method: &RuntimeMethod,
        mut args: Vec<Value>,
    ) -> Result<Value> {
        let translated = self.direct(method)?;
        args.push(Value::Orchestrator);
        interpreter.execute(&translated, args)
    }

    fn invoke_callback(
        &self,
        _interpreter: &mut Interpreter<'_>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let [first, second]: [Value; 2] = args.try_into().map_err(|args: Vec<Value>| {
            Error::from(EmulationError::NativeMethod {
                method: name.to_string(),
                reason: format!("takes 2 values, {} given", args.len()),
            })
        })?;

        match name {
            callbacks::RT_FIX_STACK_TRACE => self.fix_stack_trace(first),
            callbacks::RT_FIX_STACK_FRAME => self.fix_stack_frame(first),
            callbacks::RT_GET_ASSEMBLY => self.assembly_of(index_arg(name, &second)?),
            callbacks::RT_GET_ASSEMBLY_TYPE_ARG => match first {
                Value::Type(ty) => Ok(assembly_of_type(&ty)),
                Value::Null => Err(EmulationError::NullReference.into()),
                other => Err(EmulationError::TypeMismatch {
                    operation: callbacks::RT_GET_ASSEMBLY_TYPE_ARG,
                    expected: "type",
                    found: other.kind(),
                }
                .into()),
            },
            callbacks::RT_GET_WRAPPER => Ok(Value::Delegate(self.wrapper(index_arg(name, &second)?)?)),
            callbacks::RT_GET_BODY => Ok(Value::Delegate(self.body(index_arg(name, &second)?)?)),
            _ => Err(EmulationError::NativeMethod {
                method: name.to_string(),
                reason: "no such orchestrator method".to_string(),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("pending", &self.pending.count())
            .field("names", &self.names.len())
            .field("direct", &self.direct.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HostConfig,
        metadata::{
            method::{Instruction, MethodBody, Operand},
            opcodes::*,
            references::{MemberRef, MethodRef},
            signatures::{SignatureMethod, TypeSignature},
            token::Token,
        },
        runtime::{ComponentId, FrameIdentity, Host},
        test::{corlib_class, target, type_ref, ModuleBuilder},
    };

    fn program() -> TypeSignature {
        TypeSignature::Class(type_ref("Target", "App", "Program"))
    }

    fn call(method: MethodRef) -> Instruction {
        Instruction::new(CALL, Operand::Member(MemberRef::Method(Arc::new(method))))
    }

    fn callvirt(method: MethodRef) -> Instruction {
        Instruction::new(CALLVIRT, Operand::Member(MemberRef::Method(Arc::new(method))))
    }

    fn stack_frame_ctor() -> Instruction {
        let ctor = MethodRef::new(
            corlib_class("System.Diagnostics", "StackFrame"),
            ".ctor",
            SignatureMethod::new_instance(TypeSignature::Void, vec![]),
        );
        Instruction::new(NEWOBJ, Operand::Member(MemberRef::Method(Arc::new(ctor))))
    }

    fn get_method() -> MethodRef {
        MethodRef::new(
            corlib_class("System.Diagnostics", "StackFrame"),
            "GetMethod",
            SignatureMethod::new_instance(corlib_class("System.Reflection", "MethodBase"), vec![]),
        )
    }

    /// `App.Program` with
    /// - 1 `string Outer()` calling `Inner("hello", 2)`
    /// - 2 `string Inner(string, int32)` returning `s.Substring(n)`
    /// - 3 `MethodBase Current()` returning the method of a fresh stack frame
    /// - 4 `MethodBase Observer()` returning `Current()`
    /// - 5 `Assembly Executing()` returning `Assembly.GetExecutingAssembly()`
    /// - 6 `void Declared()` without a body
    fn session() -> (Sandbox, ComponentId) {
        let inner = MethodRef::new(
            program(),
            "Inner",
            SignatureMethod::new_static(TypeSignature::String, vec![TypeSignature::String, TypeSignature::I4]),
        );
        let substring = MethodRef::new(
            TypeSignature::String,
            "Substring",
            SignatureMethod::new_instance(TypeSignature::String, vec![TypeSignature::I4]),
        );
        let current = MethodRef::new(
            program(),
            "Current",
            SignatureMethod::new_static(corlib_class("System.Reflection", "MethodBase"), vec![]),
        );
        let executing = MethodRef::new(
            corlib_class("System.Reflection", "Assembly"),
            "GetExecutingAssembly",
            SignatureMethod::new_static(corlib_class("System.Reflection", "Assembly"), vec![]),
        );

        let module = ModuleBuilder::new(target())
            .class("App", "Program")
            .static_body(
                "App.Program",
                "Outer",
                TypeSignature::String,
                vec![],
                MethodBody::new(vec![
                    Instruction::new(LDSTR, Operand::String("hello".into())),
                    Instruction::simple(LDC_I4_2),
                    call(inner),
                    Instruction::simple(RET),
                ]),
            )
            .static_body(
                "App.Program",
                "Inner",
                TypeSignature::String,
                vec![TypeSignature::String, TypeSignature::I4],
                MethodBody::new(vec![
                    Instruction::simple(LDARG_0),
                    Instruction::simple(LDARG_1),
                    callvirt(substring),
                    Instruction::simple(RET),
                ]),
            )
            .static_body(
                "App.Program",
                "Current",
                corlib_class("System.Reflection", "MethodBase"),
                vec![],
                MethodBody::new(vec![stack_frame_ctor(), callvirt(get_method()), Instruction::simple(RET)]),
            )
            .static_body(
                "App.Program",
                "Observer",
                corlib_class("System.Reflection", "MethodBase"),
                vec![],
                MethodBody::new(vec![call(current), Instruction::simple(RET)]),
            )
            .static_body(
                "App.Program",
                "Executing",
                corlib_class("System.Reflection", "Assembly"),
                vec![],
                MethodBody::new(vec![call(executing), Instruction::simple(RET)]),
            )
            .static_method("App.Program", "Declared", TypeSignature::Void, vec![])
            .build();

        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        let component = resolver.track(Arc::new(module)).unwrap().component().id();
        (Sandbox::new(Arc::new(resolver), SandboxConfig::default()), component)
    }

    fn method(sandbox: &Sandbox, component: ComponentId, row: u32) -> RuntimeMethod {
        sandbox
            .resolver()
            .method_by_token(component, Token::new(0x0600_0000 | row))
            .unwrap()
    }

    #[test]
    fn test_registration_is_idempotent() {
        let (sandbox, component) = session();
        let inner = method(&sandbox, component, 2);

        let first = sandbox.create_method(&inner).unwrap();
        let second = sandbox.create_method(&inner).unwrap();
        assert_eq!(first, second);
        assert_eq!(sandbox.len(), 1);

        let stats = sandbox.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.bodies_translated, 1);
        assert_eq!(sandbox.pending(first).unwrap().state(), PendingState::Translated);
    }

    #[test]
    fn test_calls_go_through_the_callee_wrapper() {
        let (sandbox, component) = session();
        let outer = method(&sandbox, component, 1);
        let inner = method(&sandbox, component, 2);

        let index = sandbox.create_method(&outer).unwrap();
        let callee = sandbox.pending_of(&inner).unwrap();
        assert_eq!(sandbox.pending(callee).unwrap().state(), PendingState::Registered);
        assert_eq!(sandbox.stats().call_sites_rewritten, 1);

        let result = sandbox.invoke_uniform(index, vec![]).unwrap();
        assert_eq!(result.as_str(), Some("llo"));
        assert_eq!(sandbox.pending(callee).unwrap().state(), PendingState::Wrapped);
        assert_eq!(sandbox.pending(callee).unwrap().apparent_caller(), Some(outer));
    }

    #[test]
    fn test_uniform_wrapper_mixed_parameters() {
        let (sandbox, component) = session();
        let inner = method(&sandbox, component, 2);

        let index = sandbox.create_method(&inner).unwrap();
        let result = sandbox
            .invoke_uniform(index, vec![Value::string("payload"), Value::I32(3)])
            .unwrap();
        assert_eq!(result.as_str(), Some("load"));

        let body = sandbox.body(index).unwrap();
        let mut interpreter = Interpreter::new(sandbox.resolver().host(), &sandbox, sandbox.config().limits.clone());
        let direct = interpreter
            .execute(&body, vec![Value::string("payload"), Value::I32(3), Value::Orchestrator])
            .unwrap();
        assert_eq!(direct, result);
    }

    #[test]
    fn test_frame_in_callee_body_reports_caller() {
        let (sandbox, component) = session();
        let observer = method(&sandbox, component, 4);

        let index = sandbox.create_method(&observer).unwrap();
        let result = sandbox.invoke_uniform(index, vec![]).unwrap();
        assert_eq!(result, Value::Method(observer));
    }

    #[test]
    fn test_explicit_apparent_caller() {
        let (sandbox, component) = session();
        let outer = method(&sandbox, component, 1);
        let current = method(&sandbox, component, 3);

        let index = sandbox.create_method(&current).unwrap();
        sandbox.set_apparent_caller(index, outer.clone()).unwrap();
        assert_eq!(sandbox.invoke_uniform(index, vec![]).unwrap(), Value::Method(outer));
    }

    #[test]
    fn test_stand_in_without_caller() {
        let (sandbox, component) = session();
        let current = method(&sandbox, component, 3);
        let first = method(&sandbox, component, 1);

        let index = sandbox.create_method(&current).unwrap();
        assert_eq!(sandbox.invoke_uniform(index, vec![]).unwrap(), Value::Method(first));
    }

    #[test]
    fn test_executing_assembly_is_the_original() {
        let (sandbox, component) = session();
        let executing = method(&sandbox, component, 5);

        let index = sandbox.create_method(&executing).unwrap();
        let result = sandbox.invoke_uniform(index, vec![]).unwrap();
        assert_eq!(result, Value::Assembly(target()));
    }

    #[test]
    fn test_wrapper_frames_report_the_original() {
        let (sandbox, component) = session();
        let inner = method(&sandbox, component, 2);
        let pending = sandbox.register(&inner).unwrap();

        let frame = FrameIdentity::Synthetic(pending.wrapper_name().clone());
        assert_eq!(sandbox.repair_frame(&frame).unwrap(), FrameIdentity::Method(inner));

        let real = FrameIdentity::Method(method(&sandbox, component, 1));
        assert_eq!(sandbox.repair_frame(&real).unwrap(), real);
    }

    #[test]
    fn test_unknown_synthetic_frame() {
        let (sandbox, _) = session();
        let frame = FrameIdentity::Synthetic("sandbox_body_unknown".into());
        assert!(matches!(
            sandbox.repair_frame(&frame),
            Err(Error::IntrospectionInvariant(name)) if name == "sandbox_body_unknown"
        ));
    }

    #[test]
    fn test_missing_body() {
        let (sandbox, component) = session();
        let declared = method(&sandbox, component, 6);
        assert!(matches!(sandbox.create_method(&declared), Err(Error::MissingBody { .. })));
    }

    #[test]
    fn test_unknown_index() {
        let (sandbox, _) = session();
        assert!(matches!(sandbox.body(7), Err(Error::Malformed { .. })));
        assert!(sandbox.set_apparent_caller(7, method_placeholder(&sandbox)).is_err());
    }

    fn method_placeholder(sandbox: &Sandbox) -> RuntimeMethod {
        let component = sandbox.resolver().host().corlib().unwrap();
        let def = component.type_named("System", "Object").unwrap();
        let to_string = def.methods_named("ToString").next().unwrap().clone();
        RuntimeMethod::from_def(&to_string).unwrap()
    }
}
