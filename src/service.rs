//! Decrypter service.
//!
//! The facade a string-decryption strategy talks to: methods of the analysed component are
//! defined as decrypters once, then invoked with batches of arguments inside the sandbox.
//! A decrypter that inspects its caller can be told which method the decrypted call site
//! belongs to.

use std::sync::Arc;

use crate::{
    config::SandboxConfig,
    metadata::token::Token,
    resolver::Resolver,
    runtime::{ComponentId, RuntimeMethod, Value},
    sandbox::Sandbox,
    translator, Error, Result,
};

/// A method of the analysed component defined as a decrypter
#[derive(Debug, Clone)]
struct Decrypter {
    method: RuntimeMethod,
    index: usize,
}

/// Sandboxed invocation of decrypter methods
#[derive(Debug)]
pub struct DecrypterService {
    sandbox: Sandbox,
    decrypters: boxcar::Vec<Decrypter>,
}

impl DecrypterService {
    /// Creates a service with an empty sandbox session
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, config: SandboxConfig) -> Self {
        DecrypterService {
            sandbox: Sandbox::new(resolver, config),
            decrypters: boxcar::Vec::new(),
        }
    }

    /// The sandbox session decrypters run in
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Defines the method `token` of `component` as a decrypter and returns its handle.
    ///
    /// The method has to return `string` or `object`. Its body is translated right away, so
    /// a method that can not be sandboxed is rejected here rather than on first use.
    ///
    /// # Errors
    /// - [`Error::Unresolved`] if the component is not tracked or has no such method
    /// - [`Error::Error`] if the method returns anything else
    /// - the error of sandboxing the method
    pub fn define_decrypter(&self, component: ComponentId, token: Token) -> Result<usize> {
        let resolver = self.sandbox.resolver();
        let method = resolver.method_by_token(component, token)?;

        let returns = translator::return_type(resolver, &method)?;
        let accepted = returns
            .as_ref()
            .is_some_and(|ty| ty.is("System", "String") || ty.is("System", "Object"));
        if !accepted {
            return Err(Error::Error(format!(
                "Method return type must be string or object: {method}"
            )));
        }

        let index = self.sandbox.create_method(&method)?;
        let handle = self.decrypters.push(Decrypter { method, index });
        log::debug!("Decrypter {} is pending method {}", handle, index);
        Ok(handle)
    }

    /// Runs the decrypter `handle` once per argument batch.
    ///
    /// With `caller_token` the decrypter observes that method of its own component as its
    /// caller. A token naming no method leaves the caller as it was.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for unknown handles and the error of the first batch
    /// that failed.
    pub fn decrypt(&self, handle: usize, batches: Vec<Vec<Value>>, caller_token: Option<Token>) -> Result<Vec<Value>> {
        let decrypter = self
            .decrypters
            .get(handle)
            .ok_or_else(|| malformed_error!("No decrypter {}", handle))?;

        if let Some(token) = caller_token {
            let caller = decrypter
                .method
                .component()
                .and_then(|component| self.sandbox.resolver().method_by_token(component, token).ok());
            match caller {
                Some(caller) => self.sandbox.set_apparent_caller(decrypter.index, caller)?,
                None => log::warn!("Caller {} of decrypter {} not found", token, handle),
            }
        }

        log::debug!("Decrypting {} batches with {}", batches.len(), decrypter.method);
        batches
            .into_iter()
            .map(|args| self.sandbox.invoke_uniform(decrypter.index, args))
            .collect()
    }

    /// Sandboxes the method `token` of `component` and runs it once with `args`
    ///
    /// # Errors
    /// Returns [`Error::Unresolved`] if the component is not tracked or has no such method,
    /// and the error of sandboxing or running the method.
    pub fn invoke(&self, component: ComponentId, token: Token, args: Vec<Value>) -> Result<Value> {
        let method = self.sandbox.resolver().method_by_token(component, token)?;
        let index = self.sandbox.create_method(&method)?;
        self.sandbox.invoke_uniform(index, args)
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
        },
        runtime::Host,
        test::{corlib_class, target, ModuleBuilder},
    };

    fn member(method: MethodRef) -> Operand {
        Operand::Member(MemberRef::Method(Arc::new(method)))
    }

    /// `App.Strings` with
    /// - 1 `string Decrypt(string, int32)` returning `s.Substring(n)`
    /// - 2 `object WhoCalls()` returning the method of a fresh stack frame
    /// - 3 `int32 Count()` returning 3
    /// - 4 `void Main()`
    fn service() -> (DecrypterService, ComponentId) {
        let substring = MethodRef::new(
            TypeSignature::String,
            "Substring",
            SignatureMethod::new_instance(TypeSignature::String, vec![TypeSignature::I4]),
        );
        let frame = MethodRef::new(
            corlib_class("System.Diagnostics", "StackFrame"),
            ".ctor",
            SignatureMethod::new_instance(TypeSignature::Void, vec![]),
        );
        let get_method = MethodRef::new(
            corlib_class("System.Diagnostics", "StackFrame"),
            "GetMethod",
            SignatureMethod::new_instance(corlib_class("System.Reflection", "MethodBase"), vec![]),
        );

        let module = ModuleBuilder::new(target())
            .class("App", "Strings")
            .static_body(
                "App.Strings",
                "Decrypt",
                TypeSignature::String,
                vec![TypeSignature::String, TypeSignature::I4],
                MethodBody::new(vec![
                    Instruction::simple(LDARG_0),
                    Instruction::simple(LDARG_1),
                    Instruction::new(CALLVIRT, member(substring)),
                    Instruction::simple(RET),
                ]),
            )
            .static_body(
                "App.Strings",
                "WhoCalls",
                TypeSignature::Object,
                vec![],
                MethodBody::new(vec![
                    Instruction::new(NEWOBJ, member(frame)),
                    Instruction::new(CALLVIRT, member(get_method)),
                    Instruction::simple(RET),
                ]),
            )
            .static_body(
                "App.Strings",
                "Count",
                TypeSignature::I4,
                vec![],
                MethodBody::new(vec![Instruction::simple(LDC_I4_3), Instruction::simple(RET)]),
            )
            .static_body(
                "App.Strings",
                "Main",
                TypeSignature::Void,
                vec![],
                MethodBody::new(vec![Instruction::simple(RET)]),
            )
            .build();

        let resolver = Resolver::new(Arc::new(Host::new(HostConfig::default())));
        let component = resolver.track(Arc::new(module)).unwrap().component().id();
        (DecrypterService::new(Arc::new(resolver), SandboxConfig::default()), component)
    }

    #[test]
    fn test_decrypt_batches() {
        let (service, component) = service();
        let handle = service.define_decrypter(component, Token::new(0x0600_0001)).unwrap();

        let results = service
            .decrypt(
                handle,
                vec![
                    vec![Value::string("xxsecret"), Value::I32(2)],
                    vec![Value::string("abc"), Value::I32(0)],
                ],
                None,
            )
            .unwrap();
        assert_eq!(results[0].as_str(), Some("secret"));
        assert_eq!(results[1].as_str(), Some("abc"));
    }

    #[test]
    fn test_caller_token() {
        let (service, component) = service();
        let handle = service.define_decrypter(component, Token::new(0x0600_0002)).unwrap();
        let main = service
            .sandbox()
            .resolver()
            .method_by_token(component, Token::new(0x0600_0004))
            .unwrap();

        let results = service
            .decrypt(handle, vec![vec![]], Some(Token::new(0x0600_0004)))
            .unwrap();
        assert_eq!(results, vec![Value::Method(main)]);
    }

    #[test]
    fn test_rejects_other_return_types() {
        let (service, component) = service();
        assert!(matches!(
            service.define_decrypter(component, Token::new(0x0600_0003)),
            Err(Error::Error(_))
        ));
        assert!(matches!(
            service.define_decrypter(component, Token::new(0x0600_0009)),
            Err(Error::Unresolved { .. })
        ));
    }

    #[test]
    fn test_one_shot_invoke() {
        let (service, component) = service();
        let result = service
            .invoke(component, Token::new(0x0600_0001), vec![Value::string("plain"), Value::I32(4)])
            .unwrap();
        assert_eq!(result.as_str(), Some("n"));

        assert!(matches!(service.decrypt(5, vec![], None), Err(Error::Malformed { .. })));
    }
}
