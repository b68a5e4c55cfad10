//! Records of sandboxed methods.

use std::sync::{Arc, OnceLock, RwLock};

use crate::runtime::{emit::DynamicMethod, RuntimeMethod};

/// What a synthetic name stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticRole {
    /// The uniform wrapper of the pending method at the index
    Wrapper(usize),
    /// The translated body of the pending method at the index
    Body(usize),
}

/// How far a pending method has come
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PendingState {
    /// Names reserved, nothing produced
    Registered,
    /// The body is translated
    Translated,
    /// The body is translated and the wrapper emitted
    Wrapped,
}

/// One sandboxed method.
///
/// Created once per original method and session. The body and the wrapper are produced
/// lazily and independently, each at most once.
pub struct PendingMethod {
    method: RuntimeMethod,
    index: usize,
    wrapper_name: Arc<str>,
    body_name: Arc<str>,
    body: OnceLock<Arc<DynamicMethod>>,
    wrapper: OnceLock<Arc<DynamicMethod>>,
    apparent_caller: RwLock<Option<RuntimeMethod>>,
}

/// A shared pending record
pub type PendingMethodRc = Arc<PendingMethod>;

impl PendingMethod {
    /// Creates the record of `method` at `index`
    #[must_use]
    pub fn new(method: RuntimeMethod, index: usize, wrapper_name: Arc<str>, body_name: Arc<str>) -> Self {
        PendingMethod {
            method,
            index,
            wrapper_name,
            body_name,
            body: OnceLock::new(),
            wrapper: OnceLock::new(),
            apparent_caller: RwLock::new(None),
        }
    }

    /// The original method
    #[must_use]
    pub fn method(&self) -> &RuntimeMethod {
        &self.method
    }

    /// Index in the session's pending table
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Synthetic name of the uniform wrapper
    #[must_use]
    pub fn wrapper_name(&self) -> &Arc<str> {
        &self.wrapper_name
    }

    /// Synthetic name of the translated body
    #[must_use]
    pub fn body_name(&self) -> &Arc<str> {
        &self.body_name
    }

    /// The translated body, if produced
    #[must_use]
    pub fn body(&self) -> Option<&Arc<DynamicMethod>> {
        self.body.get()
    }

    /// The uniform wrapper, if produced
    #[must_use]
    pub fn wrapper(&self) -> Option<&Arc<DynamicMethod>> {
        self.wrapper.get()
    }

    /// Stores the body unless one is there already; returns the stored one
    pub fn store_body(&self, body: DynamicMethod) -> Arc<DynamicMethod> {
        self.body.get_or_init(|| Arc::new(body)).clone()
    }

    /// Stores the wrapper unless one is there already; returns the stored one
    pub fn store_wrapper(&self, wrapper: DynamicMethod) -> Arc<DynamicMethod> {
        self.wrapper.get_or_init(|| Arc::new(wrapper)).clone()
    }

    /// The current state
    #[must_use]
    pub fn state(&self) -> PendingState {
        match (self.body.get(), self.wrapper.get()) {
            (Some(_), Some(_)) => PendingState::Wrapped,
            (Some(_), None) => PendingState::Translated,
            _ => PendingState::Registered,
        }
    }

    /// The method stack frames of the body report, if one was recorded or set
    #[must_use]
    pub fn apparent_caller(&self) -> Option<RuntimeMethod> {
        read_lock!(self.apparent_caller).clone()
    }

    /// Records `caller` unless a caller is known already; returns true if recorded
    pub fn record_caller(&self, caller: &RuntimeMethod) -> bool {
        let mut current = write_lock!(self.apparent_caller);
        if current.is_some() {
            return false;
        }
        *current = Some(caller.clone());
        true
    }

    /// Replaces the apparent caller
    pub fn set_caller(&self, caller: RuntimeMethod) {
        *write_lock!(self.apparent_caller) = Some(caller);
    }
}

impl std::fmt::Debug for PendingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMethod")
            .field("index", &self.index)
            .field("method", &self.method)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::{emit::MethodBuilder, types::RuntimeType},
        test::{create_runtime_method, create_runtime_type},
    };

    fn method(name: &str) -> RuntimeMethod {
        let ty = create_runtime_type("App", "Decrypter", 0);
        let def = create_runtime_method(&ty, name, true);
        RuntimeMethod::new(def, RuntimeType::Definition(ty), Vec::new())
    }

    #[test]
    fn test_states() {
        let pending = PendingMethod::new(method("Decrypt"), 0, "w_0".into(), "b_0".into());
        assert_eq!(pending.state(), PendingState::Registered);

        pending.store_wrapper(MethodBuilder::new("w_0", vec![], None).finish().unwrap());
        assert_eq!(pending.state(), PendingState::Registered);

        let first = pending.store_body(MethodBuilder::new("b_0", vec![], None).finish().unwrap());
        let second = pending.store_body(MethodBuilder::new("other", vec![], None).finish().unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pending.state(), PendingState::Wrapped);
    }

    #[test]
    fn test_first_caller_wins() {
        let pending = PendingMethod::new(method("Decrypt"), 0, "w_0".into(), "b_0".into());
        let first = method("First");
        let second = method("Second");

        assert!(pending.record_caller(&first));
        assert!(!pending.record_caller(&second));
        assert_eq!(pending.apparent_caller(), Some(first));

        pending.set_caller(second.clone());
        assert_eq!(pending.apparent_caller(), Some(second));
    }
}
