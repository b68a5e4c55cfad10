//! The orchestrator methods emitted code may call.
//!
//! Rewritten call sites reach back into the sandbox through a fixed set of named methods.
//! Static callbacks take the value they operate on followed by the orchestrator, instance
//! callbacks take the orchestrator followed by a pending index. Either way every callback
//! pops two stack values and pushes one.

use bitflags::bitflags;

/// Repairs a freshly constructed `StackTrace`
pub const RT_FIX_STACK_TRACE: &str = "rt_fix_stack_trace";
/// Repairs a freshly constructed `StackFrame`
pub const RT_FIX_STACK_FRAME: &str = "rt_fix_stack_frame";
/// Answers `GetCallingAssembly`, `GetExecutingAssembly` and `GetEntryAssembly`
pub const RT_GET_ASSEMBLY: &str = "rt_get_assembly";
/// Answers `Assembly.GetAssembly(Type)`
pub const RT_GET_ASSEMBLY_TYPE_ARG: &str = "rt_get_assembly_type_arg";
/// Hands out the uniform wrapper of a pending method
pub const RT_GET_WRAPPER: &str = "rt_get_wrapper";
/// Hands out the translated body of a pending method
pub const RT_GET_BODY: &str = "rt_get_body";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// How a callback is bound and which lookups find it
    pub struct BindingFlags: u8 {
        /// Bound to the orchestrator instance
        const INSTANCE = 0x01;
        /// Not bound to an instance
        const STATIC = 0x02;
        /// Visible to every caller
        const PUBLIC = 0x04;
        /// Visible to emitted code only
        const NON_PUBLIC = 0x08;
        /// Declared by the orchestrator itself
        const DECLARED_ONLY = 0x10;
    }
}

/// One callback of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callback {
    /// Name emitted code refers to
    pub name: &'static str,
    /// Binding of the callback
    pub flags: BindingFlags,
    /// Stack values taken, the orchestrator included
    pub arity: usize,
}

/// Every callback the orchestrator declares
pub const CALLBACKS: &[Callback] = &[
    Callback {
        name: RT_FIX_STACK_TRACE,
        flags: BindingFlags::STATIC.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
    Callback {
        name: RT_FIX_STACK_FRAME,
        flags: BindingFlags::STATIC.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
    Callback {
        name: RT_GET_ASSEMBLY_TYPE_ARG,
        flags: BindingFlags::STATIC.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
    Callback {
        name: RT_GET_ASSEMBLY,
        flags: BindingFlags::INSTANCE.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
    Callback {
        name: RT_GET_WRAPPER,
        flags: BindingFlags::INSTANCE.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
    Callback {
        name: RT_GET_BODY,
        flags: BindingFlags::INSTANCE.union(BindingFlags::NON_PUBLIC),
        arity: 2,
    },
];

/// The lookup emitted code performs: any binding, any visibility, declared only
pub const EMITTED_LOOKUP: BindingFlags = BindingFlags::all();

/// Finds a callback by name among those `lookup` admits
///
/// A callback matches when `lookup` admits its binding (instance or static) and its
/// visibility (public or not).
#[must_use]
pub fn find(name: &str, lookup: BindingFlags) -> Option<&'static Callback> {
    let binding = BindingFlags::INSTANCE | BindingFlags::STATIC;
    let visibility = BindingFlags::PUBLIC | BindingFlags::NON_PUBLIC;
    CALLBACKS.iter().find(|callback| {
        callback.name == name
            && lookup.intersects(callback.flags & binding)
            && lookup.intersects(callback.flags & visibility)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find() {
        let callback = find(RT_GET_BODY, EMITTED_LOOKUP).unwrap();
        assert_eq!(callback.arity, 2);
        assert!(callback.flags.contains(BindingFlags::INSTANCE));

        assert!(find(RT_FIX_STACK_TRACE, BindingFlags::STATIC | BindingFlags::NON_PUBLIC).is_some());
        assert!(find(RT_FIX_STACK_TRACE, BindingFlags::INSTANCE | BindingFlags::NON_PUBLIC).is_none());
        assert!(find(RT_GET_WRAPPER, BindingFlags::INSTANCE | BindingFlags::PUBLIC).is_none());
        assert!(find("rt_missing", EMITTED_LOOKUP).is_none());
    }

    #[test]
    fn test_every_callback_takes_two_values() {
        assert_eq!(CALLBACKS.len(), 6);
        assert!(CALLBACKS.iter().all(|callback| callback.arity == 2));
    }
}
