//! Repair of runtime self-introspection.
//!
//! Frames executing sandboxed code carry synthetic names. Before such a frame is observed by
//! the sandboxed code itself it is replaced: a wrapper frame reports the original method, a
//! body frame reports the method that appears to call it. When no caller was recorded, a
//! member of the original's own component stands in: its entry point, else the first method
//! it defines, else the original itself.

use std::sync::Arc;

use crate::{
    runtime::{FrameIdentity, RuntimeMethod},
    sandbox::{pending::SyntheticRole, Sandbox},
    Error, Result,
};

impl Sandbox {
    /// Replaces a frame carrying a synthetic name with the method it stands for
    ///
    /// # Errors
    /// Returns [`Error::IntrospectionInvariant`] for synthetic names this session never
    /// handed out.
    pub fn repair_frame(&self, frame: &FrameIdentity) -> Result<FrameIdentity> {
        let FrameIdentity::Synthetic(name) = frame else {
            return Ok(frame.clone());
        };
        let Some(role) = self.role_of(name) else {
            return Err(Error::IntrospectionInvariant(name.to_string()));
        };

        let method = match role {
            SyntheticRole::Wrapper(index) => self.pending(index)?.method().clone(),
            SyntheticRole::Body(index) => {
                let pending = self.pending(index)?;
                match pending.apparent_caller() {
                    Some(caller) => caller,
                    None => self.stand_in(pending.method()),
                }
            }
        };
        log::trace!("Frame {} reports {}", name, method);
        Ok(FrameIdentity::Method(method))
    }

    /// Repairs every frame of a stack trace, innermost first
    ///
    /// # Errors
    /// Returns [`Error::IntrospectionInvariant`] for an unknown synthetic frame.
    pub fn repair_frames(&self, frames: &[FrameIdentity]) -> Result<Arc<[FrameIdentity]>> {
        frames.iter().map(|frame| self.repair_frame(frame)).collect()
    }

    /// The member of the original's component reported when no caller is known
    pub(super) fn stand_in(&self, original: &RuntimeMethod) -> RuntimeMethod {
        let component = original
            .component()
            .and_then(|id| self.resolver().host().component(id));
        let Some(component) = component else {
            return original.clone();
        };

        component
            .entry_point()
            .or_else(|| component.first_method())
            .and_then(|def| RuntimeMethod::from_def(&def))
            .unwrap_or_else(|| original.clone())
    }
}
