//! Component identities.
//!
//! Every loaded component (a .NET assembly) is identified by its simple name and version.
//! The identity is what resolution scopes of [`crate::metadata::references::TypeRef`]s point
//! at, and what the host uses to key its component table.

use std::fmt;

/// Four part assembly version (`major.minor.build.revision`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major version number
    pub major: u16,
    /// Minor version number
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Creates a new version
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Identity of a component, equivalent to an assembly name without culture and key token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyIdentity {
    /// Simple name of the component (`mscorlib`, `Target`)
    pub name: String,
    /// Version of the component
    pub version: AssemblyVersion,
}

impl AssemblyIdentity {
    /// Creates a new identity
    ///
    /// # Arguments
    /// * `name` - Simple name of the component
    /// * `version` - Version of the component
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        AssemblyIdentity {
            name: name.into(),
            version,
        }
    }

    /// Returns the display name, `Name, Version=1.2.3.4`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}, Version={}", self.name, self.version)
    }

    /// Compares the simple names of two identities, the way references across component
    /// versions are matched.
    #[must_use]
    pub fn same_name(&self, other: &AssemblyIdentity) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let identity = AssemblyIdentity::new("Target", AssemblyVersion::new(1, 2, 0, 7));
        assert_eq!(identity.full_name(), "Target, Version=1.2.0.7");
        assert_eq!(format!("{identity}"), "Target, Version=1.2.0.7");
    }

    #[test]
    fn test_same_name_ignores_version_and_case() {
        let a = AssemblyIdentity::new("mscorlib", AssemblyVersion::new(2, 0, 0, 0));
        let b = AssemblyIdentity::new("MSCORLIB", AssemblyVersion::new(4, 0, 0, 0));
        assert!(a.same_name(&b));
        assert_ne!(a, b);
    }
}
