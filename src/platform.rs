//! Operating system families, for callers that pick commands per OS.

use std::fmt;

/// The operating system family a command is meant for.
///
/// This is a plain value: compute it once with [`Platform::current`] and pass
/// it to whatever needs to choose an OS-specific program.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Platform {
    /// Microsoft Windows.
    Windows,
    /// Apple macOS.
    Mac,
    /// Linux.
    Linux,
    /// Solaris and illumos.
    Solaris,
    /// Anything else.
    Other,
}

impl Platform {
    /// The platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Mac
        } else if cfg!(any(target_os = "linux", target_os = "android")) {
            Self::Linux
        } else if cfg!(any(target_os = "solaris", target_os = "illumos")) {
            Self::Solaris
        } else {
            Self::Other
        }
    }

    /// Whether this is a Unix-like system with a POSIX `sh`.
    #[must_use]
    pub const fn is_unix(self) -> bool {
        matches!(self, Self::Mac | Self::Linux | Self::Solaris)
    }

    /// The shell and its "run this string" flag.
    ///
    /// Returns `None` for [`Platform::Other`].
    #[must_use]
    pub const fn shell(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Windows => Some(("cmd.exe", "/C")),
            Self::Mac | Self::Linux | Self::Solaris => Some(("sh", "-c")),
            Self::Other => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "windows",
            Self::Mac => "macos",
            Self::Linux => "linux",
            Self::Solaris => "solaris",
            Self::Other => "other",
        })
    }
}
