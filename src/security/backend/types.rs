/*!
 * Syscall Backend Types
 * Platform-agnostic request, flag and error types for mount/namespace syscalls
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum BackendError {
    #[error("{op} failed on {path}: errno {errno}")]
    Syscall { op: String, path: String, errno: i32 },

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BackendError {
    pub fn syscall(op: &str, path: &str, errno: i32) -> Self {
        BackendError::Syscall {
            op: op.to_string(),
            path: path.to_string(),
            errno,
        }
    }

    /// Raw errno for syscall failures
    pub fn errno(&self) -> Option<i32> {
        match self {
            BackendError::Syscall { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    pub fn is_errno(&self, errno: nix::errno::Errno) -> bool {
        self.errno() == Some(errno as i32)
    }
}

// ============================================================================
// Mount flags
// ============================================================================

/// Mount flag word with Linux `MS_*` bit values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountFlags(u64);

impl MountFlags {
    pub const RDONLY: Self = Self(1);
    pub const NOSUID: Self = Self(2);
    pub const NODEV: Self = Self(4);
    pub const NOEXEC: Self = Self(8);
    pub const REMOUNT: Self = Self(32);
    pub const NOATIME: Self = Self(1024);
    pub const BIND: Self = Self(4096);
    pub const MOVE: Self = Self(8192);
    pub const REC: Self = Self(16384);
    pub const UNBINDABLE: Self = Self(1 << 17);
    pub const PRIVATE: Self = Self(1 << 18);
    pub const SLAVE: Self = Self(1 << 19);
    pub const SHARED: Self = Self(1 << 20);
    pub const LAZYTIME: Self = Self(1 << 25);

    /// Default flags for a mount point that names none
    pub const BASIC: Self = Self(Self::REC.0 | Self::BIND.0);

    const TOKENS: [(&'static str, &'static str, MountFlags); 13] = [
        ("rec", "MS_REC", Self::REC),
        ("bind", "MS_BIND", Self::BIND),
        ("move", "MS_MOVE", Self::MOVE),
        ("slave", "MS_SLAVE", Self::SLAVE),
        ("rdonly", "MS_RDONLY", Self::RDONLY),
        ("shared", "MS_SHARED", Self::SHARED),
        ("unbindable", "MS_UNBINDABLE", Self::UNBINDABLE),
        ("remount", "MS_REMOUNT", Self::REMOUNT),
        ("nosuid", "MS_NOSUID", Self::NOSUID),
        ("nodev", "MS_NODEV", Self::NODEV),
        ("noexec", "MS_NOEXEC", Self::NOEXEC),
        ("noatime", "MS_NOATIME", Self::NOATIME),
        ("lazytime", "MS_LAZYTIME", Self::LAZYTIME),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a single policy token (`"bind"` or `"MS_BIND"`)
    pub fn from_token(token: &str) -> Option<Self> {
        Self::TOKENS
            .iter()
            .find(|(short, long, _)| *short == token || *long == token)
            .map(|(_, _, flag)| *flag)
    }

    /// Fold a token list; unknown tokens contribute nothing
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        tokens
            .iter()
            .filter_map(|t| Self::from_token(t.as_ref()))
            .fold(Self::empty(), |acc, f| acc | f)
    }
}

impl BitOr for MountFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MountFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for MountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::TOKENS
            .iter()
            .filter(|(_, _, flag)| self.contains(*flag))
            .map(|(_, long, _)| *long)
            .collect();
        if names.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Mount propagation applied after a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    Shared,
    Slave,
}

impl Propagation {
    pub fn flags(self) -> MountFlags {
        match self {
            Propagation::Shared => MountFlags::SHARED,
            Propagation::Slave => MountFlags::SLAVE,
        }
    }
}

// ============================================================================
// Namespace flags
// ============================================================================

/// Namespaces a spawn participates in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceFlags {
    pub mount: bool,
    pub pid: bool,
    pub net: bool,
}

impl NamespaceFlags {
    pub const fn none() -> Self {
        Self {
            mount: false,
            pid: false,
            net: false,
        }
    }

    /// Mount namespace only
    pub const fn mount_only() -> Self {
        Self {
            mount: true,
            pid: false,
            net: false,
        }
    }

    /// Parse `sandbox-ns-flags` tokens ("pid", "net")
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let mut flags = Self::none();
        for token in tokens {
            match token.as_ref() {
                "pid" => flags.pid = true,
                "net" => flags.net = true,
                _ => {}
            }
        }
        flags
    }

    pub fn is_empty(&self) -> bool {
        !(self.mount || self.pid || self.net)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A single mount(2) call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: Option<String>,
    pub target: String,
    pub fs_type: Option<String>,
    pub flags: MountFlags,
    pub data: Option<String>,
}

impl MountRequest {
    /// Bind-style mount of `source` onto `target`
    pub fn bind(source: &str, target: &str, flags: MountFlags) -> Self {
        Self {
            source: Some(source.to_string()),
            target: target.to_string(),
            fs_type: None,
            flags,
            data: None,
        }
    }

    /// Propagation change on an existing mount point
    pub fn propagation(target: &str, flags: MountFlags) -> Self {
        Self {
            source: None,
            target: target.to_string(),
            fs_type: None,
            flags,
            data: None,
        }
    }

    pub fn with_fs_type(mut self, fs_type: &str) -> Self {
        if !fs_type.is_empty() {
            self.fs_type = Some(fs_type.to_string());
        }
        self
    }

    pub fn with_data(mut self, data: &str) -> Self {
        if !data.is_empty() {
            self.data = Some(data.to_string());
        }
        self
    }
}

// ============================================================================
// DEC control requests
// ============================================================================

/// DEC device control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecCommand {
    SetPolicy,
    DeletePolicy,
    CheckPolicy,
    ConstraintPolicy,
    DenyPolicy,
    SetPrefix,
}

impl DecCommand {
    /// ioctl number within the `'s'` magic
    pub const fn id(self) -> u8 {
        match self {
            DecCommand::SetPolicy => 1,
            DecCommand::DeletePolicy => 2,
            DecCommand::CheckPolicy => 4,
            DecCommand::ConstraintPolicy => 6,
            DecCommand::DenyPolicy => 7,
            DecCommand::SetPrefix => 8,
        }
    }
}

/// One path rule in a DEC request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecPathEntry {
    pub path: String,
    pub mode: u32,
}

impl DecPathEntry {
    pub fn new(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }
}

/// Full DEC control request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecRequest {
    pub token_id: u64,
    pub timestamp: u64,
    pub user_id: i32,
    pub flag: bool,
    pub paths: Vec<DecPathEntry>,
}

// ============================================================================
// Recorded calls
// ============================================================================

/// Backend call as recorded by the simulation backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "call")]
pub enum BackendCall {
    Mount(MountRequest),
    Umount { target: String, detach: bool },
    Symlink { target: String, link: String },
    CreateDir { path: String, mode: u32 },
    CreateFile { path: String },
    RemoveDir { path: String },
    Chmod { path: String, mode: u32 },
    Chown { path: String, uid: u32, gid: u32 },
    Unshare(NamespaceFlags),
    LoopbackUp,
    Chdir { path: String },
    Chroot { path: String },
    PivotRoot { new_root: String, put_old: String },
    OpenFuse,
    Dec { command: DecCommand, request: DecRequest },
}

/// Backend platform type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPlatform {
    Linux,
    Simulation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_flag_tokens() {
        let flags = MountFlags::from_tokens(&["bind", "MS_REC", "rdonly"]);
        assert!(flags.contains(MountFlags::BIND));
        assert!(flags.contains(MountFlags::REC));
        assert!(flags.contains(MountFlags::RDONLY));
        assert!(!flags.contains(MountFlags::SLAVE));
    }

    #[test]
    fn test_unknown_mount_tokens_ignored() {
        let flags = MountFlags::from_tokens(&["bogus", "also-bogus"]);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_mount_flags_display() {
        assert_eq!(MountFlags::BASIC.to_string(), "MS_REC|MS_BIND");
        assert_eq!(MountFlags::empty().to_string(), "0");
    }

    #[test]
    fn test_namespace_tokens() {
        let flags = NamespaceFlags::from_tokens(&["pid", "net", "uts"]);
        assert!(flags.pid);
        assert!(flags.net);
        assert!(!flags.mount);
    }

    #[test]
    fn test_backend_error_errno() {
        let err = BackendError::syscall("mount", "/a", nix::errno::Errno::ENOENT as i32);
        assert!(err.is_errno(nix::errno::Errno::ENOENT));
        assert!(!err.is_errno(nix::errno::Errno::EINVAL));
        assert_eq!(BackendError::InvalidArgument("x".into()).errno(), None);
    }
}
