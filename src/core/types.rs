/*!
 * Core Types
 * Identity aliases and the spawn message flag set shared across the engine
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// User id of a spawned app
pub type Uid = u32;

/// Group id of a spawned app
pub type Gid = u32;

/// Platform user (account) id, `uid / UID_BASE`
pub type UserId = u32;

/// Access token of a spawned app
pub type AccessTokenId = u64;

/// Monotonic timestamp in nanoseconds
pub type Timestamp = u64;

/// Spawn message flags the engine reads or sets
///
/// Discriminants are bit positions in the 64-bit message flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AppFlag {
    ColdBoot = 0,
    BackupExtension = 1,
    DlpManager = 2,
    Debuggable = 3,
    AccessBundleDir = 5,
    NoSandbox = 7,
    Overlay = 8,
    BundleResources = 9,
    IgnoreSandbox = 13,
    IsolatedSandbox = 14,
    ExtensionSandbox = 15,
    CloneEnable = 16,
    DeveloperMode = 17,
    AtomicService = 19,
    ChildProcess = 20,
    IsolatedSandboxType = 23,
    IsolatedNetwork = 26,
    IsolatedDataGroup = 27,
    PreInstalledHap = 29,
    GetAllProcesses = 30,
    CustomSandbox = 31,
    FileCrossApp = 32,
    FileAccessCommonDir = 33,
    DlpManagerFullControl = 34,
    DlpManagerReadOnly = 35,
    CloudFileSyncEnabled = 36,
    UnlockedStatus = 37,
    AllowIouring = 38,
    DacOverrideSensitive = 39,
}

impl AppFlag {
    /// Bit position in the flag word
    #[inline]
    pub const fn bit(self) -> u32 {
        self as u32
    }

    /// Map a policy `flags` token to a flag
    ///
    /// Unknown tokens yield `None`, which never matches any message.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "START_FLAGS_BACKUP" => Some(AppFlag::BackupExtension),
            "DLP_MANAGER_FULL_CONTROL" => Some(AppFlag::DlpManagerFullControl),
            "DLP_MANAGER_READ_ONLY" => Some(AppFlag::DlpManagerReadOnly),
            "DEVELOPER_MODE" => Some(AppFlag::DeveloperMode),
            "PREINSTALLED_HAP" => Some(AppFlag::PreInstalledHap),
            "CUSTOM_SANDBOX_HAP" => Some(AppFlag::CustomSandbox),
            "FILE_CROSS_APP" => Some(AppFlag::FileCrossApp),
            "FILE_ACCESS_COMMON_DIR" => Some(AppFlag::FileAccessCommonDir),
            "CLOUD_FILE_SYNC_ENABLED" => Some(AppFlag::CloudFileSyncEnabled),
            _ => None,
        }
    }
}

/// 64-bit message flag set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppFlags(u64);

impl AppFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn contains(&self, flag: AppFlag) -> bool {
        self.0 & (1u64 << flag.bit()) != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: AppFlag) {
        self.0 |= 1u64 << flag.bit();
    }

    #[inline]
    pub fn remove(&mut self, flag: AppFlag) {
        self.0 &= !(1u64 << flag.bit());
    }

    /// Builder-style insert
    pub fn with(mut self, flag: AppFlag) -> Self {
        self.insert(flag);
        self
    }
}

impl FromIterator<AppFlag> for AppFlags {
    fn from_iter<I: IntoIterator<Item = AppFlag>>(iter: I) -> Self {
        let mut flags = AppFlags::empty();
        for flag in iter {
            flags.insert(flag);
        }
        flags
    }
}

impl fmt::Display for AppFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
