/*!
 * Sandbox Limits and Constants
 *
 * Centralized location for the fixed paths, capacities and thresholds the
 * sandbox engine relies on. Grouped by domain.
 *
 * ## Conventions
 * - Values shared with the kernel or with policy files are marked [ABI]
 * - Security-relevant constants are marked [SECURITY]
 */

use std::time::Duration;

// =============================================================================
// IDENTITY
// =============================================================================

/// Per-user uid range. `uid / UID_BASE` is the user id.
/// [ABI] Must match the platform's account layout
pub const UID_BASE: u32 = 200_000;

/// Longest bundle name accepted when building paths
pub const MAX_BUNDLE_NAME_LEN: usize = 256;

/// Supplementary gid table capacity per app
pub const MAX_APP_GIDS: usize = 64;

/// Group owning atomic-service database directories
pub const DDMS_GID: u32 = 3012;

/// Group owning atomic-service log directories
pub const LOG_GID: u32 = 1007;

/// Marker in bundle names reserved for internal spawns
pub const INTERNAL_BUNDLE_MARKER: &str = "__internal__";

/// Privileged APL values that get the public install directory
pub const PRIVILEGED_APLS: [&str; 2] = ["system_core", "system_basic"];

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Sentinel returned by raw index lookups that miss
pub const INVALID_PERMISSION_INDEX: i32 = -1;

pub const FILE_ACCESS_MANAGER_PERMISSION: &str = "ohos.permission.FILE_ACCESS_MANAGER";
pub const READ_WRITE_USER_FILE_PERMISSION: &str = "ohos.permission.READ_WRITE_USER_FILE";
pub const READ_WRITE_DOWNLOAD_PERMISSION: &str = "ohos.permission.READ_WRITE_DOWNLOAD_DIRECTORY";
pub const READ_WRITE_DESKTOP_PERMISSION: &str = "ohos.permission.READ_WRITE_DESKTOP_DIRECTORY";
pub const READ_WRITE_DOCUMENTS_PERMISSION: &str = "ohos.permission.READ_WRITE_DOCUMENTS_DIRECTORY";
pub const ACCESS_DLP_FILE_PERMISSION: &str = "ohos.permission.ACCESS_DLP_FILE";
pub const PROTECT_SCREEN_LOCK_DATA_PERMISSION: &str = "ohos.permission.PROTECT_SCREEN_LOCK_DATA";
pub const GET_ALL_PROCESSES_PERMISSION: &str = "ohos.permission.GET_ALL_PROCESSES";
pub const ALLOW_IOURING_PERMISSION: &str = "ohos.permission.ALLOW_IOURING";

// =============================================================================
// POLICY FILES
// =============================================================================

/// Default layered configuration directories, lowest priority first
pub const DEFAULT_CONFIG_DIRS: [&str; 3] = [
    "/system/etc/sandbox",
    "/chip_prod/etc/sandbox",
    "/sys_prod/etc/sandbox",
];

/// Normal app policy file name
pub const APP_SANDBOX_CONFIG: &str = "appdata-sandbox.json";

/// Isolated app policy file name
pub const ISOLATED_SANDBOX_CONFIG: &str = "appdata-sandbox-isolated.json";

/// Threshold above which policy files are parsed with simd-json (1KB)
pub const JSON_SIMD_THRESHOLD: usize = 1024;

// =============================================================================
// SANDBOX LAYOUT
// =============================================================================

/// Root directory of per-app sandboxes
pub const SANDBOX_ROOT_DIR: &str = "/mnt/sandbox/";

/// Root shared by web renderer spawns
pub const NWEB_SANDBOX_ROOT: &str = "/mnt/sandbox/com.ohos.render/";

/// Sandbox-root values that mean "use the default layout"
pub const DEFAULT_ROOT_TEMPLATES: [&str; 2] = [
    "/mnt/sandbox/<currentUserId>/<PackageName>",
    "/mnt/sandbox/<PackageName>",
];

/// Mode for directories created on the way to a mount target
pub const SANDBOX_DIR_MODE: u32 = 0o711;

/// Sources whose mount target is a single file rather than a directory
pub const SINGLE_FILE_TARGETS: [&str; 3] =
    ["system/etc/hosts", "system/etc/profile", "system/etc/sudoers"];

/// Mounts slower than this are reported
pub const SLOW_MOUNT_THRESHOLD: Duration = Duration::from_micros(500);

// =============================================================================
// EXTERNAL INPUT MOUNTS
// =============================================================================

/// Installed HSP location
pub const HSP_INSTALL_PATH: &str = "/data/app/el1/bundle/public/";

/// HSP location inside the sandbox
pub const HSP_SANDBOX_PATH: &str = "/data/storage/el1/bundle/";

/// Overlay location inside the sandbox
pub const OVERLAY_SANDBOX_PATH: &str = "/data/storage/overlay/";

/// Separator between overlay hap paths
pub const OVERLAY_SEPARATOR: char = '|';

/// Bundle resource source directory
pub const BUNDLE_RESOURCE_SRC: &str = "/data/service/el1/public/bms/bundle_resources/";

/// Bundle resource location inside the sandbox
pub const BUNDLE_RESOURCE_DEST: &str = "/data/storage/bundle_resources/";

/// Public install directory mounted for privileged apps
pub const PUBLIC_INSTALL_PATH: &str = "/data/app/el1/bundle/public/";

/// Location of the public install directory inside the sandbox
pub const DATA_BUNDLES_PATH: &str = "/data/bundles/";

/// Data group destination per encryption level, with the permission el5 needs
pub const DATA_GROUP_TEMPLATES: [(&str, &str, Option<&str>); 4] = [
    ("el2", "/data/storage/el2/group/", None),
    ("el3", "/data/storage/el3/group/", None),
    ("el4", "/data/storage/el4/group/", None),
    ("el5", "/data/storage/el5/group/", Some(PROTECT_SCREEN_LOCK_DATA_PERMISSION)),
];

// =============================================================================
// SHARED MOUNTS (pre-fork)
// =============================================================================

/// Storage subtrees made shared while the user is locked
pub const SHARED_STORAGE_DIRS: [(&str, Option<&str>); 4] = [
    ("/data/storage/el2", None),
    ("/data/storage/el3", None),
    ("/data/storage/el4", None),
    ("/data/storage/el5", Some(PROTECT_SCREEN_LOCK_DATA_PERMISSION)),
];

/// Suffix of the stamp directory marking a sandbox built while locked
pub const LOCKED_STAMP_SUFFIX: &str = "_locked";

/// Lock status parameter value meaning unlocked
pub const LOCK_STATUS_UNLOCKED: &str = "0";

// =============================================================================
// NWEB
// =============================================================================

/// Individual section applied to web render processes
pub const NWEB_RENDER_KEY: &str = "__internal__.com.ohos.render";

/// Individual section applied to web gpu processes
pub const NWEB_GPU_KEY: &str = "__internal__.com.ohos.gpu";

// =============================================================================
// DLP
// =============================================================================

/// Bundle receiving the FUSE mount strategy
pub const DLP_BUNDLE_NAME: &str = "com.ohos.dlpmanager";

/// Sandbox path the FUSE strategy applies to
pub const DLP_FUSE_PATH: &str = "/mnt/data/fuse";

/// FUSE control device
pub const FUSE_DEVICE: &str = "/dev/fuse";

/// SELinux context applied to the DLP fuse mount
pub const DLP_FUSE_CONTEXT: &str = "u:object_r:dlp_fuse_file:s0";

// =============================================================================
// DEBUG SANDBOX
// =============================================================================

/// Temporary debug hap root template
pub const DEBUG_TMP_ROOT: &str = "/mnt/debugtmp/<currentUserId>/debug_hap/<variablePackageName>";

/// Shared debug hap root template
pub const DEBUG_SHARE_ROOT: &str = "/mnt/debug/<currentUserId>/debug_hap/<variablePackageName>";

/// Prefix of temporary debug roots
pub const DEBUG_TMP_PREFIX: &str = "/mnt/debugtmp/";

/// Prefix of shared debug roots
pub const DEBUG_SHARE_PREFIX: &str = "/mnt/debug/";

/// File system type of the shared debug root
pub const DEBUG_SHAREFS_TYPE: &str = "sharefs";

/// Provision type that enables the debug sandbox
pub const DEBUG_PROVISION_TYPE: &str = "debug";

// =============================================================================
// DEC (kernel path access control)
// =============================================================================

/// DEC control device
/// [ABI]
pub const DEC_DEVICE: &str = "/dev/dec";

/// Maximum paths per DEC control request
/// [ABI] Fixed array size in the kernel request struct
pub const MAX_POLICY_NUM: usize = 8;

/// Reserved header words in the kernel request struct
/// [ABI]
pub const DEC_POLICY_HEADER_RESERVED: usize = 64;

/// Read access mode bit
pub const DEC_MODE_READ: u32 = 0x0000_0001;

/// Write access mode bit
pub const DEC_MODE_WRITE: u32 = DEC_MODE_READ << 1;

/// Deny-inherit mode bit
pub const DEC_MODE_DENY_INHERIT: u32 = 1 << 9;

/// Directories constrained to read-only at service start
/// [SECURITY]
pub const DEC_CONSTRAINT_DIRS: [&str; 7] = [
    "/storage/Users",
    "/storage/External",
    "/storage/Share",
    "/storage/hmdfs",
    "/mnt/data/fuse",
    "/mnt/debug",
    "/storage/userExternal",
];

/// Forced prefixes installed at service start
/// [SECURITY]
pub const DEC_FORCED_PREFIXES: [&str; 1] = ["/storage/Users/currentUser/appdata"];

/// Download directory template for cloned apps
pub const DEC_CLONE_DOWNLOAD_DIR: &str = "/storage/Users/currentUser/Download/";

// =============================================================================
// SYSTEM PARAMETERS
// =============================================================================

/// Parameter naming the web engine package
pub const PARAM_ARKWEB_PACKAGE: &str = "persist.arkwebcore.package_name";

/// Parameter naming the device model
pub const PARAM_DEVICE_MODEL: &str = "const.cust.devmodel";

/// Parameter selecting the full file-manager mount layout
pub const PARAM_FULL_MOUNT_ENABLE: &str = "const.filemanager.full_mount.enable";

/// Parameter prefix for per-user lock status
pub const PARAM_LOCK_STATUS_PREFIX: &str = "startup.appspawn.lockstatus_";
