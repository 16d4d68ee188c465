/*!
 * Sandbox Types
 * Fully resolved operations handed to the executor
 */

use crate::security::backend::{MountFlags, MountRequest, Propagation};
use serde::{Deserialize, Serialize};

/// One resolved mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOp {
    pub source: String,
    pub target: String,
    pub fs_type: Option<String>,
    pub flags: MountFlags,
    pub options: Option<String>,
    pub propagation: Propagation,
    pub check_action_status: bool,
}

impl MountOp {
    /// Bind mount with slave propagation
    pub fn bind(source: impl Into<String>, target: impl Into<String>, flags: MountFlags) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fs_type: None,
            flags,
            options: None,
            propagation: Propagation::Slave,
            check_action_status: false,
        }
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_fs_type(mut self, fs_type: &str) -> Self {
        if !fs_type.is_empty() {
            self.fs_type = Some(fs_type.to_string());
        }
        self
    }

    pub fn with_options(mut self, options: &str) -> Self {
        if !options.is_empty() {
            self.options = Some(options.to_string());
        }
        self
    }

    pub fn checked(mut self, check: bool) -> Self {
        self.check_action_status = check;
        self
    }

    /// Either path empty: nothing to do
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() || self.target.is_empty()
    }

    pub fn request(&self) -> MountRequest {
        let mut request = MountRequest::bind(&self.source, &self.target, self.flags);
        if let Some(fs_type) = &self.fs_type {
            request = request.with_fs_type(fs_type);
        }
        if let Some(options) = &self.options {
            request = request.with_data(options);
        }
        request
    }
}

/// One resolved symlink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkOp {
    pub target: String,
    pub link: String,
    pub check_action_status: bool,
}

/// Whether executor failures reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Checked,
    /// Failures are logged and swallowed
    NoCheck,
}

/// Parse a `dest-mode` string such as `"S_IRUSR | S_IWOTH | S_IRWXU"`
///
/// Unknown names contribute nothing; returns 0 when nothing matched.
pub fn parse_dest_mode(text: &str) -> u32 {
    text.split('|')
        .map(str::trim)
        .filter_map(|name| match name {
            "S_IRUSR" => Some(0o400),
            "S_IWUSR" => Some(0o200),
            "S_IXUSR" => Some(0o100),
            "S_IRWXU" => Some(0o700),
            "S_IRGRP" => Some(0o040),
            "S_IWGRP" => Some(0o020),
            "S_IXGRP" => Some(0o010),
            "S_IRWXG" => Some(0o070),
            "S_IROTH" => Some(0o004),
            "S_IWOTH" => Some(0o002),
            "S_IXOTH" => Some(0o001),
            "S_IRWXO" => Some(0o007),
            _ => None,
        })
        .fold(0, |acc, bits| acc | bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dest_mode() {
        assert_eq!(parse_dest_mode("S_IRUSR | S_IWOTH | S_IRWXU "), 0o702);
        assert_eq!(parse_dest_mode("S_IRWXU|S_IRGRP|S_IXGRP"), 0o750);
        assert_eq!(parse_dest_mode("bogus"), 0);
    }

    #[test]
    fn test_mount_op_request() {
        let op = MountOp::bind("/a", "/b", MountFlags::BASIC)
            .with_fs_type("sharefs")
            .with_options("");
        let request = op.request();
        assert_eq!(request.source.as_deref(), Some("/a"));
        assert_eq!(request.fs_type.as_deref(), Some("sharefs"));
        assert_eq!(request.data, None);
        assert!(!op.is_empty());
        assert!(MountOp::bind("", "/b", MountFlags::BASIC).is_empty());
    }
}
