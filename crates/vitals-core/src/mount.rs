//! Mount options for a stats filesystem instance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mode applied to the mount root when none is given.
pub const DEFAULT_ROOT_MODE: u16 = 0o700;

/// Ownership and permission options of a mount, parsed from the
/// comma-separated `uid=<u>,gid=<g>,mode=<octal>` form.
///
/// Unknown options are ignored, as mounts traditionally do; malformed
/// values for the known keys are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    /// Owning user id of the mount root.
    #[serde(default)]
    pub uid: u32,
    /// Owning group id of the mount root.
    #[serde(default)]
    pub gid: u32,
    /// Permission bits of the mount root.
    #[serde(default = "default_mode")]
    pub mode: u16,
}

const fn default_mode() -> u16 {
    DEFAULT_ROOT_MODE
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: DEFAULT_ROOT_MODE,
        }
    }
}

impl MountOptions {
    /// Parses the comma-separated option string.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when a known key carries a value that
    /// does not parse.
    pub fn parse(data: &str) -> Result<Self> {
        let mut options = Self::default();
        for raw in data.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match raw.split_once('=') {
                Some(("uid", v)) => {
                    options.uid = v
                        .parse()
                        .map_err(|_| Error::InvalidArgument(format!("bad uid value {v:?}")))?;
                }
                Some(("gid", v)) => {
                    options.gid = v
                        .parse()
                        .map_err(|_| Error::InvalidArgument(format!("bad gid value {v:?}")))?;
                }
                Some(("mode", v)) => {
                    let mode = u16::from_str_radix(v, 8)
                        .map_err(|_| Error::InvalidArgument(format!("bad mode value {v:?}")))?;
                    options.mode = mode & 0o7777;
                }
                // Unknown options are silently ignored.
                _ => {}
            }
        }
        Ok(options)
    }
}

impl FromStr for MountOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MountOptions {
    /// Renders only the non-default options, in `uid=,gid=,mode=` order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.uid != 0 {
            parts.push(format!("uid={}", self.uid));
        }
        if self.gid != 0 {
            parts.push(format!("gid={}", self.gid));
        }
        if self.mode != DEFAULT_ROOT_MODE {
            parts.push(format!("mode={:o}", self.mode));
        }
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MountOptions::default();
        assert_eq!(options.uid, 0);
        assert_eq!(options.gid, 0);
        assert_eq!(options.mode, 0o700);
        assert_eq!(MountOptions::parse("").unwrap(), options);
    }

    #[test]
    fn test_parse_all_keys() {
        let options = MountOptions::parse("uid=1000,gid=50,mode=750").unwrap();
        assert_eq!(options.uid, 1000);
        assert_eq!(options.gid, 50);
        assert_eq!(options.mode, 0o750);
    }

    #[test]
    fn test_unknown_options_ignored() {
        let options = MountOptions::parse("uid=7,nodev,relatime,foo=bar").unwrap();
        assert_eq!(options.uid, 7);
        assert_eq!(options.mode, DEFAULT_ROOT_MODE);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(MountOptions::parse("uid=alice").is_err());
        assert!(MountOptions::parse("gid=-1").is_err());
        assert!(MountOptions::parse("mode=99").is_err());
    }

    #[test]
    fn test_mode_masked_to_permission_bits() {
        let options = MountOptions::parse("mode=107777").unwrap();
        assert_eq!(options.mode, 0o7777);
    }

    #[test]
    fn test_serde_round_trip() {
        let options = MountOptions::parse("uid=1000,gid=50,mode=750").unwrap();
        let json = serde_json::to_string(&options).unwrap();
        let back: MountOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);

        // Omitted fields fall back to the defaults.
        let sparse: MountOptions = serde_json::from_str("{\"uid\": 7}").unwrap();
        assert_eq!(sparse.uid, 7);
        assert_eq!(sparse.mode, DEFAULT_ROOT_MODE);
    }

    #[test]
    fn test_display_renders_non_defaults_only() {
        assert_eq!(MountOptions::default().to_string(), "");
        let options = MountOptions::parse("uid=1000,mode=755").unwrap();
        assert_eq!(options.to_string(), "uid=1000,mode=755");
        let options = MountOptions::parse("gid=5").unwrap();
        assert_eq!(options.to_string(), "gid=5");
    }
}
