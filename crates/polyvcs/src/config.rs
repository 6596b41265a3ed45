//! Repository handle configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::encoding::TextEncoding;
use crate::error::VcsError;
use crate::types::BackendKind;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_CONCURRENT_COMMANDS: usize = 8;

/// Names or paths of the native tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub git: String,
    pub hg: String,
    pub svnlook: String,
    pub svnadmin: String,
    pub tar: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: "git".into(),
            hg: "hg".into(),
            svnlook: "svnlook".into(),
            svnadmin: "svnadmin".into(),
            tar: "tar".into(),
        }
    }
}

/// Configuration shared by the dispatcher and every handle it creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcsConfig {
    /// Skip probing and use this backend
    pub kind: Option<BackendKind>,
    /// Skip working-copy detection and use this value
    pub working_copy: Option<bool>,
    /// Used by `open` when probing cannot tell a working copy from a store
    pub assume_working_copy: bool,
    pub encoding: TextEncoding,
    /// Entries per handle cache
    pub cache_capacity: usize,
    /// Upper bound on native tool processes run through a worker pool
    pub max_concurrent_commands: usize,
    pub tools: ToolPaths,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            kind: None,
            working_copy: None,
            assume_working_copy: true,
            encoding: TextEncoding::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_concurrent_commands: DEFAULT_MAX_CONCURRENT_COMMANDS,
            tools: ToolPaths::default(),
        }
    }
}

impl VcsConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, VcsError> {
        let config: VcsConfig = toml::from_str(s).map_err(|e| VcsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, VcsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), VcsError> {
        if self.cache_capacity == 0 {
            return Err(VcsError::Config("cache_capacity must be positive".into()));
        }
        if self.max_concurrent_commands == 0 {
            return Err(VcsError::Config(
                "max_concurrent_commands must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn tool(&self, tool: Tool) -> &str {
        match tool {
            Tool::Git => &self.tools.git,
            Tool::Hg => &self.tools.hg,
            Tool::Svnlook => &self.tools.svnlook,
            Tool::Svnadmin => &self.tools.svnadmin,
            Tool::Tar => &self.tools.tar,
        }
    }
}

/// The native executables the backends shell out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Git,
    Hg,
    Svnlook,
    Svnadmin,
    Tar,
}
