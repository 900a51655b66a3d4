use crate::host::HostRegistry;
use std::env;
use std::path::PathBuf;

/// Name of the root closure every VM starts with.
pub const ROOT_CLOSURE: &str = "__G";

/// Default bound on nested lambda calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Environment variable holding extra module directories.
pub const PATH_ENV: &str = "CHEVRON_PATH";

/// Construction options for a [`crate::Vm`].
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub search_path: Vec<PathBuf>,
    pub host: HostRegistry,
    pub root_name: String,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            search_path: Vec::new(),
            host: HostRegistry::with_defaults(),
            root_name: ROOT_CLOSURE.to_string(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directory to the module search path.
    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir.into());
        self
    }

    pub fn search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Appends the directories listed in `var`, using the platform's
    /// path-list syntax. A missing variable adds nothing.
    pub fn env_search_path(self, var: &str) -> Self {
        match env::var_os(var) {
            Some(list) => self.search_dirs(env::split_paths(&list)),
            None => self,
        }
    }

    /// Replaces the host function table reachable through `sys`.
    pub fn host(mut self, host: HostRegistry) -> Self {
        self.host = host;
        self
    }

    pub fn root_name(mut self, name: &str) -> Self {
        self.root_name = name.to_string();
        self
    }

    /// Calls nested deeper than this fail with a recursion-limit error.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}
