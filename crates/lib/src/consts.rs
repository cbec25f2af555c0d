/// Application name used for data and cache directories.
pub const APP_NAME: &str = "buildpkg";

/// File name looked up when a definition path points at a directory.
pub const DEFINITION_FILE: &str = "buildpkg.lua";

/// Overrides the directory that holds per-build workspaces.
pub const WORK_DIR_ENV: &str = "BUILDPKG_WORK_DIR";

/// Overrides the shared download cache directory.
pub const CACHE_DIR_ENV: &str = "BUILDPKG_CACHE_DIR";

/// Version recorded for packages that resolve no version at all.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Length of a lowercase hex SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Length of the random-looking suffix of a workspace directory name.
pub const WORKSPACE_ID_LEN: usize = 12;

/// Context globals injected into every build.
pub const ARCH_GLOBAL: &str = "ARCH";
pub const SRC_DIR_GLOBAL: &str = "SRC_DIR";
pub const PKG_DIR_GLOBAL: &str = "PKG_DIR";
pub const PKG_VERSION_GLOBAL: &str = "PKG_VERSION";

/// All context global names, in injection order.
pub const CONTEXT_GLOBALS: &[&str] = &[ARCH_GLOBAL, SRC_DIR_GLOBAL, PKG_DIR_GLOBAL, PKG_VERSION_GLOBAL];

/// Name of the metadata table every definition must declare.
pub const INFO_GLOBAL: &str = "INFO";
