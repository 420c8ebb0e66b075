// navgen-shared - ambient services for the navigation tile tools
//
// Logging bootstrap and run-settings loading used by every binary in the
// workspace.

pub mod config;
pub mod log;

/// Environment variable prefix for run-setting overrides (e.g. `Navgen_Threads`)
pub const ENV_PREFIX: &str = "Navgen_";
