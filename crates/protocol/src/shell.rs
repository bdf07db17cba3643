//! Device shell commands
//!
//! Commands run through `shell:` services to read the attributes carried in
//! connect reports.

/// Android release version, e.g. `13`
pub const VERSION_COMMAND: &str = "getprop ro.build.version.release";

/// Memory information; the `MemTotal` line carries the capacity in kB
pub const MEMINFO_COMMAND: &str = "cat /proc/meminfo";

/// Installed packages, one `package:<name>` per line
pub const PACKAGES_COMMAND: &str = "pm list packages";
