//! Units, defaults and fixed labels.

/// One kibibyte.
pub const KIB: u64 = 1024;
/// One mebibyte.
pub const MIB: u64 = KIB * 1024;
/// One gibibyte.
pub const GIB: u64 = MIB * 1024;

/// One full CPU expressed in the runtime's nano-CPU unit.
pub const NANO_CPUS_PER_CPU: i64 = 1_000_000_000;

/// Default overall deadline for a scenario run, in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;

/// Default timeout for the container teardown step, in seconds.
///
/// Teardown does not share the caller's deadline, which may already be spent.
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 15;

/// Volume driver backing the capacity-bounded scenario volumes.
pub const VOLUME_DRIVER: &str = "local";

/// Label key attached to every volume this harness creates.
pub const SCENARIO_LABEL_KEY: &str = "scenario";

/// Label value attached to every volume this harness creates.
pub const SCENARIO_LABEL_VALUE: &str = "resource-limit";

/// Number of characters kept when abbreviating a container ID.
pub const SHORT_ID_LEN: usize = 12;

/// Prefix of the environment variables that override configuration.
pub const ENV_PREFIX: &str = "LIMITLAB_";

/// Binary name, as shown in usage and version output.
pub const APP_NAME: &str = "limitlab";
