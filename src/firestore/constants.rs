pub(crate) const DEFAULT_DATABASE_ID: &str = "(default)";

/// The one target every listen session registers.
pub(crate) const WATCH_TARGET_ID: i32 = 1;

pub(crate) const FIRESTORE_EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";

/// Bearer token the local emulator accepts in place of a real credential.
pub(crate) const EMULATOR_OWNER_TOKEN: &str = "owner";
