use std::env;

pub const ASTER_FILE_EXTENSION: &str = "as";

/// The lockfile doubles as the workspace-root marker.
pub const LOCKFILE_NAME: &str = "aster.lock";
pub const SRC_DIR_NAME: &str = "src";
pub const DEP_DIR_NAME: &str = "libraries";
pub const LIB_ENTRY_STEM: &str = "lib";

// This is a guess about how much should be initially allocated for the token vec.
// Just a heuristic to avoid the first few reallocations on typical units.
pub const SRC_TO_TOKEN_RATIO: usize = 5;

/// Hard cap on call arguments, matching the fixed-size argument buffer.
pub const MAX_CALL_ARGS: usize = 32;

/// Diagnostics truncate the offending token's text to this many bytes.
pub const ERROR_EXCERPT_LIMIT: usize = 40;

pub const CACHE_KEY_LABEL: &str = "asterc-cache-v1";

// Environment toggles. Empty or "0" means off, anything else is on.
pub const ENV_CACHE: &str = "CACHE";
pub const ENV_CACHE_DIR: &str = "CACHE_DIR";
pub const ENV_OLEVEL: &str = "OLEVEL";
pub const ENV_DEBUG: &str = "DEBUG";
pub const ENV_NATIVE: &str = "NATIVE";
pub const ENV_FAST_MATH: &str = "FAST_MATH";
pub const ENV_LINK_OBJ: &str = "LINK_OBJ";
pub const ENV_LINK_ACCELERATE: &str = "LINK_ACCELERATE";
pub const ENV_DUMP_AST: &str = "DUMP_AST";
pub const ENV_DUMP_HIR: &str = "DUMP_HIR";

/// Reads an on/off environment toggle. Unset, empty and "0" are all off.
pub fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => !value.is_empty() && value != "0",
        Err(_) => false,
    }
}

/// Reads the optimization level from `OLEVEL`. Only 0, 2 and 3 are
/// recognized; anything else falls back to the default of 2.
pub fn env_olevel() -> u8 {
    match env::var(ENV_OLEVEL).ok().as_deref() {
        Some("0") => 0,
        Some("3") => 3,
        _ => 2,
    }
}
