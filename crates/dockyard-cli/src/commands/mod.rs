pub mod completions;
pub mod freeze;
pub mod graph;
pub mod inspect;
pub mod list;
pub mod refresh;
pub mod register;
pub mod sync;
pub mod tools;
pub mod verify_store;
pub mod versions;

use dockyard_core::{CoreError, Engine};
use dockyard_schema::Entry;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_FREEZE_ERROR: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

#[allow(clippy::needless_pass_by_value)]
pub fn describe(err: CoreError) -> String {
    err.to_string()
}

/// Resolve an entry by ID or catalog path.
pub fn resolve_entry(engine: &Engine, input: &str) -> Result<Entry, String> {
    engine.find_entry(input).map_err(|e| match e {
        CoreError::EntryNotFound(_) => format!("no entry matching '{input}'"),
        other => other.to_string(),
    })
}
