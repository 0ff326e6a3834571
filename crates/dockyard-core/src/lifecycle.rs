use crate::CoreError;
use dockyard_schema::VersionState;

/// Freezing is one-way. Re-freezing a frozen version is allowed and is a
/// no-op for the caller.
pub fn validate_transition(from: VersionState, to: VersionState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (VersionState::Mutable, VersionState::Mutable | VersionState::Frozen)
            | (VersionState::Frozen, VersionState::Frozen)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
