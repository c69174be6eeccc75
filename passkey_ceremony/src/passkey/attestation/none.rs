use ciborium::value::Value as CborValue;

use crate::passkey::errors::CeremonyError;

use super::utils::stmt_failure;

/// `none` carries no statement; the credential is trusted on first use.
pub(super) fn verify_none_attestation(
    att_stmt: &[(CborValue, CborValue)],
) -> Result<(), CeremonyError> {
    if !att_stmt.is_empty() {
        return Err(stmt_failure("attStmt must be empty for none attestation"));
    }
    Ok(())
}
