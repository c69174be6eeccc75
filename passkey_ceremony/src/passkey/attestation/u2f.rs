use ciborium::value::Value as CborValue;

use crate::credential::CoseAlgorithm;
use crate::passkey::errors::CeremonyError;

use super::AttestationContext;
use super::utils::{get_sig, get_x5c, is_ca, parse_cert, stmt_failure, verify_with_cert};

/// Verifies a FIDO-U2F attestation statement.
///
/// The signed message is `0x00 | rpIdHash | clientDataHash | credentialId | publicKey`
/// where the public key is the uncompressed P-256 point of the credential.
pub(super) fn verify_u2f_attestation(
    ctx: &AttestationContext<'_>,
    att_stmt: &[(CborValue, CborValue)],
) -> Result<(), CeremonyError> {
    let sig = get_sig(att_stmt)?;
    let x5c =
        get_x5c(att_stmt)?.ok_or_else(|| stmt_failure("missing x5c in FIDO-U2F attestation"))?;
    if x5c.len() != 1 {
        return Err(stmt_failure(format!(
            "FIDO-U2F attestation must carry exactly one certificate, got {}",
            x5c.len()
        )));
    }

    let public_key = ctx
        .credential_key
        .ec_point()
        .filter(|_| ctx.credential_key.algorithm == CoseAlgorithm::Es256)
        .ok_or_else(|| stmt_failure("FIDO-U2F requires a P-256 credential key"))?;

    if is_ca(&parse_cert(&x5c[0])?) {
        return Err(stmt_failure("U2F certificate must not be a CA certificate"));
    }

    let mut verification_data = Vec::with_capacity(1 + 32 + 32 + ctx.credential_id().len() + 65);
    verification_data.push(0x00);
    verification_data.extend_from_slice(&ctx.auth_data.rp_id_hash);
    verification_data.extend_from_slice(ctx.client_data_hash);
    verification_data.extend_from_slice(ctx.credential_id());
    verification_data.extend_from_slice(&public_key);

    verify_with_cert(&x5c[0], CoseAlgorithm::Es256, &verification_data, &sig)?;

    tracing::debug!("FIDO-U2F attestation verification successful");
    Ok(())
}
