use ciborium::value::Value as CborValue;
use uuid::Uuid;
use x509_parser::{certificate::X509Certificate, x509::X509Version};

use crate::credential::CoseAlgorithm;
use crate::passkey::errors::CeremonyError;

use super::AttestationContext;
use super::utils::{
    cert_aaguid, check_validity, get_sig_from_stmt, get_x5c, is_ca, parse_cert, stmt_failure,
    stmt_value, verify_certificate_chain, verify_with_cert,
};

const ATTESTATION_OU: &str = "Authenticator Attestation";

/// Verifies a packed attestation statement.
///
/// With `x5c` the signature is checked against the attestation certificate,
/// otherwise it is self attestation made with the credential key itself.
/// ECDAA is not supported.
pub(super) fn verify_packed_attestation(
    ctx: &AttestationContext<'_>,
    att_stmt: &[(CborValue, CborValue)],
) -> Result<(), CeremonyError> {
    let (alg, sig) = get_sig_from_stmt(att_stmt)?;
    let alg = CoseAlgorithm::from_cose_id(alg).ok_or_else(|| {
        CeremonyError::UnsupportedAlgorithm(format!("packed attestation alg {alg}"))
    })?;

    let signed_data = ctx.signed_data();

    if stmt_value(att_stmt, "ecdaaKeyId").is_some() {
        return Err(stmt_failure("ECDAA attestation not supported"));
    }

    match get_x5c(att_stmt)? {
        Some(x5c) => {
            tracing::debug!("Packed full attestation with {} certificate(s)", x5c.len());

            let leaf = parse_cert(&x5c[0])?;
            verify_packed_attestation_cert(&leaf, ctx)?;
            verify_with_cert(&x5c[0], alg, &signed_data, &sig)?;
            verify_certificate_chain(&x5c, ctx.now)?;
        }
        None => {
            tracing::debug!("Packed self attestation");

            if alg != ctx.credential_key.algorithm {
                return Err(stmt_failure(format!(
                    "self attestation alg {alg:?} differs from credential key {:?}",
                    ctx.credential_key.algorithm
                )));
            }
            ctx.credential_key
                .verify(&signed_data, &sig)
                .map_err(|_| stmt_failure("self attestation signature invalid"))?;
        }
    }

    Ok(())
}

fn verify_packed_attestation_cert(
    cert: &X509Certificate<'_>,
    ctx: &AttestationContext<'_>,
) -> Result<(), CeremonyError> {
    if cert.version() != X509Version::V3 {
        return Err(stmt_failure("attestation certificate must be X.509 v3"));
    }

    let ou_matches = cert
        .subject()
        .iter_organizational_unit()
        .any(|ou| ou.as_str().map(|s| s == ATTESTATION_OU).unwrap_or(false));
    if !ou_matches {
        return Err(stmt_failure(format!(
            "attestation certificate subject OU must be \"{ATTESTATION_OU}\""
        )));
    }

    if is_ca(cert) {
        return Err(stmt_failure("certificate must not be a CA certificate"));
    }

    if let Some(cert_aaguid) = cert_aaguid(cert)? {
        let auth_aaguid = ctx.aaguid();
        tracing::debug!(
            "Authenticator AAGUID: {}, certificate AAGUID: {}",
            Uuid::from_bytes(auth_aaguid),
            Uuid::from_bytes(cert_aaguid)
        );
        if cert_aaguid != auth_aaguid {
            return Err(stmt_failure(
                "AAGUID mismatch between certificate and authenticator data",
            ));
        }
    }

    check_validity(cert, ctx.now)
}
