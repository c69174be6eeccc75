use chrono::{DateTime, Utc};
use ciborium::value::Value as CborValue;
use x509_parser::{certificate::X509Certificate, prelude::*, time::ASN1Time};

use crate::credential::CoseAlgorithm;
use crate::passkey::errors::{CeremonyError, VerificationStep};

// id-fido-gen-ce-aaguid
const OID_FIDO_GEN_CE_AAGUID: &str = "1.3.6.1.4.1.45724.1.1.4";

pub(super) fn stmt_failure(reason: impl Into<String>) -> CeremonyError {
    CeremonyError::failed(VerificationStep::AttestationStatement, reason)
}

pub(super) fn stmt_value<'a>(
    att_stmt: &'a [(CborValue, CborValue)],
    key: &str,
) -> Option<&'a CborValue> {
    att_stmt.iter().find_map(|(k, v)| match k {
        CborValue::Text(k) if k == key => Some(v),
        _ => None,
    })
}

/// Returns the `sig` byte string of a statement.
pub(super) fn get_sig(att_stmt: &[(CborValue, CborValue)]) -> Result<Vec<u8>, CeremonyError> {
    match stmt_value(att_stmt, "sig") {
        Some(CborValue::Bytes(sig)) => Ok(sig.clone()),
        _ => Err(stmt_failure("missing or invalid sig")),
    }
}

/// Returns the `alg` and `sig` of a statement.
pub(super) fn get_sig_from_stmt(
    att_stmt: &[(CborValue, CborValue)],
) -> Result<(i64, Vec<u8>), CeremonyError> {
    let alg = match stmt_value(att_stmt, "alg") {
        Some(CborValue::Integer(alg)) => {
            i64::try_from(*alg).map_err(|_| stmt_failure("alg out of range"))?
        }
        _ => return Err(stmt_failure("missing or invalid alg")),
    };
    Ok((alg, get_sig(att_stmt)?))
}

/// Returns the DER certificates of `x5c`, leaf first, or `None` if absent.
pub(super) fn get_x5c(
    att_stmt: &[(CborValue, CborValue)],
) -> Result<Option<Vec<Vec<u8>>>, CeremonyError> {
    let Some(value) = stmt_value(att_stmt, "x5c") else {
        return Ok(None);
    };
    let CborValue::Array(certs) = value else {
        return Err(stmt_failure("x5c is not an array"));
    };

    let chain = certs
        .iter()
        .map(|cert| match cert {
            CborValue::Bytes(der) => Ok(der.clone()),
            _ => Err(stmt_failure("x5c entry is not a byte string")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if chain.is_empty() {
        return Err(stmt_failure("x5c is empty"));
    }
    Ok(Some(chain))
}

pub(super) fn webpki_algorithm(alg: CoseAlgorithm) -> &'static webpki::SignatureAlgorithm {
    match alg {
        CoseAlgorithm::Es256 => &webpki::ECDSA_P256_SHA256,
        CoseAlgorithm::EdDsa => &webpki::ED25519,
        CoseAlgorithm::Rs256 => &webpki::RSA_PKCS1_2048_8192_SHA256,
    }
}

/// Verifies `signature` over `message` with the leaf certificate's key.
pub(super) fn verify_with_cert(
    cert_der: &[u8],
    alg: CoseAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CeremonyError> {
    let cert = webpki::EndEntityCert::try_from(cert_der)
        .map_err(|e| stmt_failure(format!("failed to parse attestation certificate: {e:?}")))?;
    cert.verify_signature(webpki_algorithm(alg), message, signature)
        .map_err(|_| stmt_failure("attestation signature invalid"))
}

pub(super) fn parse_cert(der: &[u8]) -> Result<X509Certificate<'_>, CeremonyError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| stmt_failure(format!("failed to parse X509 certificate: {e}")))?;
    Ok(cert)
}

pub(super) fn is_ca(cert: &X509Certificate<'_>) -> bool {
    cert.extensions()
        .iter()
        .filter(|ext| {
            ext.oid.as_bytes() == oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS.as_bytes()
        })
        .any(|ext| matches!(ext.parsed_extension(), ParsedExtension::BasicConstraints(bc) if bc.ca))
}

/// The AAGUID carried in the FIDO certificate extension, if present.
pub(super) fn cert_aaguid(cert: &X509Certificate<'_>) -> Result<Option<[u8; 16]>, CeremonyError> {
    let Some(ext) = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_string() == OID_FIDO_GEN_CE_AAGUID)
    else {
        return Ok(None);
    };

    if ext.critical {
        return Err(stmt_failure("AAGUID extension must not be critical"));
    }
    // DER OCTET STRING: tag 0x04, length 0x10, then the 16 AAGUID bytes
    let value = ext.value;
    if value.len() != 18 || value[0] != 0x04 || value[1] != 0x10 {
        return Err(stmt_failure("malformed AAGUID extension"));
    }
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&value[2..]);
    Ok(Some(aaguid))
}

pub(super) fn check_validity(
    cert: &X509Certificate<'_>,
    now: DateTime<Utc>,
) -> Result<(), CeremonyError> {
    let at = ASN1Time::from_timestamp(now.timestamp())
        .map_err(|e| stmt_failure(format!("failed to convert time: {e}")))?;
    if !cert.validity().is_valid_at(at) {
        return Err(stmt_failure("certificate is expired or not yet valid"));
    }
    Ok(())
}

/// Checks every certificate's validity period and that each one is signed by
/// the next. The last certificate is not required to chain to a trust anchor.
pub(super) fn verify_certificate_chain(
    x5c: &[Vec<u8>],
    now: DateTime<Utc>,
) -> Result<(), CeremonyError> {
    let certs = x5c
        .iter()
        .map(|der| parse_cert(der))
        .collect::<Result<Vec<_>, _>>()?;

    for cert in &certs {
        check_validity(cert, now)?;
    }

    for pair in certs.windows(2) {
        pair[0]
            .verify_signature(Some(pair[1].public_key()))
            .map_err(|e| stmt_failure(format!("certificate chain signature invalid: {e}")))?;
    }
    Ok(())
}
