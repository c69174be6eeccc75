use ciborium::value::Value as CborValue;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1, ED25519, RSA_PKCS1_2048_8192_SHA256, RsaPublicKeyComponents,
    UnparsedPublicKey,
};

use crate::credential::{CoseAlgorithm, CredentialPublicKey};

use super::errors::{CeremonyError, VerificationStep};

// COSE_Key labels (RFC 9052 / RFC 9053)
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV_OR_N: i64 = -1;
const LABEL_X_OR_E: i64 = -2;
const LABEL_Y: i64 = -3;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;

const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

const COORD_LEN: usize = 32;

/// Key material decoded from a COSE_Key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CoseKey {
    Ec2 { x: Vec<u8>, y: Vec<u8> },
    Okp { x: Vec<u8> },
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedCoseKey {
    pub(crate) algorithm: CoseAlgorithm,
    pub(crate) key: CoseKey,
}

fn invalid(reason: impl Into<String>) -> CeremonyError {
    CeremonyError::failed(VerificationStep::AttestedCredentialData, reason)
}

fn label(entries: &[(CborValue, CborValue)], wanted: i64) -> Option<&CborValue> {
    entries.iter().find_map(|(k, v)| match k {
        CborValue::Integer(i) if i64::try_from(*i).ok() == Some(wanted) => Some(v),
        _ => None,
    })
}

fn int_label(entries: &[(CborValue, CborValue)], wanted: i64) -> Result<i64, CeremonyError> {
    match label(entries, wanted) {
        Some(CborValue::Integer(i)) => {
            i64::try_from(*i).map_err(|_| invalid(format!("COSE label {wanted} out of range")))
        }
        Some(_) => Err(invalid(format!("COSE label {wanted} is not an integer"))),
        None => Err(invalid(format!("COSE label {wanted} missing"))),
    }
}

fn bytes_label(entries: &[(CborValue, CborValue)], wanted: i64) -> Result<Vec<u8>, CeremonyError> {
    match label(entries, wanted) {
        Some(CborValue::Bytes(b)) => Ok(b.clone()),
        Some(_) => Err(invalid(format!("COSE label {wanted} is not a byte string"))),
        None => Err(invalid(format!("COSE label {wanted} missing"))),
    }
}

fn coordinate(entries: &[(CborValue, CborValue)], wanted: i64) -> Result<Vec<u8>, CeremonyError> {
    let value = bytes_label(entries, wanted)?;
    if value.len() != COORD_LEN {
        return Err(invalid(format!(
            "COSE coordinate {wanted} must be {COORD_LEN} bytes, got {}",
            value.len()
        )));
    }
    Ok(value)
}

/// Decodes a credential public key and checks that its key type and curve
/// agree with the declared algorithm.
pub(crate) fn parse_cose_key(bytes: &[u8]) -> Result<ParsedCoseKey, CeremonyError> {
    let value: CborValue = ciborium::de::from_reader(bytes)
        .map_err(|e| invalid(format!("invalid COSE key CBOR: {e}")))?;
    let CborValue::Map(entries) = value else {
        return Err(invalid("COSE key is not a map"));
    };

    let alg = int_label(&entries, LABEL_ALG)?;
    let algorithm = CoseAlgorithm::from_cose_id(alg)
        .ok_or_else(|| CeremonyError::UnsupportedAlgorithm(format!("COSE algorithm {alg}")))?;
    let kty = int_label(&entries, LABEL_KTY)?;

    let key = match algorithm {
        CoseAlgorithm::Es256 => {
            if kty != KTY_EC2 || int_label(&entries, LABEL_CRV_OR_N)? != CRV_P256 {
                return Err(invalid("ES256 requires an EC2 key on P-256"));
            }
            CoseKey::Ec2 {
                x: coordinate(&entries, LABEL_X_OR_E)?,
                y: coordinate(&entries, LABEL_Y)?,
            }
        }
        CoseAlgorithm::EdDsa => {
            if kty != KTY_OKP || int_label(&entries, LABEL_CRV_OR_N)? != CRV_ED25519 {
                return Err(invalid("EdDSA requires an OKP key on Ed25519"));
            }
            CoseKey::Okp {
                x: coordinate(&entries, LABEL_X_OR_E)?,
            }
        }
        CoseAlgorithm::Rs256 => {
            if kty != KTY_RSA {
                return Err(invalid("RS256 requires an RSA key"));
            }
            CoseKey::Rsa {
                n: bytes_label(&entries, LABEL_CRV_OR_N)?,
                e: bytes_label(&entries, LABEL_X_OR_E)?,
            }
        }
    };

    Ok(ParsedCoseKey { algorithm, key })
}

impl ParsedCoseKey {
    /// Uncompressed SEC1 point for EC2 keys.
    pub(crate) fn ec_point(&self) -> Option<Vec<u8>> {
        match &self.key {
            CoseKey::Ec2 { x, y } => {
                let mut point = Vec::with_capacity(1 + 2 * COORD_LEN);
                point.push(0x04);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Some(point)
            }
            _ => None,
        }
    }

    pub(crate) fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CeremonyError> {
        let result = match &self.key {
            CoseKey::Ec2 { .. } => {
                let point = self.ec_point().unwrap_or_default();
                UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, point).verify(message, signature)
            }
            CoseKey::Okp { x } => UnparsedPublicKey::new(&ED25519, x).verify(message, signature),
            CoseKey::Rsa { n, e } => RsaPublicKeyComponents { n, e }.verify(
                &RSA_PKCS1_2048_8192_SHA256,
                message,
                signature,
            ),
        };

        result.map_err(|_| {
            CeremonyError::SignatureInvalid(format!(
                "{:?} signature does not verify",
                self.algorithm
            ))
        })
    }
}

/// Verifies `signature` over `message` with a stored credential key.
pub(crate) fn verify_signature(
    public_key: &CredentialPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CeremonyError> {
    let parsed = parse_cose_key(&public_key.cose_key)?;
    if parsed.algorithm != public_key.algorithm {
        return Err(CeremonyError::failed(
            VerificationStep::Signature,
            "stored key algorithm does not match its COSE encoding",
        ));
    }
    parsed.verify(message, signature)
}
