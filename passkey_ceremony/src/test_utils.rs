//! Builders for authenticator payloads used by unit tests.
//!
//! Keys are real `ring` key pairs so that signatures verify end to end.

use ciborium::value::Value as CborValue;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa,
    KeyPair as CertKeyPair, date_time_ymd,
};
use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, Ed25519KeyPair, KeyPair,
};

use chrono::{Duration, Utc};

use crate::challenge::{CeremonyKind, Challenge, ChallengeUser, Nonce};
use crate::config::UserVerificationRequirement;
use crate::credential::CoseAlgorithm;
use crate::passkey::flags;
use crate::passkey::{
    AuthenticatorAssertionResponse, AuthenticatorAttestationResponse, AuthenticatorResponse,
    RegisterCredential,
};
use crate::userdb::UserHandle;
use crate::utils::{base64url_decode, base64url_encode, sha256};

pub(crate) fn cbor_bytes(value: &CborValue) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).expect("CBOR encoding into a Vec");
    out
}

fn int(i: i64) -> CborValue {
    CborValue::Integer(i.into())
}

pub(crate) fn es256_cose_key(x: &[u8], y: &[u8]) -> Vec<u8> {
    cbor_bytes(&CborValue::Map(vec![
        (int(1), int(2)),
        (int(3), int(-7)),
        (int(-1), int(1)),
        (int(-2), CborValue::Bytes(x.to_vec())),
        (int(-3), CborValue::Bytes(y.to_vec())),
    ]))
}

pub(crate) fn ed25519_cose_key(x: &[u8]) -> Vec<u8> {
    cbor_bytes(&CborValue::Map(vec![
        (int(1), int(1)),
        (int(3), int(-8)),
        (int(-1), int(6)),
        (int(-2), CborValue::Bytes(x.to_vec())),
    ]))
}

pub(crate) fn rsa_cose_key(n: &[u8], e: &[u8]) -> Vec<u8> {
    cbor_bytes(&CborValue::Map(vec![
        (int(1), int(3)),
        (int(3), int(-257)),
        (int(-1), CborValue::Bytes(n.to_vec())),
        (int(-2), CborValue::Bytes(e.to_vec())),
    ]))
}

/// A software authenticator key.
pub(crate) enum TestKey {
    Es256(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

impl TestKey {
    pub(crate) fn es256() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        TestKey::Es256(
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap(),
        )
    }

    pub(crate) fn ed25519() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        TestKey::Ed25519(Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap())
    }

    pub(crate) fn algorithm(&self) -> CoseAlgorithm {
        match self {
            TestKey::Es256(_) => CoseAlgorithm::Es256,
            TestKey::Ed25519(_) => CoseAlgorithm::EdDsa,
        }
    }

    pub(crate) fn cose_key(&self) -> Vec<u8> {
        match self {
            TestKey::Es256(pair) => {
                let point = pair.public_key().as_ref();
                es256_cose_key(&point[1..33], &point[33..65])
            }
            TestKey::Ed25519(pair) => ed25519_cose_key(pair.public_key().as_ref()),
        }
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            TestKey::Es256(pair) => pair
                .sign(&SystemRandom::new(), message)
                .unwrap()
                .as_ref()
                .to_vec(),
            TestKey::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
        }
    }
}

// id-fido-gen-ce-aaguid
const FIDO_AAGUID_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 45724, 1, 1, 4];

/// An X.509 certificate together with a signer for its key.
pub(crate) struct TestCert {
    pub(crate) der: Vec<u8>,
    pub(crate) key: TestKey,
    cert: rcgen::Certificate,
    key_pair: CertKeyPair,
}

/// Builds attestation certificates; by default a leaf with the attestation
/// OU valid from 2020 to 2049.
pub(crate) struct CertBuilder {
    params: CertificateParams,
}

impl CertBuilder {
    pub(crate) fn attestation() -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, "Test Authenticator");
        subject.push(DnType::OrganizationName, "Test Vendor");
        subject.push(DnType::OrganizationalUnitName, "Authenticator Attestation");
        params.distinguished_name = subject;
        params.is_ca = IsCa::ExplicitNoCa;
        params.not_before = date_time_ymd(2020, 1, 1);
        params.not_after = date_time_ymd(2049, 12, 31);
        Self { params }
    }

    pub(crate) fn ca(mut self) -> Self {
        self.params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        self
    }

    /// Adds the FIDO AAGUID extension as a DER OCTET STRING.
    pub(crate) fn aaguid(mut self, aaguid: [u8; 16]) -> Self {
        let mut content = vec![0x04, 0x10];
        content.extend_from_slice(&aaguid);
        self.params
            .custom_extensions
            .push(CustomExtension::from_oid_content(FIDO_AAGUID_OID, content));
        self
    }

    pub(crate) fn valid_between(mut self, from_year: i32, until_year: i32) -> Self {
        self.params.not_before = date_time_ymd(from_year, 1, 1);
        self.params.not_after = date_time_ymd(until_year, 12, 31);
        self
    }

    pub(crate) fn self_signed(self) -> TestCert {
        let (key, key_pair) = cert_key();
        let cert = self.params.self_signed(&key_pair).unwrap();
        TestCert {
            der: cert.der().to_vec(),
            key,
            cert,
            key_pair,
        }
    }

    pub(crate) fn signed_by(self, issuer: &TestCert) -> TestCert {
        let (key, key_pair) = cert_key();
        let cert = self
            .params
            .signed_by(&key_pair, &issuer.cert, &issuer.key_pair)
            .unwrap();
        TestCert {
            der: cert.der().to_vec(),
            key,
            cert,
            key_pair,
        }
    }
}

/// One P-256 key loaded into both `ring` and `rcgen`.
fn cert_key() -> (TestKey, CertKeyPair) {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
    let signer =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng).unwrap();
    let key_pair = CertKeyPair::try_from(pkcs8.as_ref()).unwrap();
    (TestKey::Es256(signer), key_pair)
}

/// Assembles raw authenticator data.
pub(crate) struct AuthDataBuilder {
    rp_id: String,
    flags: u8,
    counter: u32,
    attested: Option<([u8; 16], Vec<u8>, Vec<u8>)>,
    extensions: Option<CborValue>,
}

impl AuthDataBuilder {
    pub(crate) fn new(rp_id: &str) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            flags: flags::UP,
            counter: 0,
            attested: None,
            extensions: None,
        }
    }

    pub(crate) fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    pub(crate) fn attested(
        mut self,
        aaguid: [u8; 16],
        credential_id: &[u8],
        cose_key: &[u8],
    ) -> Self {
        self.attested = Some((aaguid, credential_id.to_vec(), cose_key.to_vec()));
        self
    }

    pub(crate) fn extensions(mut self, extensions: CborValue) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut flags = self.flags;
        if self.attested.is_some() {
            flags |= flags::AT;
        }
        if self.extensions.is_some() {
            flags |= flags::ED;
        }

        let mut out = sha256(self.rp_id.as_bytes()).to_vec();
        out.push(flags);
        out.extend_from_slice(&self.counter.to_be_bytes());
        if let Some((aaguid, credential_id, cose_key)) = self.attested {
            out.extend_from_slice(&aaguid);
            out.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(&credential_id);
            out.extend_from_slice(&cose_key);
        }
        if let Some(extensions) = self.extensions {
            out.extend_from_slice(&cbor_bytes(&extensions));
        }
        out
    }
}

/// base64url `clientDataJSON` for the given ceremony type, nonce and origin.
pub(crate) fn client_data_json(type_: &str, nonce: &Nonce, origin: &str) -> String {
    let json = serde_json::json!({
        "type": type_,
        "challenge": nonce.to_base64url(),
        "origin": origin,
        "crossOrigin": false
    });
    base64url_encode(json.to_string().as_bytes())
}

/// base64url attestation object.
pub(crate) fn attestation_object(
    fmt: &str,
    auth_data: &[u8],
    att_stmt: Vec<(CborValue, CborValue)>,
) -> String {
    base64url_encode(&cbor_bytes(&CborValue::Map(vec![
        (CborValue::Text("fmt".into()), CborValue::Text(fmt.into())),
        (CborValue::Text("attStmt".into()), CborValue::Map(att_stmt)),
        (CborValue::Text("authData".into()), CborValue::Bytes(auth_data.to_vec())),
    ])))
}

/// Packed self-attestation statement signed by `key`.
pub(crate) fn packed_self_statement(
    key: &TestKey,
    auth_data: &[u8],
    client_data_json_b64: &str,
) -> Vec<(CborValue, CborValue)> {
    let client_data = base64url_decode(client_data_json_b64).unwrap();
    let mut signed = auth_data.to_vec();
    signed.extend_from_slice(&sha256(&client_data));

    vec![
        (CborValue::Text("alg".into()), int(key.algorithm().cose_id())),
        (CborValue::Text("sig".into()), CborValue::Bytes(key.sign(&signed))),
    ]
}

/// An outstanding challenge as the store would hand it back.
pub(crate) fn challenge(kind: CeremonyKind, user: Option<ChallengeUser>) -> Challenge {
    let now = Utc::now();
    Challenge {
        nonce: Nonce::generate().unwrap(),
        kind,
        user,
        user_verification: UserVerificationRequirement::Preferred,
        created_at: now,
        expires_at: now + Duration::seconds(120),
    }
}

pub(crate) fn challenge_user(name: &str) -> ChallengeUser {
    ChallengeUser {
        user_handle: UserHandle::generate().unwrap(),
        name: name.to_string(),
        display_name: name.to_uppercase(),
    }
}

/// Registration response with packed self attestation.
pub(crate) fn register_credential(
    key: &TestKey,
    credential_id: &[u8],
    nonce: &Nonce,
    origin: &str,
    rp_id: &str,
    flags: u8,
) -> RegisterCredential {
    let client_data = client_data_json("webauthn.create", nonce, origin);
    let auth_data = AuthDataBuilder::new(rp_id)
        .flags(flags)
        .attested([0x42; 16], credential_id, &key.cose_key())
        .build();
    let stmt = packed_self_statement(key, &auth_data, &client_data);
    let id = base64url_encode(credential_id);

    RegisterCredential {
        id: id.clone(),
        raw_id: id,
        response: AuthenticatorAttestationResponse {
            client_data_json: client_data,
            attestation_object: attestation_object("packed", &auth_data, stmt),
            transports: vec!["internal".to_string()],
        },
        type_: "public-key".to_string(),
        authenticator_attachment: Some("platform".to_string()),
    }
}

/// Authentication response signed by `key`.
pub(crate) struct AssertionBuilder<'a> {
    key: &'a TestKey,
    credential_id: Vec<u8>,
    nonce: Nonce,
    origin: String,
    rp_id: String,
    flags: u8,
    counter: u32,
    user_handle: Option<UserHandle>,
}

impl<'a> AssertionBuilder<'a> {
    pub(crate) fn new(key: &'a TestKey, credential_id: &[u8], nonce: &Nonce) -> Self {
        Self {
            key,
            credential_id: credential_id.to_vec(),
            nonce: nonce.clone(),
            origin: "https://example.com".to_string(),
            rp_id: "example.com".to_string(),
            flags: flags::UP | flags::UV,
            counter: 1,
            user_handle: None,
        }
    }

    pub(crate) fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub(crate) fn rp_id(mut self, rp_id: &str) -> Self {
        self.rp_id = rp_id.to_string();
        self
    }

    pub(crate) fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    pub(crate) fn user_handle(mut self, user_handle: &UserHandle) -> Self {
        self.user_handle = Some(user_handle.clone());
        self
    }

    pub(crate) fn build(self) -> AuthenticatorResponse {
        let client_data = client_data_json("webauthn.get", &self.nonce, &self.origin);
        let auth_data = AuthDataBuilder::new(&self.rp_id)
            .flags(self.flags)
            .counter(self.counter)
            .build();

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&sha256(&base64url_decode(&client_data).unwrap()));
        let id = base64url_encode(&self.credential_id);

        AuthenticatorResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAssertionResponse {
                client_data_json: client_data,
                authenticator_data: base64url_encode(&auth_data),
                signature: base64url_encode(&self.key.sign(&signed)),
                user_handle: self.user_handle.as_ref().map(UserHandle::to_base64url),
            },
            type_: "public-key".to_string(),
            authenticator_attachment: None,
        }
    }
}
