//! A software authenticator producing real ES256 attestations and assertions.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ciborium::value::Value as CborValue;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};

use passkey_ceremony::{
    AuthenticationOptions, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    AuthenticatorResponse, CredentialId, RegisterCredential, RegistrationOptions,
};

use super::fixtures::{ORIGIN, RP_ID};

const FLAG_UP: u8 = 0x01;
const FLAG_UV: u8 = 0x04;
const FLAG_AT: u8 = 0x40;
const AAGUID: [u8; 16] = [0x5a; 16];

pub struct SoftAuthenticator {
    key: EcdsaKeyPair,
    rng: SystemRandom,
    credential_id: Vec<u8>,
    counter: u32,
    origin: String,
    rp_id: String,
    user_handle: Option<String>,
}

impl SoftAuthenticator {
    pub fn new(credential_id: &[u8]) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("key generation");
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("key parsing");
        Self {
            key,
            rng,
            credential_id: credential_id.to_vec(),
            counter: 0,
            origin: ORIGIN.to_string(),
            rp_id: RP_ID.to_string(),
            user_handle: None,
        }
    }

    /// Answers from a different origin, as a phishing page would.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn credential_id(&self) -> CredentialId {
        CredentialId::from_bytes(self.credential_id.clone())
    }

    /// Creates the credential for `options` with packed self attestation.
    pub fn register(&mut self, options: &RegistrationOptions) -> RegisterCredential {
        self.user_handle = Some(options.user.user_handle.clone());

        let client_data = self.client_data("webauthn.create", &options.challenge);
        let auth_data = self.auth_data(FLAG_UP | FLAG_UV | FLAG_AT, true);

        let mut signed = auth_data.clone();
        signed.extend_from_slice(digest::digest(&digest::SHA256, &client_data).as_ref());
        let statement = CborValue::Map(vec![
            (CborValue::Text("alg".into()), CborValue::Integer((-7).into())),
            (CborValue::Text("sig".into()), CborValue::Bytes(self.sign(&signed))),
        ]);
        let attestation_object = cbor(&CborValue::Map(vec![
            (CborValue::Text("fmt".into()), CborValue::Text("packed".into())),
            (CborValue::Text("attStmt".into()), statement),
            (CborValue::Text("authData".into()), CborValue::Bytes(auth_data)),
        ]));

        let id = URL_SAFE_NO_PAD.encode(&self.credential_id);
        RegisterCredential {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAttestationResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(&client_data),
                attestation_object: URL_SAFE_NO_PAD.encode(attestation_object),
                transports: vec!["usb".to_string()],
            },
            type_: "public-key".to_string(),
            authenticator_attachment: Some("cross-platform".to_string()),
        }
    }

    /// Signs an assertion with the next counter value.
    pub fn authenticate(&mut self, options: &AuthenticationOptions) -> AuthenticatorResponse {
        self.counter += 1;
        self.assert_with_counter(options, self.counter)
    }

    /// Signs an assertion reporting `counter`, as a cloned key would.
    pub fn assert_with_counter(
        &self,
        options: &AuthenticationOptions,
        counter: u32,
    ) -> AuthenticatorResponse {
        let client_data = self.client_data("webauthn.get", &options.challenge);
        let mut auth_data = self.auth_data(FLAG_UP | FLAG_UV, false);
        auth_data[33..37].copy_from_slice(&counter.to_be_bytes());

        let mut signed = auth_data.clone();
        signed.extend_from_slice(digest::digest(&digest::SHA256, &client_data).as_ref());

        let id = URL_SAFE_NO_PAD.encode(&self.credential_id);
        AuthenticatorResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAssertionResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(&client_data),
                authenticator_data: URL_SAFE_NO_PAD.encode(&auth_data),
                signature: URL_SAFE_NO_PAD.encode(self.sign(&signed)),
                user_handle: self.user_handle.clone(),
            },
            type_: "public-key".to_string(),
            authenticator_attachment: None,
        }
    }

    fn client_data(&self, type_: &str, challenge: &str) -> Vec<u8> {
        serde_json::json!({
            "type": type_,
            "challenge": challenge,
            "origin": self.origin,
            "crossOrigin": false
        })
        .to_string()
        .into_bytes()
    }

    fn auth_data(&self, flags: u8, attested: bool) -> Vec<u8> {
        let mut data = digest::digest(&digest::SHA256, self.rp_id.as_bytes())
            .as_ref()
            .to_vec();
        data.push(flags);
        data.extend_from_slice(&self.counter.to_be_bytes());

        if attested {
            data.extend_from_slice(&AAGUID);
            data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&self.cose_key());
        }
        data
    }

    fn cose_key(&self) -> Vec<u8> {
        let point = self.key.public_key().as_ref();
        cbor(&CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
            (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(point[1..33].to_vec())),
            (CborValue::Integer((-3).into()), CborValue::Bytes(point[33..65].to_vec())),
        ]))
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key
            .sign(&self.rng, message)
            .expect("signing")
            .as_ref()
            .to_vec()
    }
}

fn cbor(value: &CborValue) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).expect("CBOR encoding");
    out
}
