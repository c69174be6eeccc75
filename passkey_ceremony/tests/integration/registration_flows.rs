use passkey_ceremony::{CeremonyError, CredentialId};

use crate::common::{SoftAuthenticator, ceremonies};

/// Test a full registration against every store backend
///
/// The credential is persisted with the attested key, format and transports,
/// and resolves back to the identity it was registered for.
#[tokio::test]
async fn test_registration_round_trip() {
    for (backend, ceremony, _clock) in ceremonies().await {
        // Given registration options for a new user
        let options = ceremony
            .begin_registration("alice", "Alice", None)
            .await
            .expect("begin registration");
        let mut authenticator = SoftAuthenticator::new(b"alice-key-1");

        // When the authenticator answers them
        let credential = authenticator.register(&options);
        let identity = ceremony
            .finish_registration(&credential)
            .await
            .unwrap_or_else(|e| panic!("{backend}: registration failed: {e}"));

        // Then the identity is created with the handle from the options
        assert_eq!(identity.name, "alice", "{backend}");
        assert_eq!(identity.display_name, "Alice", "{backend}");
        assert_eq!(identity.user_handle.to_base64url(), options.user.user_handle);

        // And the credential resolves back to it
        let found = ceremony
            .find_identity_by_credential_id(&authenticator.credential_id())
            .await
            .expect("lookup");
        assert_eq!(found, Some(identity), "{backend}");

        let stored = ceremony.list_credentials("alice").await.expect("list");
        assert_eq!(stored.len(), 1, "{backend}");
        assert_eq!(stored[0].credential_id, authenticator.credential_id());
        assert_eq!(stored[0].attestation_format, "packed");
        assert_eq!(stored[0].transports, vec!["usb".to_string()]);
        assert_eq!(stored[0].counter, 0);
        assert!(!stored[0].flagged);
    }
}

/// Test that a second credential for a known user is excluded up front and
/// bound to the existing identity
#[tokio::test]
async fn test_second_credential_joins_existing_identity() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let mut first = SoftAuthenticator::new(b"bob-key-1");
        let options = ceremony
            .begin_registration("bob", "Bob", None)
            .await
            .expect("begin");
        let bob = ceremony
            .finish_registration(&first.register(&options))
            .await
            .expect("first registration");

        // When bob registers another authenticator
        let options = ceremony
            .begin_registration("bob", "Bob", None)
            .await
            .expect("begin");

        // Then the first one is listed for exclusion
        assert_eq!(options.exclude_credentials.len(), 1, "{backend}");
        assert_eq!(
            options.exclude_credentials[0].id,
            first.credential_id().to_base64url()
        );
        assert_eq!(options.user.user_handle, bob.user_handle.to_base64url());

        let mut second = SoftAuthenticator::new(b"bob-key-2");
        let identity = ceremony
            .finish_registration(&second.register(&options))
            .await
            .expect("second registration");

        assert_eq!(identity, bob, "{backend}");
        assert_eq!(ceremony.list_credentials("bob").await.expect("list").len(), 2);
    }
}

/// Test replaying a successful attestation response
#[tokio::test]
async fn test_replayed_attestation_is_rejected() {
    for (backend, ceremony, _clock) in ceremonies().await {
        // Given a registration that already succeeded
        let options = ceremony
            .begin_registration("carol", "Carol", None)
            .await
            .expect("begin");
        let mut authenticator = SoftAuthenticator::new(b"carol-key");
        let credential = authenticator.register(&options);
        ceremony
            .finish_registration(&credential)
            .await
            .expect("first submission");

        // When the same response is submitted again
        let replay = ceremony.finish_registration(&credential).await;

        // Then the challenge is already spent
        assert_eq!(
            replay,
            Err(CeremonyError::ChallengeAlreadyUsed),
            "{backend}"
        );
    }
}

/// Test registering one credential id for two different users
///
/// The second registration fails and the credential stays bound to its
/// first owner. No identity is created for the second user.
#[tokio::test]
async fn test_duplicate_credential_across_users() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let mut authenticator = SoftAuthenticator::new(b"shared-key");
        let options = ceremony
            .begin_registration("dave", "Dave", None)
            .await
            .expect("begin");
        let dave = ceremony
            .finish_registration(&authenticator.register(&options))
            .await
            .expect("dave registers");

        // When erin presents the same credential id
        let options = ceremony
            .begin_registration("erin", "Erin", None)
            .await
            .expect("begin");
        let result = ceremony
            .finish_registration(&authenticator.register(&options))
            .await;

        // Then it is refused
        assert!(
            matches!(result, Err(CeremonyError::DuplicateCredential(_))),
            "{backend}: {result:?}"
        );

        // And nothing changed for the first owner
        let owner = ceremony
            .find_identity_by_credential_id(&authenticator.credential_id())
            .await
            .expect("lookup");
        assert_eq!(owner, Some(dave), "{backend}");
        assert!(ceremony.list_credentials("erin").await.expect("list").is_empty());
    }
}

/// Test a response produced on a foreign origin
///
/// Verification fails with OriginMismatch, and the challenge is burned even
/// though the attempt failed.
#[tokio::test]
async fn test_foreign_origin_burns_challenge() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let options = ceremony
            .begin_registration("frank", "Frank", None)
            .await
            .expect("begin");

        // Given a response signed for a phishing origin
        let mut phished = SoftAuthenticator::new(b"frank-key").with_origin("https://evil.example");
        let result = ceremony.finish_registration(&phished.register(&options)).await;

        // Then the origin is rejected
        assert!(
            matches!(result, Err(CeremonyError::OriginMismatch(_))),
            "{backend}: {result:?}"
        );

        // And a genuine answer to the same challenge no longer works
        let mut genuine = SoftAuthenticator::new(b"frank-key");
        let retry = ceremony.finish_registration(&genuine.register(&options)).await;
        assert_eq!(retry, Err(CeremonyError::ChallengeAlreadyUsed), "{backend}");

        // And no state was written
        let found = ceremony
            .find_identity_by_credential_id(&CredentialId::from_bytes(b"frank-key".to_vec()))
            .await
            .expect("lookup");
        assert_eq!(found, None, "{backend}");
    }
}

/// Test a usernameless registration keyed only by display name
#[tokio::test]
async fn test_usernameless_registration() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let options = ceremony
            .begin_registration("", "Grace", None)
            .await
            .expect("begin");

        assert_eq!(
            options.user.name,
            "Grace (Usernameless user created at 2024-06-01 12:00:00 UTC)",
            "{backend}"
        );

        let mut authenticator = SoftAuthenticator::new(b"grace-key");
        let identity = ceremony
            .finish_registration(&authenticator.register(&options))
            .await
            .expect("finish");
        assert_eq!(identity.name, options.user.name);
        assert_eq!(identity.display_name, "Grace");
    }
}
