use passkey_ceremony::{CeremonyError, PasskeyCeremony, UserIdentity};

use crate::common::{SoftAuthenticator, ceremonies};

async fn enroll(
    ceremony: &PasskeyCeremony,
    name: &str,
    credential_id: &[u8],
) -> (UserIdentity, SoftAuthenticator) {
    let options = ceremony
        .begin_registration(name, name, None)
        .await
        .expect("begin registration");
    let mut authenticator = SoftAuthenticator::new(credential_id);
    let identity = ceremony
        .finish_registration(&authenticator.register(&options))
        .await
        .expect("registration");
    (identity, authenticator)
}

/// Test repeated sign-ins advance the stored counter
#[tokio::test]
async fn test_authentication_round_trip() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let (alice, mut authenticator) = enroll(&ceremony, "alice", b"alice-key").await;

        for expected in 1..=3u32 {
            // Given a challenge scoped to alice
            let options = ceremony
                .begin_authentication(Some("alice"))
                .await
                .expect("begin authentication");
            assert_eq!(options.allow_credentials.len(), 1, "{backend}");

            // When the authenticator signs it
            let identity = ceremony
                .finish_authentication(&authenticator.authenticate(&options))
                .await
                .unwrap_or_else(|e| panic!("{backend}: authentication failed: {e}"));

            // Then alice is signed in and the counter moved forward
            assert_eq!(identity, alice, "{backend}");
            let stored = ceremony.list_credentials("alice").await.expect("list");
            assert_eq!(stored[0].counter, expected, "{backend}");
            assert!(stored[0].last_used_at.is_some());
        }
    }
}

/// Test sign-in with a discoverable credential and no name
#[tokio::test]
async fn test_discoverable_authentication() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let (alice, mut authenticator) = enroll(&ceremony, "alice", b"alice-key").await;

        let options = ceremony
            .begin_authentication(None)
            .await
            .expect("begin authentication");
        assert!(options.allow_credentials.is_empty(), "{backend}");

        let identity = ceremony
            .finish_authentication(&authenticator.authenticate(&options))
            .await
            .expect("authentication");
        assert_eq!(identity, alice, "{backend}");
    }
}

/// Test an assertion whose counter does not advance
///
/// The ceremony fails with CounterRegression and the credential is flagged
/// as a possible clone.
#[tokio::test]
async fn test_counter_regression_flags_credential() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let (_, mut authenticator) = enroll(&ceremony, "bob", b"bob-key").await;

        // Given a stored counter of 1
        let options = ceremony.begin_authentication(Some("bob")).await.expect("begin");
        ceremony
            .finish_authentication(&authenticator.authenticate(&options))
            .await
            .expect("first sign-in");

        // When a clone replays counter 1
        let options = ceremony.begin_authentication(Some("bob")).await.expect("begin");
        let result = ceremony
            .finish_authentication(&authenticator.assert_with_counter(&options, 1))
            .await;

        // Then the regression is reported
        assert_eq!(
            result,
            Err(CeremonyError::CounterRegression {
                stored: 1,
                received: 1
            }),
            "{backend}"
        );

        // And the credential is flagged with its counter untouched
        let stored = ceremony.list_credentials("bob").await.expect("list");
        assert!(stored[0].flagged, "{backend}");
        assert_eq!(stored[0].counter, 1);
    }
}

/// Test concurrent assertions carrying the same counter
///
/// Exactly one wins; every other fails with CounterRegression.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_counters() {
    const ATTEMPTS: usize = 8;

    for (backend, ceremony, _clock) in ceremonies().await {
        let (_, authenticator) = enroll(&ceremony, "carol", b"carol-key").await;

        // Given several challenges answered with the same counter value
        let mut responses = Vec::new();
        for _ in 0..ATTEMPTS {
            let options = ceremony.begin_authentication(Some("carol")).await.expect("begin");
            responses.push(authenticator.assert_with_counter(&options, 5));
        }

        // When they are submitted at the same time
        let handles: Vec<_> = responses
            .into_iter()
            .map(|response| {
                let ceremony = ceremony.clone();
                tokio::spawn(async move { ceremony.finish_authentication(&response).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.expect("task joined") {
                Ok(_) => successes += 1,
                Err(CeremonyError::CounterRegression { received, .. }) => {
                    assert_eq!(received, 5, "{backend}")
                }
                Err(e) => panic!("{backend}: unexpected error {e}"),
            }
        }

        // Then exactly one advanced the counter
        assert_eq!(successes, 1, "{backend}");
        let stored = ceremony.list_credentials("carol").await.expect("list");
        assert_eq!(stored[0].counter, 5, "{backend}");
    }
}

/// Test an assertion produced on a foreign origin
#[tokio::test]
async fn test_authentication_origin_mismatch() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let (_, authenticator) = enroll(&ceremony, "dave", b"dave-key").await;
        let mut phished = authenticator.with_origin("https://login.example.net");

        let options = ceremony.begin_authentication(Some("dave")).await.expect("begin");
        let result = ceremony
            .finish_authentication(&phished.authenticate(&options))
            .await;

        assert!(
            matches!(result, Err(CeremonyError::OriginMismatch(_))),
            "{backend}: {result:?}"
        );

        // The counter was not advanced by the failed attempt
        let stored = ceremony.list_credentials("dave").await.expect("list");
        assert_eq!(stored[0].counter, 0, "{backend}");
    }
}

/// Test an assertion from a credential that was never registered
#[tokio::test]
async fn test_unknown_credential() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let mut stranger = SoftAuthenticator::new(b"never-registered");

        let options = ceremony.begin_authentication(None).await.expect("begin");
        let result = ceremony
            .finish_authentication(&stranger.authenticate(&options))
            .await;

        assert_eq!(result, Err(CeremonyError::CredentialNotFound), "{backend}");
    }
}
