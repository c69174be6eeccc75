use chrono::Duration;
use passkey_ceremony::{
    CeremonyError, CeremonyKind, ChallengeError, Nonce, UserVerificationRequirement,
};

use crate::common::{SoftAuthenticator, ceremonies};

/// Test that a nonce is consumed exactly once
#[tokio::test]
async fn test_consume_exactly_once() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let store = ceremony.challenges();
        let issued = store
            .issue(
                CeremonyKind::Authentication,
                None,
                UserVerificationRequirement::Preferred,
                Duration::seconds(60),
            )
            .await
            .expect("issue");

        let consumed = store.consume(&issued.nonce).await.expect("first consume");
        assert_eq!(consumed, issued, "{backend}");

        assert_eq!(
            store.consume(&issued.nonce).await,
            Err(ChallengeError::AlreadyUsed),
            "{backend}"
        );
    }
}

/// Test racing consumers of one nonce
///
/// Exactly one observes the challenge; the rest see AlreadyUsed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consume() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let store = ceremony.challenges().clone();
        let issued = store
            .issue(
                CeremonyKind::Registration,
                None,
                UserVerificationRequirement::Preferred,
                Duration::seconds(60),
            )
            .await
            .expect("issue");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let nonce = issued.nonce.clone();
                tokio::spawn(async move { store.consume(&nonce).await })
            })
            .collect();

        let mut taken = 0;
        for handle in handles {
            match handle.await.expect("task joined") {
                Ok(_) => taken += 1,
                Err(e) => assert_eq!(e, ChallengeError::AlreadyUsed, "{backend}"),
            }
        }
        assert_eq!(taken, 1, "{backend}");
    }
}

/// Test a ceremony finished after its challenge expired
///
/// The first late attempt reports Expired and burns the challenge; the next
/// reports AlreadyUsed.
#[tokio::test]
async fn test_expired_challenge() {
    for (backend, ceremony, clock) in ceremonies().await {
        let options = ceremony
            .begin_registration("alice", "Alice", None)
            .await
            .expect("begin");
        let mut authenticator = SoftAuthenticator::new(b"alice-key");
        let credential = authenticator.register(&options);

        // When the TTL has passed
        clock.advance(ceremony.config().challenge_ttl + Duration::seconds(1));

        // Then the challenge is expired
        assert_eq!(
            ceremony.finish_registration(&credential).await,
            Err(CeremonyError::ChallengeExpired),
            "{backend}"
        );
        assert_eq!(
            ceremony.finish_registration(&credential).await,
            Err(CeremonyError::ChallengeAlreadyUsed),
            "{backend}"
        );
    }
}

/// Test a challenge the store never issued
#[tokio::test]
async fn test_unknown_nonce() {
    for (backend, ceremony, _clock) in ceremonies().await {
        let nonce = Nonce::generate().expect("nonce");
        assert_eq!(
            ceremony.challenges().consume(&nonce).await,
            Err(ChallengeError::NotFound),
            "{backend}"
        );
    }
}

/// Test purging after the retention window
///
/// Once purged, a late replay is indistinguishable from an unknown nonce.
#[tokio::test]
async fn test_purge_after_retention() {
    for (backend, ceremony, clock) in ceremonies().await {
        let store = ceremony.challenges();
        let ttl = Duration::seconds(30);
        let issued = store
            .issue(
                CeremonyKind::Authentication,
                None,
                UserVerificationRequirement::Required,
                ttl,
            )
            .await
            .expect("issue");

        // Still inside the retention window
        clock.advance(ttl + Duration::seconds(1));
        assert_eq!(store.purge_expired().await, Ok(0), "{backend}");

        // Past it
        clock.advance(ttl);
        assert_eq!(store.purge_expired().await, Ok(1), "{backend}");
        assert_eq!(
            store.consume(&issued.nonce).await,
            Err(ChallengeError::NotFound),
            "{backend}"
        );
    }
}
