//! CAPTCHA answer verification.

use super::store::ChallengeStore;

/// Check `answer` against the digits stored for `id`.
///
/// The read consumes the challenge, so every id gets exactly one attempt —
/// right or wrong, the caller needs a fresh challenge afterwards. Absent,
/// expired, and already-consumed ids all fail the same way; callers cannot
/// tell those cases apart.
pub async fn verify_answer(store: &ChallengeStore, id: &str, answer: &str) -> bool {
    let Some(digits) = store.get_digits(id, true).await else {
        tracing::debug!(challenge_id = %id, "verification against absent challenge");
        return false;
    };

    let Some(submitted) = parse_answer(answer) else {
        tracing::debug!(challenge_id = %id, "non-numeric CAPTCHA answer");
        return false;
    };

    let ok = submitted == digits;
    if ok {
        tracing::info!(challenge_id = %id, "CAPTCHA verified");
    } else {
        tracing::debug!(challenge_id = %id, "CAPTCHA verification failed");
    }
    ok
}

fn parse_answer(answer: &str) -> Option<Vec<u8>> {
    if answer.is_empty() {
        return None;
    }
    answer
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionAccess};
    use std::sync::Arc;
    use std::time::Duration;

    async fn challenge_with_digits(store: &ChallengeStore, id: &str, digits: &[u8]) -> Arc<Session> {
        let session = Arc::new(Session::new("s1"));
        store.register(Arc::<Session>::downgrade(&session), id).await.unwrap();
        store.set_digits(id, digits).await;
        session
    }

    #[tokio::test]
    async fn correct_answer_verifies_once() {
        let store = ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let _session = challenge_with_digits(&store, "v", &[1, 2, 3, 4]).await;

        assert!(verify_answer(&store, "v", "1234").await);
        // Consumed: a second attempt fails even with the right answer
        assert!(!verify_answer(&store, "v", "1234").await);
    }

    #[tokio::test]
    async fn wrong_answer_fails_and_still_consumes() {
        let store = ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let session = challenge_with_digits(&store, "w", &[5, 6]).await;

        assert!(!verify_answer(&store, "w", "99").await);
        assert!(!store.contains("w").await);
        assert!(session.get(&super::super::digits_key("w")).is_none());
    }

    #[tokio::test]
    async fn garbage_answers_never_verify() {
        let store = ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let _session = challenge_with_digits(&store, "g", &[1]).await;

        assert!(!verify_answer(&store, "g", "one").await);
        assert!(!verify_answer(&store, "unknown", "1").await);
        assert!(!verify_answer(&store, "g2", "").await);
    }
}
