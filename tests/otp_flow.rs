use email_otp_engine::{CodeKind, OtpError, OtpPolicy};
use std::time::Duration;

mod common;
use common::{harness, policy};

const EMAIL: &str = "flow@example.com";

fn wrong_code(code: &str) -> String {
    // Flip the first digit so the guess is guaranteed to differ.
    let first = code.as_bytes()[0];
    let flipped = if first == b'9' { '0' } else { (first + 1) as char };
    format!("{}{}", flipped, &code[1..])
}

#[tokio::test]
async fn test_verify_never_issued_is_invalid() {
    let h = harness(policy());
    let result = h.service.verify("nobody@example.com", "123456").await;
    assert!(matches!(result, Err(OtpError::InvalidCode)));
}

#[tokio::test]
async fn test_code_verifies_exactly_once() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();

    h.service.verify(EMAIL, &code).await.unwrap();
    assert!(h.store.snapshot(EMAIL).unwrap().is_empty());

    let replay = h.service.verify(EMAIL, &code).await;
    assert!(matches!(replay, Err(OtpError::InvalidCode)));
}

#[tokio::test]
async fn test_identity_is_normalized_on_both_paths() {
    let h = harness(policy());
    h.service.issue("  Flow@Example.COM").await.unwrap();
    let code = h.sender.last_code(EMAIL).expect("delivered to normalized address");

    h.service.verify("flow@EXAMPLE.com ", &format!(" {} ", code)).await.unwrap();
}

#[tokio::test]
async fn test_wrong_codes_exhaust_attempts() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();
    let guess = wrong_code(&code);

    for attempt in 1..3 {
        let result = h.service.verify(EMAIL, &guess).await;
        assert!(
            matches!(result, Err(OtpError::InvalidCode)),
            "attempt {}",
            attempt
        );
        assert_eq!(h.store.snapshot(EMAIL).unwrap().attempts, attempt);
    }

    let result = h.service.verify(EMAIL, &guess).await;
    assert!(matches!(result, Err(OtpError::TooManyAttempts)));

    let state = h.store.snapshot(EMAIL).unwrap();
    assert!(state.digest.is_none());
    assert_eq!(state.attempts, 0);

    let late = h.service.verify(EMAIL, &code).await;
    assert!(matches!(late, Err(OtpError::InvalidCode)));
}

#[tokio::test]
async fn test_correct_code_after_failures_within_budget() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();

    for _ in 0..2 {
        let _ = h.service.verify(EMAIL, &wrong_code(&code)).await;
    }
    h.service.verify(EMAIL, &code).await.unwrap();
}

#[tokio::test]
async fn test_unlimited_attempts_never_lock_out() {
    let h = harness(OtpPolicy {
        max_attempts: 0,
        ..policy()
    });
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();

    for _ in 0..20 {
        let result = h.service.verify(EMAIL, &wrong_code(&code)).await;
        assert!(matches!(result, Err(OtpError::InvalidCode)));
    }
    h.service.verify(EMAIL, &code).await.unwrap();
}

#[tokio::test]
async fn test_code_expires_with_ttl() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();

    h.clock.advance(Duration::from_secs(300));
    let result = h.service.verify(EMAIL, &code).await;
    assert!(matches!(result, Err(OtpError::InvalidCode)));
}

#[tokio::test]
async fn test_new_code_supersedes_previous() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let first = h.sender.last_code(EMAIL).unwrap();
    let _ = h.service.verify(EMAIL, &wrong_code(&first)).await;
    assert_eq!(h.store.snapshot(EMAIL).unwrap().attempts, 1);

    h.clock.advance(Duration::from_secs(60));
    h.service.issue(EMAIL).await.unwrap();
    let second = h.sender.last_code(EMAIL).unwrap();
    assert_eq!(h.store.snapshot(EMAIL).unwrap().attempts, 0);

    if first != second {
        let stale = h.service.verify(EMAIL, &first).await;
        assert!(matches!(stale, Err(OtpError::InvalidCode)));
    }
    h.service.verify(EMAIL, &second).await.unwrap();
}

#[tokio::test]
async fn test_alphanumeric_codes_accept_lowercase_input() {
    let h = harness(OtpPolicy {
        code_kind: CodeKind::Alphanumeric,
        code_length: 8,
        ..policy()
    });
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();
    assert_eq!(code.len(), 8);

    h.service
        .verify(EMAIL, &code.to_ascii_lowercase())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_only_digest_is_stored() {
    let h = harness(policy());
    h.service.issue(EMAIL).await.unwrap();
    let code = h.sender.last_code(EMAIL).unwrap();

    let digest = h.store.snapshot(EMAIL).unwrap().digest.unwrap();
    assert_ne!(digest, code);
    assert_eq!(digest.len(), 64);
}
