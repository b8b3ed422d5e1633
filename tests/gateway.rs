//! The outbound pipeline: retries, classification, rate cap, breaker, and
//! per-attempt credential resolution.

use async_trait::async_trait;
use hublink::{
    AuthApi, AuthError, CallError, CredentialRefresher, FailureClass, GatewayConfig, GatewayError,
    ResilientGateway, SettingsStore, TokenResponse, TokenSet,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

const KEY: &[u8; 32] = b"an example very very secret key.";

#[derive(serde::Serialize)]
struct Claims {
    sub: &'static str,
    exp: i64,
}

fn mint_token(expires_in_secs: i64) -> String {
    let exp = OffsetDateTime::now_utc().unix_timestamp() + expires_in_secs;
    encode(
        &Header::default(),
        &Claims { sub: "agent", exp },
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

struct FakeAuthApi {
    refresh_calls: AtomicUsize,
    reject: bool,
}

impl FakeAuthApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            reject: false,
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            reject: true,
        })
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, _username: &str, _password: &str) -> Result<TokenResponse, AuthError> {
        unimplemented!("login is not exercised by these tests")
    }

    async fn refresh(
        &self,
        _access_token: &str,
        _refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(AuthError::Rejected);
        }
        Ok(TokenResponse {
            access_token: mint_token(3600),
            refresh_token: "refresh-next".into(),
        })
    }
}

fn quick_config() -> GatewayConfig {
    GatewayConfig {
        retry_base_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_millis(20),
        ..GatewayConfig::default()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SettingsStore>,
    api: Arc<FakeAuthApi>,
    gateway: ResilientGateway,
}

async fn fixture(api: Arc<FakeAuthApi>, config: GatewayConfig, token_expires_in: i64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SettingsStore::open(dir.path().join("settings.bin"), KEY).unwrap());
    let tokens = TokenSet::from_raw(mint_token(token_expires_in), "refresh-0").unwrap();
    store.save_tokens(tokens).await.unwrap();
    let refresher = Arc::new(CredentialRefresher::new(Arc::clone(&store), api.clone()));
    let gateway = ResilientGateway::new(refresher, config);
    Fixture {
        _dir: dir,
        store,
        api,
        gateway,
    }
}

#[tokio::test]
async fn retries_transient_failures_until_success() {
    let f = fixture(FakeAuthApi::new(), quick_config(), 3600).await;
    let calls = AtomicUsize::new(0);

    let result: Result<&str, GatewayError> = f
        .gateway
        .execute(|_token| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallError::Status(503))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let f = fixture(FakeAuthApi::new(), quick_config(), 3600).await;
    let calls = AtomicUsize::new(0);

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CallError::Status(400)) }
        })
        .await;

    assert!(matches!(
        result.unwrap_err(),
        GatewayError::Call(CallError::Status(400))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_reports_total_attempts() {
    let config = GatewayConfig {
        max_retries: 2,
        ..quick_config()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;
    let calls = AtomicUsize::new(0);

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CallError::Status(503)) }
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        GatewayError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, GatewayError::Call(CallError::Status(503))));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(
        GatewayError::Call(CallError::Status(503)).class(),
        FailureClass::Transient
    );
}

#[tokio::test]
async fn rejected_credentials_bypass_the_retry_loop() {
    // Stale token forces a refresh, which the endpoint rejects.
    let f = fixture(FakeAuthApi::rejecting(), quick_config(), 300).await;
    let calls = AtomicUsize::new(0);

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, GatewayError::AuthRejected));
    assert_eq!(err.class(), FailureClass::Auth);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.api.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(f.store.tokens().is_none());
}

#[tokio::test]
async fn missing_credentials_fail_fast() {
    let f = fixture(FakeAuthApi::new(), quick_config(), 3600).await;
    f.store.clear_tokens().await.unwrap();

    let result: Result<(), GatewayError> = f.gateway.execute(|_token| async { Ok(()) }).await;
    assert!(matches!(result.unwrap_err(), GatewayError::NotAuthenticated));
}

#[tokio::test]
async fn saturated_concurrency_cap_rejects_immediately() {
    let config = GatewayConfig {
        max_concurrent_calls: 1,
        ..quick_config()
    };
    let f = Arc::new(fixture(FakeAuthApi::new(), config, 3600).await);

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

    let blocked = {
        let f = Arc::clone(&f);
        tokio::spawn(async move {
            let release = std::sync::Mutex::new(Some((started_tx, release_rx)));
            f.gateway
                .execute(move |_token| {
                    let pair = release.lock().unwrap().take();
                    async move {
                        if let Some((started, release)) = pair {
                            let _ = started.send(());
                            let _ = release.await;
                        }
                        Ok(())
                    }
                })
                .await
        })
    };

    started_rx.await.unwrap();

    let result: Result<(), GatewayError> = f.gateway.execute(|_token| async { Ok(()) }).await;
    assert!(matches!(result.unwrap_err(), GatewayError::RateLimited));

    release_tx.send(()).unwrap();
    blocked.await.unwrap().unwrap();
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_recovers() {
    let config = GatewayConfig {
        max_retries: 0,
        circuit_failure_threshold: 2,
        circuit_cooldown: Duration::from_millis(50),
        ..quick_config()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;

    for _ in 0..2 {
        let result: Result<(), GatewayError> = f
            .gateway
            .execute(|_token| async { Err(CallError::Status(503)) })
            .await;
        assert!(matches!(result.unwrap_err(), GatewayError::Exhausted { .. }));
    }

    // Open: the request function is never invoked.
    let calls = AtomicUsize::new(0);
    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
    assert!(matches!(result.unwrap_err(), GatewayError::CircuitOpen));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // After the cool-down a probe is admitted and closes the circuit.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let result: Result<&str, GatewayError> = f.gateway.execute(|_token| async { Ok("ok") }).await;
    assert_eq!(result.unwrap(), "ok");
    let result: Result<&str, GatewayError> = f.gateway.execute(|_token| async { Ok("ok") }).await;
    assert_eq!(result.unwrap(), "ok");
}

#[tokio::test]
async fn non_retryable_probe_outcome_closes_the_circuit() {
    let config = GatewayConfig {
        max_retries: 0,
        circuit_failure_threshold: 1,
        circuit_cooldown: Duration::from_millis(50),
        ..quick_config()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| async { Err(CallError::Status(503)) })
        .await;
    assert!(matches!(result.unwrap_err(), GatewayError::Exhausted { .. }));

    let result: Result<(), GatewayError> = f.gateway.execute(|_token| async { Ok(()) }).await;
    assert!(matches!(result.unwrap_err(), GatewayError::CircuitOpen));

    // The probe draws a definitive client error: the service is answering,
    // so the circuit closes rather than sticking half-open.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| async { Err(CallError::Status(404)) })
        .await;
    assert!(matches!(
        result.unwrap_err(),
        GatewayError::Call(CallError::Status(404))
    ));

    for _ in 0..3 {
        let result: Result<&str, GatewayError> =
            f.gateway.execute(|_token| async { Ok("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
    }
}

#[tokio::test]
async fn interrupted_probe_reopens_the_circuit() {
    let config = GatewayConfig {
        max_retries: 0,
        circuit_failure_threshold: 1,
        circuit_cooldown: Duration::from_millis(50),
        ..quick_config()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| async { Err(CallError::Status(503)) })
        .await;
    assert!(matches!(result.unwrap_err(), GatewayError::Exhausted { .. }));

    // The probe dies before the request is dispatched.
    tokio::time::sleep(Duration::from_millis(60)).await;
    f.store.clear_tokens().await.unwrap();
    let result: Result<(), GatewayError> = f.gateway.execute(|_token| async { Ok(()) }).await;
    assert!(matches!(result.unwrap_err(), GatewayError::NotAuthenticated));

    // Re-opened with a fresh cool-down, not wedged half-open.
    f.store
        .save_tokens(TokenSet::from_raw(mint_token(3600), "refresh-0").unwrap())
        .await
        .unwrap();
    let result: Result<(), GatewayError> = f.gateway.execute(|_token| async { Ok(()) }).await;
    assert!(matches!(result.unwrap_err(), GatewayError::CircuitOpen));

    tokio::time::sleep(Duration::from_millis(60)).await;
    let result: Result<&str, GatewayError> = f.gateway.execute(|_token| async { Ok("ok") }).await;
    assert_eq!(result.unwrap(), "ok");
}

#[tokio::test(start_paused = true)]
async fn attempt_deadline_is_retryable() {
    let config = GatewayConfig {
        max_retries: 1,
        attempt_timeout: Duration::from_millis(50),
        ..quick_config()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;
    let calls = AtomicUsize::new(0);

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .await;

    match result.unwrap_err() {
        GatewayError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, GatewayError::AttemptTimeout));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_bounds_the_whole_operation() {
    let config = GatewayConfig {
        overall_timeout: Duration::from_millis(100),
        attempt_timeout: Duration::from_millis(40),
        retry_base_delay: Duration::from_millis(40),
        retry_max_delay: Duration::from_millis(40),
        ..GatewayConfig::default()
    };
    let f = fixture(FakeAuthApi::new(), config, 3600).await;

    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|_token| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result.unwrap_err(), GatewayError::Timeout));
}

#[tokio::test]
async fn expiring_token_is_refreshed_once_before_the_call() {
    // Token expires in five minutes, inside the ten-minute margin.
    let f = fixture(FakeAuthApi::new(), quick_config(), 300).await;
    let stale = f.store.tokens().unwrap().access_token;

    let seen = std::sync::Mutex::new(Vec::new());
    let result: Result<(), GatewayError> = f
        .gateway
        .execute(|token| {
            seen.lock().unwrap().push(token);
            async { Ok(()) }
        })
        .await;
    result.unwrap();

    assert_eq!(f.api.refresh_calls.load(Ordering::SeqCst), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_ne!(seen[0], stale);
    assert_eq!(seen[0], f.store.tokens().unwrap().access_token);
}
