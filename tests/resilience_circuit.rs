use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use internship_aggregator::error::{ExecError, FetchError};
use internship_aggregator::resilience::{HealthStatus, ResilienceConfig, ResilienceExecutor};

fn cfg(threshold: u32) -> ResilienceConfig {
    ResilienceConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        failure_threshold: threshold,
        cooldown_secs: 300,
        call_timeout_secs: 15,
        rate_limit_weight: 2,
    }
}

async fn failing_call(
    ex: &ResilienceExecutor,
    source: &str,
    calls: &Arc<AtomicU32>,
) -> Result<(), ExecError> {
    let calls = calls.clone();
    ex.execute(source, move || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FetchError::Network("connection reset".into()))
        }
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn opens_after_threshold_and_short_circuits() {
    let ex = ResilienceExecutor::new(cfg(5));
    let calls = Arc::new(AtomicU32::new(0));

    // 3 failures, then 2 more: the fifth attempt trips the breaker and the
    // remaining retry of the second call is abandoned.
    let e1 = failing_call(&ex, "indeed", &calls).await.unwrap_err();
    assert!(matches!(e1, ExecError::Exhausted { attempts: 3, .. }));
    let e2 = failing_call(&ex, "indeed", &calls).await.unwrap_err();
    assert!(matches!(e2, ExecError::Exhausted { attempts: 2, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let health = ex.health();
    let h = &health["indeed"];
    assert_eq!(h.status, HealthStatus::Down);
    assert!(h.circuit_open);
    assert_eq!(h.failures, 5);

    // Open: the operation is not invoked at all.
    let e3 = failing_call(&ex, "indeed", &calls).await.unwrap_err();
    assert_eq!(
        e3,
        ExecError::CircuitOpen {
            source_name: "indeed".into()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    // Other sources are unaffected.
    let ok = ex
        .execute("linkedin", || async { Ok::<_, FetchError>(7) })
        .await
        .unwrap();
    assert_eq!(ok, 7);
}

#[tokio::test(start_paused = true)]
async fn exactly_one_probe_after_cooldown() {
    let ex = Arc::new(ResilienceExecutor::new(cfg(1)));
    let calls = Arc::new(AtomicU32::new(0));

    failing_call(&ex, "internshala", &calls).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(301)).await;

    // A slow probe holds the half-open slot.
    let probe_calls = Arc::new(AtomicU32::new(0));
    let probe = {
        let ex = ex.clone();
        let probe_calls = probe_calls.clone();
        tokio::spawn(async move {
            ex.execute("internshala", move || {
                let probe_calls = probe_calls.clone();
                async move {
                    probe_calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, FetchError>("fresh")
                }
            })
            .await
        })
    };
    tokio::task::yield_now().await;

    // Concurrent call while the probe is in flight is rejected.
    let concurrent = failing_call(&ex, "internshala", &calls).await.unwrap_err();
    assert!(matches!(concurrent, ExecError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(probe.await.unwrap().unwrap(), "fresh");
    assert_eq!(probe_calls.load(Ordering::SeqCst), 1);

    // Probe succeeded: closed again with a clean counter.
    let health = ex.health();
    let h = &health["internshala"];
    assert_eq!(h.status, HealthStatus::Up);
    assert_eq!(h.failures, 0);
    assert!(!h.circuit_open);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_for_a_new_cooldown() {
    let ex = ResilienceExecutor::new(cfg(2));
    let calls = Arc::new(AtomicU32::new(0));

    failing_call(&ex, "linkedin", &calls).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(301)).await;
    let probe = failing_call(&ex, "linkedin", &calls).await.unwrap_err();
    // The probe gets a single attempt.
    assert!(matches!(probe, ExecError::Exhausted { attempts: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(ex.health()["linkedin"].circuit_open);

    tokio::time::advance(Duration::from_secs(200)).await;
    assert!(matches!(
        failing_call(&ex, "linkedin", &calls).await,
        Err(ExecError::CircuitOpen { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn rate_limits_trip_faster() {
    let ex = ResilienceExecutor::new(cfg(4));
    let calls = Arc::new(AtomicU32::new(0));
    let err = {
        let calls = calls.clone();
        ex.execute("indeed", move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchError::RateLimited)
            }
        })
        .await
        .unwrap_err()
    };
    // 2 + 2 reaches the threshold of 4 on the second attempt.
    assert!(matches!(err, ExecError::Exhausted { attempts: 2, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(ex.health()["indeed"].circuit_open);
}
