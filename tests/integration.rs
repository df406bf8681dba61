use circuit_guard::{
    BreakerError, BreakerOptions, BreakerResult, CircuitBreaker, State, TokioTimer,
};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready, task};

// Custom error type that implements Error trait
#[derive(Debug)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

type Breaker = CircuitBreaker<String, TestError>;

fn scenario_breaker() -> Breaker {
    Breaker::builder("scenario")
        .max_failures(2)
        .timeout(Duration::from_millis(100))
        .reset_timeout(Duration::from_millis(50))
        .build()
}

async fn fail(breaker: &Breaker) -> BreakerResult<String, TestError> {
    breaker
        .execute(|| async { Err(TestError::new("boom")) })
        .await
}

async fn succeed(breaker: &Breaker) -> BreakerResult<String, TestError> {
    breaker.execute(|| async { Ok("ok".to_string()) }).await
}

#[tokio::test(start_paused = true)]
async fn test_trips_after_max_failures_and_blocks_without_running() {
    let breaker = scenario_breaker();
    assert_eq!(breaker.state(), State::Closed);

    assert!(fail(&breaker).await.unwrap_err().is_operation());
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count(), 1);

    assert!(fail(&breaker).await.unwrap_err().is_operation());
    assert_eq!(breaker.state(), State::Open);

    let invoked = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let counter = Arc::clone(&invoked);
        let result = breaker
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok("never".to_string()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { ref name }) if name == "scenario"));
    }

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(breaker.failure_count(), 2, "blocked calls never count");
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let breaker = Breaker::builder("recovering").max_failures(3).build();

    assert_err!(fail(&breaker).await);
    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.failure_count(), 2);

    assert_ok!(succeed(&breaker).await);
    assert_eq!(breaker.failure_count(), 0);

    assert_err!(fail(&breaker).await);
    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_success_closes() {
    let breaker = scenario_breaker();
    assert_err!(fail(&breaker).await);
    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.state(), State::Open);

    // t=0, right after opening
    assert!(succeed(&breaker).await.unwrap_err().is_open());

    sleep(Duration::from_millis(60)).await;
    assert_eq!(breaker.state(), State::HalfOpen);

    assert_eq!(assert_ok!(succeed(&breaker).await), "ok");
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_failure_reopens_and_reschedules() {
    let breaker = scenario_breaker();
    assert_err!(fail(&breaker).await);
    assert_err!(fail(&breaker).await);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(breaker.state(), State::HalfOpen);

    assert!(fail(&breaker).await.unwrap_err().is_operation());
    assert_eq!(breaker.state(), State::Open);

    sleep(Duration::from_millis(1)).await;
    assert!(succeed(&breaker).await.unwrap_err().is_open());

    // The rescheduled timer half-opens the circuit again.
    sleep(Duration::from_millis(60)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_failure_count_is_cleared_on_entering_half_open() {
    let breaker = scenario_breaker();
    assert_err!(fail(&breaker).await);
    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.failure_count(), 2);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
    assert_eq!(breaker.failure_count(), 0);

    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(breaker.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_exactly_one_trial() {
    let breaker = scenario_breaker();
    assert!(breaker.force_open());
    sleep(Duration::from_millis(60)).await;
    assert_eq!(breaker.state(), State::HalfOpen);

    let (release, released) = oneshot::channel::<()>();
    let mut trial = task::spawn(breaker.execute(|| async move {
        let _ = released.await;
        Ok("trial".to_string())
    }));
    assert_pending!(trial.poll());

    let mut rivals: Vec<_> = (0..3)
        .map(|_| task::spawn(breaker.execute(|| async { Ok("rival".to_string()) })))
        .collect();
    for rival in rivals.iter_mut() {
        let result = assert_ready!(rival.poll());
        assert!(result.unwrap_err().is_open());
    }

    release.send(()).unwrap();
    let admitted = assert_ready!(trial.poll());
    assert_eq!(admitted.unwrap(), "trial");
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_trial_frees_the_slot() {
    let breaker = scenario_breaker();
    breaker.force_open();
    sleep(Duration::from_millis(60)).await;

    {
        let mut abandoned =
            task::spawn(breaker.execute(|| std::future::pending::<Result<String, TestError>>()));
        assert_pending!(abandoned.poll());
        assert!(succeed(&breaker).await.unwrap_err().is_open());
    }

    assert_eq!(breaker.state(), State::HalfOpen);
    assert_ok!(succeed(&breaker).await);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure_and_late_result_is_ignored() {
    let breaker = Breaker::builder("slow")
        .max_failures(3)
        .timeout(Duration::from_millis(50))
        .build();

    let started = tokio::time::Instant::now();
    let result = breaker
        .execute(|| async {
            sleep(Duration::from_millis(200)).await;
            Ok("late".to_string())
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, BreakerError::Timeout(limit) if limit == Duration::from_millis(50)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(200));
    assert_eq!(breaker.failure_count(), 1);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_lets_calls_run_indefinitely() {
    let breaker = Breaker::builder("patient").no_timeout().build();

    let result = breaker
        .execute(|| async {
            sleep(Duration::from_secs(3600)).await;
            Ok("eventually".to_string())
        })
        .await;
    assert_eq!(assert_ok!(result), "eventually");
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_trial_timeout_reopens() {
    let breaker = scenario_breaker();
    breaker.force_open();
    sleep(Duration::from_millis(60)).await;

    let result = breaker
        .execute(|| std::future::pending::<Result<String, TestError>>())
        .await;
    assert!(result.unwrap_err().is_timeout());
    assert_eq!(breaker.state(), State::Open);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_on_failure_substitutes_and_still_counts() {
    let breaker = Breaker::builder("fallback")
        .max_failures(5)
        .fallback_on_failure(true)
        .fallback(|_| Ok("X".to_string()))
        .build();

    assert_eq!(assert_ok!(fail(&breaker).await), "X");
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_goes_through_fallback_on_failure() {
    let breaker = Breaker::builder("slow-fallback")
        .max_failures(5)
        .timeout(Duration::from_millis(50))
        .fallback_on_failure(true)
        .fallback(|err| {
            assert!(matches!(
                err,
                BreakerError::Timeout(limit) if *limit == Duration::from_millis(50)
            ));
            Ok("stale".to_string())
        })
        .build();

    let result = breaker
        .execute(|| std::future::pending::<Result<String, TestError>>())
        .await;
    assert_eq!(assert_ok!(result), "stale");
    assert_eq!(breaker.failure_count(), 1);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_only_for_blocked_calls_by_default() {
    let breaker = Breaker::builder("blocked-only").max_failures(1).build();
    breaker.set_fallback(|err| {
        assert!(err.is_open());
        Ok("cached".to_string())
    });

    assert!(fail(&breaker).await.unwrap_err().is_operation());
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(assert_ok!(succeed(&breaker).await), "cached");
}

#[tokio::test(start_paused = true)]
async fn test_fallback_error_propagates() {
    let breaker = Breaker::builder("broken-fallback")
        .max_failures(1)
        .fallback_on_failure(true)
        .fallback(|_| Err(TestError::new("fallback down")))
        .build();

    let err = fail(&breaker).await.unwrap_err();
    assert!(err.is_fallback());
    assert_eq!(err.inner().unwrap().0, "fallback down");
    assert_eq!(breaker.state(), State::Open);

    let err = succeed(&breaker).await.unwrap_err();
    assert!(err.is_fallback());
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_fallback_overrides_default() {
    let breaker = Breaker::builder("override")
        .fallback(|_| Ok("default".to_string()))
        .build();
    breaker.force_open();

    let result = breaker
        .execute_with_fallback(
            || async { Ok("unreachable".to_string()) },
            |err| {
                assert!(err.is_open());
                Ok("call-specific".to_string())
            },
        )
        .await;
    assert_eq!(assert_ok!(result), "call-specific");
    assert_eq!(assert_ok!(succeed(&breaker).await), "default");
}

#[tokio::test(start_paused = true)]
async fn test_execute_and_report_writes_into_target() {
    let breaker = scenario_breaker();

    let (tx, rx) = oneshot::channel();
    breaker
        .execute_and_report(|| async { Ok("reported".to_string()) }, tx)
        .await;
    assert_eq!(rx.await.unwrap().unwrap(), "reported");

    breaker.force_open();
    let (tx, rx) = oneshot::channel();
    breaker
        .execute_and_report(|| async { Ok("blocked".to_string()) }, tx)
        .await;
    assert!(rx.await.unwrap().unwrap_err().is_open());

    // A receiver that went away is not an error for the breaker.
    let (tx, rx) = oneshot::channel();
    drop(rx);
    breaker
        .execute_and_report(|| async { Ok("nobody".to_string()) }, tx)
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_negative_reset_timeout_keeps_circuit_open() {
    let breaker = Breaker::builder("sticky")
        .max_failures(1)
        .no_auto_reset()
        .build();

    assert_err!(fail(&breaker).await);
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(breaker.state(), State::Open);

    breaker.reset();
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_manual_control() {
    let breaker = scenario_breaker();

    // Force open
    assert!(breaker.force_open());
    assert_eq!(breaker.state(), State::Open);
    assert!(succeed(&breaker).await.unwrap_err().is_open());

    // Trying to open again should return false (no change)
    assert!(!breaker.force_open());

    // Force closed, which also cancels the pending reset timer
    assert!(breaker.force_closed());
    assert_eq!(breaker.state(), State::Closed);
    assert!(!breaker.force_closed());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(breaker.state(), State::Closed);

    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.failure_count(), 1);
    breaker.force_closed();
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_reset_timer_but_not_in_flight_calls() {
    let breaker = scenario_breaker();

    let (release, released) = oneshot::channel::<()>();
    let mut in_flight = task::spawn(breaker.execute(|| async move {
        let _ = released.await;
        Err(TestError::new("late failure"))
    }));
    assert_pending!(in_flight.poll());

    breaker.dispose();
    release.send(()).unwrap();
    assert!(assert_ready!(in_flight.poll()).unwrap_err().is_operation());
    assert_eq!(breaker.failure_count(), 1);

    assert_err!(fail(&breaker).await);
    assert_eq!(breaker.state(), State::Open);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(breaker.state(), State::Open);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_from_options_document() {
    let options = BreakerOptions::from_json(
        r#"{ "maxFailures": 1, "timeout": 20, "resetTimeout": 30, "fallbackOnFailure": false }"#,
    )
    .unwrap();
    let breaker = Breaker::new("from-json", options);
    assert_eq!(breaker.name(), "from-json");
    assert_eq!(breaker.options().max_failures, 1);

    let result = breaker
        .execute(|| std::future::pending::<Result<String, TestError>>())
        .await;
    assert!(matches!(result, Err(BreakerError::Timeout(limit)) if limit == Duration::from_millis(20)));
    assert_eq!(breaker.state(), State::Open);

    sleep(Duration::from_millis(31)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_clones_share_state() {
    let breaker = scenario_breaker();
    let other = breaker.clone();

    assert_err!(fail(&breaker).await);
    assert_err!(fail(&other).await);
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(other.state(), State::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_callers_see_at_most_one_trial() {
    const CALLERS: usize = 16;

    let breaker = Breaker::builder("race")
        .timeout(Duration::from_secs(5))
        .reset_timeout(Duration::from_millis(10))
        .build();
    breaker.force_open();
    while breaker.state() != State::HalfOpen {
        sleep(Duration::from_millis(5)).await;
    }

    let start = Arc::new(tokio::sync::Barrier::new(CALLERS + 1));
    let release = Arc::new(tokio::sync::Notify::new());
    let admitted = Arc::new(AtomicUsize::new(0));
    let (results_tx, mut results) = tokio::sync::mpsc::unbounded_channel();

    for _ in 0..CALLERS {
        let breaker = breaker.clone();
        let start = Arc::clone(&start);
        let release = Arc::clone(&release);
        let admitted = Arc::clone(&admitted);
        let results_tx = results_tx.clone();
        tokio::spawn(async move {
            start.wait().await;
            let result = breaker
                .execute(move || async move {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok("trial".to_string())
                })
                .await;
            let _ = results_tx.send(result);
        });
    }

    start.wait().await;
    for _ in 0..CALLERS - 1 {
        let result = results.recv().await.unwrap();
        assert!(result.unwrap_err().is_open());
    }
    release.notify_one();

    let trial = results.recv().await.unwrap();
    assert_eq!(trial.unwrap(), "trial");
    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_trip_outside_the_runtime_still_half_opens() {
    let breaker = Breaker::builder("foreign-executor")
        .max_failures(1)
        .no_timeout()
        .reset_timeout(Duration::from_millis(10))
        .build();

    let remote = breaker.clone();
    let result = std::thread::spawn(move || {
        futures::executor::block_on(remote.execute(|| async { Err(TestError::new("down")) }))
    })
    .join()
    .unwrap();
    assert!(result.unwrap_err().is_operation());
    assert_eq!(breaker.state(), State::Open);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_force_open_from_plain_thread_still_half_opens() {
    let breaker = Breaker::builder("forced-remotely")
        .reset_timeout(Duration::from_millis(50))
        .build();

    let remote = breaker.clone();
    assert!(std::thread::spawn(move || remote.force_open()).join().unwrap());
    assert_eq!(breaker.state(), State::Open);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_built_off_runtime_with_explicit_handle() {
    let handle = tokio::runtime::Handle::current();
    let breaker = std::thread::spawn(move || {
        Breaker::builder("built-elsewhere")
            .max_failures(1)
            .reset_timeout(Duration::from_millis(20))
            .timer(TokioTimer::with_handle(handle))
            .build()
    })
    .join()
    .unwrap();

    breaker.force_open();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), State::HalfOpen);
}
