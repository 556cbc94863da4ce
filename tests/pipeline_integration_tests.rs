//! Integration Tests for the Pipeline Builder
//!
//! Runs built pipelines end to end through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainkit::cache::{Cache, CacheOptions};
use chainkit::pipeline::{cache_key, Condition, Modifier, PipelineBuilder};
use chainkit::{ChainError, RetryOptions};
use serde_json::{json, Value};
use tokio::time::Instant;

// == Helper Functions ==

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

async fn add_one(v: Value) -> chainkit::Result<Value> {
    Ok(json!(v.as_i64().unwrap_or_default() + 1))
}

/// Step that counts its calls and echoes its input.
fn counting(
    calls: &Arc<AtomicUsize>,
) -> impl Fn(Value) -> futures::future::Ready<chainkit::Result<Value>> {
    let calls = calls.clone();
    move |v| {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(v))
    }
}

async fn double(v: Value) -> chainkit::Result<Value> {
    Ok(json!(v.as_i64().unwrap_or_default() * 2))
}

// == Composition ==

#[tokio::test]
async fn test_map_then_filter_preserves_order() {
    let pipeline = PipelineBuilder::new()
        .map(|v: Value| async move {
            // Later elements finish first
            let n = v.as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(30 - n * 5)).await;
            Ok(json!(n * 10))
        })
        .filter(|v: Value| async move { Ok(v.as_u64().unwrap_or_default() >= 20) })
        .build()
        .unwrap();

    let out = pipeline.run(json!([1, 2, 3, 4])).await.unwrap();
    assert_eq!(out, json!([20, 30, 40]));
}

#[tokio::test]
async fn test_map_on_non_array_is_type_mismatch() {
    let pipeline = PipelineBuilder::new()
        .map(|v: Value| async move { Ok(v) })
        .build()
        .unwrap();

    let err = pipeline.run(json!({"not": "an array"})).await.unwrap_err();
    assert_eq!(
        err,
        ChainError::TypeMismatch {
            operation: "map",
            found: "object"
        }
    );
}

#[tokio::test]
async fn test_branch_on_input() {
    let pipeline = PipelineBuilder::new()
        .branch(
            Condition::when(|v| v.as_i64().is_some_and(|n| n % 2 == 0)),
            |v: Value| async move { Ok(json!(format!("even {}", v))) },
            |v: Value| async move { Ok(json!(format!("odd {}", v))) },
        )
        .build()
        .unwrap();

    assert_eq!(pipeline.run(json!(4)).await.unwrap(), json!("even 4"));
    assert_eq!(pipeline.run(json!(7)).await.unwrap(), json!("odd 7"));
}

#[tokio::test]
async fn test_builder_changes_after_build_do_not_leak() {
    let builder = PipelineBuilder::new().pipe(add_one);
    let first = builder.build().unwrap();

    let builder = builder.pipe(double);
    let second = builder.build().unwrap();

    assert_eq!(first.run(json!(1)).await.unwrap(), json!(2));
    assert_eq!(second.run(json!(1)).await.unwrap(), json!(4));
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);
}

// == Retry ==

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let calls = counter();
    let seen = calls.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(move |v: Value| {
            let calls = seen.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(ChainError::step(format!("attempt {} failed", attempt)))
                } else {
                    Ok(v)
                }
            }
        })
        .retry(RetryOptions::new(3, Duration::from_millis(10)))
        .build()
        .unwrap();

    assert_eq!(pipeline.run(json!("ok")).await.unwrap(), json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_returns_last_error() {
    let calls = counter();
    let seen = calls.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(move |_: Value| {
            let calls = seen.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<Value, _>(ChainError::step(format!("attempt {}", attempt)))
            }
        })
        .retry(RetryOptions::new(3, Duration::from_millis(10)))
        .build()
        .unwrap();

    let err = pipeline.run(Value::Null).await.unwrap_err();
    assert_eq!(err, ChainError::step("attempt 3"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_never_retried() {
    let calls = counter();
    let seen = calls.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(move |_: Value| {
            let calls = seen.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(ChainError::Cancelled)
            }
        })
        .retry(RetryOptions::new(5, Duration::from_millis(10)))
        .build()
        .unwrap();

    assert_eq!(pipeline.run(Value::Null).await, Err(ChainError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Timeout ==

#[tokio::test(start_paused = true)]
async fn test_timeout_rejects_slow_step() {
    let pipeline = PipelineBuilder::new()
        .pipe(|v: Value| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(v)
        })
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    assert_eq!(
        pipeline.run(json!(1)).await,
        Err(ChainError::Timeout(Duration::from_millis(50)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_around_timeout_by_index() {
    let calls = counter();
    let seen = calls.clone();
    // First attempt stalls, second is fast
    let pipeline = PipelineBuilder::new()
        .pipe(move |v: Value| {
            let calls = seen.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(v)
            }
        })
        .timeout(Duration::from_millis(50))
        .pipe(add_one)
        .wrap(
            0,
            Modifier::Retry(RetryOptions::new(2, Duration::from_millis(1))),
        )
        .build()
        .unwrap();

    assert_eq!(pipeline.run(json!(1)).await.unwrap(), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Error Handling ==

#[tokio::test]
async fn test_on_error_recovers() {
    let pipeline = PipelineBuilder::new()
        .pipe(|_: Value| async move { Err::<Value, _>(ChainError::step("boom")) })
        .pipe(add_one)
        .on_error(|err| async move { Ok(json!({"recovered": err.to_string()})) })
        .build()
        .unwrap();

    assert_eq!(
        pipeline.run(json!(1)).await.unwrap(),
        json!({"recovered": "Step failed: boom"})
    );
}

#[tokio::test]
async fn test_on_error_can_rethrow() {
    let pipeline = PipelineBuilder::new()
        .pipe(|_: Value| async move { Err::<Value, _>(ChainError::step("inner")) })
        .on_error(|_| async move { Err(ChainError::step("outer")) })
        .build()
        .unwrap();

    assert_eq!(pipeline.run(json!(1)).await, Err(ChainError::step("outer")));
}

#[tokio::test]
async fn test_finally_runs_once_per_run() {
    let finals = counter();
    let seen = finals.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(|v: Value| async move {
            match v.as_bool() {
                Some(true) => Ok(v),
                _ => Err(ChainError::step("rejected")),
            }
        })
        .finally(move || {
            let finals = seen.clone();
            async move {
                finals.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

    assert!(pipeline.run(json!(true)).await.is_ok());
    assert_eq!(finals.load(Ordering::SeqCst), 1);

    assert!(pipeline.run(json!(false)).await.is_err());
    assert_eq!(finals.load(Ordering::SeqCst), 2);
}

// == Cache ==

#[tokio::test]
async fn test_cache_with_shared_cache() {
    let cache = Arc::new(Cache::<Value>::new(CacheOptions::default()).unwrap());
    let calls = counter();
    let seen = calls.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(move |v: Value| {
            let calls = seen.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                double(v).await
            }
        })
        .cache_with(cache.clone())
        .build()
        .unwrap();

    assert_eq!(pipeline.run(json!(21)).await.unwrap(), json!(42));
    assert_eq!(pipeline.run(json!(21)).await.unwrap(), json!(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(cache.get(&cache_key(&json!(21))).await, Some(json!(42)));
    assert_eq!(cache.stats().await.hits, 2);
}

#[tokio::test]
async fn test_each_build_gets_its_own_cache() {
    let calls = counter();
    let seen = calls.clone();
    let builder = PipelineBuilder::new()
        .pipe(move |v: Value| {
            let calls = seen.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }
        })
        .cache(CacheOptions::default());

    let first = builder.build().unwrap();
    let second = builder.build().unwrap();

    first.run(json!("x")).await.unwrap();
    first.run(json!("x")).await.unwrap();
    second.run(json!("x")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Finalizer ==

#[tokio::test(start_paused = true)]
async fn test_finally_runs_when_nested_run_is_dropped() {
    let finals = counter();
    let seen = finals.clone();
    let inner = PipelineBuilder::new()
        .pipe(|v: Value| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(v)
        })
        .finally(move || {
            let finals = seen.clone();
            async move {
                finals.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap()
        .into_step();
    let outer = PipelineBuilder::new()
        .pipe(move |v| inner(v))
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    assert_eq!(
        outer.run(json!(1)).await,
        Err(ChainError::Timeout(Duration::from_millis(50)))
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(finals.load(Ordering::SeqCst), 1);
}

// == Debounce ==

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_rapid_runs() {
    let calls = counter();
    let pipeline = PipelineBuilder::new()
        .pipe(counting(&calls))
        .debounce(Duration::from_millis(100))
        .build()
        .unwrap();

    let (first, second) = tokio::join!(pipeline.run(json!(1)), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.run(json!(2)).await
    });

    assert_eq!(first, Err(ChainError::Superseded));
    assert_eq!(second, Ok(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_then_retry_does_not_rerun_superseded_call() {
    let calls = counter();
    let pipeline = PipelineBuilder::new()
        .pipe(counting(&calls))
        .debounce(Duration::from_millis(100))
        .retry(RetryOptions::default())
        .build()
        .unwrap();

    let (first, second) = tokio::join!(pipeline.run(json!(1)), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.run(json!(2)).await
    });

    assert_eq!(first, Err(ChainError::Superseded));
    assert_eq!(second, Ok(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_state_is_private_per_build() {
    let calls = counter();
    let builder = PipelineBuilder::new()
        .pipe(counting(&calls))
        .debounce(Duration::from_millis(100));
    let first = builder.build().unwrap();
    let second = builder.build().unwrap();

    let (a, b) = tokio::join!(first.run(json!("a")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        second.run(json!("b")).await
    });

    assert_eq!(a, Ok(json!("a")));
    assert_eq!(b, Ok(json!("b")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Throttle ==

#[tokio::test(start_paused = true)]
async fn test_throttle_spaces_consecutive_runs() {
    let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = stamps.clone();
    let pipeline = PipelineBuilder::new()
        .pipe(move |v: Value| {
            sink.lock().unwrap().push(Instant::now());
            async move { Ok(v) }
        })
        .throttle(Duration::from_millis(100))
        .build()
        .unwrap();

    for n in 0..3 {
        assert_eq!(pipeline.run(json!(n)).await, Ok(json!(n)));
    }

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 3);
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttle_state_is_private_per_build() {
    let calls = counter();
    let builder = PipelineBuilder::new()
        .pipe(counting(&calls))
        .throttle(Duration::from_millis(100));
    let first = builder.build().unwrap();
    let second = builder.build().unwrap();

    let start = Instant::now();
    first.run(json!(1)).await.unwrap();
    second.run(json!(2)).await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
