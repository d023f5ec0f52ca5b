//! Admission control through the full dispatcher, on a paused tokio clock.

mod common;

use adguard_dispatch::{
    DispatchContext, DispatchOutcome, DispatchRequest, Dispatcher, RateLimiter, RateLimiterConfig,
    RetryConfig,
};
use common::{init_tracing, ScriptedTransport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn dispatcher(transport: Arc<ScriptedTransport>, limit: RateLimiterConfig) -> Arc<Dispatcher> {
    init_tracing();
    Arc::new(
        Dispatcher::builder()
            .rate_limit(limit)
            .retry(RetryConfig::new(1).with_overall_deadline(None))
            .build(transport)
            .unwrap(),
    )
}

/// Spawn one dispatch per path, letting each reach the limiter before the next starts.
async fn spawn_in_order(
    dispatcher: &Arc<Dispatcher>,
    paths: impl IntoIterator<Item = String>,
) -> Vec<tokio::task::JoinHandle<DispatchOutcome>> {
    let mut handles = Vec::new();
    for path in paths {
        let d = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            d.dispatch(DispatchRequest::get(path), &DispatchContext::new()).await
        }));
        tokio::task::yield_now().await;
    }
    handles
}

fn paths_at(transport: &ScriptedTransport, start: Instant, offset: Duration) -> BTreeSet<String> {
    transport
        .calls()
        .into_iter()
        .filter(|c| c.at - start == offset)
        .map(|c| c.path)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn five_per_minute_with_ten_queued_rejects_the_sixteenth() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(5, Duration::from_secs(60)).with_queue_capacity(10),
    );
    let start = Instant::now();

    let handles = spawn_in_order(&d, (0..16).map(|i| format!("/item/{:02}", i))).await;

    let snap = d.limiter().snapshot().unwrap();
    assert_eq!(snap.used, 5);
    assert_eq!(snap.queued, 10);
    assert_eq!(snap.rejected_total, 1);

    let mut outcomes = Vec::new();
    for h in handles {
        outcomes.push(h.await.unwrap());
    }
    assert_eq!(outcomes[15], DispatchOutcome::RateLimited);
    assert!(outcomes[..15].iter().all(|o| o.is_success()));

    let expect = |range: std::ops::Range<usize>| -> BTreeSet<String> {
        range.map(|i| format!("/item/{:02}", i)).collect()
    };
    assert_eq!(paths_at(&transport, start, Duration::ZERO), expect(0..5));
    assert_eq!(paths_at(&transport, start, Duration::from_secs(60)), expect(5..10));
    assert_eq!(paths_at(&transport, start, Duration::from_secs(120)), expect(10..15));
    assert_eq!(transport.call_count(), 15);
}

#[tokio::test(start_paused = true)]
async fn second_request_waits_for_the_next_window() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(1, Duration::from_secs(1)).with_queue_capacity(4),
    );
    let start = Instant::now();

    let first = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(DispatchRequest::get("/a"), &DispatchContext::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = d
        .dispatch_with_stats(|| DispatchRequest::get("/b"), &DispatchContext::new())
        .await;

    assert!(first.await.unwrap().is_success());
    assert!(second.0.is_success());
    assert_eq!(second.1.queued_ms, 900);
    assert_eq!(
        transport.offsets(start),
        vec![Duration::ZERO, Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn first_window_starts_with_the_first_request_not_at_build() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(1, Duration::from_secs(1)).with_queue_capacity(4),
    );
    // The dispatcher sits idle for most of a window before its first call.
    tokio::time::sleep(Duration::from_millis(950)).await;
    let start = Instant::now();

    let first = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(DispatchRequest::get("/a"), &DispatchContext::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = d
        .dispatch_with_stats(|| DispatchRequest::get("/b"), &DispatchContext::new())
        .await;

    assert!(first.await.unwrap().is_success());
    assert!(second.0.is_success());
    assert_eq!(second.1.queued_ms, 900);
    assert_eq!(
        transport.offsets(start),
        vec![Duration::ZERO, Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn admissions_never_exceed_permits_in_any_window_length_interval() {
    let transport = Arc::new(ScriptedTransport::ok());
    let window = Duration::from_secs(1);
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(3, window).with_queue_capacity(20),
    );

    let handles = spawn_in_order(&d, (0..12).map(|i| format!("/burst/{}", i))).await;
    for h in handles {
        assert!(h.await.unwrap().is_success());
    }

    let times: Vec<Instant> = transport.calls().iter().map(|c| c.at).collect();
    assert_eq!(times.len(), 12);
    for &t in &times {
        let in_interval = times.iter().filter(|&&u| u >= t && u < t + window).count();
        assert!(in_interval <= 3, "{} admissions in one window", in_interval);
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_does_not_consume_a_permit() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(1, Duration::from_secs(10)).with_queue_capacity(4),
    );
    let start = Instant::now();

    assert!(d
        .dispatch(DispatchRequest::get("/first"), &DispatchContext::new())
        .await
        .is_success());

    let ctx = DispatchContext::new();
    let waiting = {
        let d = d.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { d.dispatch(DispatchRequest::get("/queued"), &ctx).await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(d.limiter().snapshot().unwrap().queued, 1);
    ctx.cancel();
    assert_eq!(waiting.await.unwrap(), DispatchOutcome::Cancelled);

    let snap = d.limiter().snapshot().unwrap();
    assert_eq!(snap.used, 1);
    assert_eq!(snap.queued, 0);
    assert_eq!(snap.cancelled_total, 1);

    // The next window is untouched by the cancelled waiter.
    tokio::time::sleep_until(start + Duration::from_secs(10)).await;
    assert!(d
        .dispatch(DispatchRequest::get("/next"), &DispatchContext::new())
        .await
        .is_success());
    assert_eq!(d.limiter().snapshot().unwrap().used, 1);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_operation_leaves_the_queue() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(1, Duration::from_secs(10)).with_queue_capacity(1),
    );
    assert!(d
        .dispatch(DispatchRequest::get("/first"), &DispatchContext::new())
        .await
        .is_success());

    let waiting = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(DispatchRequest::get("/queued"), &DispatchContext::new()).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(d.limiter().snapshot().unwrap().queued, 1);

    waiting.abort();
    let _ = waiting.await;
    assert_eq!(d.limiter().snapshot().unwrap().queued, 0);

    // The freed slot can be taken by someone else.
    let again = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(DispatchRequest::get("/again"), &DispatchContext::new()).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(d.limiter().snapshot().unwrap().queued, 1);
    assert!(again.await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn zero_permits_rejects_without_touching_transport() {
    let transport = Arc::new(ScriptedTransport::ok());
    let d = dispatcher(
        transport.clone(),
        RateLimiterConfig::new(0, Duration::from_secs(1)).with_queue_capacity(10),
    );
    let (outcome, stats) = d
        .dispatch_with_stats(|| DispatchRequest::get("/never"), &DispatchContext::new())
        .await;
    assert_eq!(outcome, DispatchOutcome::RateLimited);
    assert_eq!(stats.attempts, 1);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispatchers_sharing_a_limiter_share_the_window() {
    init_tracing();
    let limiter = RateLimiter::new(RateLimiterConfig::new(2, Duration::from_secs(60)));
    let t1 = Arc::new(ScriptedTransport::ok());
    let t2 = Arc::new(ScriptedTransport::ok());
    let a = Dispatcher::builder()
        .shared_limiter(limiter.clone())
        .build(t1.clone())
        .unwrap();
    let b = Dispatcher::builder()
        .shared_limiter(limiter.clone())
        .build(t2.clone())
        .unwrap();

    let ctx = DispatchContext::new();
    assert!(a.dispatch(DispatchRequest::get("/a"), &ctx).await.is_success());
    assert!(b.dispatch(DispatchRequest::get("/b"), &ctx).await.is_success());
    assert_eq!(
        a.dispatch(DispatchRequest::get("/a2"), &ctx).await,
        DispatchOutcome::RateLimited
    );
    assert_eq!(limiter.snapshot().unwrap().used, 2);
}
