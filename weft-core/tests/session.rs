//! Session lifecycle: transitive cancellation, output-channel draining, and
//! error propagation that never touches sibling workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use weft_core::{
    RuntimeError, Session, SessionConfig, SessionState, WorkerError, WorkerEvent, WorkerKey,
    WorkerSpec, sources,
};

fn probe_worker(tag: &str, released: Arc<AtomicUsize>) -> WorkerSpec<u32> {
    struct Guard(Arc<AtomicUsize>);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    WorkerSpec::new(WorkerKey::new("probe", tag.to_string()), move || {
        let guard = Guard(released);
        Box::pin(futures_util::stream::poll_fn(move |_cx| {
            let _ = &guard;
            Poll::<Option<Result<u32, WorkerError>>>::Pending
        }))
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn cancel_releases_every_worker_once_and_is_idempotent() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut session = Session::new(SessionConfig::default());
    let mut outputs = session.outputs().unwrap();

    let declared = ["a", "b", "c"]
        .iter()
        .map(|tag| probe_worker(tag, Arc::clone(&released)))
        .collect();
    session.reconcile(declared).await.unwrap();

    session.cancel();
    assert_eq!(session.state(), SessionState::Terminated);
    wait_until(|| released.load(Ordering::SeqCst) == 3).await;

    // Re-cancel is a no-op: no double release, state unchanged.
    session.cancel();
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(released.load(Ordering::SeqCst), 3);

    // Probe workers never emit; the drained output just ends.
    let end = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .expect("output did not close");
    assert_eq!(end, None);

    timeout(Duration::from_secs(5), session.terminated())
        .await
        .expect("termination signal did not resolve");
}

#[tokio::test]
async fn output_stream_can_only_be_taken_once() {
    let mut session = Session::<u32>::new(SessionConfig::default());
    session.outputs().unwrap();
    let err = session.outputs().unwrap_err();
    assert!(matches!(err, RuntimeError::OutputAlreadyTaken));
}

#[tokio::test]
async fn source_failure_is_data_and_spares_siblings() {
    let (tx, rx) = mpsc::channel::<u32>(8);
    let mut session = Session::new(SessionConfig::default());
    let mut outputs = session.outputs().unwrap();

    session
        .reconcile(vec![
            sources::from_channel("healthy", rx),
            sources::from_try_stream(
                "doomed",
                futures_util::stream::iter([Err::<u32, &str>("boom")]),
            ),
        ])
        .await
        .unwrap();

    // Only the doomed worker has anything to say yet.
    let first = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .expect("no event")
        .expect("output closed early");
    assert_eq!(
        first,
        WorkerEvent::Failed {
            key: WorkerKey::new("try-stream", "doomed"),
            error: WorkerError::Source("boom".into()),
        }
    );

    // The sibling keeps emitting after the failure.
    tx.send(9).await.unwrap();
    let second = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .expect("no event")
        .expect("output closed early");
    assert_eq!(
        second,
        WorkerEvent::Emitted {
            key: WorkerKey::new("channel", "healthy"),
            value: 9,
        }
    );

    // Exactly one terminal for the doomed worker: nothing else is buffered.
    session.cancel();
    while let Some(event) = outputs.recv().await {
        assert!(
            !event.is_terminal(),
            "unexpected extra terminal event: {event:?}"
        );
    }
}

#[tokio::test]
async fn per_worker_emission_order_is_preserved() {
    let (tx, rx) = mpsc::channel::<u32>(16);
    let mut session = Session::new(SessionConfig::default());
    let mut outputs = session.outputs().unwrap();
    session
        .reconcile(vec![sources::from_channel("ordered", rx)])
        .await
        .unwrap();

    for value in 1..=5 {
        tx.send(value).await.unwrap();
    }

    for expected in 1..=5 {
        let event = timeout(Duration::from_secs(5), outputs.recv())
            .await
            .expect("no event")
            .expect("output closed early");
        assert_eq!(
            event,
            WorkerEvent::Emitted {
                key: WorkerKey::new("channel", "ordered"),
                value: expected,
            }
        );
    }
    session.cancel();
}

#[tokio::test]
async fn buffered_emissions_drain_after_cancel() {
    let (tx, rx) = mpsc::channel::<u32>(8);
    let mut session = Session::new(SessionConfig::default());
    let mut outputs = session.outputs().unwrap();
    session
        .reconcile(vec![sources::from_channel("late-read", rx)])
        .await
        .unwrap();

    tx.send(42).await.unwrap();
    let event = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .expect("no event")
        .expect("output closed early");
    assert!(matches!(event, WorkerEvent::Emitted { value: 42, .. }));

    session.cancel();
    let end = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .expect("output did not close after cancel");
    assert_eq!(end, None);
}

#[tokio::test]
async fn dropping_an_active_session_cancels_its_workers() {
    let released = Arc::new(AtomicUsize::new(0));
    {
        let mut session = Session::new(SessionConfig::default());
        session
            .reconcile(vec![probe_worker("orphan", Arc::clone(&released))])
            .await
            .unwrap();
    }
    wait_until(|| released.load(Ordering::SeqCst) == 1).await;
}
