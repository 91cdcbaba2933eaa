mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{AfterFrames, executed, progress, serve_frames, status};
use easel_diffusion::{CompletionPolicy, ConnectionState, EventStream, JobOutcome};
use easel_ipc::JobId;

type Fired = Arc<Mutex<Vec<JobOutcome>>>;

fn watch(stream: &mut EventStream, fired: &Fired, job_id: &str) {
    let fired = Arc::clone(fired);
    stream.watch(job_id, move |outcome| fired.lock().unwrap().push(outcome));
}

/// Pump until `done` holds or the channel goes away.
async fn pump_until(stream: &mut EventStream, done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            if !stream.next_edge().await {
                break;
            }
        }
    })
    .await
    .expect("event channel stalled");
}

#[tokio::test]
async fn test_executed_frame_completes_watch() {
    let (url, _server) =
        serve_frames(vec![progress(1, 4), executed("job-1")], AfterFrames::HoldOpen).await;

    let fired = Fired::default();
    let mut stream = EventStream::new();
    stream.connect(&url).unwrap();
    assert_eq!(stream.state(), ConnectionState::Connecting);

    watch(&mut stream, &fired, "job-1");
    pump_until(&mut stream, || !fired.lock().unwrap().is_empty()).await;

    assert!(stream.is_connected());
    assert_eq!(stream.pending(), 0);
    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].job_id, JobId::from("job-1"));
    assert!(fired[0].success);
}

#[tokio::test]
async fn test_queue_drain_completes_every_watch() {
    let (url, _server) = serve_frames(vec![status(1), status(0)], AfterFrames::HoldOpen).await;

    let fired = Fired::default();
    let mut stream = EventStream::with_policy(CompletionPolicy::QueueDrain);
    stream.connect(&url).unwrap();
    watch(&mut stream, &fired, "a");
    watch(&mut stream, &fired, "b");

    pump_until(&mut stream, || fired.lock().unwrap().len() == 2).await;
    assert_eq!(stream.pending(), 0);
}

#[tokio::test]
async fn test_job_events_policy_ignores_queue_drain() {
    let (url, _server) =
        serve_frames(vec![status(0), executed("b")], AfterFrames::HoldOpen).await;

    let fired = Fired::default();
    let mut stream = EventStream::with_policy(CompletionPolicy::JobEventsOnly);
    stream.connect(&url).unwrap();
    watch(&mut stream, &fired, "a");
    watch(&mut stream, &fired, "b");

    pump_until(&mut stream, || !fired.lock().unwrap().is_empty()).await;

    assert!(stream.is_watching(&JobId::from("a")));
    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].job_id, JobId::from("b"));
}

#[tokio::test]
async fn test_server_close_leaves_watch_pending() {
    let (url, _server) = serve_frames(vec![], AfterFrames::Close).await;

    let fired = Fired::default();
    let mut stream = EventStream::new();
    stream.connect(&url).unwrap();
    watch(&mut stream, &fired, "job-1");

    pump_until(&mut stream, || false).await;

    assert_eq!(stream.state(), ConnectionState::Disconnected);
    assert!(stream.is_watching(&JobId::from("job-1")));
    assert!(fired.lock().unwrap().is_empty());

    stream.disconnect();
    assert_eq!(stream.pending(), 0);
    assert!(fired.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_refused_connection_disconnects() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut stream = EventStream::new();
    stream.connect(&format!("ws://{addr}/ws")).unwrap();
    pump_until(&mut stream, || false).await;

    assert_eq!(stream.state(), ConnectionState::Disconnected);
    assert!(!stream.next_edge().await);
}

#[tokio::test]
async fn test_poll_dispatches_buffered_frames() {
    let (url, _server) = serve_frames(vec![executed("job-1")], AfterFrames::HoldOpen).await;

    let fired = Fired::default();
    let mut stream = EventStream::new();
    stream.connect(&url).unwrap();
    watch(&mut stream, &fired, "job-1");

    tokio::time::timeout(Duration::from_secs(5), async {
        while fired.lock().unwrap().is_empty() {
            stream.poll();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frame never arrived");

    assert!(stream.is_connected());
}

#[tokio::test]
async fn test_connect_is_idempotent_while_open() {
    let (url, _server) = serve_frames(vec![], AfterFrames::HoldOpen).await;

    let mut stream = EventStream::new();
    stream.connect(&url).unwrap();
    // A second connect must not open another socket; the server accepts only one.
    stream.connect(&url).unwrap();
    assert!(stream.next_edge().await);
    assert!(stream.is_connected());

    stream.connect(&url).unwrap();
    assert!(stream.is_connected());
}
