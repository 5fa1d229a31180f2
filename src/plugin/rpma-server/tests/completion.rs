mod common;

use std::time::{Duration, Instant};

use harness::{IoEngine, IoEvent, IoUnit, Job, QueueStatus};
use rpma_server::{ConnEvent, RpmaServer};

use common::{completion, job, MockProvider};

fn established(provider: &MockProvider, io_depth: u32) -> (RpmaServer<MockProvider>, Job) {
    let mut server = RpmaServer::new(provider.clone());
    let mut job = job(io_depth);
    server.setup(&mut job).unwrap();
    server.init(&mut job).unwrap();
    server.post_init(&mut job).unwrap();
    (server, job)
}

#[test]
fn queue_and_commit_are_pass_through() {
    let provider = MockProvider::new();
    let (mut server, mut job) = established(&provider, 2);
    let calls = provider.calls();

    let io_u = IoUnit {
        index: 0,
        ddir: harness::DataDirection::Write,
        offset: 0,
        len: 4096,
    };
    assert_eq!(server.queue(&mut job, &io_u), QueueStatus::Queued);
    server.commit(&mut job).unwrap();
    assert_eq!(provider.calls(), calls);
}

#[test]
fn reports_completions_in_queue_order() {
    let provider = MockProvider::new();
    provider.set_events(vec![ConnEvent::Established]);
    let (mut server, mut job) = established(&provider, 8);
    provider.state().completions.extend((1..=5).map(completion));

    let n = server
        .get_events(&mut job, 1, 8, Some(Duration::from_millis(10)))
        .unwrap();
    assert_eq!(n, 5);
    let ids: Vec<u64> = (0..n)
        .map(|i| server.event(&mut job, i).unwrap().id)
        .collect();
    assert_eq!(ids, [1, 2, 3, 4, 5]);
    assert_eq!(server.event(&mut job, 5), None);
}

#[test]
fn never_returns_more_than_max() {
    let provider = MockProvider::new();
    provider.set_events(vec![ConnEvent::Established]);
    let (mut server, mut job) = established(&provider, 8);
    provider.state().completions.extend((1..=5).map(completion));

    let n = server
        .get_events(&mut job, 0, 3, Some(Duration::ZERO))
        .unwrap();
    assert_eq!(n, 3);
    let n = server
        .get_events(&mut job, 0, 3, Some(Duration::ZERO))
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        server.event(&mut job, 0),
        Some(IoEvent {
            id: 4,
            bytes: 0,
            error: None
        })
    );
}

#[test]
fn waits_for_min_completions() {
    let provider = MockProvider::new();
    provider.set_events(vec![ConnEvent::Established]);
    let (mut server, mut job) = established(&provider, 4);
    provider.state().deferred.extend((1..=2).map(completion));

    let n = server
        .get_events(&mut job, 2, 4, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(n, 2);
}

#[test]
fn deadline_returns_what_is_ready() {
    let provider = MockProvider::new();
    provider.set_events(vec![ConnEvent::Established]);
    let (mut server, mut job) = established(&provider, 4);
    provider.state().completions.push_back(completion(7));

    let timeout = Duration::from_millis(30);
    let start = Instant::now();
    let n = server.get_events(&mut job, 4, 4, Some(timeout)).unwrap();
    assert_eq!(n, 1);
    assert!(start.elapsed() >= timeout);
    assert_eq!(server.event(&mut job, 0).unwrap().id, 7);
}

#[test]
fn zero_max_returns_immediately() {
    let provider = MockProvider::new();
    let (mut server, mut job) = established(&provider, 4);
    provider.state().completions.push_back(completion(1));
    assert_eq!(server.get_events(&mut job, 1, 0, None).unwrap(), 0);
    assert_eq!(provider.state().completions.len(), 1);
}

#[test]
fn client_close_ends_the_stream() {
    let provider = MockProvider::new();
    let (mut server, mut job) = established(&provider, 4);
    assert!(!server.is_finished());

    let n = server
        .get_events(&mut job, 1, 4, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(n, 0);
    assert!(server.is_finished());

    // The client already closed, so cleanup does not wait for it again.
    let waits = provider.count("next_event");
    server.cleanup(&mut job);
    assert_eq!(provider.count("next_event"), waits);
    assert_eq!(provider.count("disconnect"), 1);
    assert!(job.errors().is_empty());
}

#[test]
fn nothing_to_report_before_established() {
    let provider = MockProvider::new();
    let mut server = RpmaServer::new(provider.clone());
    let mut job = job(4);
    server.setup(&mut job).unwrap();
    server.init(&mut job).unwrap();
    assert_eq!(
        server
            .get_events(&mut job, 1, 4, Some(Duration::from_millis(1)))
            .unwrap(),
        0
    );
    assert_eq!(server.event(&mut job, 0), None);
}

#[test]
fn get_events_before_setup_is_an_error() {
    let mut server = RpmaServer::new(MockProvider::new());
    let mut job = job(1);
    assert!(server.get_events(&mut job, 0, 1, None).is_err());
}
