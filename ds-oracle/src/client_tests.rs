use std::sync::Arc;
use std::time::Duration;

use ds_core::DialogueState;

use crate::client::{ClientOptions, OracleClient};
use crate::oracle::{Oracle, UniformOracle};
use crate::OracleError;

fn state() -> DialogueState {
    DialogueState::root("sys", "hi")
}

#[test]
fn submit_and_recv_roundtrip() {
    let client = OracleClient::spawn(Arc::new(UniformOracle), ClientOptions::default());

    let t = client.submit_propose(&state(), 3).unwrap();
    let actions = t.recv().unwrap();
    assert_eq!(actions.len(), 3);

    let t = client.submit_priors(&state(), actions).unwrap();
    let priors = t.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(priors.len(), 3);
    let sum: f32 = priors.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);

    let t = client.submit_evaluate(&state()).unwrap();
    assert_eq!(t.recv().unwrap(), 0.5);
}

#[test]
fn try_recv_eventually_yields() {
    let client = OracleClient::spawn(Arc::new(UniformOracle), ClientOptions::default());
    let t = client.submit_evaluate(&state()).unwrap();
    loop {
        match t.try_recv() {
            Ok(Some(v)) => {
                assert_eq!(v, 0.5);
                break;
            }
            Ok(None) => client.wait_for_progress(Duration::from_millis(10)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[test]
fn inflight_cap_produces_backpressure() {
    /// An oracle that blocks until told to finish.
    struct SlowOracle(std::sync::Mutex<std::sync::mpsc::Receiver<()>>);
    impl Oracle for SlowOracle {
        fn propose_actions(&self, _s: &DialogueState, count: usize) -> Vec<String> {
            let _ = self.0.lock().unwrap().recv();
            vec![String::from("x"); count]
        }
        fn score_priors(&self, _s: &DialogueState, actions: &[String]) -> Vec<f32> {
            vec![1.0 / actions.len().max(1) as f32; actions.len()]
        }
        fn evaluate(&self, _s: &DialogueState) -> f32 {
            0.5
        }
    }

    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let client = OracleClient::spawn(
        Arc::new(SlowOracle(std::sync::Mutex::new(release_rx))),
        ClientOptions {
            workers: 1,
            max_inflight_total: 2,
            queue_capacity: 8,
        },
    );

    let t1 = client.submit_propose(&state(), 1).unwrap();
    let t2 = client.submit_propose(&state(), 1).unwrap();
    match client.submit_propose(&state(), 1) {
        Err(OracleError::Backpressure(_)) => {}
        other => panic!("expected backpressure, got {other:?}"),
    }

    // Drain so the client can shut down.
    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    t1.recv().unwrap();
    t2.recv().unwrap();

    let snap = client.stats_snapshot();
    assert_eq!(snap.sent, 2);
    assert_eq!(snap.received, 2);
    assert!(snap.errors >= 1);
    assert_eq!(snap.latency_us.summary.count, 2);
}

#[test]
fn inflight_frees_when_the_call_finishes_not_on_recv() {
    let client = OracleClient::spawn(Arc::new(UniformOracle), ClientOptions::default());
    let t = client.submit_evaluate(&state()).unwrap();

    // Wait for the worker to finish without touching the ticket.
    while client.stats_snapshot().received < 1 {
        client.wait_for_progress(Duration::from_millis(10));
    }
    assert_eq!(client.stats_snapshot().inflight, 0);

    // The unconsumed result is still there.
    assert_eq!(t.recv().unwrap(), 0.5);
}

#[test]
fn panicking_oracle_fails_only_that_ticket() {
    struct PanickyOracle;
    impl Oracle for PanickyOracle {
        fn propose_actions(&self, _s: &DialogueState, _count: usize) -> Vec<String> {
            panic!("boom");
        }
        fn score_priors(&self, _s: &DialogueState, actions: &[String]) -> Vec<f32> {
            vec![1.0 / actions.len().max(1) as f32; actions.len()]
        }
        fn evaluate(&self, _s: &DialogueState) -> f32 {
            0.5
        }
    }

    let client = OracleClient::spawn(Arc::new(PanickyOracle), ClientOptions::default());
    let bad = client.submit_propose(&state(), 2).unwrap();
    match bad.recv() {
        Err(OracleError::Transport(_)) => {}
        other => panic!("expected transport error, got {other:?}"),
    }

    // The pool keeps serving after the panic.
    let ok = client.submit_evaluate(&state()).unwrap();
    assert_eq!(ok.recv().unwrap(), 0.5);
}
