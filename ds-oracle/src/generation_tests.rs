use std::sync::atomic::{AtomicU32, Ordering};

use ds_core::DialogueState;

use crate::completion::{Completion, CompletionRequest};
use crate::generation::{extract_numbers, softmax, GenerationConfig, GenerationOracle};
use crate::oracle::Oracle;
use crate::OracleError;

/// Scripted transport: answers candidate calls from a list, judge calls with
/// a fixed reply. Call failures are injected per kind.
struct ScriptedCompletion {
    candidates: Vec<&'static str>,
    judge_reply: &'static str,
    fail_judge: bool,
    calls: AtomicU32,
}

impl ScriptedCompletion {
    fn new(candidates: Vec<&'static str>, judge_reply: &'static str) -> Self {
        Self {
            candidates,
            judge_reply,
            fail_judge: false,
            calls: AtomicU32::new(0),
        }
    }
}

impl Completion for ScriptedCompletion {
    fn complete(&self, req: &CompletionRequest<'_>) -> Result<String, OracleError> {
        if req.instruction.is_empty() {
            // Candidate generation call.
            let i = self.calls.fetch_add(1, Ordering::Relaxed) as usize;
            match self.candidates.get(i) {
                Some(c) => Ok(c.to_string()),
                None => Err(OracleError::Transport("out of candidates".into())),
            }
        } else if self.fail_judge {
            Err(OracleError::Transport("judge down".into()))
        } else {
            Ok(self.judge_reply.to_string())
        }
    }
}

fn state() -> DialogueState {
    DialogueState::root("sys", "hello")
}

#[test]
fn propose_returns_fewer_on_partial_failure() {
    let oracle = GenerationOracle::new(ScriptedCompletion::new(vec!["a", "b"], "5"));
    let actions = oracle.propose_actions(&state(), 4);
    assert_eq!(actions, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn propose_skips_blank_completions() {
    let oracle = GenerationOracle::new(ScriptedCompletion::new(vec!["a", "   ", "c"], "5"));
    let actions = oracle.propose_actions(&state(), 3);
    assert_eq!(actions, vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn propose_temperature_ramps_with_candidate_index() {
    use std::sync::{Arc, Mutex};

    struct TempRecorder(Arc<Mutex<Vec<f32>>>);
    impl Completion for TempRecorder {
        fn complete(&self, req: &CompletionRequest<'_>) -> Result<String, OracleError> {
            self.0.lock().unwrap().push(req.temperature);
            Ok("x".to_string())
        }
    }

    let temps = Arc::new(Mutex::new(Vec::new()));
    let cfg = GenerationConfig {
        base_temperature: 0.7,
        temperature_step: 0.1,
        ..GenerationConfig::default()
    };
    let oracle = GenerationOracle::with_config(TempRecorder(Arc::clone(&temps)), cfg);
    oracle.propose_actions(&state(), 3);

    let temps = temps.lock().unwrap();
    assert_eq!(temps.len(), 3);
    assert!(temps[0] < temps[1] && temps[1] < temps[2]);
}

#[test]
fn priors_sum_to_one_and_order_by_rating() {
    struct RatingByAction;
    impl Completion for RatingByAction {
        fn complete(&self, req: &CompletionRequest<'_>) -> Result<String, OracleError> {
            if req.instruction.contains("Candidate: good") {
                Ok("9".to_string())
            } else {
                Ok("2".to_string())
            }
        }
    }
    let oracle = GenerationOracle::new(RatingByAction);
    let actions = vec!["good".to_string(), "bad".to_string()];
    let priors = oracle.score_priors(&state(), &actions);
    assert_eq!(priors.len(), 2);
    let sum: f32 = priors.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    assert!(priors[0] > priors[1]);
}

#[test]
fn priors_fall_back_to_uniform_on_judge_failure() {
    let mut sc = ScriptedCompletion::new(vec![], "irrelevant");
    sc.fail_judge = true;
    let oracle = GenerationOracle::new(sc);
    let actions = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
    let priors = oracle.score_priors(&state(), &actions);
    assert_eq!(priors, vec![0.25; 4]);
}

#[test]
fn priors_fall_back_to_uniform_on_unparseable_rating() {
    let oracle = GenerationOracle::new(ScriptedCompletion::new(vec![], "no idea, sorry"));
    let actions = vec!["a".to_string(), "b".to_string()];
    let priors = oracle.score_priors(&state(), &actions);
    assert_eq!(priors, vec![0.5, 0.5]);
}

#[test]
fn evaluate_weights_and_clamps_sub_scores() {
    let oracle = GenerationOracle::new(ScriptedCompletion::new(
        vec![],
        "coherence=1.0 relevance=0.5 engagement=0.0",
    ));
    let v = oracle.evaluate(&state());
    assert!((v - (0.3 * 1.0 + 0.4 * 0.5)).abs() < 1e-6);

    let clamped = GenerationOracle::new(ScriptedCompletion::new(
        vec![],
        "coherence=2.0 relevance=-1.0 engagement=0.5",
    ));
    let v = clamped.evaluate(&state());
    assert!((v - (0.3 * 1.0 + 0.0 + 0.3 * 0.5)).abs() < 1e-6);
}

#[test]
fn evaluate_returns_neutral_on_failure() {
    let mut sc = ScriptedCompletion::new(vec![], "x");
    sc.fail_judge = true;
    let oracle = GenerationOracle::new(sc);
    assert_eq!(oracle.evaluate(&state()), 0.5);

    let unparseable = GenerationOracle::new(ScriptedCompletion::new(vec![], "pretty good overall"));
    assert_eq!(unparseable.evaluate(&state()), 0.5);
}

#[test]
fn parse_errors_from_the_transport_are_absorbed() {
    struct RejectingTransport;
    impl Completion for RejectingTransport {
        fn complete(&self, _req: &CompletionRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Parse("reply failed validation".into()))
        }
    }

    let oracle = GenerationOracle::new(RejectingTransport);
    assert!(oracle.propose_actions(&state(), 2).is_empty());
    let actions = vec!["a".to_string(), "b".to_string()];
    assert_eq!(oracle.score_priors(&state(), &actions), vec![0.5, 0.5]);
    assert_eq!(oracle.evaluate(&state()), 0.5);
}

#[test]
fn softmax_is_a_distribution() {
    let p = softmax(&[1.0, 2.0, 3.0]).unwrap();
    let sum: f32 = p.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    assert!(p[2] > p[1] && p[1] > p[0]);

    assert!(softmax(&[]).is_none());
    assert!(softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]).is_none());
}

#[test]
fn extract_numbers_tolerates_prose() {
    assert_eq!(extract_numbers("I'd say 8 out of 10"), vec![8.0, 10.0]);
    assert_eq!(
        extract_numbers("coherence: 0.9, relevance: 0.7, engagement: 0.4"),
        vec![0.9, 0.7, 0.4]
    );
    assert_eq!(extract_numbers("rating is -2"), vec![-2.0]);
    assert!(extract_numbers("no numbers here").is_empty());
}
