use crate::state::{DialogueState, EvalScores, Role};

#[test]
fn root_has_depth_zero_and_opening_user_turn() {
    let s = DialogueState::root("be helpful", "hello there");
    assert_eq!(s.depth, 0);
    assert_eq!(s.query, "hello there");
    assert_eq!(s.turns.len(), 1);
    assert_eq!(s.turns[0].role, Role::User);
    assert!(s.evaluation.is_none());
}

#[test]
fn with_action_appends_one_turn_and_increments_depth() {
    let s = DialogueState::root("sys", "q");
    let t = s.with_action("a reply");

    // Original untouched.
    assert_eq!(s.turns.len(), 1);
    assert_eq!(s.depth, 0);
    assert_eq!(s.query, "q");

    assert_eq!(t.turns.len(), 2);
    assert_eq!(t.depth, 1);
    assert_eq!(t.query, "a reply");
    assert_eq!(t.turns[1].role, Role::Assistant);
    assert_eq!(t.turns[1].text, "a reply");
    assert_eq!(t.system, s.system);
}

#[test]
fn with_action_clears_evaluation() {
    let s = DialogueState::root("sys", "q").with_evaluation(EvalScores::clamped(1.0, 1.0, 1.0));
    assert!(s.evaluation.is_some());
    let t = s.with_action("x");
    assert!(t.evaluation.is_none());
}

#[test]
fn eval_scores_clamp_and_weight() {
    let e = EvalScores::clamped(1.5, -0.2, 0.5);
    assert_eq!(e.coherence, 1.0);
    assert_eq!(e.relevance, 0.0);
    assert_eq!(e.engagement, 0.5);
    let w = e.weighted();
    assert!((w - (0.3 + 0.0 + 0.15)).abs() < 1e-6);

    let nan = EvalScores::clamped(f32::NAN, 0.5, 0.5);
    assert_eq!(nan.coherence, 0.0);
}

#[test]
fn weighted_is_in_unit_interval() {
    let e = EvalScores::clamped(1.0, 1.0, 1.0);
    assert!((e.weighted() - 1.0).abs() < 1e-6);
    let z = EvalScores::clamped(0.0, 0.0, 0.0);
    assert_eq!(z.weighted(), 0.0);
}
