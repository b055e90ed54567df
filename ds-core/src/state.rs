//! Immutable conversational state.

/// Speaker of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Judged quality sub-scores, each in [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalScores {
    pub coherence: f32,
    pub relevance: f32,
    pub engagement: f32,
}

impl EvalScores {
    /// Build from raw judged numbers, clamping each sub-score into [0,1].
    ///
    /// Non-finite inputs clamp to 0.
    pub fn clamped(coherence: f32, relevance: f32, engagement: f32) -> Self {
        fn c(v: f32) -> f32 {
            if v.is_finite() {
                v.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        Self {
            coherence: c(coherence),
            relevance: c(relevance),
            engagement: c(engagement),
        }
    }

    /// Scalar value signal: 0.3·coherence + 0.4·relevance + 0.3·engagement.
    pub fn weighted(&self) -> f32 {
        0.3 * self.coherence + 0.4 * self.relevance + 0.3 * self.engagement
    }
}

/// Canonical dialogue state.
///
/// Immutable by convention: transitions go through [`DialogueState::with_action`],
/// which returns a new state and leaves the original untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueState {
    /// System instruction, fixed for the whole search.
    pub system: String,
    /// Ordered turn history.
    pub turns: Vec<Turn>,
    /// Active query text (the most recent thing being responded to).
    pub query: String,
    /// Number of transitions applied since the root.
    pub depth: u32,
    /// Optional judged quality record for this state.
    pub evaluation: Option<EvalScores>,
}

impl DialogueState {
    /// Root state for one search: the caller-supplied system prompt and
    /// initial query, with the query recorded as the opening user turn.
    pub fn root(system: impl Into<String>, query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            system: system.into(),
            turns: vec![Turn {
                role: Role::User,
                text: query.clone(),
            }],
            query,
            depth: 0,
            evaluation: None,
        }
    }

    /// Transition: append one assistant turn carrying `action`, make the
    /// action the active query, and increment depth. The evaluation record
    /// does not carry over.
    pub fn with_action(&self, action: &str) -> Self {
        let mut turns = self.turns.clone();
        turns.push(Turn {
            role: Role::Assistant,
            text: action.to_string(),
        });
        Self {
            system: self.system.clone(),
            turns,
            query: action.to_string(),
            depth: self.depth + 1,
            evaluation: None,
        }
    }

    /// Same state with a judged evaluation attached.
    pub fn with_evaluation(mut self, scores: EvalScores) -> Self {
        self.evaluation = Some(scores);
        self
    }

    /// Most recent turn, if any.
    pub fn latest_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }
}
