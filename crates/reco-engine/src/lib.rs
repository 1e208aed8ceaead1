//! Recommendation engine: graph mirror sync, interaction recording, preference learning, ranking.

mod learner;
mod mirror;
mod ranking;
mod recorder;
mod service;

pub use learner::{compute_preferences, PreferenceLearner};
pub use mirror::{GraphMirror, MirrorOutcome, MirrorRetry};
pub use ranking::{preference_score, rank_by_preference, rank_collaborative, DEFAULT_LIMIT};
pub use recorder::InteractionRecorder;
pub use reco_types::{EngineError, Recommender};
pub use service::RecommendationService;
