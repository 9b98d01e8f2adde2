// ABOUTME: Property tests for attempt stage transitions.
// ABOUTME: Random transition requests must never produce a history the pipeline forbids.

use proptest::prelude::*;
use release_sequencer::release::{ReleaseAttempt, Stage};
use release_sequencer::types::{EnvironmentName, SourceRef};

fn attempt() -> ReleaseAttempt {
    ReleaseAttempt::new(
        SourceRef::new("abc123").unwrap(),
        EnvironmentName::new("staging").unwrap(),
    )
}

fn any_stage() -> impl Strategy<Value = Stage> {
    proptest::sample::select(Stage::ALL.to_vec())
}

proptest! {
    #[test]
    fn history_only_contains_allowed_edges(requests in proptest::collection::vec(any_stage(), 0..40)) {
        let mut attempt = attempt();
        for to in requests {
            let before = attempt.stage();
            let allowed = before.can_transition_to(to);
            prop_assert_eq!(attempt.advance(to).is_ok(), allowed);
            prop_assert_eq!(attempt.stage(), if allowed { to } else { before });
        }

        let history: Vec<Stage> = attempt.history().iter().map(|e| e.stage).collect();
        prop_assert_eq!(history[0], Stage::Pending);
        for pair in history.windows(2) {
            prop_assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        prop_assert_eq!(history.last().copied(), Some(attempt.stage()));
    }

    #[test]
    fn terminal_stage_is_final(requests in proptest::collection::vec(any_stage(), 0..40)) {
        let mut attempt = attempt();
        let mut terminal = None;
        for to in requests {
            let _ = attempt.advance(to);
            if let Some(stage) = terminal {
                prop_assert_eq!(attempt.stage(), stage);
            } else if attempt.stage().is_terminal() {
                terminal = Some(attempt.stage());
                prop_assert!(attempt.finished_at().is_some());
            }
        }
        if terminal.is_none() {
            prop_assert!(attempt.finished_at().is_none());
        }
    }

    #[test]
    fn rolled_back_attempts_passed_through_deploying(requests in proptest::collection::vec(any_stage(), 0..40)) {
        let mut attempt = attempt();
        for to in requests {
            let _ = attempt.advance(to);
        }
        if attempt.stage() == Stage::RolledBack {
            let history: Vec<Stage> = attempt.history().iter().map(|e| e.stage).collect();
            prop_assert!(history.contains(&Stage::Pushing));
            prop_assert!(history.contains(&Stage::Deploying));
        }
    }
}
