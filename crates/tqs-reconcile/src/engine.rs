use tqs_schemas::{QuizResult, TravelType};

use crate::{MergeOutcome, MergeSource};

fn usable_travel_type(r: &QuizResult) -> Option<&TravelType> {
    r.travel_type.as_ref().filter(|t| t.has_code())
}

/// Comparison rule between two present results:
/// 1) higher timestamp wins
/// 2) equal timestamp -> more places wins
/// 3) full tie -> remote wins
pub fn local_wins(local: &QuizResult, remote: &QuizResult) -> bool {
    if local.timestamp != remote.timestamp {
        return local.timestamp > remote.timestamp;
    }
    local.places.len() > remote.places.len()
}

/// Deterministic merge of a local and remote quiz result.
///
/// Field selection when both sides are present:
/// - `travel_type`: winner's, else loser's, else local's
/// - `places`: remote's if remote won, else local's
/// - `answers`: winner's, else loser's
/// - `timestamp`: max of both, regardless of winner
///
/// `needs_resync` is set only when local won AND a remote result existed AND
/// local's timestamp is strictly greater. Local winning on place count at an
/// equal timestamp does not flag a resync.
pub fn merge_quiz_results(local: Option<&QuizResult>, remote: Option<&QuizResult>) -> MergeOutcome {
    let (local, remote) = match (local, remote) {
        (None, None) => return MergeOutcome::none(),
        (Some(l), None) => {
            return MergeOutcome {
                result: Some(l.clone()),
                source: MergeSource::Local,
                needs_resync: false,
            }
        }
        (None, Some(r)) => {
            return MergeOutcome {
                result: Some(r.clone()),
                source: MergeSource::Remote,
                needs_resync: false,
            }
        }
        (Some(l), Some(r)) => (l, r),
    };

    let local_won = local_wins(local, remote);
    let (winner, loser) = if local_won {
        (local, remote)
    } else {
        (remote, local)
    };

    let travel_type = usable_travel_type(winner)
        .or_else(|| usable_travel_type(loser))
        .cloned()
        .or_else(|| local.travel_type.clone());

    let places = if local_won {
        local.places.clone()
    } else {
        remote.places.clone()
    };

    let answers = winner.answers.clone().or_else(|| loser.answers.clone());

    let merged = QuizResult {
        travel_type,
        places,
        answers,
        timestamp: local.timestamp.max(remote.timestamp),
    };

    MergeOutcome {
        result: Some(merged),
        source: if local_won {
            MergeSource::Local
        } else {
            MergeSource::Remote
        },
        needs_resync: local_won && local.timestamp > remote.timestamp,
    }
}
