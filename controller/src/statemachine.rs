use models::compute::{ledger, Instance, InstanceStatus};

use chrono::{DateTime, Duration, Utc};
use tracing::{event, instrument, Level};

/// Instances whose deadline falls within this many seconds are drained in the current cycle.
pub const DRAIN_LEAD_TIME_SECS: i64 = 60;

/// What the controller should do with an instance in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// The instance is not running; leave it alone.
    Skip { status: InstanceStatus },
    /// The instance has no drain deadline yet.
    AssignDeadline,
    /// The deadline has passed without the instance being drained, or it could not be read.
    ExpireNow {
        missed_deadline: Option<DateTime<Utc>>,
    },
    /// The deadline is imminent.
    DrainAndDelete { deadline: DateTime<Utc> },
    Wait { deadline: DateTime<Utc> },
}

/// Decides the action for `instance` given the current time.
#[instrument(skip(instance), fields(instance = %instance.name))]
pub fn determine_node_action(instance: &Instance, now: DateTime<Utc>) -> NodeAction {
    if !instance.is_running() {
        return NodeAction::Skip {
            status: instance.status,
        };
    }

    match ledger::read_deadline(&instance.labels) {
        Ok(None) => NodeAction::AssignDeadline,
        Ok(Some(deadline)) if deadline <= now => NodeAction::ExpireNow {
            missed_deadline: Some(deadline),
        },
        Ok(Some(deadline)) if deadline <= now + Duration::seconds(DRAIN_LEAD_TIME_SECS) => {
            NodeAction::DrainAndDelete { deadline }
        }
        Ok(Some(deadline)) => NodeAction::Wait { deadline },
        Err(err) => {
            // A deadline nobody can read will never be honored; treat it as missed.
            event!(
                Level::WARN,
                error = %err,
                "Drain deadline label is unreadable, draining instance now."
            );
            NodeAction::ExpireNow {
                missed_deadline: None,
            }
        }
    }
}
