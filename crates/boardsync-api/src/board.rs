//! Per-environment board constants.

use boardsync_core::Environment;
use serde::Serialize;

const POSITION: &str = "API_Position";
const UAT_INCIDENT: &str = "QRM Data Test";
const LIVE_INCIDENT: &str = "LIVE PaTCH Operations";
const BOARD: &str = "Patient Transport";
const DISPLAY: &str = "API Power BI Dashboard";

/// Where on the remote API the dataset lives, and which seat to log in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardTarget {
    pub position: String,
    pub incident: String,
    pub board: String,
    pub display: String,
}

impl BoardTarget {
    pub fn for_environment(env: &Environment) -> Self {
        let incident = if env.is_uat() {
            UAT_INCIDENT
        } else {
            LIVE_INCIDENT
        };
        Self {
            position: POSITION.into(),
            incident: incident.into(),
            board: BOARD.into(),
            display: DISPLAY.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uat_target() {
        let target = BoardTarget::for_environment(&Environment::new("uat"));
        assert_eq!(target.incident, "QRM Data Test");
        assert_eq!(target.position, "API_Position");
        assert_eq!(target.board, "Patient Transport");
        assert_eq!(target.display, "API Power BI Dashboard");
    }

    #[test]
    fn test_live_target() {
        let target = BoardTarget::for_environment(&Environment::new("prod"));
        assert_eq!(target.incident, "LIVE PaTCH Operations");
        assert_eq!(target.board, "Patient Transport");
    }
}
