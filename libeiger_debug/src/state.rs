use std::fmt;
use std::str::FromStr;

use super::error::ClientError;

/// State reported by the detector at `detector/api/<version>/status/state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    Na,
    Initialize,
    Configure,
    Acquire,
    Test,
    Ready,
    Idle,
    Error,
}

impl DetectorState {
    /// A detector in this state cannot take data; polling for `ready` is pointless
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DetectorState::Na | DetectorState::Error)
    }
}

impl FromStr for DetectorState {
    type Err = ClientError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "na" => Ok(Self::Na),
            "initialize" => Ok(Self::Initialize),
            "configure" => Ok(Self::Configure),
            "acquire" => Ok(Self::Acquire),
            "test" => Ok(Self::Test),
            "ready" => Ok(Self::Ready),
            "idle" => Ok(Self::Idle),
            "error" => Ok(Self::Error),
            _ => Err(ClientError::UnknownState(s.to_string())),
        }
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Na => "na",
            Self::Initialize => "initialize",
            Self::Configure => "configure",
            Self::Acquire => "acquire",
            Self::Test => "test",
            Self::Ready => "ready",
            Self::Idle => "idle",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_states() {
        assert_eq!("ready".parse::<DetectorState>().unwrap(), DetectorState::Ready);
        assert_eq!("na".parse::<DetectorState>().unwrap(), DetectorState::Na);
        assert!("READY".parse::<DetectorState>().is_err());
        assert!(DetectorState::Error.is_unavailable());
        assert!(!DetectorState::Idle.is_unavailable());
        assert_eq!(DetectorState::Configure.to_string(), "configure");
    }
}
