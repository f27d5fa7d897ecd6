// SPDX-License-Identifier: MIT

//! Exit statuses and job-status hints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of executing a link's task, used to pick the next link
///
/// Command tasks report `Code(n)`. The symbolic values are produced by
/// in-engine steps (`Success`) or when an executable cannot be started
/// (`InfrastructureFailure`). In configuration they are written as an
/// integer or as `success`, `failure`, `infrastructure_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawStatus", into = "RawStatus")]
pub enum ExitStatus {
    Success,
    Failure,
    InfrastructureFailure,
    Code(i32),
}

impl ExitStatus {
    /// Symbolic class a numeric code falls back to when no exact code matches
    pub fn symbolic_class(&self) -> Option<ExitStatus> {
        match self {
            ExitStatus::Code(0) => Some(ExitStatus::Success),
            ExitStatus::Code(_) => Some(ExitStatus::Failure),
            _ => None,
        }
    }

    /// Transition keys to try, most specific first
    pub fn lookup_keys(&self) -> impl Iterator<Item = ExitStatus> {
        std::iter::once(*self).chain(self.symbolic_class())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success | ExitStatus::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Failure => write!(f, "failure"),
            ExitStatus::InfrastructureFailure => write!(f, "infrastructure_failure"),
            ExitStatus::Code(code) => write!(f, "{}", code),
        }
    }
}

impl FromStr for ExitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "success" => Ok(ExitStatus::Success),
            "failure" => Ok(ExitStatus::Failure),
            "infrastructure_failure" => Ok(ExitStatus::InfrastructureFailure),
            other => other
                .parse::<i32>()
                .map(ExitStatus::Code)
                .map_err(|_| format!("Unknown exit status: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(i32),
    Name(String),
}

impl TryFrom<RawStatus> for ExitStatus {
    type Error = String;

    fn try_from(raw: RawStatus) -> Result<Self, Self::Error> {
        match raw {
            RawStatus::Code(code) => Ok(ExitStatus::Code(code)),
            RawStatus::Name(name) => name.parse(),
        }
    }
}

impl From<ExitStatus> for RawStatus {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Code(code) => RawStatus::Code(code),
            other => RawStatus::Name(other.to_string()),
        }
    }
}

/// Job-status hint recorded when a link finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    CompletedSuccessfully,
    Failed,
}

impl JobStatus {
    pub fn link_default() -> Self {
        JobStatus::Failed
    }

    pub fn transition_default() -> Self {
        JobStatus::CompletedSuccessfully
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::CompletedSuccessfully => write!(f, "Completed successfully"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbolic_and_numeric() {
        assert_eq!("success".parse::<ExitStatus>(), Ok(ExitStatus::Success));
        assert_eq!("failure".parse::<ExitStatus>(), Ok(ExitStatus::Failure));
        assert_eq!(
            "infrastructure_failure".parse::<ExitStatus>(),
            Ok(ExitStatus::InfrastructureFailure)
        );
        assert_eq!("3".parse::<ExitStatus>(), Ok(ExitStatus::Code(3)));
        assert!("sometimes".parse::<ExitStatus>().is_err());
    }

    #[test]
    fn test_lookup_keys() {
        let keys: Vec<_> = ExitStatus::Code(0).lookup_keys().collect();
        assert_eq!(keys, vec![ExitStatus::Code(0), ExitStatus::Success]);

        let keys: Vec<_> = ExitStatus::Code(2).lookup_keys().collect();
        assert_eq!(keys, vec![ExitStatus::Code(2), ExitStatus::Failure]);

        let keys: Vec<_> = ExitStatus::InfrastructureFailure.lookup_keys().collect();
        assert_eq!(keys, vec![ExitStatus::InfrastructureFailure]);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let statuses: Vec<ExitStatus> =
            serde_yaml::from_str("[0, 179, success, infrastructure_failure]").unwrap();
        assert_eq!(
            statuses,
            vec![
                ExitStatus::Code(0),
                ExitStatus::Code(179),
                ExitStatus::Success,
                ExitStatus::InfrastructureFailure
            ]
        );
    }

    #[test]
    fn test_job_status_serde_names() {
        let status: JobStatus = serde_yaml::from_str("completed_successfully").unwrap();
        assert_eq!(status, JobStatus::CompletedSuccessfully);
        assert_eq!(JobStatus::link_default(), JobStatus::Failed);
    }
}
