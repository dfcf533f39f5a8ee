//! Availability predicates for resource types.
//!
//! A resource type carries a user-authored shell expression with a
//! `${value}` placeholder. The exit code is inverted: a command that
//! *succeeds* proves the value is occupied (`nc -z` connects, `test -f`
//! finds the file), so success means "not available".

use crate::registry::ResourceType;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on a single check command. A check that hangs this long is
/// treated as "in use" so we never hand out a value we could not verify.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability predicate for a `(type, value)` candidate.
///
/// The registry is generic over this so tests can script availability
/// without shelling out.
#[async_trait]
pub trait AvailabilityCheck: Send + Sync {
    async fn is_available(&self, rtype: &ResourceType, value: &str) -> bool;
}

/// The production check: run the type's shell expression via `/bin/sh -c`
/// with `${value}` substituted, and invert the exit code.
///
/// An empty check command means the type is always available.
pub struct ShellCheck;

#[async_trait]
impl AvailabilityCheck for ShellCheck {
    async fn is_available(&self, rtype: &ResourceType, value: &str) -> bool {
        if rtype.check.is_empty() {
            return true;
        }

        let expr = rtype.check.replace("${value}", value);
        let result = tokio::time::timeout(
            CHECK_TIMEOUT,
            Command::new("/bin/sh")
                .arg("-c")
                .arg(&expr)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;

        match result {
            // Exit 0 = the probe succeeded = value is occupied.
            Ok(Ok(status)) => !status.success(),
            Ok(Err(e)) => {
                tracing::warn!("check for {} {} failed to run: {}", rtype.name, value, e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "check for {} {} timed out after {:?}",
                    rtype.name,
                    value,
                    CHECK_TIMEOUT
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtype_with_check(check: &str) -> ResourceType {
        ResourceType {
            name: "t".to_string(),
            check: check.to_string(),
            counter: false,
            start: 0,
            end: 0,
        }
    }

    #[tokio::test]
    async fn empty_check_is_always_available() {
        assert!(ShellCheck.is_available(&rtype_with_check(""), "x").await);
    }

    #[tokio::test]
    async fn successful_command_means_in_use() {
        assert!(!ShellCheck.is_available(&rtype_with_check("true"), "x").await);
    }

    #[tokio::test]
    async fn failing_command_means_available() {
        assert!(ShellCheck.is_available(&rtype_with_check("false"), "x").await);
    }

    #[tokio::test]
    async fn value_is_substituted() {
        // `test -f ${value}` on a file that exists reports "in use".
        let rt = rtype_with_check("test -f ${value}");
        assert!(!ShellCheck.is_available(&rt, "/proc/self/stat").await);
        assert!(ShellCheck.is_available(&rt, "/no/such/file/here").await);
    }
}
