//! Error types for service lifecycle operations

use std::fmt;
use std::path::PathBuf;

/// Result type alias for lifecycle operations
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors that abort a launch
#[derive(Debug)]
pub enum LaunchError {
    /// A service with this name is still tracked
    AlreadyRunning(String),

    /// The port is still bound after reclamation
    PortUnavailable(u16),

    /// The build ran but its artifact is still missing
    BuildFailed { service: String, artifact: PathBuf },

    /// The child process could not be started
    SpawnFailed { service: String, source: std::io::Error },

    /// The service never became reachable
    NotReady {
        service: String,
        url: String,
        attempts: u32,
        log_excerpt: Vec<String>,
    },

    /// I/O error (log files, PID files, directories)
    IoError(std::io::Error),
}

impl LaunchError {
    /// Short, single-line description for menus and status bars
    pub fn summary(&self) -> String {
        match self {
            LaunchError::NotReady { service, url, attempts, .. } => {
                format!("{service} did not become ready at {url} after {attempts} attempts")
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::AlreadyRunning(name) => {
                write!(f, "service {} is already running; stop it first", name)
            }
            LaunchError::PortUnavailable(port) => {
                write!(f, "port {} is still in use even after cleanup", port)
            }
            LaunchError::BuildFailed { service, artifact } => write!(
                f,
                "build for {} failed: {} is missing (see the error log)",
                service,
                artifact.display()
            ),
            LaunchError::SpawnFailed { service, source } => {
                write!(f, "failed to start {}: {}", service, source)
            }
            LaunchError::NotReady {
                service,
                url,
                attempts,
                log_excerpt,
            } => {
                write!(
                    f,
                    "{} did not become ready at {} after {} attempts",
                    service, url, attempts
                )?;
                if !log_excerpt.is_empty() {
                    write!(f, "\nlast lines of the service log:")?;
                    for line in log_excerpt {
                        write!(f, "\n  {}", line)?;
                    }
                }
                Ok(())
            }
            LaunchError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::SpawnFailed { source, .. } => Some(source),
            LaunchError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        LaunchError::IoError(err)
    }
}
