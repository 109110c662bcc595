/// Why a service failed to come up. Both variants carry the service's captured
/// output so the operator sees what the process printed before it failed.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: anyhow::Error,
        log: String,
    },
    #[error("{service} did not become ready after {attempts} attempts{}", exit_note(.exit))]
    ReadinessTimeout {
        service: String,
        attempts: u32,
        /// How the process ended, if it died before the budget ran out.
        exit: Option<String>,
        log: String,
    },
}

fn exit_note(exit: &Option<String>) -> String {
    match exit {
        Some(status) => format!(" ({status})"),
        None => String::new(),
    }
}

impl LaunchError {
    pub fn service(&self) -> &str {
        match self {
            LaunchError::Spawn { service, .. } | LaunchError::ReadinessTimeout { service, .. } => {
                service
            }
        }
    }

    /// Captured output of the failed service.
    pub fn log(&self) -> &str {
        match self {
            LaunchError::Spawn { log, .. } | LaunchError::ReadinessTimeout { log, .. } => log,
        }
    }

    /// Error message followed by the captured output, for the terminal.
    pub fn diagnostic(&self) -> String {
        let log = self.log().trim_end();
        if log.is_empty() {
            format!("{self}\n(no output captured)")
        } else {
            format!("{self}\n--- {} output ---\n{log}\n---", self.service())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_exit_status() {
        let err = LaunchError::ReadinessTimeout {
            service: "xvfb".into(),
            attempts: 10,
            exit: Some("exited with code 1".into()),
            log: "(EE) no screens found\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "xvfb did not become ready after 10 attempts (exited with code 1)"
        );
        assert!(err.diagnostic().contains("--- xvfb output ---\n(EE) no screens found"));
    }

    #[test]
    fn empty_capture_is_called_out() {
        let err = LaunchError::Spawn {
            service: "tor".into(),
            source: anyhow::anyhow!("No such file or directory"),
            log: String::new(),
        };
        assert_eq!(err.service(), "tor");
        assert!(err.diagnostic().ends_with("(no output captured)"));
    }
}
