//! External login helper
//!
//! The helper is any program that performs an interactive login and prints the
//! captured request as JSON (`{"body": ..., "headers": {...}}`) on its last
//! non-empty stdout line. Earlier lines are treated as chatter and logged.

use modmirror_core::models::LoginArtifact;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::broker::{LoginBroker, LoginRequest};
use crate::error::DownloadError;
use crate::vault::CredentialVault;

/// Environment variable telling the helper which service to log in to.
pub const HELPER_SERVICE_ENV: &str = "MODMIRROR_LOGIN_SERVICE";

const HELPER_ENDPOINT: &str = "login helper";

#[derive(Debug, Clone)]
pub struct ProcessLoginHelper {
    program: String,
    args: Vec<String>,
}

impl ProcessLoginHelper {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// Run the helper and parse the artifact it prints.
    pub async fn capture(&self, service: &str) -> Result<LoginArtifact, DownloadError> {
        tracing::info!(service = %service, program = %self.program, "Starting login helper");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(HELPER_SERVICE_ENV, service)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::protocol(HELPER_ENDPOINT, "stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut last_line = None;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(previous) = last_line.replace(line) {
                tracing::debug!(service = %service, output = %previous, "Login helper output");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(DownloadError::protocol(
                HELPER_ENDPOINT,
                format!("helper exited with {}", status),
            ));
        }

        let last_line = last_line
            .ok_or_else(|| DownloadError::protocol(HELPER_ENDPOINT, "helper printed nothing"))?;
        serde_json::from_str(last_line.trim()).map_err(|e| {
            DownloadError::protocol(HELPER_ENDPOINT, format!("last line is not a login artifact: {}", e))
        })
    }

    /// Run the helper and store the result in the vault.
    pub async fn run(&self, service: &str, vault: &CredentialVault) -> Result<LoginArtifact, DownloadError> {
        let artifact = self.capture(service).await?;
        vault.put(service, &artifact).await?;
        Ok(artifact)
    }

    /// Answer broker login requests until the event channel closes. A helper
    /// failure cancels the request it was answering.
    pub async fn serve(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LoginRequest>, broker: LoginBroker) {
        while let Some(request) = events.recv().await {
            match self.capture(&request.service).await {
                Ok(artifact) => {
                    if let Err(e) = broker.resume(request.handle, artifact).await {
                        tracing::error!(service = %request.service, error = %e, "Failed to store login");
                        broker.cancel(request.handle).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(service = %request.service, error = %e, "Login helper failed");
                    broker.cancel(request.handle).await;
                }
            }
        }
        tracing::debug!("Login event channel closed");
    }
}

/// Decline every login request. Used when no helper is configured.
pub async fn decline_all(mut events: mpsc::UnboundedReceiver<LoginRequest>, broker: LoginBroker) {
    while let Some(request) = events.recv().await {
        tracing::warn!(
            service = %request.service,
            "Login required but no LOGIN_HELPER_COMMAND is configured"
        );
        broker.cancel(request.handle).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::test_vault;

    fn shell(script: &str) -> ProcessLoginHelper {
        ProcessLoginHelper::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn last_non_empty_line_is_the_artifact() {
        let helper = shell(
            r#"echo "starting game"; echo '{"body":"b","headers":{"x-src-fp":"fp"}}'; echo """#,
        );
        let artifact = helper.capture("svc").await.unwrap();
        assert_eq!(artifact, LoginArtifact::new("b").with_header("x-src-fp", "fp"));
    }

    #[tokio::test]
    async fn helper_sees_service_name() {
        let helper = shell(r#"printf '{"body":"%s"}\n' "$MODMIRROR_LOGIN_SERVICE""#);
        assert_eq!(helper.capture("bethesda_net").await.unwrap().body, "bethesda_net");
    }

    #[tokio::test]
    async fn failures_are_protocol_errors() {
        assert!(matches!(
            shell("echo not json").capture("svc").await,
            Err(DownloadError::Protocol { .. })
        ));
        assert!(matches!(
            shell("exit 3").capture("svc").await,
            Err(DownloadError::Protocol { .. })
        ));
        assert!(matches!(
            ProcessLoginHelper::new("/nonexistent/helper", Vec::<String>::new())
                .capture("svc")
                .await,
            Err(DownloadError::Io(_))
        ));
    }

    #[tokio::test]
    async fn serve_resumes_broker_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, events) = LoginBroker::new(test_vault(dir.path()).await);
        let helper = Arc::new(shell(r#"echo '{"body":"from helper"}'"#));
        tokio::spawn(helper.serve(events, broker.clone()));

        let artifact = broker.request_login("svc").await.unwrap();
        assert_eq!(artifact.body, "from helper");
        assert!(broker.vault().exists("svc").await.unwrap());
    }

    #[tokio::test]
    async fn serve_cancels_on_helper_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, events) = LoginBroker::new(test_vault(dir.path()).await);
        tokio::spawn(Arc::new(shell("exit 1")).serve(events, broker.clone()));

        assert!(matches!(
            broker.request_login("svc").await,
            Err(DownloadError::LoginCanceled { .. })
        ));
    }

    #[test]
    fn command_line_parsing() {
        assert!(ProcessLoginHelper::from_command_line("   ").is_none());
        let helper = ProcessLoginHelper::from_command_line("bethnetlogin --game skyrim").unwrap();
        assert_eq!(helper.program, "bethnetlogin");
        assert_eq!(helper.args, vec!["--game", "skyrim"]);
    }
}
