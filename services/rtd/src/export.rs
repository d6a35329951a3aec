//! Sinks that publish generated artifacts: local file, HTTP POST, rsync.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use rtd_common::Timestamp;
use rtd_core::{Artifact, CoreError, CoreResult, SnapshotSink};

use crate::config::{HttpPostConfig, RsyncConfig};

// ============================================================================
// File
// ============================================================================

/// Writes each artifact to a fixed path, atomically.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl SnapshotSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn publish(&self, artifact: &Artifact) -> CoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::sink(self.name(), e))?;
        }
        // readers must never see a half-written file
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &artifact.body)
            .await
            .map_err(|e| CoreError::sink(self.name(), e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::sink(self.name(), e))?;
        debug!(path = %self.path.display(), bytes = artifact.body.len(), "Wrote artifact");
        Ok(())
    }
}

// ============================================================================
// HTTP POST
// ============================================================================

/// Posts each artifact body to a remote URL.
#[derive(Debug, Clone)]
pub struct HttpPostSink {
    client: reqwest::Client,
    url: String,
    response_text: Option<String>,
}

impl HttpPostSink {
    pub fn new(config: &HttpPostConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            response_text: config.response_text.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSink for HttpPostSink {
    fn name(&self) -> &str {
        "http_post"
    }

    async fn publish(&self, artifact: &Artifact) -> CoreResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, artifact.content_type.as_str())
            .body(artifact.body.clone())
            .send()
            .await
            .map_err(|e| CoreError::sink(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::sink(
                self.name(),
                format!("{} answered {}", self.url, status),
            ));
        }
        let Some(expected) = &self.response_text else {
            debug!(url = %self.url, "Posted artifact");
            return Ok(());
        };

        let text = response
            .text()
            .await
            .map_err(|e| CoreError::sink(self.name(), e))?;
        if text.contains(expected.as_str()) {
            debug!(url = %self.url, "Posted artifact");
            Ok(())
        } else if status == StatusCode::OK {
            // a plain 200 gets the benefit of the doubt
            debug!(
                url = %self.url,
                "Artifact may have been posted; expected response text not received"
            );
            Ok(())
        } else {
            Err(CoreError::sink(
                self.name(),
                format!("unexpected response from {} ({})", self.url, status),
            ))
        }
    }
}

// ============================================================================
// rsync
// ============================================================================

/// Uploads the generated file with rsync over ssh.
#[derive(Debug, Clone)]
pub struct RsyncSink {
    local_path: PathBuf,
    remote_path: String,
    config: RsyncConfig,
}

impl RsyncSink {
    pub fn new(local_path: impl Into<PathBuf>, config: &RsyncConfig) -> Self {
        let local_path = local_path.into();
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_path = format!("{}/{}", config.remote_dir.trim_end_matches('/'), file_name);
        Self {
            local_path,
            remote_path,
            config: config.clone(),
        }
    }

    /// Whether a packet from `packet_ts` is too old to upload at `now`.
    pub fn should_skip(&self, packet_ts: Timestamp, now: Timestamp) -> bool {
        let limit = self.config.skip_if_older_than_secs;
        limit != 0 && now - packet_ts > limit
    }

    /// Arguments passed to the `rsync` binary.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec!["--archive".to_string(), "--stats".to_string()];
        if self.config.compress {
            args.push("--compress".to_string());
        }
        if let Some(timeout) = self.config.timeout_secs {
            args.push(format!("--timeout={}", timeout));
        }

        let mut ssh = String::from("ssh");
        if let Some(port) = self.config.port {
            ssh.push_str(&format!(" -p {}", port));
        }
        if !self.config.ssh_options.is_empty() {
            ssh.push(' ');
            ssh.push_str(&self.config.ssh_options);
        }
        args.push("-e".to_string());
        args.push(ssh);

        args.push(self.local_path.to_string_lossy().into_owned());
        let remote = match &self.config.user {
            Some(user) => format!("{}@{}:{}", user, self.config.server, self.remote_path),
            None => format!("{}:{}", self.config.server, self.remote_path),
        };
        args.push(remote);
        args
    }
}

#[async_trait]
impl SnapshotSink for RsyncSink {
    fn name(&self) -> &str {
        "rsync"
    }

    async fn publish(&self, artifact: &Artifact) -> CoreResult<()> {
        let now = Utc::now().timestamp();
        if self.should_skip(artifact.timestamp, now) {
            counter!("rtd_rsync_skipped_total").increment(1);
            info!(
                packet_ts = artifact.timestamp,
                age_secs = now - artifact.timestamp,
                "Skipping rsync of stale packet"
            );
            return Ok(());
        }

        let output = tokio::process::Command::new("rsync")
            .args(self.command_args())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::sink(self.name(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "rsync failed");
            return Err(CoreError::sink(
                self.name(),
                format!("rsync exited with {}", output.status),
            ));
        }
        if self.config.log_success {
            info!(remote = %self.remote_path, server = %self.config.server, "Rsynced artifact");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::post, Router};

    fn artifact(ts: Timestamp) -> Artifact {
        Artifact::json("gauge-data.txt", r#"{"temp":"10.5"}"#.to_string(), ts)
    }

    fn rsync_config() -> RsyncConfig {
        RsyncConfig {
            server: "web.example.com".into(),
            user: Some("weewx".into()),
            port: Some(2222),
            remote_dir: "/var/www/html/".into(),
            ssh_options: "-o ConnectTimeout=1".into(),
            compress: true,
            log_success: false,
            timeout_secs: Some(5),
            skip_if_older_than_secs: 4,
        }
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_file_sink_writes_atomically() {
        let dir = test_utils::temp_dir();
        let path = dir.path().join("www").join("gauge-data.txt");
        let sink = FileSink::new(&path);

        sink.publish(&artifact(100)).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"temp":"10.5"}"#);
        assert!(!sink.tmp_path().exists());

        let second = Artifact::json("gauge-data.txt", "{}".to_string(), 200);
        sink.publish(&second).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_http_post_response_handling() {
        let app = Router::new()
            .route("/ok", post(|| async { "success" }))
            .route("/silent", post(|| async { "" }))
            .route("/accepted", post(|| async { (AxumStatus::ACCEPTED, "queued") }))
            .route("/broken", post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom") }));
        let base = spawn_server(app).await;

        let sink = |path: &str| {
            HttpPostSink::new(&HttpPostConfig {
                url: format!("{}{}", base, path),
                timeout_secs: 2,
                response_text: Some("success".into()),
            })
            .unwrap()
        };

        sink("/ok").publish(&artifact(1)).await.unwrap();
        sink("/silent").publish(&artifact(1)).await.unwrap();
        assert!(matches!(
            sink("/accepted").publish(&artifact(1)).await,
            Err(CoreError::Sink { .. })
        ));
        let err = sink("/broken").publish(&artifact(1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_rsync_skip_window() {
        let sink = RsyncSink::new("/tmp/www/gauge-data.txt", &rsync_config());
        assert!(!sink.should_skip(100, 104));
        assert!(sink.should_skip(100, 105));

        let mut always = rsync_config();
        always.skip_if_older_than_secs = 0;
        let sink = RsyncSink::new("/tmp/www/gauge-data.txt", &always);
        assert!(!sink.should_skip(100, 10_000));
    }

    #[test]
    fn test_rsync_command_args() {
        let sink = RsyncSink::new("/tmp/www/gauge-data.txt", &rsync_config());
        assert_eq!(
            sink.command_args(),
            vec![
                "--archive",
                "--stats",
                "--compress",
                "--timeout=5",
                "-e",
                "ssh -p 2222 -o ConnectTimeout=1",
                "/tmp/www/gauge-data.txt",
                "weewx@web.example.com:/var/www/html/gauge-data.txt",
            ]
        );

        let mut anonymous = rsync_config();
        anonymous.user = None;
        anonymous.port = None;
        anonymous.compress = false;
        anonymous.timeout_secs = None;
        let args = RsyncSink::new("/tmp/www/gauge-data.txt", &anonymous).command_args();
        assert_eq!(args[2..4], ["-e".to_string(), "ssh -o ConnectTimeout=1".to_string()]);
        assert_eq!(args.last().unwrap(), "web.example.com:/var/www/html/gauge-data.txt");
    }

    #[tokio::test]
    async fn test_rsync_skips_stale_artifact_without_running() {
        let sink = RsyncSink::new("/nonexistent/gauge-data.txt", &rsync_config());
        let stale = artifact(Utc::now().timestamp() - 3600);
        sink.publish(&stale).await.unwrap();
    }
}
