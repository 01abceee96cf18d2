//! ClusterSession: one long-lived telnet connection per configured
//! cluster endpoint, with reconnect/backoff (spec.md §4.1).

use crate::cluster::parser::parse_dx_line;
use crate::model::RawSpot;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_DELAY: Duration = Duration::from_secs(2);
const BACKOFF_DELAYS_SECS: [u64; 6] = [60, 300, 600, 1200, 2400, 3600];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connecting,
    Connected,
    Cooldown,
}

fn backoff_delay(attempt: usize) -> Duration {
    let idx = attempt.min(BACKOFF_DELAYS_SECS.len() - 1);
    Duration::from_secs(BACKOFF_DELAYS_SECS[idx])
}

pub struct ClusterSession {
    pub host: String,
    pub port: u16,
    pub login: String,
}

impl ClusterSession {
    pub fn new(host: impl Into<String>, port: u16, login: impl Into<String>) -> Self {
        ClusterSession {
            host: host.into(),
            port,
            login: login.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Drive the reconnect/backoff state machine until `cancel` fires.
    /// Parsed spots are sent on `tx`; the receiver side is the
    /// Deduplicator. Never returns an error — all failures are logged
    /// and retried (spec.md: "Failures are non-fatal").
    pub async fn run(&self, tx: mpsc::Sender<RawSpot>, cancel: CancellationToken) {
        let mut state = State::Idle;
        let mut attempt: usize = 0;

        loop {
            if cancel.is_cancelled() {
                info!(host = %self.host, port = self.port, "cluster session cancelled");
                return;
            }

            state = match state {
                State::Idle => State::Connecting,
                State::Connecting => {
                    match self.connect_and_run(&tx, &cancel).await {
                        Ok(()) => {
                            attempt = 0;
                            State::Cooldown
                        }
                        Err(e) => {
                            warn!(host = %self.host, port = self.port, error = %e, "connection failed");
                            State::Cooldown
                        }
                    }
                }
                State::Connected => State::Cooldown,
                State::Cooldown => {
                    let delay = backoff_delay(attempt);
                    info!(
                        host = %self.host, port = self.port,
                        attempt, delay_secs = delay.as_secs(),
                        "reconnecting after backoff"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return,
                    }
                    State::Connecting
                }
            };
        }
    }

    /// Connect, log in, and read lines until the remote closes or an
    /// I/O error occurs. Returns `Ok(())` on any clean/unclean end of
    /// stream (the caller always cools down afterwards).
    async fn connect_and_run(
        &self,
        tx: &mpsc::Sender<RawSpot>,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        let endpoint = self.endpoint();
        info!(%endpoint, "attempting telnet connect");

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        info!(%endpoint, "connected");

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        tokio::select! {
            _ = tokio::time::sleep(LOGIN_DELAY) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
        write_half
            .write_all(format!("{}\n", self.login).as_bytes())
            .await?;
        debug!(%endpoint, "sent login callsign");

        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                r = reader.read_line(&mut line) => r,
                _ = cancel.cancelled() => return Ok(()),
            };

            let n = read?;
            if n == 0 {
                warn!(%endpoint, "connection closed by remote host");
                return Ok(());
            }

            let text = line.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }

            if text.starts_with("DX de") {
                match parse_dx_line(text, &endpoint) {
                    Ok(Some(spot)) => {
                        if tx.send(spot).await.is_err() {
                            // Downstream gone; nothing to do but stop this session.
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        debug!(%endpoint, "spot dropped by skimmer filter");
                    }
                    Err(_) => {
                        warn!(%endpoint, line = %text, "could not parse spot line");
                    }
                }
            } else {
                debug!(%endpoint, line = %text, "non-spot line");
            }
        }
    }
}

/// Load `(host, port)` pairs from a CSV with columns `hostname,port`.
/// Leading `#` comment lines are ignored (spec.md §6).
pub fn load_cluster_endpoints(csv_text: &str) -> Vec<(String, u16)> {
    let mut out = Vec::new();
    for line in csv_text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        if let (Some(host), Some(port)) = (parts.next(), parts.next()) {
            if let Ok(port) = port.trim().parse::<u16>() {
                out.push((host.trim().to_string(), port));
            } else {
                error!(line, "could not parse port from clusters csv line");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_endpoints_skipping_comments() {
        let csv = "# hostname,port\ndxc.example.com,7300\n\nanother.example.com,7373\n";
        let endpoints = load_cluster_endpoints(csv);
        assert_eq!(
            endpoints,
            vec![
                ("dxc.example.com".to_string(), 7300),
                ("another.example.com".to_string(), 7373),
            ]
        );
    }

    #[test]
    fn backoff_sequence_matches_spec() {
        assert_eq!(backoff_delay(0).as_secs(), 60);
        assert_eq!(backoff_delay(1).as_secs(), 300);
        assert_eq!(backoff_delay(5).as_secs(), 3600);
        assert_eq!(backoff_delay(99).as_secs(), 3600);
    }
}
