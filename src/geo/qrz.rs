//! QrzSession (spec.md §4.5): holds and periodically refreshes an auth
//! token for the external QRZ callsign-lookup XML service.

use crate::geo::locator::strip_portable_suffix;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const BASE_URL: &str = "https://xmldata.qrz.com/xml/current/";
const MAX_ACQUIRE_ATTEMPTS: u32 = 5;
const RETRY_SPACING: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a callsign locator lookup: either a grid locator, or a
/// reason it's unavailable. Both are "locator unknown" outcomes per
/// spec.md §4.4 step 2 — the caller falls back to the prefix table
/// either way.
#[derive(Debug, Clone, PartialEq)]
pub struct QrzLookup {
    pub locator: Option<String>,
}

pub struct QrzSession {
    http: reqwest::Client,
    username: String,
    password: String,
    api_key: String,
    refresh_interval: Duration,
    key: Arc<RwLock<String>>,
    refresh_lock: Mutex<()>,
}

impl QrzSession {
    pub fn new(username: String, password: String, api_key: String, refresh_interval: Duration) -> Self {
        QrzSession {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            username,
            password,
            api_key,
            refresh_interval,
            key: Arc::new(RwLock::new(String::new())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Acquire the initial session key. Called once at Supervisor
    /// startup; on exhaustion the key stays empty and GeoResolver
    /// falls back to the prefix table for every callsign until the
    /// next refresh succeeds.
    pub async fn start(&self) {
        if let Some(key) = self.acquire_key().await {
            *self.key.write().await = key;
            info!("QRZ session initialized");
        } else {
            error!("QRZ session could not be initialized; falling back to prefix table");
        }
    }

    /// Non-blocking read of the current session key. Never blocks on
    /// the refresh task (spec.md §4.5).
    pub async fn get_key(&self) -> String {
        self.key.read().await.clone()
    }

    /// Background refresh loop: re-acquire under a mutex every
    /// `refresh_interval`. Keeps the previous key on failure.
    pub async fn refresh_loop(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = cancel.cancelled() => {
                    info!("QRZ refresh task cancelled");
                    return;
                }
            }

            let _guard = self.refresh_lock.lock().await;
            info!(secs = self.refresh_interval.as_secs(), "refreshing QRZ key");
            match self.acquire_key().await {
                Some(new_key) => {
                    *self.key.write().await = new_key;
                    info!("QRZ session refreshed successfully");
                }
                None => {
                    error!("QRZ refresh failed, keeping old key");
                }
            }
        }
    }

    async fn acquire_key(&self) -> Option<String> {
        if self.username.is_empty() || self.password.is_empty() {
            error!("QRZ username/password empty; cannot acquire session");
            return None;
        }

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let url = format!(
                "{BASE_URL}?username={};password={};agent=rust:{}",
                self.username, self.password, self.api_key
            );
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => {
                        if let Some(key) = extract_tag(&body, "Key") {
                            info!(attempt, "received QRZ key");
                            return Some(key);
                        }
                        error!(attempt, "QRZ response had no <Key> element");
                    }
                    Err(e) => error!(attempt, error = %e, "failed reading QRZ response body"),
                },
                Ok(resp) => error!(attempt, status = %resp.status(), "QRZ session acquire non-200"),
                Err(e) => error!(attempt, error = %e, "QRZ session acquire request failed"),
            }
            tokio::time::sleep(RETRY_SPACING).await;
        }
        error!(attempts = MAX_ACQUIRE_ATTEMPTS, "exhausted QRZ session acquire attempts");
        None
    }

    /// Look up a callsign's user-supplied grid locator via the
    /// authenticated session (spec.md §4.4 step 2).
    pub async fn lookup_locator(&self, session_key: &str, callsign: &str) -> QrzLookup {
        if session_key.is_empty() {
            return QrzLookup { locator: None };
        }

        let callsign = strip_portable_suffix(callsign);
        let url = format!("{BASE_URL}?s={session_key};callsign={callsign}");

        let body = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(b) => b,
                Err(_) => return QrzLookup { locator: None },
            },
            _ => return QrzLookup { locator: None },
        };

        if extract_tag(&body, "Error").is_some() {
            return QrzLookup { locator: None };
        }

        let geoloc = extract_tag(&body, "geoloc");
        match geoloc.as_deref() {
            Some("user") | Some("grid") => QrzLookup {
                locator: extract_tag(&body, "grid"),
            },
            _ => QrzLookup { locator: None },
        }
    }
}

/// Extract the first `<tag>...</tag>` text content from a QRZ XML
/// response body, ignoring namespace prefixes.
fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_tag = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(&name.as_ref());
                in_tag = local == tag;
            }
            Ok(Event::Text(t)) if in_tag => {
                let text = t.unescape().ok()?.into_owned();
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Ok(Event::End(_)) => in_tag = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    match s.rfind(':') {
        Some(idx) => &s[idx + 1..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tag_ignoring_namespace_prefix() {
        let xml = r#"<QRZDatabase xmlns="http://xmldata.qrz.com"><Session><Key>abc123</Key></Session></QRZDatabase>"#;
        assert_eq!(extract_tag(xml, "Key"), Some("abc123".to_string()));
    }

    #[test]
    fn missing_tag_is_none() {
        let xml = r#"<QRZDatabase xmlns="http://xmldata.qrz.com"><Session></Session></QRZDatabase>"#;
        assert_eq!(extract_tag(xml, "Key"), None);
    }

    #[test]
    fn error_element_present_means_unknown() {
        let xml = r#"<QRZDatabase><Session><Error>Not found: callsign</Error></Session></QRZDatabase>"#;
        assert!(extract_tag(xml, "Error").is_some());
    }
}
