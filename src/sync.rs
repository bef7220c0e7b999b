//! Uploads a cycle's collected state to the control plane: weighted
//! multi-endpoint selection, a proxy per endpoint, unbounded retry on
//! transport errors with debounced logging, and exact commit semantics —
//! the caller only learns of success once a 2xx response has been fully
//! read, so the backlog commit in `collector::Commit` never fires early.

use crate::config::Config;
use crate::model::ApiRequest;
use crate::RELEASE;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::Proxy;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// reqwest's blocking client has no separate TLS-handshake or
/// response-header timeout, only one overall `timeout`. In production this
/// approximates the 5s handshake + 15s header-wait budget as a single 20s
/// bound past `connect_timeout`, so a peer that connects but then stalls on
/// the TLS handshake or never sends headers still counts as a transport
/// error the retry loop can act on, rather than hanging the call forever.
const PROD_TIMEOUT: Duration = Duration::from_secs(20);
const DEV_TIMEOUT: Duration = Duration::from_secs(600);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const WARN_DEBOUNCE: Duration = Duration::from_secs(3);
const PROGRAM_NAME: &str = "fleet-sync-agent";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("server returned {status}: {excerpt}")]
    NonSuccess {
        status: u16,
        raw_body: Vec<u8>,
        excerpt: String,
    },

    #[error("could not decode server response as JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Uploads `payload`, retrying transport errors indefinitely with a 500ms
/// backoff and a log warning no more than once every 3 seconds. Returns
/// only on success or on a non-transport failure (a clean HTTP error or a
/// decode error) — the outer loop's `interval_sec` is not a retry budget
/// for this call.
pub fn post(config: &Config, payload: &ApiRequest) -> Result<crate::model::ApiResponse, SyncError> {
    if let Err(err) = persist_request(config, payload) {
        tracing::warn!(%err, "could not persist sync_request.txt for post-mortem inspection");
    }

    let body = serde_json::to_vec(payload).expect("ApiRequest always serializes");

    let mut attempts_since_warn = 0u32;
    let mut last_warn: Option<Instant> = None;

    loop {
        let spec = select_endpoint(config);

        let proxy = if spec.proxy_url.is_empty() {
            None
        } else {
            match Proxy::all(&spec.proxy_url) {
                Ok(proxy) => Some(proxy),
                Err(err) => {
                    tracing::warn!(proxy = %spec.proxy_url, %err, "could not parse proxy url, re-selecting endpoint");
                    continue;
                }
            }
        };

        let client = match build_client(config.is_dev, proxy) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(%err, "could not build HTTP client, re-selecting endpoint");
                continue;
            }
        };

        let user_agent = format!("{PROGRAM_NAME}:{}", RELEASE);
        let response = client
            .post(&spec.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Api-Key {}", config.api_key))
            .header("User-Agent", user_agent)
            .body(body.clone())
            .send();

        match response {
            Ok(response) if response.status().is_success() => {
                let raw = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
                return serde_json::from_slice(&raw).map_err(SyncError::Decode);
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let raw_body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
                let excerpt: String = String::from_utf8_lossy(&raw_body).chars().take(50).collect();
                return Err(SyncError::NonSuccess {
                    status,
                    raw_body,
                    excerpt,
                });
            }
            Err(err) => {
                attempts_since_warn += 1;
                let should_warn = last_warn.map(|t| t.elapsed() >= WARN_DEBOUNCE).unwrap_or(true);
                if should_warn {
                    tracing::warn!(
                        endpoint = %spec.url,
                        proxy = %spec.proxy_url,
                        attempts = attempts_since_warn,
                        %err,
                        "sync upload transport error, retrying",
                    );
                    last_warn = Some(Instant::now());
                    attempts_since_warn = 0;
                }
                std::thread::sleep(RETRY_BACKOFF);
            }
        }
    }
}

fn persist_request(config: &Config, payload: &ApiRequest) -> std::io::Result<()> {
    let path = Path::new(&config.working_dir).join("sync_request.txt");
    std::fs::write(path, serde_json::to_vec_pretty(payload).unwrap_or_default())
}

/// Persists the raw bytes of the last non-2xx response body to
/// `working_dir/sync_response.txt`, for post-mortem inspection.
pub fn persist_response(config: &Config, raw_body: &[u8]) -> std::io::Result<()> {
    let path = Path::new(&config.working_dir).join("sync_response.txt");
    std::fs::write(path, raw_body)
}

fn build_client(is_dev: bool, proxy: Option<Proxy>) -> reqwest::Result<Client> {
    let overall_timeout = if is_dev { DEV_TIMEOUT } else { PROD_TIMEOUT };
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(overall_timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder.build()
}

/// Expands `sync_urls` into a multiset where each entry appears `weight`
/// times, then picks uniformly at random. A single configured endpoint is
/// always selected regardless of its weight field.
fn select_endpoint(config: &Config) -> &crate::config::UrlSpec {
    if config.sync_urls.len() == 1 {
        return &config.sync_urls[0];
    }
    let mut pool = Vec::new();
    for spec in &config.sync_urls {
        for _ in 0..spec.weight.max(1) {
            pool.push(spec);
        }
    }
    let index = rand::thread_rng().gen_range(0..pool.len());
    pool[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlSpec;
    use crate::model::{ApiResponse, Metrics, RuntimeInfo, SupervisorConfigPayload, TailResult};
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn base_config(working_dir: &Path, sync_urls: Vec<UrlSpec>) -> Config {
        Config {
            sync_urls,
            api_key: "K".into(),
            working_dir: working_dir.display().to_string(),
            ..Default::default()
        }
    }

    fn sample_payload(cfg: &Config) -> ApiRequest {
        ApiRequest {
            metrics: Metrics::default(),
            configs_states: Vec::new(),
            self_logs: TailResult::default(),
            config: cfg.clone(),
        }
    }

    fn sample_response() -> ApiResponse {
        ApiResponse {
            supervisor_config: SupervisorConfigPayload {
                config_content: "[program:x]\n".into(),
            },
            files: Vec::new(),
            config: Config::default(),
            runtime: RuntimeInfo {
                node_id: "n1".into(),
                node_name: "node-1".into(),
            },
        }
    }

    #[test]
    fn single_endpoint_mode_hits_configured_url() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/sync").header("Authorization", "Api-Key K");
            then.status(200)
                .json_body(serde_json::to_value(sample_response()).unwrap());
        });

        let dir = tempdir().unwrap();
        let cfg = base_config(
            dir.path(),
            vec![UrlSpec {
                url: server.url("/sync"),
                proxy_url: String::new(),
                weight: 1,
            }],
        );
        let payload = sample_payload(&cfg);

        let response = post(&cfg, &payload).unwrap();
        assert_eq!(response.runtime.node_id, "n1");
        mock.assert();

        let request_file = dir.path().join("sync_request.txt");
        assert!(request_file.exists());
    }

    #[test]
    fn non_2xx_returns_excerpt_and_raw_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/sync");
            then.status(500)
                .body("server down for maintenance, please retry again in a few minutes");
        });

        let dir = tempdir().unwrap();
        let cfg = base_config(
            dir.path(),
            vec![UrlSpec {
                url: server.url("/sync"),
                proxy_url: String::new(),
                weight: 1,
            }],
        );
        let payload = sample_payload(&cfg);

        let err = post(&cfg, &payload).unwrap_err();
        assert_matches::assert_matches!(err, SyncError::NonSuccess { status, raw_body, excerpt } => {
            assert_eq!(status, 500);
            assert!(!raw_body.is_empty());
            assert_eq!(excerpt.chars().count(), 50);
        });
    }

    #[test]
    fn weighted_selection_converges_to_weight_ratio() {
        let dir = tempdir().unwrap();
        let cfg = base_config(
            dir.path(),
            vec![
                UrlSpec {
                    url: "https://a/sync".into(),
                    proxy_url: String::new(),
                    weight: 1,
                },
                UrlSpec {
                    url: "https://b/sync".into(),
                    proxy_url: String::new(),
                    weight: 3,
                },
            ],
        );

        let mut counts: HashMap<String, u32> = HashMap::new();
        let trials = 4000;
        for _ in 0..trials {
            let spec = select_endpoint(&cfg);
            *counts.entry(spec.url.clone()).or_default() += 1;
        }

        let frac_b = *counts.get("https://b/sync").unwrap() as f64 / trials as f64;
        // expected 0.75, allow generous tolerance for a statistical test
        assert!((0.65..=0.85).contains(&frac_b), "got {frac_b}");
    }
}
