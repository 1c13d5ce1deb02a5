//! Webhook receiver bound to an ephemeral port, records every call it gets

use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warp::http::{HeaderMap, StatusCode};
use warp::path::FullPath;
use warp::Filter;

const SLOW_PATH: &str = "/slow";
const SLOW_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

pub struct Receiver {
    base_url: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Receiver {
    /// Answers `200` unless the path is listed with another status. Calls to `/slow` take
    /// a few seconds to answer.
    pub async fn start(statuses: &[(&str, u16)]) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let statuses: Arc<HashMap<String, u16>> = Arc::new(
            statuses
                .iter()
                .map(|(path, status)| (path.to_string(), *status))
                .collect(),
        );

        let recorder = calls.clone();
        let route = warp::post()
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::json())
            .and_then(move |path: FullPath, headers: HeaderMap, body: Value| {
                let recorder = recorder.clone();
                let statuses = statuses.clone();

                async move {
                    let path = path.as_str().to_owned();
                    let headers = headers
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.as_str().to_owned(),
                                value.to_str().unwrap_or_default().to_owned(),
                            )
                        })
                        .collect();

                    recorder.lock().unwrap().push(RecordedCall {
                        path: path.clone(),
                        headers,
                        body,
                    });

                    if path == SLOW_PATH {
                        tokio::time::sleep(SLOW_DELAY).await;
                    }

                    let status = statuses.get(&path).copied().unwrap_or(200);
                    let status = StatusCode::from_u16(status).unwrap();

                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply(), status))
                }
            });

        let (address, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self {
            base_url: format!("http://{}", address),
            calls,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }
}
