//! Upstream blueprint - the target project's own description of its API
//!
//! Used only as auxiliary prompt context. Any failure degrades to a one-line
//! note in the prompt and never aborts the pipeline.

use serde_json::Value;
use sluice_core::config::UpstreamConfig;
use sluice_core::{Result, SluiceError};
use std::time::Duration;

/// A fetched blueprint document
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    /// Path that answered, e.g. `/api/blueprint_json`
    pub endpoint: String,
    pub data: Value,
}

/// Fetches blueprints from a project's backend
#[derive(Debug, Clone)]
pub struct BlueprintFetcher {
    http: reqwest::Client,
    paths: Vec<String>,
    timeout: Duration,
}

impl BlueprintFetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        // Target projects run locally; never route them through a proxy
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| SluiceError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            paths: config.blueprint_paths.clone(),
            timeout,
        })
    }

    /// Try each configured path on `backend_url` in order.
    ///
    /// Non-200 and non-JSON answers move on to the next path. A connection
    /// failure or timeout ends the attempt immediately.
    pub async fn fetch(&self, backend_url: &str) -> Result<Blueprint> {
        let base = backend_url.trim_end_matches('/');

        for path in &self.paths {
            let url = format!("{}{}", base, path);
            tracing::debug!("Fetching blueprint from {}", url);

            let response = match self.http.get(&url).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(SluiceError::UpstreamUnavailable(format!(
                        "Connection to {} timed out after {}s",
                        base,
                        self.timeout.as_secs()
                    )));
                }
                Err(e) if e.is_connect() => {
                    return Err(SluiceError::UpstreamUnavailable(format!(
                        "Cannot connect to {}. Is the target project running?",
                        base
                    )));
                }
                Err(e) => {
                    tracing::debug!("Blueprint request to {} failed: {}", url, e);
                    continue;
                }
            };

            if !response.status().is_success() {
                tracing::debug!("{} answered {}", url, response.status());
                continue;
            }

            match response.json::<Value>().await {
                Ok(data) => {
                    tracing::info!("Fetched blueprint from {}", url);
                    return Ok(Blueprint {
                        endpoint: path.clone(),
                        data,
                    });
                }
                Err(e) if e.is_timeout() => {
                    return Err(SluiceError::UpstreamUnavailable(format!(
                        "Connection to {} timed out after {}s",
                        base,
                        self.timeout.as_secs()
                    )));
                }
                Err(_) => {
                    tracing::debug!("{} did not return JSON", url);
                    continue;
                }
            }
        }

        Err(SluiceError::UpstreamUnavailable(format!(
            "Could not fetch blueprint from {}. Endpoints {} not available.",
            base,
            self.paths.join(" and ")
        )))
    }
}

/// Render a blueprint as a prompt section
pub fn format_blueprint(blueprint: &Blueprint) -> String {
    let mut context = String::from("\n=== TARGET PROJECT API BLUEPRINT ===\n");

    match &blueprint.data {
        Value::Object(data) => {
            let mut recognized = false;

            if let Some(Value::Object(groups)) = data.get("api_routes") {
                recognized = true;
                context.push_str(&format!("Total Route Groups: {}\n\n", groups.len()));
                for (name, group) in groups {
                    context.push_str(&format!(
                        "## {} ({})\n",
                        name.to_uppercase(),
                        str_field(group, "prefix")
                    ));
                    context.push_str(&format!("   File: {}\n", str_field(group, "file")));
                    if let Some(Value::Array(endpoints)) = group.get("endpoints") {
                        for endpoint in endpoints {
                            context.push_str(&format!("   - {}\n", display_value(endpoint)));
                        }
                    }
                    context.push('\n');
                }
            }

            if let Some(credentials) = data.get("test_credentials") {
                context.push_str("## TEST CREDENTIALS\n");
                match credentials {
                    Value::Object(by_role) => {
                        for (role, info) in by_role {
                            context.push_str(&format!("   - {}: {}\n", role, credential_line(info)));
                        }
                    }
                    Value::Array(list) => {
                        for info in list {
                            let role = match info.get("role").and_then(Value::as_str) {
                                Some(role) => role,
                                None => "user",
                            };
                            context.push_str(&format!("   - {}: {}\n", role, credential_line(info)));
                        }
                    }
                    other => context.push_str(&format!("   - {}\n", display_value(other))),
                }
                context.push('\n');
            }

            if let Some(info) = data.get("project_info") {
                recognized = true;
                context.push_str("## PROJECT INFO\n");
                context.push_str(&format!("   Frontend: {}\n", or_na(info, "frontend_url")));
                context.push_str(&format!("   Backend: {}\n\n", or_na(info, "backend_url")));
            } else if let Some(Value::Array(routes)) = data.get("routes") {
                recognized = true;
                context.push_str(&format!("Total Routes: {}\n\n", routes.len()));
                for route in routes {
                    let methods = match route.get("methods") {
                        Some(Value::Array(methods)) => methods
                            .iter()
                            .map(display_value)
                            .collect::<Vec<_>>()
                            .join("/"),
                        Some(other) => display_value(other),
                        None => "GET".to_string(),
                    };
                    let path = route
                        .get("path")
                        .or_else(|| route.get("endpoint"))
                        .map(display_value)
                        .unwrap_or_else(|| "unknown".to_string());
                    context.push_str(&format!("[{}] {}\n", methods, path));
                }
            }

            if !recognized {
                let pretty = serde_json::to_string_pretty(&blueprint.data)
                    .unwrap_or_else(|_| blueprint.data.to_string());
                context.push_str(&pretty);
            }
        }
        other => context.push_str(&display_value(other)),
    }

    context.push_str("\n=== END API BLUEPRINT ===\n");
    context
}

/// One-line prompt note used when no blueprint could be fetched
pub fn unavailable_note(err: &SluiceError) -> String {
    let reason = match err {
        SluiceError::UpstreamUnavailable(msg) => msg.clone(),
        other => other.to_string(),
    };
    format!("[Target API context unavailable: {}]", reason)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).map(display_value).unwrap_or_default()
}

fn or_na(value: &Value, key: &str) -> String {
    value
        .get(key)
        .map(display_value)
        .unwrap_or_else(|| "N/A".to_string())
}

fn credential_line(info: &Value) -> String {
    match info {
        Value::Object(_) => format!("{} / {}", str_field(info, "email"), str_field(info, "password")),
        other => display_value(other),
    }
}
