// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Policy & Metadata Management
//!
//! Optional features backed by the broker's management HTTP API: operator
//! policies carrying a retry queue's message TTL, and a small versioned
//! metadata record persisted per queue as a vhost-scoped parameter.
//!
//! Reachability of the API is probed once at initialization and cached for
//! the process lifetime. Policy application is best-effort and reports a
//! boolean, so callers can fall back to fixed per-queue TTL declaration.

use crate::config::ManagementConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Component name the queue metadata parameters are stored under.
const METADATA_COMPONENT: &str = "queue-metadata";

/// A broker-side operator policy attaching a message TTL to one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Policy name; part of the resource path, not the body.
    #[serde(skip)]
    pub name: String,
    /// Anchored pattern matching exactly the target queue name.
    pub pattern: String,
    pub definition: TtlDefinition,
    #[serde(rename = "apply-to")]
    pub apply_to: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlDefinition {
    #[serde(rename = "message-ttl")]
    pub message_ttl: i64,
}

impl TtlPolicy {
    /// Builds the policy for one queue. The queue name is regex-escaped and
    /// anchored so the policy can never match a sibling queue.
    pub fn for_queue(queue: &str, ttl_ms: i64) -> TtlPolicy {
        TtlPolicy {
            name: format!("{queue}-ttl"),
            pattern: format!("^{}$", regex::escape(queue)),
            definition: TtlDefinition {
                message_ttl: ttl_ms,
            },
            apply_to: "queues".to_owned(),
            priority: 1_000,
        }
    }
}

/// Versioned metadata record persisted per queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetadata {
    pub version: u32,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Wire shape of a vhost-scoped parameter resource.
#[derive(Debug, Serialize, Deserialize)]
struct ParameterRecord {
    value: QueueMetadata,
}

/// Merges a metadata update into an existing record, preserving the creation
/// stamp and bumping the version; a fresh record starts at version 1 with no
/// update stamp.
pub(crate) fn merge_metadata(
    existing: Option<QueueMetadata>,
    max_retries: u32,
    now: DateTime<Utc>,
) -> QueueMetadata {
    match existing {
        Some(previous) => QueueMetadata {
            version: previous.version + 1,
            max_retries,
            created_at: previous.created_at,
            updated_at: Some(now),
        },
        None => QueueMetadata {
            version: 1,
            max_retries,
            created_at: now,
            updated_at: None,
        },
    }
}

/// Client for the broker's management HTTP API.
pub struct PolicyManager {
    client: reqwest::Client,
    config: ManagementConfig,
    probed: AtomicBool,
    reachable: AtomicBool,
}

impl PolicyManager {
    pub fn new(config: ManagementConfig) -> PolicyManager {
        PolicyManager {
            client: reqwest::Client::new(),
            config,
            probed: AtomicBool::new(false),
            reachable: AtomicBool::new(false),
        }
    }

    /// Probes the management API once and caches the result for the process
    /// lifetime.
    pub async fn initialize(&self) -> bool {
        if self.probed.load(Ordering::SeqCst) {
            return self.is_available();
        }

        let url = format!("{}/api/overview", self.config.endpoint);
        let reachable = match self.authed(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    endpoint = self.config.endpoint.as_str(),
                    "management api unreachable"
                );
                false
            }
        };

        self.reachable.store(reachable, Ordering::SeqCst);
        self.probed.store(true, Ordering::SeqCst);
        debug!(reachable, "management api probed");

        reachable
    }

    /// Whether the management API was reachable at initialization.
    pub fn is_available(&self) -> bool {
        self.probed.load(Ordering::SeqCst) && self.reachable.load(Ordering::SeqCst)
    }

    /// Creates or updates the TTL operator policy for a queue. Returns
    /// whether the policy is in place; never errors.
    pub async fn apply_ttl(&self, queue: &str, ttl_ms: i64) -> bool {
        if !self.is_available() {
            debug!(queue, "management api unavailable, skipping ttl policy");
            return false;
        }

        let policy = TtlPolicy::for_queue(queue, ttl_ms);
        let url = self.policy_url(&policy.name);

        match self.authed(self.client.put(&url)).json(&policy).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    queue,
                    status = response.status().as_u16(),
                    "unexpected response applying ttl policy"
                );
                false
            }
            Err(err) => {
                warn!(queue, error = err.to_string(), "failure to apply ttl policy");
                false
            }
        }
    }

    /// Persists the retry limit for a queue as a versioned metadata record,
    /// preserving the creation stamp across updates.
    pub async fn apply_metadata(&self, queue: &str, max_retries: u32) -> bool {
        if !self.is_available() {
            debug!(queue, "management api unavailable, skipping queue metadata");
            return false;
        }

        let url = self.parameter_url(queue);
        let existing = match self.authed(self.client.get(&url)).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => None,
            Ok(response) if response.status().is_success() => response
                .json::<ParameterRecord>()
                .await
                .map(|record| record.value)
                .ok(),
            Ok(response) => {
                warn!(
                    queue,
                    status = response.status().as_u16(),
                    "unexpected response reading queue metadata"
                );
                None
            }
            Err(err) => {
                warn!(queue, error = err.to_string(), "failure to read queue metadata");
                return false;
            }
        };

        let record = ParameterRecord {
            value: merge_metadata(existing, max_retries, Utc::now()),
        };

        match self.authed(self.client.put(&url)).json(&record).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    queue,
                    status = response.status().as_u16(),
                    "unexpected response writing queue metadata"
                );
                false
            }
            Err(err) => {
                warn!(queue, error = err.to_string(), "failure to write queue metadata");
                false
            }
        }
    }

    /// Best-effort removal of the queue's policy and metadata. A missing
    /// resource counts as success.
    pub async fn cleanup(&self, queue: &str) -> bool {
        if !self.is_available() {
            return false;
        }

        let policy = self.policy_url(&format!("{queue}-ttl"));
        let parameter = self.parameter_url(queue);

        let mut clean = true;
        for url in [policy, parameter] {
            match self.authed(self.client.delete(&url)).send().await {
                Ok(response)
                    if response.status().is_success()
                        || response.status() == reqwest::StatusCode::NOT_FOUND => {}
                Ok(response) => {
                    warn!(
                        queue,
                        status = response.status().as_u16(),
                        "unexpected response cleaning up queue resources"
                    );
                    clean = false;
                }
                Err(err) => {
                    warn!(queue, error = err.to_string(), "failure to clean up queue resources");
                    clean = false;
                }
            }
        }

        clean
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.config.user, Some(&self.config.password))
    }

    fn policy_url(&self, policy: &str) -> String {
        format!(
            "{}/api/operator-policies/{}/{}",
            self.config.endpoint,
            self.encoded_vhost(),
            policy
        )
    }

    fn parameter_url(&self, queue: &str) -> String {
        format!(
            "{}/api/parameters/{}/{}/{}",
            self.config.endpoint,
            METADATA_COMPONENT,
            self.encoded_vhost(),
            queue
        )
    }

    fn encoded_vhost(&self) -> String {
        self.config.vhost.replace('/', "%2F")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn ttl_policy_body_matches_the_operator_policy_shape() {
        let policy = TtlPolicy::for_queue("retry-orders", 30_000);

        assert_eq!(policy.name, "retry-orders-ttl");
        assert_eq!(
            serde_json::to_value(&policy).unwrap(),
            json!({
                "pattern": "^retry\\-orders$",
                "definition": {"message-ttl": 30_000},
                "apply-to": "queues",
                "priority": 1_000,
            })
        );
    }

    #[test]
    fn queue_names_are_escaped_in_the_pattern() {
        let policy = TtlPolicy::for_queue("retry.orders", 1_000);
        assert_eq!(policy.pattern, "^retry\\.orders$");
    }

    #[test]
    fn fresh_metadata_starts_at_version_one() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let metadata = merge_metadata(None, 3, now);

        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.max_retries, 3);
        assert_eq!(metadata.created_at, now);
        assert!(metadata.updated_at.is_none());
    }

    #[test]
    fn updates_preserve_the_creation_stamp() {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let edited = Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap();

        let first = merge_metadata(None, 3, created);
        let second = merge_metadata(Some(first), 5, edited);

        assert_eq!(second.version, 2);
        assert_eq!(second.max_retries, 5);
        assert_eq!(second.created_at, created);
        assert_eq!(second.updated_at, Some(edited));
    }
}
