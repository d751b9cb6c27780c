//! Component B: launch/terminate/poll/billing for a GPU pod on an external
//! cloud provider, plus the supplemental GPU price/display cache (§4.2.1).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool as RedisPool;
use owo_colors::OwoColorize;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PodProviderError;

#[derive(Debug, Clone)]
pub struct CreatedPod {
    pub pod_id: String,
    pub pod_name: String,
    pub gpu_type: String,
    pub cost_per_hour: Decimal,
}

#[derive(Debug, Clone)]
pub struct ReadyPod {
    pub public_ip: String,
    pub ssh_port: i32,
    pub pod_host_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct BillingSummary {
    pub amount_usd: Decimal,
    pub time_billed_ms: i64,
    pub records: Value,
}

#[derive(Debug, Clone)]
pub struct GpuDisplayInfo {
    pub display_name: String,
    pub memory_in_gb: Option<i32>,
}

#[async_trait]
pub trait PodProvider: Send + Sync {
    async fn create_pod(
        &self,
        name: &str,
        image: &str,
        gpu_preferences: &[String],
        pod_env: &HashMap<String, String>,
        startup_command: &str,
        container_disk_gb: i32,
        volume_disk_gb: i32,
    ) -> Result<CreatedPod, PodProviderError>;

    async fn wait_for_pod_ready(
        &self,
        pod_id: &str,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<ReadyPod, PodProviderError>;

    async fn delete_pod(&self, pod_id: &str) -> Result<(), PodProviderError>;

    async fn get_billing_summary(
        &self,
        pod_id: &str,
    ) -> Result<Option<BillingSummary>, PodProviderError>;

    /// The GPU types this provider currently supports, in its default
    /// preference order. Used by the GPU-shortage retry policy (§4.10) to
    /// decide whether a run's prior GPU is still viable.
    async fn supported_gpu_types(&self) -> Result<Vec<String>, PodProviderError>;

    async fn get_gpu_type_prices(
        &self,
        gpu_types: &[String],
    ) -> HashMap<String, Option<Decimal>>;

    async fn get_gpu_display_info(&self, gpu_types: &[String]) -> HashMap<String, GpuDisplayInfo>;
}

const GPU_INFO_CACHE_TTL_SECONDS: u64 = 15 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct CachedGpuInfo {
    secure_price: Option<Decimal>,
    display_name: Option<String>,
    memory_in_gb: Option<i32>,
}

#[derive(Clone)]
pub struct RunPodProvider {
    http: Client,
    base_url: String,
    api_key: String,
    redis: RedisPool,
}

impl RunPodProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, redis: RedisPool) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            redis,
        }
    }

    fn cache_key(gpu_type: &str) -> String {
        format!("runforge:gpu_info:{gpu_type}")
    }

    async fn cached(&self, gpu_type: &str) -> Option<CachedGpuInfo> {
        let mut conn = self.redis.get().await.ok()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::cache_key(gpu_type))
            .query_async(&mut conn)
            .await
            .ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn store_cached(&self, gpu_type: &str, info: &CachedGpuInfo) {
        let Ok(mut conn) = self.redis.get().await else { return };
        if let Ok(payload) = serde_json::to_string(info) {
            let _: Result<(), _> = redis::cmd("SET")
                .arg(Self::cache_key(gpu_type))
                .arg(payload)
                .arg("EX")
                .arg(GPU_INFO_CACHE_TTL_SECONDS)
                .query_async(&mut conn)
                .await;
        }
    }

    /// Fetches fresh GPU info from the provider and refreshes the cache.
    /// Spawned detached so callers never block on it (§4.2.1) — `self` is
    /// cloned (all fields are cheaply-cloneable handles) rather than shared
    /// via `Arc`, since this provider is always constructed behind one.
    fn spawn_refresh(&self, gpu_types: Vec<String>) {
        if gpu_types.is_empty() {
            return;
        }
        let provider = self.clone();
        tokio::spawn(async move {
            for gpu_type in gpu_types {
                match provider.fetch_gpu_info(&gpu_type).await {
                    Ok(info) => provider.store_cached(&gpu_type, &info).await,
                    Err(err) => eprintln!(
                        "{} gpu_type={gpu_type} {err}",
                        "⚠️  RunPod GPU info refresh failed:".yellow()
                    ),
                }
            }
        });
    }

    async fn fetch_gpu_info(&self, gpu_type: &str) -> Result<CachedGpuInfo, PodProviderError> {
        let resp = self
            .http
            .get(format!("{}/gpu/{gpu_type}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(CachedGpuInfo {
                secure_price: None,
                display_name: None,
                memory_in_gb: None,
            });
        }
        let body: Value = resp.json().await?;
        Ok(CachedGpuInfo {
            secure_price: body
                .get("securePrice")
                .and_then(Value::as_f64)
                .and_then(|v| Decimal::try_from(v).ok()),
            display_name: body.get("displayName").and_then(Value::as_str).map(str::to_string),
            memory_in_gb: body.get("memoryInGb").and_then(Value::as_i64).map(|v| v as i32),
        })
    }
}

#[async_trait]
impl PodProvider for RunPodProvider {
    async fn create_pod(
        &self,
        name: &str,
        image: &str,
        gpu_preferences: &[String],
        pod_env: &HashMap<String, String>,
        startup_command: &str,
        container_disk_gb: i32,
        volume_disk_gb: i32,
    ) -> Result<CreatedPod, PodProviderError> {
        for gpu_type in gpu_preferences {
            let resp = self
                .http
                .post(format!("{}/pods", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({
                    "name": name,
                    "image": image,
                    "gpuTypeId": gpu_type,
                    "env": pod_env,
                    "dockerArgs": startup_command,
                    "containerDiskInGb": container_disk_gb,
                    "volumeInGb": volume_disk_gb,
                }))
                .send()
                .await?;
            if resp.status() == StatusCode::CONFLICT || resp.status() == StatusCode::NOT_FOUND {
                // This GPU type is unavailable right now; advance to the next preference.
                continue;
            }
            let body: Value = resp.error_for_status()?.json().await?;
            let pod_id = body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let cost_per_hour = body
                .get("costPerHr")
                .and_then(Value::as_f64)
                .and_then(|v| Decimal::try_from(v).ok())
                .unwrap_or(Decimal::ZERO);
            println!(
                "{} pod_id={pod_id} gpu_type={gpu_type} cost_per_hour={cost_per_hour}",
                "🛰️  Created pod".green()
            );
            return Ok(CreatedPod {
                pod_id,
                pod_name: name.to_string(),
                gpu_type: gpu_type.clone(),
                cost_per_hour,
            });
        }
        Err(PodProviderError::Exhausted)
    }

    async fn wait_for_pod_ready(
        &self,
        pod_id: &str,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<ReadyPod, PodProviderError> {
        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() > deadline {
                return Err(PodProviderError::Timeout);
            }
            let resp = self
                .http
                .get(format!("{}/pods/{pod_id}", self.base_url))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Err(PodProviderError::NotFound);
            }
            let body: Value = resp.error_for_status()?.json().await?;
            if body.get("desiredStatus").and_then(Value::as_str) == Some("RUNNING") {
                if let (Some(ip), Some(port)) = (
                    body.get("publicIp").and_then(Value::as_str),
                    body.get("sshPort").and_then(Value::as_i64),
                ) {
                    return Ok(ReadyPod {
                        public_ip: ip.to_string(),
                        ssh_port: port as i32,
                        pod_host_id: body
                            .get("machineId")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn delete_pod(&self, pod_id: &str) -> Result<(), PodProviderError> {
        let resp = self
            .http
            .delete(format!("{}/pods/{pod_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            // Terminal not-found is treated as success (§4.2).
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn get_billing_summary(
        &self,
        pod_id: &str,
    ) -> Result<Option<BillingSummary>, PodProviderError> {
        let resp = self
            .http
            .get(format!("{}/pods/{pod_id}/billing", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.error_for_status()?.json().await?;
        let records = body.get("records").cloned().unwrap_or(Value::Array(vec![]));
        if matches!(&records, Value::Array(v) if v.is_empty()) {
            return Ok(None);
        }
        Ok(Some(BillingSummary {
            amount_usd: body
                .get("amountUsd")
                .and_then(Value::as_f64)
                .and_then(|v| Decimal::try_from(v).ok())
                .unwrap_or(Decimal::ZERO),
            time_billed_ms: body.get("timeBilledMs").and_then(Value::as_i64).unwrap_or(0),
            records,
        }))
    }

    async fn supported_gpu_types(&self) -> Result<Vec<String>, PodProviderError> {
        let resp = self
            .http
            .get(format!("{}/gpu-types", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body: Value = resp.error_for_status()?.json().await?;
        Ok(body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn get_gpu_type_prices(&self, gpu_types: &[String]) -> HashMap<String, Option<Decimal>> {
        let mut out = HashMap::new();
        let mut missing = Vec::new();
        for gpu_type in gpu_types {
            match self.cached(gpu_type).await {
                Some(info) => {
                    out.insert(gpu_type.clone(), info.secure_price);
                }
                None => {
                    out.insert(gpu_type.clone(), None);
                    missing.push(gpu_type.clone());
                }
            }
        }
        self.spawn_refresh(missing);
        out
    }

    async fn get_gpu_display_info(&self, gpu_types: &[String]) -> HashMap<String, GpuDisplayInfo> {
        let mut out = HashMap::new();
        let mut missing = Vec::new();
        for gpu_type in gpu_types {
            let info = self.cached(gpu_type).await;
            if info.is_none() {
                missing.push(gpu_type.clone());
            }
            out.insert(
                gpu_type.clone(),
                GpuDisplayInfo {
                    display_name: info
                        .as_ref()
                        .and_then(|i| i.display_name.clone())
                        .unwrap_or_else(|| gpu_type.clone()),
                    memory_in_gb: info.and_then(|i| i.memory_in_gb),
                },
            );
        }
        self.spawn_refresh(missing);
        out
    }
}
