//! VirusTotal threat intelligence connector.
//!
//! Lookups go through the v3 API with a per-minute rate limit (4 requests on
//! the free tier). Verdicts are memoized in the shared cache when one is
//! configured, including "unknown" verdicts for indicators VirusTotal has
//! never seen.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sb_core::crypto::CryptoError;
use sb_core::tool::{ExtraFields, FieldKind, FieldSpec, InputSchema, Tool, ToolInput};
use sb_core::{
    CacheHandle, Capability, ConnectorDescriptor, ConnectorError, ConnectorResult, NoTarget,
    QueryTargetOptions, ScopeTargetDefinition, SecretContext,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cached::get_or_fetch;
use crate::http::{AuthConfig, HttpClient, HttpSettings, RateLimitConfig, SharedRateLimiter};

pub const VIRUSTOTAL_ID: &str = "virustotal";

pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";
const API_KEY_HEADER: &str = "x-apikey";

/// VirusTotal connector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirusTotalConfig {
    #[serde(flatten)]
    pub http: HttpSettings,
    pub api_key_encrypted: Option<String>,
    /// Verdict cache TTL in seconds (default: 3600 = 1 hour).
    pub cache_ttl_secs: u64,
    /// Requests per minute rate limit (default: 4 for free tier).
    pub requests_per_minute: u32,
}

impl Default for VirusTotalConfig {
    fn default() -> Self {
        Self {
            http: HttpSettings::with_base_url(DEFAULT_BASE_URL),
            api_key_encrypted: None,
            cache_ttl_secs: 3600,
            requests_per_minute: 4,
        }
    }
}

impl VirusTotalConfig {
    fn http_settings(&self) -> HttpSettings {
        let mut http = self.http.clone();
        if http.base_url.trim().is_empty() {
            http.base_url = DEFAULT_BASE_URL.to_string();
        }
        http
    }
}

#[derive(Debug, Clone)]
pub struct VirusTotalSecrets {
    auth: AuthConfig,
    tenant_user_id: String,
}

impl VirusTotalSecrets {
    fn has_key(&self) -> bool {
        match &self.auth {
            AuthConfig::ApiKey { key, .. } => !key.is_blank(),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HashInput {
    hash: String,
}

impl ToolInput for HashInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![FieldSpec::required("hash", FieldKind::String).describe("MD5, SHA-1 or SHA-256")],
        )
    }
}

#[derive(Debug, Deserialize)]
struct IpInput {
    ip: String,
}

impl ToolInput for IpInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![FieldSpec::required("ip", FieldKind::String).describe("IPv4 or IPv6 address")],
        )
    }
}

#[derive(Debug, Deserialize)]
struct DomainInput {
    domain: String,
}

impl ToolInput for DomainInput {
    fn schema() -> InputSchema {
        InputSchema::structured(
            ExtraFields::Forbid,
            vec![FieldSpec::required("domain", FieldKind::String)],
        )
    }
}

/// Kind of indicator looked up, also the cache key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Md5,
    Sha1,
    Sha256,
    Ipv4,
    Ipv6,
    Domain,
}

impl IndicatorKind {
    fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Md5 => "md5",
            IndicatorKind::Sha1 => "sha1",
            IndicatorKind::Sha256 => "sha256",
            IndicatorKind::Ipv4 => "ipv4",
            IndicatorKind::Ipv6 => "ipv6",
            IndicatorKind::Domain => "domain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatVerdict {
    Malicious,
    Suspicious,
    Clean,
    Unknown,
}

/// Summary of the engines' last analysis of one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReport {
    pub indicator: String,
    pub kind: IndicatorKind,
    pub verdict: ThreatVerdict,
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub undetected: u32,
    pub reputation: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IndicatorReport {
    fn unknown(indicator: &str, kind: IndicatorKind) -> Self {
        Self {
            indicator: indicator.to_string(),
            kind,
            verdict: ThreatVerdict::Unknown,
            malicious: 0,
            suspicious: 0,
            harmless: 0,
            undetected: 0,
            reputation: None,
            tags: Vec::new(),
        }
    }

    fn from_attributes(indicator: &str, kind: IndicatorKind, attributes: VTAttributes) -> Self {
        let stats = attributes.last_analysis_stats.unwrap_or_default();
        Self {
            indicator: indicator.to_string(),
            kind,
            verdict: calculate_verdict(&stats),
            malicious: stats.malicious,
            suspicious: stats.suspicious,
            harmless: stats.harmless,
            undetected: stats.undetected,
            reputation: attributes.reputation,
            tags: attributes.tags,
        }
    }
}

/// Majority malicious is malicious; any detection or >10% suspicious is
/// suspicious; no engines at all is unknown.
fn calculate_verdict(stats: &VTAnalysisStats) -> ThreatVerdict {
    let total = stats.malicious + stats.suspicious + stats.harmless + stats.undetected;
    if total == 0 {
        return ThreatVerdict::Unknown;
    }
    let ratio = stats.malicious as f64 / total as f64;
    let flagged = (stats.malicious + stats.suspicious) as f64 / total as f64;
    if ratio > 0.5 {
        ThreatVerdict::Malicious
    } else if stats.malicious > 0 || flagged > 0.1 {
        ThreatVerdict::Suspicious
    } else {
        ThreatVerdict::Clean
    }
}

/// Normalizes a hash to lowercase and detects its algorithm from the length.
pub fn classify_hash(hash: &str) -> ConnectorResult<(String, IndicatorKind)> {
    let hash = hash.trim().to_ascii_lowercase();
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConnectorError::InvalidRequest(
            "hash must be hexadecimal".to_string(),
        ));
    }
    let kind = match hash.len() {
        32 => IndicatorKind::Md5,
        40 => IndicatorKind::Sha1,
        64 => IndicatorKind::Sha256,
        len => {
            return Err(ConnectorError::InvalidRequest(format!(
                "hash length {} does not match MD5, SHA-1 or SHA-256",
                len
            )))
        }
    };
    Ok((hash, kind))
}

/// Lowercased domain name, rejecting anything that is not a plain hostname.
pub fn normalize_domain(domain: &str) -> ConnectorResult<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid {
        Ok(domain)
    } else {
        Err(ConnectorError::InvalidRequest(format!(
            "'{}' is not a valid domain name",
            domain
        )))
    }
}

struct VirusTotalApi {
    client: HttpClient,
    tenant_user_id: String,
    cache: Option<CacheHandle>,
    cache_ttl: Duration,
}

fn report_cache_key(tenant_user_id: &str, kind: IndicatorKind, indicator: &str) -> String {
    format!("virustotal:{}:{}:{}", tenant_user_id, kind.as_str(), indicator)
}

impl VirusTotalApi {
    /// Fetches `path` and summarizes it; a 404 becomes an unknown verdict.
    async fn report(
        &self,
        path: String,
        indicator: &str,
        kind: IndicatorKind,
    ) -> ConnectorResult<IndicatorReport> {
        let key = report_cache_key(&self.tenant_user_id, kind, indicator);
        let client = &self.client;
        get_or_fetch(self.cache.as_ref(), &key, self.cache_ttl, || async move {
            debug!(indicator = %indicator, "Fetching VirusTotal report");
            match client.get_json::<VTResponse>(&path).await {
                Ok(response) => Ok(IndicatorReport::from_attributes(
                    indicator,
                    kind,
                    response.data.attributes,
                )),
                Err(ConnectorError::NotFound(_)) => Ok(IndicatorReport::unknown(indicator, kind)),
                Err(e) => Err(e),
            }
        })
        .await
    }

    #[instrument(skip(self))]
    async fn lookup_hash(&self, hash: &str) -> ConnectorResult<IndicatorReport> {
        let (hash, kind) = classify_hash(hash)?;
        self.report(format!("/files/{}", hash), &hash, kind).await
    }

    #[instrument(skip(self))]
    async fn lookup_ip(&self, ip: &str) -> ConnectorResult<IndicatorReport> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| ConnectorError::InvalidRequest(format!("'{}' is not an IP address", ip)))?;
        let kind = if ip.is_ipv6() {
            IndicatorKind::Ipv6
        } else {
            IndicatorKind::Ipv4
        };
        let ip = ip.to_string();
        self.report(
            format!("/ip_addresses/{}", urlencoding::encode(&ip)),
            &ip,
            kind,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn lookup_domain(&self, domain: &str) -> ConnectorResult<IndicatorReport> {
        let domain = normalize_domain(domain)?;
        self.report(format!("/domains/{}", domain), &domain, IndicatorKind::Domain)
            .await
    }
}

/// The VirusTotal connector descriptor.
///
/// Holds one rate limiter per tenant and quota, so the per-minute limit
/// holds across every instance built for that tenant.
#[derive(Debug, Clone, Default)]
pub struct VirusTotalDescriptor {
    limiters: Arc<Mutex<HashMap<(String, u32), SharedRateLimiter>>>,
}

impl VirusTotalDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    fn rate_limiter(
        &self,
        tenant_user_id: &str,
        requests_per_minute: u32,
    ) -> ConnectorResult<SharedRateLimiter> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (tenant_user_id.to_string(), requests_per_minute);
        if let Some(limiter) = limiters.get(&key) {
            return Ok(limiter.clone());
        }
        let limiter = SharedRateLimiter::new(&RateLimitConfig::per_minute(requests_per_minute))?;
        limiters.insert(key, limiter.clone());
        Ok(limiter)
    }

    fn client(
        &self,
        config: &VirusTotalConfig,
        secrets: &VirusTotalSecrets,
    ) -> ConnectorResult<HttpClient> {
        let limiter = self.rate_limiter(&secrets.tenant_user_id, config.requests_per_minute)?;
        Ok(HttpClient::new(&config.http_settings(), secrets.auth.clone())?
            .with_shared_rate_limit(&limiter))
    }
}

#[async_trait]
impl ConnectorDescriptor for VirusTotalDescriptor {
    type Config = VirusTotalConfig;
    type Secrets = VirusTotalSecrets;
    type Target = NoTarget;

    fn id(&self) -> &str {
        VIRUSTOTAL_ID
    }

    fn display_name(&self) -> &str {
        "VirusTotal"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Tools]
    }

    fn target_definitions(&self) -> Vec<ScopeTargetDefinition> {
        Vec::new()
    }

    async fn resolve_secrets(
        &self,
        config: &VirusTotalConfig,
        context: &SecretContext,
    ) -> Result<Option<VirusTotalSecrets>, CryptoError> {
        let key = match context.override_token() {
            Some(token) => Some(token.clone()),
            None => {
                context
                    .resolve_credential(config.api_key_encrypted.as_deref())
                    .await?
            }
        };
        Ok(key.map(|key| VirusTotalSecrets {
            auth: AuthConfig::ApiKey {
                header_name: API_KEY_HEADER.to_string(),
                key,
            },
            tenant_user_id: context.tenant_user_id().to_string(),
        }))
    }

    /// Every call spends free-tier quota, so only the key is checked.
    async fn check_connection(
        &self,
        _config: &VirusTotalConfig,
        secrets: &VirusTotalSecrets,
    ) -> bool {
        secrets.has_key()
    }

    async fn get_query_target_options(
        &self,
        _config: &VirusTotalConfig,
        _secrets: &VirusTotalSecrets,
    ) -> ConnectorResult<QueryTargetOptions> {
        Ok(QueryTargetOptions::empty())
    }

    fn build_tools(
        &self,
        config: &VirusTotalConfig,
        _target: NoTarget,
        secrets: &VirusTotalSecrets,
        cache: Option<CacheHandle>,
    ) -> ConnectorResult<Vec<Tool>> {
        let api = Arc::new(VirusTotalApi {
            client: self.client(config, secrets)?,
            tenant_user_id: secrets.tenant_user_id.clone(),
            cache,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        });

        let hash_api = Arc::clone(&api);
        let lookup_hash = Tool::new(
            VIRUSTOTAL_ID,
            "lookup_hash",
            "Looks up a file hash on VirusTotal",
            move |input: HashInput| {
                let api = Arc::clone(&hash_api);
                async move { api.lookup_hash(&input.hash).await }
            },
        )?;

        let ip_api = Arc::clone(&api);
        let lookup_ip = Tool::new(
            VIRUSTOTAL_ID,
            "lookup_ip",
            "Looks up an IP address on VirusTotal",
            move |input: IpInput| {
                let api = Arc::clone(&ip_api);
                async move { api.lookup_ip(&input.ip).await }
            },
        )?;

        let domain_api = api;
        let lookup_domain = Tool::new(
            VIRUSTOTAL_ID,
            "lookup_domain",
            "Looks up a domain on VirusTotal",
            move |input: DomainInput| {
                let api = Arc::clone(&domain_api);
                async move { api.lookup_domain(&input.domain).await }
            },
        )?;

        Ok(vec![lookup_hash, lookup_ip, lookup_domain])
    }
}

// VirusTotal API types

#[derive(Debug, Deserialize)]
struct VTResponse {
    data: VTData,
}

#[derive(Debug, Deserialize)]
struct VTData {
    #[serde(default)]
    attributes: VTAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VTAttributes {
    last_analysis_stats: Option<VTAnalysisStats>,
    reputation: Option<i64>,
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VTAnalysisStats {
    malicious: u32,
    suspicious: u32,
    harmless: u32,
    undetected: u32,
}
