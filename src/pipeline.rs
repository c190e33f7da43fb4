//! Request orchestration: cache lookup, fetch, analysis, formatting,
//! optional narration, cache store, and error classification.
//!
//! [`AppContext`] owns every piece of shared state. It is built once at
//! startup and handed to request handlers behind an `Arc`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::timeline::{self, SimulatedTimeline};
use crate::analysis::{AnalysisContext, AnalysisEngine, AnalysisResult};
use crate::cache::{self, AdaptiveCache, CacheStats, EntryMetadata};
use crate::classifier::{is_valid_hash, ClassifiedError, ErrorClassifier, ErrorContext};
use crate::config::Config;
use crate::data::{DataAccess, QueryTimeouts};
use crate::error::{PipelineError, PipelineResult};
use crate::formatter::{self, FormattedContext};
use crate::generator::{self, HttpTextGenerator, Narrative, TextGenerator};
use crate::limiter::RateLimiter;
use crate::models::{AnalysisRequest, BlockTag, NetworkIdentity, Record, RecordKind};
use crate::registry::{ChainRegistry, ConnectionRegistry};
use crate::stats::{PipelineStats, StatsSnapshot};

/// What gets cached per request key. Holds no wall-clock timestamps of its
/// own so identical recomputations fingerprint identically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub kind: RecordKind,
    pub network: NetworkIdentity,
    pub identifier: String,
    pub analysis: AnalysisResult,
    pub report: FormattedContext,
    pub narrative: Option<Narrative>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AnalysisPayload>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_info: Option<EntryMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip)]
    pub failure: Option<ClassifiedError>,
}

impl AnalysisResponse {
    fn success(data: AnalysisPayload, cached: bool, cache_info: Option<EntryMetadata>) -> Self {
        Self {
            success: true,
            data: Some(data),
            cached,
            cache_info,
            error: None,
            message: None,
            error_code: None,
            retryable: None,
            suggestions: None,
            failure: None,
        }
    }

    pub fn failure(err: ClassifiedError) -> Self {
        Self {
            success: false,
            data: None,
            cached: false,
            cache_info: None,
            error: Some(err.user_message.clone()),
            message: Some(err.message.clone()),
            error_code: Some(err.code),
            retryable: Some(err.retryable),
            suggestions: Some(err.suggestions.clone()),
            failure: Some(err),
        }
    }
}

pub struct AppContext {
    pub chains: ChainRegistry,
    pub connections: ConnectionRegistry,
    pub cache: Arc<AdaptiveCache<AnalysisPayload>>,
    pub engine: AnalysisEngine,
    pub classifier: ErrorClassifier,
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub limiter: RateLimiter,
    pub stats: PipelineStats,
    pub timeouts: QueryTimeouts,
    pub cache_sweep_interval: Duration,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl AppContext {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let generator = match &config.generator {
            Some(gen_config) => {
                let generator = HttpTextGenerator::new(gen_config)
                    .context("failed to set up text generator")?;
                info!(url = %gen_config.api_url, model = %gen_config.model, "text generator enabled");
                Some(Arc::new(generator) as Arc<dyn TextGenerator>)
            }
            None => {
                info!("no text generator configured; reports will omit the narrative");
                None
            }
        };
        let chains = ChainRegistry::default();
        Ok(Self {
            chains,
            connections: ConnectionRegistry::new(chains, config.networks.clone()),
            cache: Arc::new(AdaptiveCache::new(config.cache_max_entries)),
            engine: AnalysisEngine::default(),
            classifier: ErrorClassifier,
            generator,
            limiter: RateLimiter::per_second(config.max_requests_per_sec),
            stats: PipelineStats::new(),
            timeouts: QueryTimeouts {
                primary: config.query_timeout,
                context: config.context_timeout,
            },
            cache_sweep_interval: config.cache_sweep_interval,
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn spawn_cache_sweeper(&self) -> tokio::task::JoinHandle<()> {
        cache::spawn_sweeper(self.cache.clone(), self.cache_sweep_interval)
    }

    /// Runs one request end to end. Never fails: errors come back classified
    /// inside the response.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResponse {
        self.stats.inc_requests();
        match self.run(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.stats.inc_failures();
                if matches!(err, PipelineError::RateLimited) {
                    self.stats.inc_rate_limited();
                }
                let classified = self.classifier.classify(&err, error_context(&request));
                warn!(
                    code = classified.code,
                    key = %request.cache_key(),
                    error = %err,
                    "analysis request failed"
                );
                AnalysisResponse::failure(classified)
            }
        }
    }

    async fn run(&self, request: &AnalysisRequest) -> PipelineResult<AnalysisResponse> {
        if !self.limiter.try_acquire() {
            return Err(PipelineError::RateLimited);
        }
        let network = self.chains.require(request.network_id)?;
        let identifier = request.identifier.trim();
        let block_tag = match request.kind {
            RecordKind::Transaction => {
                if !is_valid_hash(identifier) {
                    return Err(PipelineError::InvalidHash(identifier.to_string()));
                }
                None
            }
            RecordKind::Block => Some(
                BlockTag::from_str(identifier).map_err(PipelineError::InvalidIdentifier)?,
            ),
        };

        let key = request.cache_key();
        if let Some(payload) = self.cache.get(&key) {
            self.stats.inc_cache_hits();
            debug!(key = %key, "served from cache");
            return Ok(AnalysisResponse::success(payload, true, self.cache.metadata(&key)));
        }

        let handle = self.connections.handle(network.id).await?;
        let data = DataAccess::new(&handle, self.timeouts);
        let record = match block_tag {
            None => data
                .get_transaction(identifier)
                .await?
                .map(Record::Transaction),
            Some(tag) => data.get_block(tag).await?.map(Record::Block),
        }
        .ok_or_else(|| PipelineError::NotFound {
            kind: request.kind.as_str(),
            identifier: identifier.to_string(),
        })?;

        let chain_head = match record.kind() {
            RecordKind::Block => data.chain_head().await,
            RecordKind::Transaction => None,
        };
        let now = unix_now();
        let ctx = AnalysisContext {
            network,
            now,
            chain_head,
        };
        let analysis = self.engine.analyze(&record, &ctx);
        let report = formatter::format(&analysis);

        let (narrative, complete) = match self.narrate(&report).await {
            None => (None, true),
            Some(Ok(narrative)) => {
                self.stats.inc_narratives();
                (Some(narrative), true)
            }
            Some(Err(err)) => {
                warn!(key = %key, error = %err, "narrative generation failed; returning analysis only");
                (None, false)
            }
        };

        let payload = AnalysisPayload {
            kind: record.kind(),
            network,
            identifier: identifier.to_lowercase(),
            analysis,
            report,
            narrative,
        };
        if !complete {
            return Ok(AnalysisResponse::success(payload, false, None));
        }

        // "latest" moves with the chain, so it never counts as settled.
        let record_age = match block_tag {
            Some(BlockTag::Latest) => Duration::ZERO,
            _ => Duration::from_secs(u64::try_from(now - record.timestamp()).unwrap_or(0)),
        };
        self.cache
            .set_with_age(&key, payload.clone(), record.kind(), record_age);
        info!(key = %key, age_secs = record_age.as_secs(), "analysis cached");
        Ok(AnalysisResponse::success(payload, false, self.cache.metadata(&key)))
    }

    async fn narrate(&self, report: &FormattedContext) -> Option<PipelineResult<Narrative>> {
        let generator = self.generator.as_ref()?;
        let system = generator::system_prompt(report.kind);
        let prompt = generator::build_prompt(report);
        Some(
            generator
                .generate(system, &prompt)
                .await
                .map(|text| generator::split_diagram(&text)),
        )
    }

    /// Synthetic activity for an address. Never touches the store or the
    /// cache.
    pub fn simulated_timeline(
        &self,
        address: &str,
        network_id: u64,
        count: usize,
    ) -> Result<SimulatedTimeline, ClassifiedError> {
        let context = ErrorContext {
            network_id: Some(network_id),
            operation: Some("timeline".to_string()),
            ..Default::default()
        };
        let network = self
            .chains
            .require(network_id)
            .map_err(|err| self.classifier.classify(&err, context.clone()))?;
        if !is_valid_address(address) {
            let err = PipelineError::InvalidIdentifier(format!("address {}", address));
            return Err(self.classifier.classify(&err, context));
        }
        Ok(timeline::simulate(address, &network, unix_now(), count))
    }
}

fn error_context(request: &AnalysisRequest) -> ErrorContext {
    let identifier = request.identifier.trim().to_string();
    let (tx_hash, block) = match request.kind {
        RecordKind::Transaction => (Some(identifier), None),
        RecordKind::Block => (None, Some(identifier)),
    };
    ErrorContext {
        network_id: Some(request.network_id),
        tx_hash,
        block,
        operation: Some(format!("analyze {}", request.kind)),
    }
}

pub fn is_valid_address(raw: &str) -> bool {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::ErrorKind;
    use crate::config::NetworkConnectionConfig;
    use crate::storage::{self, BlockRow, TxRow};

    const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for CountingGenerator {
        async fn generate(&self, _system: &str, _prompt: &str) -> PipelineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::Generation("offline".to_string()));
            }
            Ok("A transfer.\n```mermaid\ngraph LR\nA-->B\n```".to_string())
        }
    }

    fn temp_db_url(tag: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "chain_insight_pipeline_{}_{}_{}.db",
            tag,
            std::process::id(),
            unix_now()
        ));
        let _ = std::fs::remove_file(&path);
        format!("sqlite://{}", path.display())
    }

    async fn seeded_context(tag: &str, max_per_sec: u32) -> AppContext {
        let url = temp_db_url(tag);
        let pool = storage::init_pool(&url).await.unwrap();
        let now = unix_now();
        storage::insert_block(
            &pool,
            &BlockRow {
                number: 100,
                hash: "0xblock".to_string(),
                parent_hash: "0xparent".to_string(),
                timestamp: now - 7_200,
                gas_used: "15000000".to_string(),
                gas_limit: "30000000".to_string(),
                base_fee_per_gas: Some("20000000000".to_string()),
                miner: "0xminer".to_string(),
                size: 1_000,
                transaction_count: 1,
            },
        )
        .await
        .unwrap();
        storage::insert_transactions(
            &pool,
            &[TxRow {
                hash: HASH.to_string(),
                block_number: 100,
                block_timestamp: now - 7_200,
                tx_index: 0,
                from_addr: "0xsender".to_string(),
                to_addr: Some("0xreceiver".to_string()),
                value: "0".to_string(),
                gas_limit: "21000".to_string(),
                gas_price: "20000000000".to_string(),
                gas_used: "21000".to_string(),
                effective_gas_price: "20000000000".to_string(),
                status: Some(1),
                input_data: "0x".to_string(),
                nonce: 3,
                tx_type: 2,
            }],
        )
        .await
        .unwrap();

        let mut networks = HashMap::new();
        networks.insert(
            1,
            NetworkConnectionConfig {
                database_url: url,
                rpc_url: None,
            },
        );
        let config = Config {
            http_bind_addr: "127.0.0.1:0".to_string(),
            default_network_id: 1,
            networks,
            cache_max_entries: 100,
            cache_sweep_interval: Duration::from_secs(600),
            query_timeout: Duration::from_secs(3),
            context_timeout: Duration::from_secs(2),
            max_requests_per_sec: max_per_sec,
            generator: None,
        };
        AppContext::from_config(&config).unwrap()
    }

    fn tx_request(hash: &str, network_id: u64) -> AnalysisRequest {
        AnalysisRequest {
            kind: RecordKind::Transaction,
            identifier: hash.to_string(),
            network_id,
        }
    }

    #[tokio::test]
    async fn second_request_is_a_cache_hit() {
        let ctx = seeded_context("hit", 50).await;
        let first = ctx.analyze(tx_request(HASH, 1)).await;
        assert!(first.success, "{:?}", first.error);
        assert!(!first.cached);

        let second = ctx.analyze(tx_request(&HASH.to_uppercase().replacen("0X", "0x", 1), 1)).await;
        assert!(second.cached);
        assert_eq!(second.data, first.data);
        assert_eq!(
            second.cache_info.as_ref().map(|m| m.created_at_ms),
            first.cache_info.as_ref().map(|m| m.created_at_ms)
        );
        assert_eq!(ctx.cache_stats().hits, 1);
        assert_eq!(ctx.stats().cache_hits, 1);

        let Some(AnalysisResult::Transaction(tx)) = first.data.map(|d| d.analysis) else {
            panic!("expected a transaction analysis");
        };
        assert_eq!(tx.classification.primary_type, "Simple Transfer");
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let ctx = seeded_context("fail", 50).await;
        let missing = format!("0x{}", "ab".repeat(32));

        let not_found = ctx.analyze(tx_request(&missing, 1)).await;
        assert_eq!(not_found.error_code, Some("NOT_FOUND"));
        assert_eq!(not_found.retryable, Some(true));

        let chain = ctx.analyze(tx_request(HASH, 999)).await;
        assert_eq!(chain.error_code, Some("CHAIN_ERROR"));
        assert_eq!(chain.retryable, Some(false));

        let malformed = ctx.analyze(tx_request("0x1234", 1)).await;
        assert_eq!(malformed.error_code, Some("VALIDATION_ERROR"));

        let unconfigured = ctx.analyze(tx_request(HASH, 10)).await;
        assert_eq!(unconfigured.error_code, Some("VALIDATION_ERROR"));

        let bad_block = ctx
            .analyze(AnalysisRequest {
                kind: RecordKind::Block,
                identifier: "yesterday".to_string(),
                network_id: 1,
            })
            .await;
        assert_eq!(
            bad_block.failure.map(|f| f.kind),
            Some(ErrorKind::ValidationError)
        );
        assert_eq!(ctx.stats().failures, 5);
        assert_eq!(ctx.cache.len(), 0);
    }

    #[tokio::test]
    async fn rule_keywords_in_identifiers_are_validation_errors() {
        let ctx = seeded_context("keywords", 50).await;
        let cases = [
            (RecordKind::Block, "not found"),
            (RecordKind::Block, "timeout"),
            (RecordKind::Transaction, "not found"),
            (RecordKind::Transaction, "0xtimeout"),
        ];
        for (kind, identifier) in cases {
            let response = ctx
                .analyze(AnalysisRequest {
                    kind,
                    identifier: identifier.to_string(),
                    network_id: 1,
                })
                .await;
            assert_eq!(response.error_code, Some("VALIDATION_ERROR"), "{kind} {identifier:?}");
            assert_eq!(response.retryable, Some(false), "{kind} {identifier:?}");
        }
    }

    #[tokio::test]
    async fn uppercase_hash_finds_the_stored_row() {
        let ctx = seeded_context("case", 50).await;
        let upper = format!("0x{}", HASH[2..].to_uppercase());
        let response = ctx.analyze(tx_request(&upper, 1)).await;
        assert!(response.success, "{:?}", response.error);
        assert!(!response.cached);
    }

    #[tokio::test]
    async fn requests_beyond_budget_are_rate_limited() {
        let ctx = seeded_context("limit", 1).await;
        assert!(ctx.analyze(tx_request(HASH, 1)).await.success);
        let limited = ctx.analyze(tx_request(HASH, 1)).await;
        assert_eq!(limited.error_code, Some("RATE_LIMIT"));
        assert_eq!(limited.retryable, Some(true));
        assert_eq!(ctx.stats().rate_limited, 1);
    }

    #[tokio::test]
    async fn latest_block_is_analyzed() {
        let ctx = seeded_context("block", 50).await;
        let response = ctx
            .analyze(AnalysisRequest {
                kind: RecordKind::Block,
                identifier: "latest".to_string(),
                network_id: 1,
            })
            .await;
        assert!(response.success, "{:?}", response.message);
        let data = response.data.unwrap();
        assert_eq!(data.kind, RecordKind::Block);
        assert!(data.report.text.contains("=== NETWORK HEALTH ==="));
        assert!(ctx.cache.has("block_1_latest"));
    }

    #[tokio::test]
    async fn narrative_is_attached_and_cached() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let ctx = seeded_context("narrative", 50)
            .await
            .with_generator(generator.clone());
        let first = ctx.analyze(tx_request(HASH, 1)).await;
        let narrative = first.data.unwrap().narrative.unwrap();
        assert_eq!(narrative.diagram.as_deref(), Some("graph LR\nA-->B"));
        ctx.analyze(tx_request(HASH, 1)).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.stats().narratives, 1);
    }

    #[tokio::test]
    async fn failed_narrative_is_not_cached() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let ctx = seeded_context("narrative_fail", 50)
            .await
            .with_generator(generator);
        let response = ctx.analyze(tx_request(HASH, 1)).await;
        assert!(response.success);
        assert!(response.data.unwrap().narrative.is_none());
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn timeline_is_simulated_and_validated() {
        let ctx = seeded_context("timeline", 50).await;
        let address = format!("0x{}", "ab".repeat(20));
        let timeline = ctx.simulated_timeline(&address, 1, 5).unwrap();
        assert!(timeline.simulated);
        assert_eq!(timeline.events.len(), 5);
        assert!(ctx.cache.is_empty());

        let err = ctx.simulated_timeline("0xnope", 1, 5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        let err = ctx.simulated_timeline(&address, 4242, 5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChainError);
    }
}
