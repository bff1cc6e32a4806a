//! The search ranker: classification, planning, candidate acquisition,
//! multi-signal scoring, suppression, on-chain linkage, and site mode.

pub mod classify;
pub mod filters;
pub mod linkage;
pub mod plan;
pub mod score;
pub mod sites;

use std::{collections::HashMap, sync::Arc, time::Duration};

use lumen_api_core::{
    error::{ApiError, ErrorKind},
    models::{
        SearchHitOut, SearchPlanOut, SearchRequest, SearchResponse, SiteOut,
    },
};
use lumen_clients::indexer::{IndexerClient, IndexerHit, IndexerSearch};
use lumen_common::{cid::is_cid_shaped, time::TimestampMs};
use lumen_store::{UsageStore, WalletStore};
use tracing::debug;

use self::classify::Intent;
use self::linkage::LinkResolver;
use self::plan::SearchPlan;
use self::score::Signals;
use self::sites::{SiteCandidate, SiteResolver};

/// Window for the usage component of popularity.
const USAGE_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);
/// Window for the replication component of popularity.
const REPLICATION_WINDOW: Duration = Duration::from_secs(30 * 24 * 3600);
/// Candidate fetch ceiling per indexer search.
const FETCH_CEILING: u32 = 200;

pub struct SearchService {
    indexer: Arc<IndexerClient>,
    store: WalletStore,
    usage: UsageStore,
    link: Arc<LinkResolver>,
    sites: SiteResolver,
}

struct ScoredHit {
    hit: IndexerHit,
    signals: Signals,
    composite: f64,
}

impl SearchService {
    pub fn new(
        indexer: Arc<IndexerClient>,
        store: WalletStore,
        usage: UsageStore,
        link: Arc<LinkResolver>,
        sites: SiteResolver,
    ) -> Self {
        Self {
            indexer,
            store,
            usage,
            link,
            sites,
        }
    }

    pub async fn search(
        &self,
        req: &SearchRequest,
    ) -> Result<SearchResponse, ApiError> {
        let raw_q = req.q.trim().to_owned();
        let site_mode = req.mode.as_deref() == Some("sites")
            || req.type_.as_deref() == Some("site");

        // A raw CID bypasses classification entirely.
        if is_cid_shaped(&raw_q) {
            return self.cid_direct(&raw_q, site_mode).await;
        }

        let normalized = classify::normalize(&raw_q);
        let cls = classify::classify(&normalized, req.lang.as_deref());
        let plan = plan::build_plan(
            &cls,
            req.limit,
            req.offset,
            req.facet.as_deref(),
        );
        let tokens: Vec<String> = normalized
            .split_whitespace()
            .map(|w| w.trim_end_matches('?').to_owned())
            .filter(|w| !w.is_empty())
            .collect();

        if plan.no_query && !site_mode {
            return Ok(SearchResponse {
                ok: true,
                query: raw_q,
                plan: plan.to_out(),
                results: Some(Vec::new()),
                sites: None,
            });
        }

        let candidates = self.acquire(&plan, &tokens).await?;
        let kept: Vec<IndexerHit> = candidates
            .into_iter()
            .filter(|hit| {
                let tags = hit.tags();
                match filters::suppress_reason(hit, &tags) {
                    Some(reason) => {
                        debug!(cid = %hit.cid, ?reason, "Hit suppressed");
                        false
                    }
                    None => true,
                }
            })
            .collect();

        let mut scored = self.score_hits(&tokens, kept).await;
        self.attach_linkage(&mut scored).await;

        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.hit.activity_ts().cmp(&a.hit.activity_ts())
                })
                .then_with(|| a.hit.cid.cmp(&b.hit.cid))
        });

        if site_mode {
            let sites = self.resolve_site_results(&scored, &tokens).await;
            let page = paginate(sites, plan.offset, plan.limit);
            return Ok(SearchResponse {
                ok: true,
                query: raw_q,
                plan: plan.to_out(),
                results: None,
                sites: Some(page),
            });
        }

        let page: Vec<SearchHitOut> = paginate(
            scored.iter().map(hit_out).collect(),
            plan.offset,
            plan.limit,
        );
        Ok(SearchResponse {
            ok: true,
            query: raw_q,
            plan: plan.to_out(),
            results: Some(page),
            sites: None,
        })
    }

    /// Direct lookup of a pasted CID.
    async fn cid_direct(
        &self,
        cid: &str,
        site_mode: bool,
    ) -> Result<SearchResponse, ApiError> {
        let plan_out = SearchPlanOut {
            intent: Intent::Navigation.as_str().to_owned(),
            target_kind: None,
            base_kinds: None,
            limit: 1,
            offset: 0,
            no_query: true,
        };

        let Some(hit) = self
            .indexer
            .cid_info(cid)
            .await
            .map_err(|e| {
                ApiError::with_msg(
                    ErrorKind::InternalError,
                    format!("Indexer lookup failed: {e}"),
                )
            })?
        else {
            return Err(ApiError::new(ErrorKind::CidNotFound));
        };

        let tokens = vec![cid.to_owned()];
        let mut scored = self.score_hits(&tokens, vec![hit]).await;
        self.attach_linkage(&mut scored).await;

        if site_mode {
            let sites =
                self.resolve_site_results(&scored, &tokens).await;
            return Ok(SearchResponse {
                ok: true,
                query: cid.to_owned(),
                plan: plan_out,
                results: None,
                sites: Some(sites),
            });
        }

        Ok(SearchResponse {
            ok: true,
            query: cid.to_owned(),
            plan: plan_out,
            results: Some(scored.iter().map(hit_out).collect()),
            sites: None,
        })
    }

    /// Candidate acquisition: one indexer search per base kind (or a
    /// single kindless search), merged distinct by CID, sorted by
    /// activity desc then CID asc.
    async fn acquire(
        &self,
        plan: &SearchPlan,
        tokens: &[String],
    ) -> Result<Vec<IndexerHit>, ApiError> {
        let fetch_limit =
            (plan.limit + plan.offset + 100).min(FETCH_CEILING);

        let kinds: Vec<Option<String>> = match &plan.base_kinds {
            Some(kinds) =>
                kinds.iter().cloned().map(Some).collect(),
            None => vec![plan.target_kind.clone()],
        };

        let mut merged: Vec<IndexerHit> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut any_ok = false;
        let mut last_err = None;

        for kind in kinds {
            let params = IndexerSearch {
                kind,
                tokens: tokens.to_vec(),
                present_only: true,
                limit: fetch_limit,
                offset: 0,
            };
            match self.indexer.search(&params).await {
                Ok(hits) => {
                    any_ok = true;
                    for hit in hits {
                        if seen.insert(hit.cid.clone(), ()).is_none() {
                            merged.push(hit);
                        }
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        if !any_ok {
            if let Some(e) = last_err {
                return Err(ApiError::with_msg(
                    ErrorKind::InternalError,
                    format!("Indexer search failed: {e}"),
                ));
            }
        }

        merged.sort_by(|a, b| {
            b.activity_ts()
                .cmp(&a.activity_ts())
                .then_with(|| a.cid.cmp(&b.cid))
        });
        Ok(merged)
    }

    async fn score_hits(
        &self,
        tokens: &[String],
        hits: Vec<IndexerHit>,
    ) -> Vec<ScoredHit> {
        let now = TimestampMs::now();
        let usage_since = now.saturating_sub(USAGE_WINDOW);
        let replication_since = now.saturating_sub(REPLICATION_WINDOW);

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let tags = hit.tags();
            let relevance = score::relevance(tokens, &hit, &tags);

            let ok_wallets_7d = self
                .usage
                .ok_wallets_since(hit.cid.clone(), usage_since)
                .await
                .unwrap_or(0);
            let replication_key = hit
                .root_cid
                .clone()
                .unwrap_or_else(|| hit.cid.clone());
            let replicas_30d = self
                .store
                .count_wallets_replicating(
                    vec![replication_key],
                    Some(replication_since),
                )
                .await
                .unwrap_or(0);
            let popularity = score::popularity(ok_wallets_7d, replicas_30d);

            let age = now
                .saturating_since(TimestampMs(hit.activity_ts()));
            let freshness = score::freshness(age);

            let stats =
                self.usage.usage_stats(hit.cid.clone()).await.ok();
            let availability = score::availability(&hit, stats);

            let signals = Signals {
                popularity,
                relevance,
                freshness,
                availability,
                onchain: None,
            };
            let composite = signals.composite();
            out.push(ScoredHit {
                hit,
                signals,
                composite,
            });
        }
        out
    }

    /// Resolve on-chain linkage for the candidate roots (capped) and fold
    /// the verdicts into the signals and composites.
    async fn attach_linkage(&self, scored: &mut [ScoredHit]) {
        let mut roots: Vec<String> = Vec::new();
        for s in scored.iter() {
            let root = s
                .hit
                .root_cid
                .clone()
                .unwrap_or_else(|| s.hit.cid.clone());
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let verdicts = self.link.linkage_for_roots(&roots).await;
        for s in scored.iter_mut() {
            let root = s
                .hit
                .root_cid
                .clone()
                .unwrap_or_else(|| s.hit.cid.clone());
            s.signals.onchain = match verdicts.get(&root) {
                Some(Some(linked)) => Some(*linked),
                _ => None,
            };
            s.composite = s.signals.composite();
        }
    }

    async fn resolve_site_results(
        &self,
        scored: &[ScoredHit],
        tokens: &[String],
    ) -> Vec<SiteOut> {
        let max_composite = scored
            .iter()
            .map(|s| s.composite)
            .fold(0.0f64, f64::max)
            .max(f64::EPSILON);

        let candidates: Vec<SiteCandidate> = scored
            .iter()
            .map(|s| SiteCandidate {
                root: s
                    .hit
                    .root_cid
                    .clone()
                    .unwrap_or_else(|| s.hit.cid.clone()),
                hit: s.hit.clone(),
                signals: s.signals,
                norm_content: s.composite / max_composite,
            })
            .collect();

        self.sites
            .resolve_sites(&candidates, tokens)
            .await
            .into_iter()
            .map(|site| SiteOut {
                domain: site.domain,
                wallet: site.wallet,
                root_cid: site.root_cid,
                entry_cid: site.entry_cid,
                entry_path: site.entry_path,
                title: site.title,
                snippet: site.snippet,
                rank_signals: site.signals.to_rank_signals(),
            })
            .collect()
    }
}

fn hit_out(scored: &ScoredHit) -> SearchHitOut {
    let hit = &scored.hit;
    let tags = hit.tags();
    // Text hits snippet from the preview, everything else from the
    // description.
    let snippet = if hit.kind.as_deref() == Some("text") {
        hit.preview.clone()
    } else {
        hit.description.clone().or_else(|| tags.description.clone())
    };
    SearchHitOut {
        cid: hit.cid.clone(),
        root_cid: hit.root_cid.clone(),
        path: hit.path.clone(),
        title: hit.title.clone().or_else(|| tags.title.clone()),
        snippet,
        kind: hit.kind.clone(),
        mime: hit.mime.clone(),
        topics: (!tags.topics.is_empty()).then(|| tags.topics.clone()),
        rank_signals: scored.signals.to_rank_signals(),
    }
}

fn paginate<T>(items: Vec<T>, offset: u32, limit: u32) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}
