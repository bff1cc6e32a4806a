//! Multi-signal scoring.
//!
//! Composite = 0.3·popularity + 0.3·relevance + 0.2·freshness +
//! 0.1·availability + 0.1·onchain. Responses expose only the bucketed
//! signals, never the raw composite.

use std::time::Duration;

use lumen_api_core::models::{OnchainSignal, RankSignals, SignalBucket};
use lumen_clients::indexer::{IndexerHit, Tags};
use lumen_common::cid::is_cid_shaped;
use lumen_store::CidUsageStats;

/// Normalization knee for raw relevance.
const RELEVANCE_KNEE: f64 = 120.0;
/// Freshness half-life scale: 30 days.
const FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 24 * 3600);
/// Usage / replication saturate at this many wallets.
const SATURATION_WALLETS: u64 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Signals {
    pub popularity: f64,
    pub relevance: f64,
    pub freshness: f64,
    pub availability: f64,
    /// `None` = unknown (not resolved for this hit).
    pub onchain: Option<bool>,
}

impl Signals {
    pub fn composite(&self) -> f64 {
        let onchain = match self.onchain {
            Some(true) => 1.0,
            _ => 0.0,
        };
        0.3 * self.popularity
            + 0.3 * self.relevance
            + 0.2 * self.freshness
            + 0.1 * self.availability
            + 0.1 * onchain
    }

    pub fn to_rank_signals(&self) -> RankSignals {
        RankSignals {
            popularity: bucket(self.popularity),
            relevance: bucket(self.relevance),
            freshness: bucket(self.freshness),
            availability: bucket(self.availability),
            onchain: match self.onchain {
                Some(true) => OnchainSignal::Linked,
                Some(false) => OnchainSignal::None,
                None => OnchainSignal::Unknown,
            },
        }
    }
}

pub fn bucket(x: f64) -> SignalBucket {
    if x < 1.0 / 3.0 {
        SignalBucket::Low
    } else if x < 2.0 / 3.0 {
        SignalBucket::Medium
    } else {
        SignalBucket::High
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Raw relevance of a hit against the query tokens, and whether the hit is
/// a content match at all (≥ 1 exact/partial histogram or topic hit).
pub fn relevance_raw(
    query_tokens: &[String],
    hit: &IndexerHit,
    tags: &Tags,
) -> (f64, bool) {
    let mut raw = 0.0;
    let mut matched = false;

    for q in query_tokens {
        // Histogram terms: exact beats the best partial.
        let mut best = 0.0f64;
        let mut q_matched = false;
        for (term, count) in &tags.tokens {
            let count = *count as f64;
            if term == q {
                best = best.max(count * 10.0);
                q_matched = true;
            } else if q.len() >= 3 && term.len() >= 3 {
                let contained =
                    term.contains(q.as_str()) || q.contains(term.as_str());
                if contained {
                    let coverage = (q.len().min(term.len()) as f64)
                        / (q.len() as f64);
                    if coverage >= 0.5 {
                        best = best.max(count * 10.0 * coverage);
                        q_matched = true;
                    }
                }
            }
        }
        raw += best;

        // Topic hit.
        let topic_hit = tags.topics.iter().any(|t| {
            t == q || (q.len() >= 3 && t.contains(q.as_str()))
        });
        if topic_hit {
            raw += 100.0;
            q_matched = true;
        }

        matched |= q_matched;
    }

    // The hit's own kind named in the query.
    if let Some(kind) = &hit.kind {
        if query_tokens.iter().any(|q| q == kind) {
            raw += 200.0;
        }
    }

    // Classifier confidence bonus, with steep penalties for junk.
    if let Some(conf) = hit.confidence {
        raw += conf * 10.0;
        if conf < 0.1 {
            raw -= 3000.0;
        } else if conf < 0.2 {
            raw -= 2000.0;
        } else if conf < 0.3 {
            raw -= 1000.0;
        }
    }

    // A CID pasted as the sole query token is as direct as it gets.
    if let [only] = query_tokens {
        if is_cid_shaped(only)
            && (hit.cid == *only
                || hit.root_cid.as_deref() == Some(only.as_str()))
        {
            raw += 1000.0;
            matched = true;
        }
    }

    (raw, matched)
}

/// Normalized relevance: 0 when the hit isn't a content match.
pub fn relevance(query_tokens: &[String], hit: &IndexerHit, tags: &Tags) -> f64 {
    let (raw, matched) = relevance_raw(query_tokens, hit, tags);
    if !matched {
        return 0.0;
    }
    clamp01(1.0 - (-raw.max(0.0) / RELEVANCE_KNEE).exp())
}

/// Popularity from network usage and replication.
pub fn popularity(ok_wallets_7d: u64, replicas_30d: u64) -> f64 {
    let sat = (SATURATION_WALLETS as f64).ln_1p();
    let usage =
        (ok_wallets_7d.min(SATURATION_WALLETS) as f64).ln_1p() / sat;
    let replication =
        (replicas_30d.min(SATURATION_WALLETS) as f64).ln_1p() / sat;
    clamp01(0.6 * usage + 0.4 * replication)
}

/// Freshness decays exponentially over the 30-day window.
pub fn freshness(age: Duration) -> f64 {
    let window = FRESHNESS_WINDOW.as_secs_f64();
    (-age.as_secs_f64() / window).exp()
}

/// Availability: gone is 0; present is 1 downweighted by provenance,
/// errors, and wallet-scoped success rates.
pub fn availability(
    hit: &IndexerHit,
    stats: Option<CidUsageStats>,
) -> f64 {
    if hit.present != Some(true) {
        return 0.0;
    }
    let mut score = 1.0;
    if hit.present_source.as_deref() != Some("pinls") {
        score *= 0.9;
    }
    if hit.error.is_some() {
        score *= 0.7;
    }
    if let Some(stats) = stats {
        if stats.total_wallets > 0 {
            let ratio =
                stats.ok_wallets as f64 / stats.total_wallets as f64;
            score *= 0.6 + 0.4 * ratio;
        }
    }
    clamp01(score)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn tokens(pairs: &[(&str, u64)]) -> Tags {
        Tags {
            tokens: pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), *v))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    fn q(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| (*w).to_owned()).collect()
    }

    #[test]
    fn exact_token_match_scores() {
        let tags = tokens(&[("gateway", 3)]);
        let hit = IndexerHit::default();
        let (raw, matched) = relevance_raw(&q(&["gateway"]), &hit, &tags);
        assert!(matched);
        assert_eq!(raw, 30.0);
    }

    #[test]
    fn partial_needs_half_coverage() {
        let tags = tokens(&[("gatewaynode", 2)]);
        let hit = IndexerHit::default();

        // |q|=7, |t|=11, coverage = 7/7 = 1.0 (q contained in t)
        let (raw, matched) = relevance_raw(&q(&["gateway"]), &hit, &tags);
        assert!(matched);
        assert_eq!(raw, 20.0);

        // "ga" is too short for a partial
        let (_raw, matched) = relevance_raw(&q(&["ga"]), &hit, &tags);
        assert!(!matched);
    }

    #[test]
    fn topic_and_kind_bonuses() {
        let tags = Tags {
            topics: vec!["rust".to_owned()],
            ..Default::default()
        };
        let hit = IndexerHit {
            kind: Some("doc".to_owned()),
            ..Default::default()
        };
        let (raw, matched) =
            relevance_raw(&q(&["rust", "doc"]), &hit, &tags);
        assert!(matched);
        // topic 100 + kind-in-tokens 200
        assert_eq!(raw, 300.0);
    }

    #[test]
    fn low_confidence_is_penalized() {
        let tags = tokens(&[("gateway", 100)]);
        let hit = IndexerHit {
            confidence: Some(0.05),
            ..Default::default()
        };
        let score = relevance(&q(&["gateway"]), &hit, &tags);
        // 1000 raw from tokens, then −3000: floors at zero.
        assert_eq!(score, 0.0);
    }

    #[test]
    fn no_match_is_zero_regardless() {
        let tags = tokens(&[("unrelated", 50)]);
        let hit = IndexerHit {
            confidence: Some(0.9),
            ..Default::default()
        };
        assert_eq!(relevance(&q(&["gateway"]), &hit, &tags), 0.0);
    }

    #[test]
    fn popularity_saturates() {
        assert_eq!(popularity(0, 0), 0.0);
        assert!(popularity(10, 10) > 0.99);
        assert_eq!(popularity(10, 10), popularity(100, 100));
        assert!(popularity(5, 0) < popularity(5, 5));
    }

    #[test]
    fn freshness_decays() {
        assert!(freshness(Duration::ZERO) > 0.99);
        let month = Duration::from_secs(30 * 24 * 3600);
        let f = freshness(month);
        assert!(f > 0.36 && f < 0.38); // e^-1
        assert!(freshness(month * 10) < 0.01);
    }

    #[test]
    fn availability_downweights() {
        let absent = IndexerHit::default();
        assert_eq!(availability(&absent, None), 0.0);

        let pinned = IndexerHit {
            present: Some(true),
            present_source: Some("pinls".to_owned()),
            ..Default::default()
        };
        assert_eq!(availability(&pinned, None), 1.0);

        let indirect = IndexerHit {
            present: Some(true),
            present_source: Some("dht".to_owned()),
            ..Default::default()
        };
        assert_eq!(availability(&indirect, None), 0.9);

        let errored = IndexerHit {
            present: Some(true),
            present_source: Some("pinls".to_owned()),
            error: Some("timeout".to_owned()),
            ..Default::default()
        };
        assert!((availability(&errored, None) - 0.7).abs() < 1e-9);

        let half_ok = CidUsageStats {
            ok_wallets: 1,
            total_wallets: 2,
        };
        assert!(
            (availability(&pinned, Some(half_ok)) - 0.8).abs() < 1e-9
        );
    }

    #[test]
    fn composite_weights() {
        let sig = Signals {
            popularity: 1.0,
            relevance: 1.0,
            freshness: 1.0,
            availability: 1.0,
            onchain: Some(true),
        };
        assert!((sig.composite() - 1.0).abs() < 1e-9);

        let linked_only = Signals {
            onchain: Some(true),
            ..Default::default()
        };
        assert!((linked_only.composite() - 0.1).abs() < 1e-9);

        let unknown = Signals::default();
        assert_eq!(unknown.composite(), 0.0);
    }

    #[test]
    fn buckets() {
        assert_eq!(bucket(0.0), SignalBucket::Low);
        assert_eq!(bucket(0.5), SignalBucket::Medium);
        assert_eq!(bucket(0.9), SignalBucket::High);
    }
}
