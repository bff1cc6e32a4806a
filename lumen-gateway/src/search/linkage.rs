//! On-chain linkage resolution.
//!
//! A root is *linked* when some owner of the root holds a domain whose
//! record value (a CID record, or an IPNS record after resolution) equals
//! the root, either exactly or via a single `parents` hop. Results are
//! cached per root for 15 minutes and at most 40 roots are resolved per
//! query.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use lumen_clients::{
    cas::CasClient,
    chain::{ChainClient, DomainRecord},
    indexer::IndexerClient,
};
use lumen_common::cid::expand_variants;
use lumen_store::WalletStore;
use tracing::debug;

/// Linkage verdicts stay fresh this long.
pub const LINK_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
/// IPNS resolutions stay fresh this long.
pub const IPNS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Hard cap on linkage lookups per query.
pub const MAX_ROOTS_PER_QUERY: usize = 40;

/// Record → root match classification, shared with site mode: exact
/// matches score full coefficient, one-hop descendants slightly less.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RecordMatch {
    Exact,
    OneHop,
}

/// Does a record value (already resolved to a CID) point at `root`?
/// `root_parents` are the CIDs one `parents` hop above the root.
pub fn match_record_cid(
    record_cid: &str,
    root: &str,
    root_parents: &[String],
) -> Option<RecordMatch> {
    let record_variants = expand_variants(record_cid);
    if expand_variants(root)
        .iter()
        .any(|v| record_variants.contains(v))
    {
        return Some(RecordMatch::Exact);
    }
    if root_parents
        .iter()
        .any(|p| expand_variants(p).iter().any(|v| record_variants.contains(v)))
    {
        return Some(RecordMatch::OneHop);
    }
    None
}

/// Pull the CID out of an IPNS resolution like `/ipfs/bafy.../sub/path`.
pub fn cid_from_ipfs_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/ipfs/")?;
    let cid = rest.split('/').next()?;
    (!cid.is_empty()).then(|| cid.to_owned())
}

pub struct LinkResolver {
    chain: Arc<ChainClient>,
    cas: Arc<CasClient>,
    indexer: Arc<IndexerClient>,
    store: WalletStore,
    link_cache: Mutex<HashMap<String, (Instant, bool)>>,
    ipns_cache: Mutex<HashMap<String, (Instant, Option<String>)>>,
}

impl LinkResolver {
    pub fn new(
        chain: Arc<ChainClient>,
        cas: Arc<CasClient>,
        indexer: Arc<IndexerClient>,
        store: WalletStore,
    ) -> Self {
        Self {
            chain,
            cas,
            indexer,
            store,
            link_cache: Mutex::new(HashMap::new()),
            ipns_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve linkage for up to [`MAX_ROOTS_PER_QUERY`] roots; roots past
    /// the cap come back as `None` (unknown).
    pub async fn linkage_for_roots(
        &self,
        roots: &[String],
    ) -> HashMap<String, Option<bool>> {
        let mut out = HashMap::new();
        for (i, root) in roots.iter().enumerate() {
            if i >= MAX_ROOTS_PER_QUERY {
                out.insert(root.clone(), None);
                continue;
            }
            let linked = self.is_root_linked(root).await;
            out.insert(root.clone(), Some(linked));
        }
        out
    }

    pub async fn is_root_linked(&self, root: &str) -> bool {
        if let Some(cached) = self.cached_link(root) {
            return cached;
        }

        let linked = self.resolve_link(root).await;
        self.link_cache
            .lock()
            .expect("Link cache poisoned")
            .insert(root.to_owned(), (Instant::now(), linked));
        linked
    }

    fn cached_link(&self, root: &str) -> Option<bool> {
        let cache = self.link_cache.lock().expect("Link cache poisoned");
        cache.get(root).and_then(|(at, linked)| {
            (at.elapsed() < LINK_CACHE_TTL).then_some(*linked)
        })
    }

    async fn resolve_link(&self, root: &str) -> bool {
        let owners = match self.store.logical_owners(root.to_owned()).await {
            Ok(owners) => owners,
            Err(e) => {
                debug!(%root, "Linkage owner lookup failed: {e}");
                return false;
            }
        };
        if owners.is_empty() {
            return false;
        }

        // One `parents` hop for descendant matching; a miss just means
        // only exact matches count.
        let root_parents = self
            .indexer
            .parents(root)
            .await
            .map(|hits| {
                hits.into_iter().map(|h| h.cid).collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for owner in owners {
            let domains = match self.chain.domains_by_owner(&owner).await {
                Ok(domains) => domains,
                Err(e) => {
                    debug!(%owner, "Domain lookup failed: {e}");
                    continue;
                }
            };
            for domain in domains {
                for record in &domain.records {
                    if self
                        .record_points_at(record, root, &root_parents)
                        .await
                        .is_some()
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Domains owned by a wallet; site mode shares this client (and its
    /// rate-limited logging) rather than holding its own.
    pub async fn chain_domains_for(
        &self,
        owner: &str,
    ) -> Result<Vec<lumen_clients::chain::ChainDomain>, lumen_clients::ClientError>
    {
        self.chain.domains_by_owner(owner).await
    }

    /// Classify one domain record against a root, resolving IPNS values
    /// through the (cached) resolver.
    pub async fn record_points_at(
        &self,
        record: &DomainRecord,
        root: &str,
        root_parents: &[String],
    ) -> Option<RecordMatch> {
        let kind = record.kind.as_deref()?.to_ascii_uppercase();
        let value = record.value.as_deref()?;
        match kind.as_str() {
            "CID" => match_record_cid(value, root, root_parents),
            "IPNS" => {
                let resolved = self.resolve_ipns(value).await?;
                match_record_cid(&resolved, root, root_parents)
            }
            _ => None,
        }
    }

    async fn resolve_ipns(&self, name: &str) -> Option<String> {
        {
            let cache =
                self.ipns_cache.lock().expect("IPNS cache poisoned");
            if let Some((at, resolved)) = cache.get(name) {
                if at.elapsed() < IPNS_CACHE_TTL {
                    return resolved.clone();
                }
            }
        }

        let resolved = match self.cas.name_resolve(name).await {
            Ok(path) => cid_from_ipfs_path(&path),
            Err(e) => {
                debug!(%name, "IPNS resolution failed: {e}");
                None
            }
        };

        self.ipns_cache
            .lock()
            .expect("IPNS cache poisoned")
            .insert(name.to_owned(), (Instant::now(), resolved.clone()));
        resolved
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_matching() {
        let parents = vec!["parent1".to_owned()];
        assert_eq!(
            match_record_cid("rootx", "rootx", &parents),
            Some(RecordMatch::Exact)
        );
        assert_eq!(
            match_record_cid("parent1", "rootx", &parents),
            Some(RecordMatch::OneHop)
        );
        assert_eq!(match_record_cid("other", "rootx", &parents), None);
    }

    #[test]
    fn ipfs_path_cid_extraction() {
        assert_eq!(
            cid_from_ipfs_path("/ipfs/bafyfoo/sub/index.html").as_deref(),
            Some("bafyfoo")
        );
        assert_eq!(
            cid_from_ipfs_path("/ipfs/bafyfoo").as_deref(),
            Some("bafyfoo")
        );
        assert_eq!(cid_from_ipfs_path("/ipns/name"), None);
        assert_eq!(cid_from_ipfs_path("/ipfs/"), None);
    }
}
