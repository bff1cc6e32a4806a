//! Site mode: map content hits to on-chain domains and their HTML
//! entrypoints.

use std::{collections::HashMap, sync::Arc};

use lumen_clients::{
    cas::CasClient,
    indexer::{IndexerClient, IndexerHit},
};
use lumen_store::WalletStore;
use serde_json::Value;
use tracing::debug;

use super::{
    filters::is_html_path,
    linkage::{LinkResolver, RecordMatch},
    score::Signals,
};

/// Entry discovery walks at most this deep below the root.
const MAX_LS_DEPTH: usize = 2;
/// ... and lists at most this many directories.
const MAX_LS_DIRS: usize = 25;
/// Cap on roots resolved per site-mode query.
const MAX_SITE_ROOTS: usize = 40;

/// A content hit promoted to a site candidate.
#[derive(Clone, Debug)]
pub struct SiteCandidate {
    pub root: String,
    pub hit: IndexerHit,
    pub signals: Signals,
    /// Content score normalized against the best candidate in this query.
    pub norm_content: f64,
}

/// A fully resolved site result, ready for the response model.
#[derive(Clone, Debug)]
pub struct ResolvedSite {
    pub domain: Option<String>,
    pub wallet: Option<String>,
    pub root_cid: String,
    pub entry_cid: String,
    pub entry_path: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub signals: Signals,
    pub score: f64,
}

/// Record coefficient: CID records beat IPNS records, exact beats one-hop.
pub fn record_coefficient(kind_is_ipns: bool, m: RecordMatch) -> f64 {
    match (kind_is_ipns, m) {
        (false, RecordMatch::Exact) => 1.0,
        (false, RecordMatch::OneHop) => 0.85,
        (true, RecordMatch::Exact) => 0.9,
        (true, RecordMatch::OneHop) => 0.8,
    }
}

/// How well the query matches the domain itself: label carries 80% of the
/// weight, the TLD 20%.
pub fn domain_match_score(query_tokens: &[String], domain: &str) -> f64 {
    let domain = domain.to_ascii_lowercase();
    let mut parts = domain.split('.');
    let label = parts.next().unwrap_or_default();
    let tld = domain.rsplit('.').next().unwrap_or_default();

    let label_score = query_tokens
        .iter()
        .map(|q| {
            if q == label {
                1.0
            } else if q.len() >= 3
                && (label.contains(q.as_str()) || q.contains(label))
            {
                0.5
            } else {
                0.0
            }
        })
        .fold(0.0f64, f64::max);
    let tld_score = if query_tokens.iter().any(|q| q == tld) {
        1.0
    } else {
        0.0
    };

    0.8 * label_score + 0.2 * tld_score
}

/// One link row from a CAS `ls` listing.
#[derive(Clone, Debug, PartialEq)]
pub struct LsLink {
    pub name: String,
    pub hash: String,
    pub is_dir: bool,
}

/// Parse the CAS-daemon `ls` response into link rows.
pub fn parse_ls_links(body: &Value) -> Vec<LsLink> {
    let mut out = Vec::new();
    let Some(objects) = body.get("Objects").and_then(Value::as_array)
    else {
        return out;
    };
    for object in objects {
        let Some(links) = object.get("Links").and_then(Value::as_array)
        else {
            continue;
        };
        for link in links {
            let name = link
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let Some(hash) =
                link.get("Hash").and_then(Value::as_str)
            else {
                continue;
            };
            // kubo: Type 1 = directory, 2 = file
            let is_dir =
                link.get("Type").and_then(Value::as_i64) == Some(1);
            out.push(LsLink {
                name,
                hash: hash.to_owned(),
                is_dir,
            });
        }
    }
    out
}

/// Pick the best HTML entry among sibling links: `index.html` first, then
/// `index.htm`, then any other HTML file.
pub fn pick_html_link(links: &[LsLink]) -> Option<&LsLink> {
    let by_name = |want: &str| {
        links
            .iter()
            .find(|l| !l.is_dir && l.name.eq_ignore_ascii_case(want))
    };
    by_name("index.html")
        .or_else(|| by_name("index.htm"))
        .or_else(|| {
            links
                .iter()
                .find(|l| !l.is_dir && is_html_path(&l.name))
        })
}

/// A discovered entrypoint.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteEntry {
    pub cid: String,
    pub path: String,
}

pub struct SiteResolver {
    cas: Arc<CasClient>,
    indexer: Arc<IndexerClient>,
    store: WalletStore,
    link: Arc<LinkResolver>,
}

impl SiteResolver {
    pub fn new(
        cas: Arc<CasClient>,
        indexer: Arc<IndexerClient>,
        store: WalletStore,
        link: Arc<LinkResolver>,
    ) -> Self {
        Self {
            cas,
            indexer,
            store,
            link,
        }
    }

    /// Resolve site results for the candidate set: domains per owner,
    /// record classification, entry discovery, and the CID-only fallback
    /// tier for roots with no domain. Sorted by score, best first.
    pub async fn resolve_sites(
        &self,
        candidates: &[SiteCandidate],
        query_tokens: &[String],
    ) -> Vec<ResolvedSite> {
        // Best candidate per root.
        let mut per_root: HashMap<&str, &SiteCandidate> = HashMap::new();
        for cand in candidates {
            per_root
                .entry(cand.root.as_str())
                .and_modify(|best| {
                    if cand.norm_content > best.norm_content {
                        *best = cand;
                    }
                })
                .or_insert(cand);
        }

        let mut sites: Vec<ResolvedSite> = Vec::new();
        // Best per (domain, wallet).
        let mut best_scored: HashMap<(String, String), usize> =
            HashMap::new();

        for (i, (root, cand)) in per_root.iter().enumerate() {
            if i >= MAX_SITE_ROOTS {
                break;
            }
            let Some(entry) = self.entry_for_root(root, &cand.hit).await
            else {
                debug!(%root, "No HTML entry; skipping site candidate");
                continue;
            };

            let owners = self
                .store
                .logical_owners((*root).to_owned())
                .await
                .unwrap_or_default();

            let root_parents = self
                .indexer
                .parents(root)
                .await
                .map(|hits| {
                    hits.into_iter().map(|h| h.cid).collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let mut found_domain = false;
            for owner in &owners {
                let domains = match self
                    .link
                    .chain_domains_for(owner)
                    .await
                {
                    Ok(domains) => domains,
                    Err(_) => continue,
                };
                for domain in domains {
                    let Some(name) = domain.name.clone() else {
                        continue;
                    };
                    let mut best_coef = 0.0f64;
                    for record in &domain.records {
                        let is_ipns = record
                            .kind
                            .as_deref()
                            .is_some_and(|k| {
                                k.eq_ignore_ascii_case("ipns")
                            });
                        if let Some(m) = self
                            .link
                            .record_points_at(record, root, &root_parents)
                            .await
                        {
                            best_coef = best_coef
                                .max(record_coefficient(is_ipns, m));
                        }
                    }
                    if best_coef == 0.0 {
                        continue;
                    }
                    found_domain = true;

                    let weighted = cand.norm_content * best_coef;
                    let score = (0.7 * weighted
                        + 0.3 * domain_match_score(query_tokens, &name))
                    .clamp(0.0, 1.0);

                    let mut signals = cand.signals;
                    signals.onchain = Some(true);
                    let site = ResolvedSite {
                        domain: Some(name.clone()),
                        wallet: Some(owner.clone()),
                        root_cid: (*root).to_owned(),
                        entry_cid: entry.cid.clone(),
                        entry_path: entry.path.clone(),
                        title: cand
                            .hit
                            .title
                            .clone()
                            .or_else(|| cand.hit.tags().title),
                        snippet: cand.hit.description.clone(),
                        signals,
                        score,
                    };

                    // Keep only the best entry per (domain, wallet).
                    let key = (name, owner.clone());
                    match best_scored.get(&key) {
                        Some(&idx) if sites[idx].score >= site.score => {}
                        Some(&idx) => sites[idx] = site,
                        None => {
                            best_scored.insert(key, sites.len());
                            sites.push(site);
                        }
                    }
                }
            }

            // CID-only fallback tier: a reachable site with no domain.
            if !found_domain {
                let mut signals = cand.signals;
                signals.onchain = Some(false);
                sites.push(ResolvedSite {
                    domain: None,
                    wallet: owners.first().cloned(),
                    root_cid: (*root).to_owned(),
                    entry_cid: entry.cid,
                    entry_path: entry.path,
                    title: cand
                        .hit
                        .title
                        .clone()
                        .or_else(|| cand.hit.tags().title),
                    snippet: cand.hit.description.clone(),
                    signals,
                    score: (0.7 * cand.norm_content).clamp(0.0, 1.0),
                });
            }
        }

        sites.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.root_cid.cmp(&b.root_cid))
        });
        sites
    }

    /// Find the HTML entrypoint for a root: the root itself when it's an
    /// HTML file, else a probe of indexed children, else a bounded
    /// CAS `ls` walk.
    pub async fn entry_for_root(
        &self,
        root: &str,
        root_hit: &IndexerHit,
    ) -> Option<SiteEntry> {
        // Direct HTML file.
        let is_html_file = root_hit.mime.as_deref() == Some("text/html")
            || root_hit.kind.as_deref() == Some("html")
            || root_hit
                .path
                .as_deref()
                .is_some_and(is_html_path);
        if is_html_file && !looks_like_listing(root_hit) {
            return Some(SiteEntry {
                cid: root_hit.cid.clone(),
                path: root_hit.path.clone().unwrap_or_default(),
            });
        }

        // Indexed children.
        if let Ok(children) = self.indexer.children(root).await {
            let mut html_children: Vec<&IndexerHit> = children
                .iter()
                .filter(|c| {
                    let p = c.path.as_deref().unwrap_or_default();
                    (c.mime.as_deref() == Some("text/html")
                        || is_html_path(p))
                        && !looks_like_listing(c)
                })
                .collect();
            html_children.sort_by_key(|c| {
                let p = c
                    .path
                    .as_deref()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                match p.rsplit('/').next() {
                    Some("index.html") => 0,
                    Some("index.htm") => 1,
                    _ => 2,
                }
            });
            if let Some(child) = html_children.first() {
                return Some(SiteEntry {
                    cid: child.cid.clone(),
                    path: child.path.clone().unwrap_or_default(),
                });
            }
        }

        // Bounded `ls` walk of the DAG.
        self.ls_walk(root).await
    }

    async fn ls_walk(&self, root: &str) -> Option<SiteEntry> {
        let mut queue: Vec<(String, String, usize)> =
            vec![(root.to_owned(), String::new(), 0)];
        let mut dirs_listed = 0usize;
        let mut fallback: Option<SiteEntry> = None;

        while let Some((cid, prefix, depth)) = queue.pop() {
            if dirs_listed >= MAX_LS_DIRS {
                break;
            }
            dirs_listed += 1;

            let body = match self.cas.ls(&cid).await {
                Ok(body) => body,
                Err(e) => {
                    debug!(%cid, "ls failed during entry discovery: {e}");
                    continue;
                }
            };
            let links = parse_ls_links(&body);

            if let Some(link) = pick_html_link(&links) {
                let path = format!("{prefix}/{}", link.name);
                let entry = SiteEntry {
                    cid: link.hash.clone(),
                    path,
                };
                let is_index = link
                    .name
                    .to_ascii_lowercase()
                    .starts_with("index.htm");
                if is_index {
                    return Some(entry);
                }
                fallback.get_or_insert(entry);
            }

            if depth < MAX_LS_DEPTH {
                for link in links.iter().filter(|l| l.is_dir) {
                    queue.push((
                        link.hash.clone(),
                        format!("{prefix}/{}", link.name),
                        depth + 1,
                    ));
                }
            }
        }
        fallback
    }
}

/// Entry candidates that look like gateway directory listings are
/// rejected outright.
fn looks_like_listing(hit: &IndexerHit) -> bool {
    let tags = hit.tags();
    super::filters::suppress_reason(hit, &tags)
        == Some(super::filters::Suppression::DirectoryListing)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coefficients() {
        assert_eq!(record_coefficient(false, RecordMatch::Exact), 1.0);
        assert_eq!(record_coefficient(false, RecordMatch::OneHop), 0.85);
        assert_eq!(record_coefficient(true, RecordMatch::Exact), 0.9);
        assert_eq!(record_coefficient(true, RecordMatch::OneHop), 0.8);
    }

    #[test]
    fn domain_matching() {
        let tokens =
            vec!["lumen".to_owned(), "docs".to_owned()];
        // exact label match
        assert!(
            (domain_match_score(&tokens, "lumen.lmn") - 0.8).abs() < 1e-9
        );
        // label + tld
        let t2 = vec!["lumen".to_owned(), "lmn".to_owned()];
        assert!(
            (domain_match_score(&t2, "lumen.lmn") - 1.0).abs() < 1e-9
        );
        // partial label containment
        let t3 = vec!["lume".to_owned()];
        assert!(
            (domain_match_score(&t3, "lumen.lmn") - 0.4).abs() < 1e-9
        );
        // nothing
        assert_eq!(domain_match_score(&tokens, "other.xyz"), 0.0);
    }

    #[test]
    fn ls_parsing_and_entry_pick() {
        let body: Value = serde_json::from_str(
            r#"{"Objects":[{"Hash":"bafydir","Links":[
                {"Name":"styles.css","Hash":"bafycss","Size":10,"Type":2},
                {"Name":"sub","Hash":"bafysub","Type":1},
                {"Name":"about.html","Hash":"bafyabout","Type":2},
                {"Name":"index.html","Hash":"bafyindex","Type":2}
            ]}]}"#,
        )
        .unwrap();
        let links = parse_ls_links(&body);
        assert_eq!(links.len(), 4);
        assert!(links[1].is_dir);

        let picked = pick_html_link(&links).unwrap();
        assert_eq!(picked.hash, "bafyindex");

        // without index.html, any .html wins
        let no_index: Vec<LsLink> = links
            .iter()
            .filter(|l| l.name != "index.html")
            .cloned()
            .collect();
        assert_eq!(pick_html_link(&no_index).unwrap().hash, "bafyabout");

        // directories never get picked
        let only_dirs: Vec<LsLink> = links
            .iter()
            .filter(|l| l.is_dir)
            .cloned()
            .collect();
        assert!(pick_html_link(&only_dirs).is_none());
    }
}
