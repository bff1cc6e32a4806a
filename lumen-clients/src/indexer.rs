//! Content indexer client.
//!
//! The indexer is an external collaborator; only its I/O shape matters
//! here. Responses are tolerated both as bare arrays and as `{items: []}`
//! wrappers, and `tags_json` is parsed lazily into [`Tags`].

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;
use serde_json::Value;

use crate::http::{ClientError, ClientResult, HttpClient};

pub struct IndexerClient {
    base: String,
    http: HttpClient,
}

/// A single indexer hit, as returned by `/cid`, `/children`, `/parents`,
/// and `/search`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IndexerHit {
    pub cid: String,
    #[serde(default)]
    pub root_cid: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub ext_guess: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub tags_json: Option<String>,
    #[serde(default)]
    pub present: Option<bool>,
    #[serde(default)]
    pub present_source: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub first_seen: Option<i64>,
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub indexed_at: Option<i64>,
}

/// The pre-parsed contents of `tags_json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tokens: HashMap<String, u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content_class: Option<String>,
    #[serde(default)]
    pub signals: Option<Value>,
}

impl IndexerHit {
    /// Parse `tags_json`; malformed tag blobs read as empty tags.
    pub fn tags(&self) -> Tags {
        self.tags_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// The activity timestamp used for ordering: the freshest of the
    /// last_seen / first_seen / updated / indexed family.
    pub fn activity_ts(&self) -> i64 {
        [
            self.last_seen,
            self.updated_at,
            self.indexed_at,
            self.first_seen,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }
}

/// Search parameters for `GET /search`.
#[derive(Clone, Debug, Default)]
pub struct IndexerSearch {
    pub kind: Option<String>,
    pub tokens: Vec<String>,
    pub present_only: bool,
    pub limit: u32,
    pub offset: u32,
}

/// Indexer list endpoints answer either a bare array or `{items: [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HitList {
    Bare(Vec<IndexerHit>),
    Wrapped {
        #[serde(default)]
        items: Vec<IndexerHit>,
    },
}

impl From<HitList> for Vec<IndexerHit> {
    fn from(list: HitList) -> Self {
        match list {
            HitList::Bare(items) => items,
            HitList::Wrapped { items } => items,
        }
    }
}

impl IndexerClient {
    pub fn new(base: String, timeout: Duration) -> Self {
        Self {
            base,
            http: HttpClient::new("indexer", timeout),
        }
    }

    /// `GET /cid/{cid}`; a 404 means the CID is simply not indexed.
    pub async fn cid_info(
        &self,
        cid: &str,
    ) -> ClientResult<Option<IndexerHit>> {
        let url = format!("{}/cid/{cid}", self.base);
        match self.http.send_json::<IndexerHit>(self.http.get(url)).await {
            Ok(hit) => Ok(Some(hit)),
            Err(ClientError::BadStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn children(
        &self,
        cid: &str,
    ) -> ClientResult<Vec<IndexerHit>> {
        let url = format!("{}/children/{cid}", self.base);
        let list: HitList =
            self.http.send_json(self.http.get(url)).await?;
        Ok(list.into())
    }

    pub async fn parents(&self, cid: &str) -> ClientResult<Vec<IndexerHit>> {
        let url = format!("{}/parents/{cid}", self.base);
        let list: HitList =
            self.http.send_json(self.http.get(url)).await?;
        Ok(list.into())
    }

    pub async fn search(
        &self,
        params: &IndexerSearch,
    ) -> ClientResult<Vec<IndexerHit>> {
        let url = format!("{}/search", self.base);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(kind) = &params.kind {
            query.push(("kind", kind.clone()));
        }
        if !params.tokens.is_empty() {
            query.push(("token", params.tokens.join(" ")));
        }
        if params.present_only {
            query.push(("present", "1".to_owned()));
        }
        query.push(("limit", params.limit.to_string()));
        query.push(("offset", params.offset.to_string()));

        let list: HitList = self
            .http
            .send_json(self.http.get(url).query(&query))
            .await?;
        Ok(list.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags_parse_and_tolerate_garbage() {
        let hit = IndexerHit {
            cid: "c1".to_owned(),
            tags_json: Some(
                r#"{"topics":["rust"],"tokens":{"gateway":3},"title":"t"}"#
                    .to_owned(),
            ),
            ..Default::default()
        };
        let tags = hit.tags();
        assert_eq!(tags.topics, vec!["rust"]);
        assert_eq!(tags.tokens.get("gateway"), Some(&3));
        assert_eq!(tags.title.as_deref(), Some("t"));

        let broken = IndexerHit {
            cid: "c2".to_owned(),
            tags_json: Some("{not json".to_owned()),
            ..Default::default()
        };
        assert!(broken.tags().topics.is_empty());
    }

    #[test]
    fn activity_ts_takes_freshest() {
        let hit = IndexerHit {
            cid: "c1".to_owned(),
            first_seen: Some(100),
            last_seen: Some(300),
            updated_at: Some(200),
            ..Default::default()
        };
        assert_eq!(hit.activity_ts(), 300);

        let bare = IndexerHit {
            cid: "c2".to_owned(),
            ..Default::default()
        };
        assert_eq!(bare.activity_ts(), 0);
    }

    #[test]
    fn hit_lists_accept_both_shapes() {
        let bare: HitList =
            serde_json::from_str(r#"[{"cid":"a"}]"#).unwrap();
        assert_eq!(Vec::<IndexerHit>::from(bare).len(), 1);

        let wrapped: HitList =
            serde_json::from_str(r#"{"items":[{"cid":"a"},{"cid":"b"}]}"#)
                .unwrap();
        assert_eq!(Vec::<IndexerHit>::from(wrapped).len(), 2);
    }
}
