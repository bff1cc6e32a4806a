//! CAS-daemon (kubo-compatible) API client.
//!
//! Everything is `POST /api/v0/...` with query-string arguments, per the
//! daemon's RPC convention. DAG imports stream the spool file as multipart
//! and get their own (much longer) timeout.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;

use crate::http::{ClientError, ClientResult, HttpClient, RawResponse};

pub struct CasClient {
    api_base: String,
    gateway_base: String,
    http: HttpClient,
    import_http: HttpClient,
}

/// One line of `dag/import` NDJSON output.
#[derive(Deserialize)]
struct ImportLine {
    #[serde(rename = "Root")]
    root: Option<Value>,
}

#[derive(Deserialize)]
struct SwarmAddrs {
    #[serde(rename = "Strings", default)]
    strings: Vec<String>,
}

#[derive(Deserialize)]
struct NameResolve {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Deserialize)]
pub struct CasIdentity {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Addresses", default)]
    pub addresses: Vec<String>,
}

impl CasClient {
    pub fn new(
        api_base: String,
        gateway_base: String,
        request_timeout: Duration,
        import_timeout: Duration,
    ) -> Self {
        Self {
            api_base,
            gateway_base,
            http: HttpClient::new("cas-daemon", request_timeout),
            import_http: HttpClient::new("cas-daemon-import", import_timeout),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v0/{path}", self.api_base)
    }

    pub async fn version(&self) -> ClientResult<Value> {
        self.http.send_json(self.http.post(self.api("version"))).await
    }

    pub async fn pin_add(&self, cid: &str) -> ClientResult<Value> {
        let url = self.api("pin/add");
        self.http
            .send_json(self.http.post(url).query(&[("arg", cid)]))
            .await
    }

    pub async fn pin_rm(&self, cid: &str) -> ClientResult<Value> {
        let url = self.api("pin/rm");
        self.http
            .send_json(self.http.post(url).query(&[("arg", cid)]))
            .await
    }

    /// Whether the daemon reports `cid` recursively pinned. The daemon
    /// answers "not pinned" with a 500, which we fold into `Ok(false)`.
    pub async fn is_pinned_recursive(&self, cid: &str) -> ClientResult<bool> {
        let url = self.api("pin/ls");
        let result = self
            .http
            .send_json::<Value>(
                self.http
                    .post(url)
                    .query(&[("arg", cid), ("type", "recursive")]),
            )
            .await;
        match result {
            Ok(body) => {
                let keys = body.get("Keys").and_then(Value::as_object);
                Ok(keys.is_some_and(|k| !k.is_empty()))
            }
            Err(ClientError::BadStatus { body, .. })
                if body.contains("not pinned") =>
                Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stream a CAR spool file into `dag/import?pin-roots=true`. Returns
    /// the raw NDJSON response; parse roots with [`parse_import_roots`].
    /// Single attempt: the streamed body cannot be replayed.
    pub async fn dag_import(
        &self,
        car: tokio::fs::File,
        content_type: Option<&str>,
    ) -> ClientResult<String> {
        let stream = ReaderStream::new(car);
        let part = reqwest::multipart::Part::stream(
            reqwest::Body::wrap_stream(stream),
        )
        .file_name("upload.car")
        .mime_str(content_type.unwrap_or("application/vnd.ipld.car"))
        .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self.api("dag/import");
        let request = self
            .import_http
            .post(url)
            .query(&[("pin-roots", "true")])
            .multipart(form);
        self.import_http.send_text(request).await
    }

    pub async fn ls(&self, cid: &str) -> ClientResult<Value> {
        let url = self.api("ls");
        self.http
            .send_json(self.http.post(url).query(&[("arg", cid)]))
            .await
    }

    /// Resolve an IPNS name to its current `/ipfs/<cid>` path.
    pub async fn name_resolve(&self, name: &str) -> ClientResult<String> {
        let url = self.api("name/resolve");
        let resolved: NameResolve = self
            .http
            .send_json(self.http.post(url).query(&[("arg", name)]))
            .await?;
        Ok(resolved.path)
    }

    pub async fn identity(&self) -> ClientResult<CasIdentity> {
        self.http.send_json(self.http.post(self.api("id"))).await
    }

    pub async fn swarm_listen_addrs(&self) -> ClientResult<Vec<String>> {
        let addrs: SwarmAddrs = self
            .http
            .send_json(self.http.post(self.api("swarm/addrs/listen")))
            .await?;
        Ok(addrs.strings)
    }

    /// Fetch content through the daemon's gateway, preserving the upstream
    /// status for the proxy routes.
    pub async fn gateway_fetch(
        &self,
        ipfs_path: &str,
        query: Option<&str>,
    ) -> ClientResult<RawResponse> {
        let mut url = format!("{}{ipfs_path}", self.gateway_base);
        if let Some(q) = query {
            url.push('?');
            url.push_str(q.trim_start_matches('?'));
        }
        self.http.send_any_status(self.http.get(url)).await
    }
}

/// Extract the deduplicated root CIDs from `dag/import` NDJSON output.
/// Each line may carry `Root.Cid."/"` or (older daemons) `Root."/"`.
pub fn parse_import_roots(ndjson: &str) -> Vec<String> {
    let mut roots = Vec::new();
    for line in ndjson.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<ImportLine>(line) else {
            continue;
        };
        let Some(root) = parsed.root else {
            continue;
        };
        let cid = root
            .get("Cid")
            .and_then(|c| c.get("/"))
            .and_then(Value::as_str)
            .or_else(|| root.get("/").and_then(Value::as_str));
        if let Some(cid) = cid {
            let cid = cid.to_owned();
            if !roots.contains(&cid) {
                roots.push(cid);
            }
        }
    }
    roots
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_modern_and_legacy_root_lines() {
        let ndjson = r#"
{"Root":{"Cid":{"/":"bafyroot1"},"PinErrorMsg":""}}
{"Root":{"/":"bafyroot2"}}
{"Stats":{"BlockCount":3}}
not json at all
{"Root":{"Cid":{"/":"bafyroot1"}}}
"#;
        let roots = parse_import_roots(ndjson);
        assert_eq!(roots, vec!["bafyroot1", "bafyroot2"]);
    }

    #[test]
    fn empty_import_output_has_no_roots() {
        assert!(parse_import_roots("").is_empty());
        assert!(parse_import_roots("{\"Stats\":{}}").is_empty());
    }
}
