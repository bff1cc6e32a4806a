//! Chain REST API client: contracts, params, domains, balances.
//!
//! Cosmos-style REST serializes most numbers as strings; every numeric
//! field here tolerates both forms.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::http::{ClientError, ClientResult, HttpClient};

pub struct ChainClient {
    base: String,
    http: HttpClient,
}

/// A storage contract as returned by `/gateway/v1/contracts`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChainContract {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "planId")]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub start_seconds: Option<Value>,
    #[serde(default)]
    pub months_total: Option<Value>,
    #[serde(default)]
    pub storage_gb_per_month: Option<Value>,
}

impl ChainContract {
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_ref().and_then(as_u64)
    }

    pub fn start_seconds_u64(&self) -> Option<u64> {
        self.start_seconds.as_ref().and_then(as_u64)
    }

    pub fn months_total_u64(&self) -> Option<u64> {
        self.months_total.as_ref().and_then(as_u64)
    }

    pub fn storage_gb_per_month_u64(&self) -> Option<u64> {
        self.storage_gb_per_month.as_ref().and_then(as_u64)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChainParams {
    #[serde(default)]
    pub month_seconds: Option<Value>,
    /// Plan catalog, surfaced verbatim by the gateway's `/pricing`.
    #[serde(default)]
    pub plans: Vec<Value>,
}

impl ChainParams {
    pub fn month_seconds_u64(&self) -> Option<u64> {
        self.month_seconds.as_ref().and_then(as_u64)
    }
}

/// An on-chain domain with its records.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChainDomain {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub records: Vec<DomainRecord>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DomainRecord {
    /// "CID" or "IPNS" (case-insensitive in practice).
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Deserialize)]
struct ContractsResponse {
    #[serde(default)]
    contracts: Vec<ChainContract>,
}

#[derive(Deserialize)]
struct ParamsResponse {
    #[serde(default)]
    params: ChainParams,
}

#[derive(Deserialize)]
struct DomainsResponse {
    #[serde(default)]
    domains: Vec<ChainDomain>,
}

#[derive(Deserialize)]
struct DomainResponse {
    domain: ChainDomain,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: BalanceCoin,
}

#[derive(Deserialize)]
struct BalanceCoin {
    #[serde(default)]
    amount: Option<Value>,
}

/// Accept `3`, `"3"`, and `3.0` spellings.
fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) =>
            n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.parse::<u64>().ok().or_else(|| {
            s.parse::<f64>().ok().map(|f| f as u64)
        }),
        _ => None,
    }
}

impl ChainClient {
    pub fn new(base: String, timeout: Duration) -> Self {
        Self {
            base,
            http: HttpClient::new("chain-rest", timeout),
        }
    }

    /// `GET /gateway/v1/contracts?client=...`
    pub async fn contracts(
        &self,
        client_addr: &str,
    ) -> ClientResult<Vec<ChainContract>> {
        let url = format!("{}/gateway/v1/contracts", self.base);
        let resp: ContractsResponse = self
            .http
            .send_json(self.http.get(url).query(&[("client", client_addr)]))
            .await?;
        Ok(resp.contracts)
    }

    /// `GET /gateway/v1/params`
    pub async fn params(&self) -> ClientResult<ChainParams> {
        let url = format!("{}/gateway/v1/params", self.base);
        let resp: ParamsResponse =
            self.http.send_json(self.http.get(url)).await?;
        Ok(resp.params)
    }

    /// `GET /dns/v1/domains_by_owner/{owner}`
    pub async fn domains_by_owner(
        &self,
        owner: &str,
    ) -> ClientResult<Vec<ChainDomain>> {
        let url = format!("{}/dns/v1/domains_by_owner/{owner}", self.base);
        let resp: DomainsResponse =
            self.http.send_json(self.http.get(url)).await?;
        Ok(resp.domains)
    }

    /// `GET /dns/v1/domain/{name}`; 404 means no such domain.
    pub async fn domain(
        &self,
        name: &str,
    ) -> ClientResult<Option<ChainDomain>> {
        let url = format!("{}/dns/v1/domain/{name}", self.base);
        match self
            .http
            .send_json::<DomainResponse>(self.http.get(url))
            .await
        {
            Ok(resp) => Ok(Some(resp.domain)),
            Err(ClientError::BadStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /bank/v1beta1/balances/{addr}/by_denom?denom=...`
    pub async fn balance(
        &self,
        addr: &str,
        denom: &str,
    ) -> ClientResult<u128> {
        let url =
            format!("{}/bank/v1beta1/balances/{addr}/by_denom", self.base);
        let resp: BalanceResponse = self
            .http
            .send_json(self.http.get(url).query(&[("denom", denom)]))
            .await?;
        let amount = match resp.balance.amount {
            Some(Value::String(s)) => s.parse::<u128>().unwrap_or(0),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u128,
            _ => 0,
        };
        Ok(amount)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbers_tolerate_string_form() {
        let contract: ChainContract = serde_json::from_str(
            r#"{
                "id": "42",
                "status": "ACTIVE",
                "plan_id": "basic",
                "start_seconds": 1700000000,
                "months_total": "12",
                "storage_gb_per_month": "5"
            }"#,
        )
        .unwrap();
        assert_eq!(contract.id_u64(), Some(42));
        assert_eq!(contract.start_seconds_u64(), Some(1_700_000_000));
        assert_eq!(contract.months_total_u64(), Some(12));
        assert_eq!(contract.storage_gb_per_month_u64(), Some(5));
    }

    #[test]
    fn params_and_records_parse() {
        let params: ParamsResponse = serde_json::from_str(
            r#"{"params":{"month_seconds":"2592000"}}"#,
        )
        .unwrap();
        assert_eq!(params.params.month_seconds_u64(), Some(2_592_000));

        let domain: ChainDomain = serde_json::from_str(
            r#"{"name":"example.lmn",
                "records":[{"type":"CID","value":"bafyroot"}]}"#,
        )
        .unwrap();
        assert_eq!(domain.records.len(), 1);
        assert_eq!(domain.records[0].kind.as_deref(), Some("CID"));
    }
}
