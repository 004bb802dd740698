use crate::config::ProviderConfig;
use crate::error::app_error::AppError;
use crate::models::wallet::TokenBalance;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Wallet data provider contract. The registration flow needs an
/// is-this-address-real check; the portfolio flow needs priced balances.
/// Failures surface as `Upstream` and are never retried here.
#[async_trait::async_trait]
pub trait WalletDataProvider {
    async fn is_address_active(&self, address: &str) -> Result<bool, AppError>;
    async fn get_balances(&self, address: &str) -> Result<Vec<TokenBalance>, AppError>;
}

/// Moralis EVM API client.
pub struct MoralisProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ActiveChainsResponse {
    active_chains: Vec<ActiveChain>,
}

#[derive(Debug, Deserialize)]
struct ActiveChain {
    #[serde(default)]
    first_transaction: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenBalancesResponse {
    result: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenBalanceEntry {
    symbol: String,
    name: String,
    balance_formatted: String,
    usd_price: Option<f64>,
    usd_value: Option<f64>,
    usd_price_24hr_percent_change: Option<f64>,
}

impl From<TokenBalanceEntry> for TokenBalance {
    fn from(entry: TokenBalanceEntry) -> Self {
        Self {
            symbol: entry.symbol,
            name: entry.name,
            balance_formatted: entry.balance_formatted,
            usd_price: entry.usd_price,
            usd_value: entry.usd_value,
            pct_change_24h: entry.usd_price_24hr_percent_change,
        }
    }
}

impl MoralisProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AppError> {
        if config.api_key.is_empty() {
            return Err(AppError::configuration("provider.api_key is not set"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|_| AppError::configuration("failed to build provider HTTP client"))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).header("X-API-Key", &self.api_key).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "wallet data provider returned an error");
            return Err(AppError::upstream(format!("provider responded with {}", response.status())));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl WalletDataProvider for MoralisProvider {
    /// An address counts as active when the provider has seen at least one
    /// transaction for it on any chain.
    async fn is_address_active(&self, address: &str) -> Result<bool, AppError> {
        let chains: ActiveChainsResponse = self.get_json(&format!("/wallets/{address}/chains")).await?;
        Ok(chains.active_chains.iter().any(|c| c.first_transaction.is_some()))
    }

    async fn get_balances(&self, address: &str) -> Result<Vec<TokenBalance>, AppError> {
        let balances: TokenBalancesResponse = self.get_json(&format!("/wallets/{address}/tokens")).await?;
        Ok(balances.result.into_iter().map(TokenBalance::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let result = MoralisProvider::from_config(&ProviderConfig {
            api_key: String::new(),
            ..ProviderConfig::default()
        });
        assert!(matches!(result, Err(AppError::ConfigurationError { .. })));
    }

    #[test]
    fn token_balances_deserialize_from_provider_payload() {
        let payload = serde_json::json!({
            "result": [
                {
                    "symbol": "ETH",
                    "name": "Ether",
                    "balance_formatted": "1.5",
                    "usd_price": 2000.0,
                    "usd_value": 3000.0,
                    "usd_price_24hr_percent_change": -1.25,
                    "token_address": "0x0000000000000000000000000000000000000000"
                },
                {
                    "symbol": "JUNK",
                    "name": "Unpriced Token",
                    "balance_formatted": "9000",
                    "usd_price": null,
                    "usd_value": null,
                    "usd_price_24hr_percent_change": null
                }
            ]
        });

        let parsed: TokenBalancesResponse = serde_json::from_value(payload).expect("deserialize");
        let balances: Vec<TokenBalance> = parsed.result.into_iter().map(TokenBalance::from).collect();

        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].symbol, "ETH");
        assert_eq!(balances[0].usd_value, Some(3000.0));
        assert_eq!(balances[0].pct_change_24h, Some(-1.25));
        assert!(balances[1].usd_price.is_none());
    }

    #[test]
    fn active_chains_require_a_first_transaction() {
        let payload = serde_json::json!({
            "active_chains": [
                { "chain": "eth", "first_transaction": null },
                { "chain": "polygon", "first_transaction": { "block_timestamp": "2023-01-01T00:00:00Z" } }
            ]
        });

        let parsed: ActiveChainsResponse = serde_json::from_value(payload).expect("deserialize");
        assert!(parsed.active_chains.iter().any(|c| c.first_transaction.is_some()));
    }
}
