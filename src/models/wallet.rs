use chrono::{DateTime, Utc};
use regex::Regex;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::Validate;

/// EVM address: `0x` followed by exactly 40 hex digits, either case.
pub static WALLET_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("invalid wallet address regex"));

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct AddWalletRequest {
    #[validate(regex(path = "WALLET_ADDRESS_RE", message = "Address must be 0x followed by 40 hex digits"))]
    pub address: String,
    #[validate(length(min = 1, max = 64, message = "Wallet name must be between 1 and 64 characters"))]
    pub name: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct WalletPortfolioRequest {
    #[validate(regex(path = "WALLET_ADDRESS_RE", message = "Address must be 0x followed by 40 hex digits"))]
    pub address: String,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct WalletResponse {
    pub id: Uuid,
    pub address: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: wallet.id,
            address: wallet.address.clone(),
            name: wallet.name.clone(),
            created_at: wallet.created_at,
        }
    }
}

/// One ERC-20 position as reported by the data provider.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct TokenBalance {
    pub symbol: String,
    pub name: String,
    pub balance_formatted: String,
    pub usd_price: Option<f64>,
    pub usd_value: Option<f64>,
    pub pct_change_24h: Option<f64>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct WalletPortfolio {
    pub tokens: Vec<TokenBalance>,
    pub total_usd_value: f64,
}

impl WalletPortfolio {
    /// Total value is a pure derived sum over the provider's balances;
    /// positions without a USD quote contribute nothing.
    pub fn from_balances(tokens: Vec<TokenBalance>) -> Self {
        let total_usd_value = tokens.iter().filter_map(|t| t.usd_value).sum();
        Self { tokens, total_usd_value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn add_request(address: &str) -> AddWalletRequest {
        AddWalletRequest {
            address: address.to_string(),
            name: "main".to_string(),
        }
    }

    #[test]
    fn accepts_mixed_case_40_hex_address() {
        assert!(add_request("0xAbCdEf0123456789abcdef0123456789ABCDEF01").validate().is_ok());
    }

    #[test]
    fn rejects_short_address() {
        assert!(add_request("0xabc").validate().is_err());
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(add_request("AbCdEf0123456789abcdef0123456789ABCDEF01").validate().is_err());
    }

    #[test]
    fn rejects_41_hex_digits() {
        assert!(add_request("0xAbCdEf0123456789abcdef0123456789ABCDEF012").validate().is_err());
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert!(add_request("0xZZCdEf0123456789abcdef0123456789ABCDEF01").validate().is_err());
    }

    #[test]
    fn portfolio_sums_usd_values() {
        let portfolio = WalletPortfolio::from_balances(vec![
            TokenBalance {
                symbol: "ETH".to_string(),
                name: "Ether".to_string(),
                balance_formatted: "1.5".to_string(),
                usd_price: Some(2000.0),
                usd_value: Some(3000.0),
                pct_change_24h: Some(-1.2),
            },
            TokenBalance {
                symbol: "USDC".to_string(),
                name: "USD Coin".to_string(),
                balance_formatted: "250".to_string(),
                usd_price: Some(1.0),
                usd_value: Some(250.0),
                pct_change_24h: None,
            },
            TokenBalance {
                symbol: "JUNK".to_string(),
                name: "Unpriced".to_string(),
                balance_formatted: "9000".to_string(),
                usd_price: None,
                usd_value: None,
                pct_change_24h: None,
            },
        ]);

        assert_eq!(portfolio.total_usd_value, 3250.0);
        assert_eq!(portfolio.tokens.len(), 3);
    }

    #[test]
    fn empty_portfolio_totals_zero() {
        let portfolio = WalletPortfolio::from_balances(Vec::new());
        assert_eq!(portfolio.total_usd_value, 0.0);
    }

    proptest! {
        #[test]
        fn any_40_hex_digit_address_is_accepted(addr in "0x[0-9a-fA-F]{40}") {
            prop_assert!(WALLET_ADDRESS_RE.is_match(&addr));
        }

        #[test]
        fn wrong_length_addresses_are_rejected(len in 0usize..60, seed in "[0-9a-f]{60}") {
            prop_assume!(len != 40);
            let addr = format!("0x{}", &seed[..len]);
            prop_assert!(!WALLET_ADDRESS_RE.is_match(&addr));
        }
    }
}
