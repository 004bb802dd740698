use crate::auth::AuthenticatedUser;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::wallet::WalletStore;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::wallet::{AddWalletRequest, WalletPortfolio, WalletPortfolioRequest, WalletResponse};
use crate::service::portfolio::WalletDataProvider;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

pub type Provider = Arc<dyn WalletDataProvider + Send + Sync>;

/// Register a wallet address for the caller. The address is validated
/// locally first; only well-formed addresses ever reach the provider.
#[openapi(tag = "Wallets")]
#[post("/", data = "<payload>")]
pub async fn add_wallet(
    pool: &State<PgPool>,
    provider: &State<Provider>,
    current_user: AuthenticatedUser,
    _rate_limit: RateLimit,
    payload: Json<AddWalletRequest>,
) -> Result<(Status, Json<WalletResponse>), AppError> {
    payload.validate()?;

    if !provider.is_address_active(&payload.address).await? {
        return Err(AppError::BadRequest("Address has no on-chain activity".to_string()));
    }

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let wallet = repo.add_wallet(&current_user.user_id, &payload.address, &payload.name).await?;
    info!(user_id = %current_user.user_id, wallet_id = %wallet.id, "wallet registered");

    Ok((Status::Created, Json(WalletResponse::from(&wallet))))
}

/// All wallets registered by the caller.
#[openapi(tag = "Wallets")]
#[get("/")]
pub async fn list_wallets(
    pool: &State<PgPool>,
    current_user: AuthenticatedUser,
    _rate_limit: RateLimit,
) -> Result<Json<Vec<WalletResponse>>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let wallets = repo.list_wallets_for_user(&current_user.user_id).await?;

    Ok(Json(wallets.iter().map(WalletResponse::from).collect()))
}

/// Priced balances for one of the caller's wallets, with the derived total.
#[openapi(tag = "Wallets")]
#[post("/portfolio", data = "<payload>")]
pub async fn get_portfolio(
    pool: &State<PgPool>,
    provider: &State<Provider>,
    current_user: AuthenticatedUser,
    _rate_limit: RateLimit,
    payload: Json<WalletPortfolioRequest>,
) -> Result<Json<WalletPortfolio>, AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let Some(wallet) = repo.find_wallet_by_address(&current_user.user_id, &payload.address).await? else {
        return Err(AppError::NotFound("Wallet not found".to_string()));
    };

    let balances = provider.get_balances(&wallet.address).await?;

    Ok(Json(WalletPortfolio::from_balances(balances)))
}

/// Remove one of the caller's wallets. Someone else's wallet id is just
/// "not found"; ownership is part of the delete predicate.
#[openapi(tag = "Wallets")]
#[delete("/<id>")]
pub async fn delete_wallet(
    pool: &State<PgPool>,
    current_user: AuthenticatedUser,
    _rate_limit: RateLimit,
    id: &str,
) -> Result<Status, AppError> {
    let wallet_id = Uuid::parse_str(id)?;
    let repo = PostgresRepository { pool: pool.inner().clone() };

    if repo.delete_wallet_for_user(&wallet_id, &current_user.user_id).await? {
        info!(user_id = %current_user.user_id, wallet_id = %wallet_id, "wallet deleted");
        Ok(Status::Ok)
    } else {
        Err(AppError::NotFound("Wallet not found".to_string()))
    }
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![add_wallet, list_wallets, get_portfolio, delete_wallet]
}

#[cfg(test)]
mod tests {
    use crate::build_rocket;
    use crate::test_utils::test_config;
    use rocket::http::Status;
    use rocket::local::asynchronous::Client;

    #[rocket::async_test]
    #[ignore = "requires database"]
    async fn wallet_routes_require_authentication() {
        let client = Client::tracked(build_rocket(test_config())).await.expect("valid rocket instance");

        let response = client.get("/api/wallets").dispatch().await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    #[ignore = "requires database"]
    async fn delete_with_invalid_uuid_is_rejected() {
        let client = Client::tracked(build_rocket(test_config())).await.expect("valid rocket instance");

        let response = client.delete("/api/wallets/not-a-uuid").dispatch().await;

        // The auth gate runs before the path parameter is parsed.
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
