use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::wallet::Wallet;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait WalletStore {
    async fn add_wallet(&self, user_id: &Uuid, address: &str, name: &str) -> Result<Wallet, AppError>;
    async fn list_wallets_for_user(&self, user_id: &Uuid) -> Result<Vec<Wallet>, AppError>;
    async fn find_wallet_by_address(&self, user_id: &Uuid, address: &str) -> Result<Option<Wallet>, AppError>;
    /// Returns false when no wallet with this id belongs to the user;
    /// ownership is part of the predicate, not a separate check.
    async fn delete_wallet_for_user(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError>;
}

#[async_trait::async_trait]
impl WalletStore for PostgresRepository {
    async fn add_wallet(&self, user_id: &Uuid, address: &str, name: &str) -> Result<Wallet, AppError> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallet (user_id, address, name)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, address, name, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(address)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn list_wallets_for_user(&self, user_id: &Uuid) -> Result<Vec<Wallet>, AppError> {
        let wallets = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, user_id, address, name, created_at, updated_at
            FROM wallet
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(wallets)
    }

    async fn find_wallet_by_address(&self, user_id: &Uuid, address: &str) -> Result<Option<Wallet>, AppError> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, user_id, address, name, created_at, updated_at
            FROM wallet
            WHERE user_id = $1
              AND lower(address) = lower($2)
            "#,
        )
        .bind(user_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn delete_wallet_for_user(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM wallet WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
