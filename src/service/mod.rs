pub mod auth;
pub mod hash;
pub mod portfolio;
pub mod tokens;
