//! Authenticated caller model

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Installer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Installer => "installer",
            Role::Admin => "admin",
        }
    }
}

/// Who triggered a transition, recorded in the fulfillment history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    /// User ID for customers and admins, installer ID for installers
    pub id: i32,
}

impl Actor {
    pub fn customer(user_id: i32) -> Self {
        Self { role: Role::Customer, id: user_id }
    }

    pub fn installer(installer_id: i32) -> Self {
        Self { role: Role::Installer, id: installer_id }
    }

    pub fn admin(user_id: i32) -> Self {
        Self { role: Role::Admin, id: user_id }
    }
}

/// JWT Claims for authenticated users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub user_id: i32,
    pub role: Role,
    /// Installer record, present for installer accounts
    pub installer_id: Option<i32>,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Actor attribution for this caller
    pub fn actor(&self) -> Result<Actor, AppError> {
        match self.role {
            Role::Customer => Ok(Actor::customer(self.user_id)),
            Role::Admin => Ok(Actor::admin(self.user_id)),
            Role::Installer => self
                .installer_id
                .map(Actor::installer)
                .ok_or_else(|| AppError::Authorization("Installer profile not found".to_string())),
        }
    }

    // Authorization checks
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Authorization("Administrator rights required".to_string()))
        }
    }

    pub fn require_installer(&self) -> Result<Actor, AppError> {
        match self.role {
            Role::Installer => self.actor(),
            _ => Err(AppError::Authorization("Installer account required".to_string())),
        }
    }
}
