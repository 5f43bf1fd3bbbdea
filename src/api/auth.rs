//! Account endpoints

use crate::api::{ApiError, ExtractToken};
use crate::api::auth::schemas::{AuthResponse, Credentials, UserProfile};
use crate::core::traits::{AccountService, UsageService};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

async fn register(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(usage): Inject<dyn UsageService>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let (user, session) = accounts
        .register(&credentials.email, &credentials.password)
        .await?;

    let profile = UserProfile::from_user(&user, usage.status(&user));
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse { user: profile, token: session.token }),
    ))
}

async fn login(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(usage): Inject<dyn UsageService>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (user, session) = accounts
        .login(&credentials.email, &credentials.password)
        .await?;

    let profile = UserProfile::from_user(&user, usage.status(&user));
    Ok(Json(AuthResponse { user: profile, token: session.token }))
}

async fn logout(
    Inject(accounts): Inject<dyn AccountService>,
    ExtractToken(token): ExtractToken,
) -> Result<StatusCode, ApiError> {
    accounts.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(usage): Inject<dyn UsageService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<UserProfile>, ApiError> {
    let user = accounts.authenticate(token).await?;
    let status = usage.status(&user);
    Ok(Json(UserProfile::from_user(&user, status)))
}

pub mod schemas {
    use crate::core::usage::UsageStatus;
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct Credentials {
        pub email: String,
        pub password: String,
    }

    #[derive(Serialize, Debug)]
    pub struct UserProfile {
        pub id: Uuid,
        pub email: String,
        pub role: &'static str,
        pub plan: &'static str,
        pub messages_used: i64,
        pub tokens_used: i64,
        pub message_quota: i64,
        pub percent_used: u8,
        /// Highest usage threshold reached this cycle (80/95/100), if any.
        pub usage_alert: Option<u8>,
        pub subscription_status: Option<String>,
        pub cycle_started_at: DateTime<Utc>,
        pub created_at: DateTime<Utc>,
    }

    impl UserProfile {
        pub fn from_user(user: &entities::User, status: UsageStatus) -> Self {
            UserProfile {
                id: user.id,
                email: user.email.clone(),
                role: user.role.name(),
                plan: user.plan.name(),
                messages_used: user.messages_used,
                tokens_used: user.tokens_used,
                message_quota: status.message_quota,
                percent_used: status.percent_used,
                usage_alert: status.alert,
                subscription_status: user.subscription_status.clone(),
                cycle_started_at: user.cycle_started_at,
                created_at: user.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct AuthResponse {
        pub user: UserProfile,
        pub token: Uuid,
    }
}
