//! Admin console endpoints (role-gated)

use crate::api::{ApiError, ExtractToken};
use crate::api::admin::schemas::{SetPlan, SetRole, UserList};
use crate::api::auth::schemas::UserProfile;
use crate::core::traits::{AccountService, UsageService};
use crate::error::ServiceError;
use crate::infrastructure::entities::{Plan, Role};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/plan", put(set_plan))
        .route("/users/:id/role", put(set_role))
}

async fn list_users(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(usage): Inject<dyn UsageService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<UserList>, ApiError> {
    accounts.require_admin(token).await?;

    let users = accounts.list_users().await?;
    Ok(Json(UserList {
        users: users
            .iter()
            .map(|u| UserProfile::from_user(u, usage.status(u)))
            .collect(),
    }))
}

async fn set_plan(
    Inject(accounts): Inject<dyn AccountService>,
    ExtractToken(token): ExtractToken,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetPlan>,
) -> Result<StatusCode, ApiError> {
    accounts.require_admin(token).await?;

    let plan = Plan::from_name(&request.plan)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown plan {:?}", request.plan)))?;
    accounts.set_plan(user_id, plan).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_role(
    Inject(accounts): Inject<dyn AccountService>,
    ExtractToken(token): ExtractToken,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetRole>,
) -> Result<StatusCode, ApiError> {
    accounts.require_admin(token).await?;

    let role = Role::from_name(&request.role)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown role {:?}", request.role)))?;
    accounts.set_role(user_id, role).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::api::auth::schemas::UserProfile;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    pub struct UserList {
        pub users: Vec<UserProfile>,
    }

    #[derive(Deserialize, Debug)]
    pub struct SetPlan {
        pub plan: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct SetRole {
        pub role: String,
    }
}
