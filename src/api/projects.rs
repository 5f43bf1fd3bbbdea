//! Project endpoints

use crate::api::{ApiError, ExtractToken};
use crate::api::projects::schemas::{CreateProject, ProjectList};
use crate::core::traits::{AccountService, ConversationService};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new().route("/", get(list_projects).post(new_project))
}

async fn list_projects(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<ProjectList>, ApiError> {
    let user = accounts.authenticate(token).await?;
    let projects = conversation_service.list_projects(user.id).await?;

    Ok(Json(ProjectList {
        projects: projects.into_iter().map(schemas::Project::from).collect(),
    }))
}

async fn new_project(
    Inject(accounts): Inject<dyn AccountService>,
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractToken(token): ExtractToken,
    Json(create_project): Json<CreateProject>,
) -> Result<(StatusCode, Json<schemas::Project>), ApiError> {
    let user = accounts.authenticate(token).await?;
    let project = conversation_service
        .create_project(user.id, create_project.name)
        .await?;

    Ok((StatusCode::CREATED, Json(project.into())))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct CreateProject {
        pub name: String,
    }

    #[derive(Serialize, Debug)]
    pub struct Project {
        pub id: Uuid,
        pub name: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Project> for Project {
        fn from(project: entities::Project) -> Self {
            Project {
                id: project.id,
                name: project.name,
                created_at: project.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ProjectList {
        pub projects: Vec<Project>,
    }
}
