use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Advertisement;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAdRequest {
    pub title: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAdRequest {
    pub title: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AdList {
    pub items: Vec<Advertisement>,
}
