use serde::{Deserialize, Serialize};

use crate::domain::{CompanyId, Tier};

/// Sent with every request as `X-Directory-Api`. Bumped whenever a route or
/// body shape below changes.
pub const PROTOCOL_VERSION: &str = "1";
pub const PROTOCOL_VERSION_HEADER: &str = "x-directory-api";

pub fn companies_route() -> &'static str {
    "/api/companies"
}

pub fn upvote_route(id: CompanyId) -> String {
    format!("/upvote/{id}")
}

pub fn downvote_route(id: CompanyId) -> String {
    format!("/downvote/{id}")
}

pub fn update_rank_route(id: CompanyId) -> String {
    format!("/update_rank/{id}")
}

pub fn update_tier_route(id: CompanyId) -> String {
    format!("/update_tier/{id}")
}

pub fn add_tag_route(id: CompanyId) -> String {
    format!("/add_tag/{id}")
}

pub fn remove_tag_route(id: CompanyId, index: usize) -> String {
    format!("/remove_tag/{id}/{index}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankForm {
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierForm {
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagForm {
    pub tag: String,
}

/// Body of upvote/downvote/update_rank responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankResponse {
    pub rank: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierResponse {
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMutationResponse {
    pub success: bool,
}
