//! Filtered, sorted projections of the company cache.

use std::cmp::Ordering;

use shared::domain::Company;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Tier ascending (unknown tiers last), then rank ascending.
    #[default]
    TierThenRank,
    Name,
    FoundedNewest,
    FoundedOldest,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "tier" | "rank" | "tier-rank" => Some(SortOrder::TierThenRank),
            "name" => Some(SortOrder::Name),
            "founded-newest" | "newest" => Some(SortOrder::FoundedNewest),
            "founded-oldest" | "oldest" => Some(SortOrder::FoundedOldest),
            _ => None,
        }
    }
}

/// Inputs for a derived view. Blank strings disable the matching filter;
/// anything else is matched exactly as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub query: String,
    pub tag: String,
    pub tier: String,
    pub sort: SortOrder,
}

impl ViewFilter {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn accepts(&self, company: &Company) -> bool {
        if !is_blank(&self.tier) && company.tier.as_str() != self.tier {
            return false;
        }
        if !is_blank(&self.tag) && !company.has_tag(&self.tag) {
            return false;
        }
        company.matches_query(&self.query)
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSummary {
    pub total: usize,
    pub shown: usize,
}

impl ViewSummary {
    pub fn label(&self) -> String {
        if self.shown == self.total {
            "Showing all companies".to_string()
        } else {
            format!("Showing {} of {} companies", self.shown, self.total)
        }
    }
}

/// Recomputed from scratch on every call. The sort is stable, so ties keep
/// cache order.
pub fn derive<'a>(companies: &'a [Company], filter: &ViewFilter) -> Vec<&'a Company> {
    let mut shown: Vec<&Company> = companies.iter().filter(|c| filter.accepts(c)).collect();
    match filter.sort {
        SortOrder::TierThenRank => shown.sort_by(|a, b| compare_tier_then_rank(a, b)),
        SortOrder::Name => shown.sort_by_cached_key(|c| c.name.to_lowercase()),
        SortOrder::FoundedNewest => {
            shown.sort_by(|a, b| compare_founded(a, b, |x, y| y.cmp(&x)))
        }
        SortOrder::FoundedOldest => shown.sort_by(|a, b| compare_founded(a, b, |x, y| x.cmp(&y))),
    }
    shown
}

pub fn compare_tier_then_rank(a: &Company, b: &Company) -> Ordering {
    a.tier
        .cmp_rank(&b.tier)
        .then_with(|| a.rank.cmp(&b.rank))
}

fn compare_founded(a: &Company, b: &Company, by_year: impl Fn(u16, u16) -> Ordering) -> Ordering {
    match (a.founded_year_number(), b.founded_year_number()) {
        (Some(x), Some(y)) => by_year(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
