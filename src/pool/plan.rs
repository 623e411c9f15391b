//! Turns the raw input URL list into the list the workers will process.

use std::collections::HashSet;

use super::store::DedupCache;
use crate::protocol::ItemId;

pub const DEFAULT_HEADROOM: usize = 10_000;

/// Planned work plus what planning dropped along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestPlan {
    pub urls: Vec<String>,
    pub cached: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub truncated: usize,
}

/// Drops ids already in `cache`, collapses repeated ids onto their first URL
/// and caps the list at `target + headroom`. Malformed URLs stay in the plan
/// so they are reported as invalid without any network call.
pub fn plan(input: Vec<String>, cache: &DedupCache, target: usize, headroom: usize) -> HarvestPlan {
    let mut plan = HarvestPlan::default();
    let mut seen = HashSet::new();

    for url in input {
        match ItemId::from_url(&url) {
            Some(id) if cache.contains(id.as_str()) => plan.cached += 1,
            Some(id) if !seen.insert(id.clone()) => plan.duplicates += 1,
            Some(_) => plan.urls.push(url),
            None => {
                plan.malformed += 1;
                plan.urls.push(url);
            }
        }
    }

    let limit = target.saturating_add(headroom);
    if plan.urls.len() > limit {
        plan.truncated = plan.urls.len() - limit;
        plan.urls.truncate(limit);
    }

    log::info!(
        "planned {} url(s): {} cached, {} duplicate, {} malformed, {} over the cap",
        plan.urls.len(),
        plan.cached,
        plan.duplicates,
        plan.malformed,
        plan.truncated
    );
    plan
}
