use std::collections::BTreeMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_query_window};
use super::status;
use super::{Engine, EngineError};

/// Static metadata predicate. Cheap checks only; the overlap test runs
/// separately so pagination can count the full filtered set.
fn matches_filter(space: &SpaceState, filter: &SearchFilter) -> bool {
    if let Some(kind) = filter.kind
        && space.kind != kind
    {
        return false;
    }
    if let Some(min) = filter.min_capacity
        && space.capacity < min
    {
        return false;
    }
    if let Some(ref building) = filter.building
        && !space.location.building.eq_ignore_ascii_case(building)
    {
        return false;
    }
    space.has_facilities(&filter.facilities)
}

/// Case-insensitive substring match over the descriptive fields.
/// `needle` must already be lowercased.
fn matches_keyword(space: &SpaceState, needle: &str) -> bool {
    if space.name.to_lowercase().contains(needle)
        || space.location.building.to_lowercase().contains(needle)
        || space.location.room_number.to_lowercase().contains(needle)
    {
        return true;
    }
    space
        .description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(needle))
}

impl Engine {
    /// Which spaces could host `window`? Metadata filters run first, then
    /// the overlap check per surviving candidate. A space under
    /// maintenance is never offered. A space whose window conflicts is
    /// still offered while it reads empty right now — the live status
    /// outranks the index.
    ///
    /// `page` counts from 1 and `page_size` is clamped to the configured
    /// cap; `total` is the full filtered count so callers can compute page
    /// counts without refetching.
    pub async fn find_available(
        &self,
        filter: &SearchFilter,
        start: Ms,
        end: Ms,
        page: usize,
        page_size: usize,
    ) -> Result<Page<SpaceInfo>, EngineError> {
        let window = validate_query_window(start, end)?;
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let now = self.now_ms();

        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut matched: Vec<SpaceInfo> = Vec::new();
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            if !matches_filter(&guard, filter) {
                continue;
            }
            let live = status::project(&guard, now);
            if live == SpaceStatus::Maintenance {
                continue;
            }
            if find_conflict(&guard, &window, None).is_some() && live != SpaceStatus::Empty {
                continue;
            }
            matched.push(guard.info(live));
        }

        let total = matched.len();
        let items = matched
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Substring search over name, building, room number and description.
    pub async fn quick_search(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<SpaceInfo>, EngineError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(EngineError::Validation("keyword must not be empty"));
        }
        if keyword.len() > MAX_KEYWORD_LEN {
            return Err(EngineError::LimitExceeded("keyword too long"));
        }
        let needle = keyword.to_lowercase();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let now = self.now_ms();

        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut found = Vec::new();
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            if matches_keyword(&guard, &needle) {
                found.push(guard.info(status::project(&guard, now)));
                if found.len() == limit {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Live occupancy counters across the whole directory.
    pub async fn stats(&self) -> Stats {
        let now = self.now_ms();
        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut stats = Stats {
            total: 0,
            empty: 0,
            reserved: 0,
            in_use: 0,
            maintenance: 0,
            by_type: Vec::new(),
            by_building: Vec::new(),
            utilization: 0.0,
        };
        let mut by_type: BTreeMap<&'static str, (SpaceType, u32)> = BTreeMap::new();
        let mut by_building: BTreeMap<String, u32> = BTreeMap::new();

        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            stats.total += 1;
            match status::project(&guard, now) {
                SpaceStatus::Empty => stats.empty += 1,
                SpaceStatus::Reserved => stats.reserved += 1,
                SpaceStatus::InUse => stats.in_use += 1,
                SpaceStatus::Maintenance => stats.maintenance += 1,
            }
            by_type
                .entry(guard.kind.label())
                .or_insert((guard.kind, 0))
                .1 += 1;
            *by_building
                .entry(guard.location.building.clone())
                .or_default() += 1;
        }

        stats.by_type = by_type.into_values().collect();
        stats.by_building = by_building.into_iter().collect();
        if stats.total > 0 {
            stats.utilization = f64::from(stats.in_use) / f64::from(stats.total) * 100.0;
        }
        stats
    }
}
