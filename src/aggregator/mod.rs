//! Per-event classification of portal results
//!
//! `GameAggregator::classify` is a pure function of the event, the portal
//! results and the configured price range. Results are looked up by portal id
//! and walked in the event's configured priority order, so the order in which
//! scrapes finished never changes the outcome.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::models::{
    EventOutcome, EventSpec, FailureReason, OutcomeState, PortalId, PortalResult, PriceRange,
    PriceSample,
};

pub struct GameAggregator {
    range: PriceRange,
}

impl GameAggregator {
    pub fn new(range: PriceRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> PriceRange {
        self.range
    }

    pub fn classify(
        &self,
        event: &EventSpec,
        results: &HashMap<PortalId, PortalResult>,
    ) -> EventOutcome {
        let mut all_results = BTreeMap::new();
        let mut qualifying_prices = BTreeMap::new();
        // (portal, best in-range amount) in priority order
        let mut in_range: Vec<(PortalId, Decimal)> = Vec::new();
        let mut failed: Vec<PortalId> = Vec::new();

        for target in &event.portals {
            let result = results.get(&target.portal).cloned().unwrap_or_else(|| {
                PortalResult::Failed(FailureReason::Internal("no result returned".into()))
            });

            if result.is_failed() {
                failed.push(target.portal.clone());
            }

            let qualifying: Vec<PriceSample> = result
                .samples()
                .iter()
                .filter(|s| self.range.contains(s.amount))
                .cloned()
                .collect();

            if let Some(best) = qualifying.iter().map(|s| s.amount).min() {
                in_range.push((target.portal.clone(), best));
                qualifying_prices.insert(target.portal.clone(), qualifying);
            }

            all_results.insert(target.portal.clone(), result);
        }

        let configured = event.portals.len();
        let (state, cheapest_portal) = if !event.portals.is_empty() && failed.len() == configured
        {
            (OutcomeState::Failed(failed), None)
        } else if configured >= 2 && in_range.len() == configured {
            (OutcomeState::BothInRange, cheapest(&in_range))
        } else if let [(portal, _)] = in_range.as_slice() {
            (OutcomeState::OneInRange(portal.clone()), Some(portal.clone()))
        } else {
            (OutcomeState::NoneInRange, None)
        };

        EventOutcome {
            event: event.clone(),
            state,
            results: all_results,
            qualifying_prices,
            cheapest_portal,
        }
    }
}

/// Strictly lowest best price; the earlier (higher priority) portal keeps a tie.
fn cheapest(in_range: &[(PortalId, Decimal)]) -> Option<PortalId> {
    in_range
        .iter()
        .fold(None::<&(PortalId, Decimal)>, |best, candidate| match best {
            Some(current) if current.1 <= candidate.1 => Some(current),
            _ => Some(candidate),
        })
        .map(|(portal, _)| portal.clone())
}
