//! Geography context aggregates.
//!
//! A context's MM7/MM30 is the mean of its members' MM7/MM30. Only entities
//! with rolling stats are members, and an entity belongs to its own
//! contexts.

use crate::models::{ContextAggregate, Entity, EntityContexts, RollingStats};
use crate::risk::ContextMeans;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    mm7_sum: f64,
    mm30_sum: f64,
    members: usize,
}

impl Accumulator {
    fn add(&mut self, stats: &RollingStats) {
        self.mm7_sum += stats.mm7;
        self.mm30_sum += stats.mm30;
        self.members += 1;
    }

    fn aggregate(&self) -> Option<ContextAggregate> {
        if self.members == 0 {
            return None;
        }
        let n = self.members as f64;
        Some(ContextAggregate {
            mm7: self.mm7_sum / n,
            mm30: self.mm30_sum / n,
            members: self.members,
        })
    }
}

type StateKey = (String, String);
type CityKey = (String, String, String);

/// Context aggregates for country, state and city.
///
/// Keys are case-insensitive. A context whose own key is empty is absent.
#[derive(Debug, Clone, Default)]
pub struct ContextIndex {
    countries: HashMap<String, Accumulator>,
    states: HashMap<StateKey, Accumulator>,
    cities: HashMap<CityKey, Accumulator>,
}

fn norm(key: &str) -> String {
    key.trim().to_lowercase()
}

fn country_key(entity: &Entity) -> Option<String> {
    let country = norm(&entity.country);
    (!country.is_empty()).then_some(country)
}

fn state_key(entity: &Entity) -> Option<StateKey> {
    let state = norm(&entity.state);
    (!state.is_empty()).then(|| (norm(&entity.country), state))
}

fn city_key(entity: &Entity) -> Option<CityKey> {
    let city = norm(&entity.city);
    (!city.is_empty()).then(|| (norm(&entity.country), norm(&entity.state), city))
}

impl ContextIndex {
    /// Build the index from every entity that has rolling stats.
    pub fn build<'a, I>(members: I) -> Self
    where
        I: IntoIterator<Item = (&'a Entity, &'a RollingStats)>,
    {
        let mut index = Self::default();

        for (entity, stats) in members {
            if let Some(key) = country_key(entity) {
                index.countries.entry(key).or_default().add(stats);
            }
            if let Some(key) = state_key(entity) {
                index.states.entry(key).or_default().add(stats);
            }
            if let Some(key) = city_key(entity) {
                index.cities.entry(key).or_default().add(stats);
            }
        }

        index
    }

    pub fn country(&self, entity: &Entity) -> Option<ContextAggregate> {
        country_key(entity)
            .and_then(|key| self.countries.get(&key))
            .and_then(Accumulator::aggregate)
    }

    pub fn state(&self, entity: &Entity) -> Option<ContextAggregate> {
        state_key(entity)
            .and_then(|key| self.states.get(&key))
            .and_then(Accumulator::aggregate)
    }

    pub fn city(&self, entity: &Entity) -> Option<ContextAggregate> {
        city_key(entity)
            .and_then(|key| self.cities.get(&key))
            .and_then(Accumulator::aggregate)
    }

    /// Every context the entity belongs to.
    pub fn contexts_for(&self, entity: &Entity) -> EntityContexts {
        EntityContexts {
            country: self.country(entity),
            state: self.state(entity),
            city: self.city(entity),
        }
    }
}

/// MM7 of each context, as the risk classifier consumes them.
impl From<&EntityContexts> for ContextMeans {
    fn from(contexts: &EntityContexts) -> Self {
        ContextMeans {
            country: contexts.country.map(|c| c.mm7),
            state: contexts.state.map(|c| c.mm7),
            city: contexts.city.map(|c| c.mm7),
        }
    }
}
