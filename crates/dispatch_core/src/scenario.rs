//! Randomized city seeding: units, incidents and the dispatch users.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::DispatchError;
use crate::model::{
    Incident, NewIncident, NewUnit, ServiceType, Severity, Unit, User, UserRole,
};
use crate::spatial::BoundingBox;
use crate::store::DispatchStore;

const MAX_CAPACITY: u32 = 5;
const MAX_NEEDS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub num_units: usize,
    pub num_incidents: usize,
    pub bounds: BoundingBox,
    pub seed: Option<u64>,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            num_units: 30,
            num_incidents: 20,
            bounds: BoundingBox::default(),
            seed: None,
        }
    }
}

impl ScenarioParams {
    pub fn with_units(mut self, count: usize) -> Self {
        self.num_units = count;
        self
    }

    pub fn with_incidents(mut self, count: usize) -> Self {
        self.num_incidents = count;
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeededScenario {
    pub dispatcher: User,
    pub admin: User,
    pub units: Vec<Unit>,
    pub incidents: Vec<Incident>,
}

fn random_service<R: Rng + ?Sized>(rng: &mut R) -> ServiceType {
    ServiceType::ALL[rng.gen_range(0..ServiceType::ALL.len())]
}

/// Available units of random type and capacity 1 to 5.
pub fn generate_units<R: Rng + ?Sized>(
    store: &dyn DispatchStore,
    count: usize,
    bounds: &BoundingBox,
    rng: &mut R,
) -> Result<Vec<Unit>, DispatchError> {
    (0..count)
        .map(|_| {
            let unit = NewUnit {
                service: random_service(rng),
                position: bounds.sample(rng),
                capacity: rng.gen_range(1..=MAX_CAPACITY),
            };
            Ok(store.insert_unit(unit)?)
        })
        .collect()
}

/// Pending incidents of random type and severity, needing 1 to 5 units,
/// reported at `now_ms`.
pub fn generate_incidents<R: Rng + ?Sized>(
    store: &dyn DispatchStore,
    count: usize,
    bounds: &BoundingBox,
    now_ms: u64,
    rng: &mut R,
) -> Result<Vec<Incident>, DispatchError> {
    (0..count)
        .map(|_| {
            let incident = NewIncident {
                service: random_service(rng),
                position: bounds.sample(rng),
                severity: Some(Severity::ALL[rng.gen_range(0..Severity::ALL.len())]),
                reported_at: now_ms,
                needs: rng.gen_range(1..=MAX_NEEDS),
            };
            Ok(store.insert_incident(incident)?)
        })
        .collect()
}

/// Insert the dispatcher and admin users, then the generated units and
/// incidents. On an empty store the dispatcher gets user id 1.
pub fn seed_scenario(
    store: &dyn DispatchStore,
    params: &ScenarioParams,
    now_ms: u64,
) -> Result<SeededScenario, DispatchError> {
    let mut rng = params.rng();
    let dispatcher = store.insert_user("dispatcher", UserRole::Dispatcher)?;
    let admin = store.insert_user("admin", UserRole::Admin)?;
    let units = generate_units(store, params.num_units, &params.bounds, &mut rng)?;
    let incidents = generate_incidents(store, params.num_incidents, &params.bounds, now_ms, &mut rng)?;
    Ok(SeededScenario {
        dispatcher,
        admin,
        units,
        incidents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IncidentStatus, UserId};
    use crate::store::InMemoryStore;

    #[test]
    fn seeded_entities_stay_inside_bounds() {
        let store = InMemoryStore::new();
        let params = ScenarioParams::default()
            .with_units(40)
            .with_incidents(25)
            .with_seed(7);
        let seeded = seed_scenario(&store, &params, 1_000).expect("seed");

        assert_eq!(seeded.dispatcher.id, UserId(1));
        assert_eq!(seeded.units.len(), 40);
        assert_eq!(seeded.incidents.len(), 25);
        for unit in &seeded.units {
            assert!(params.bounds.contains(unit.position));
            assert!(unit.is_available());
            assert!((1..=MAX_CAPACITY).contains(&unit.capacity));
        }
        for incident in &seeded.incidents {
            assert!(params.bounds.contains(incident.position));
            assert_eq!(incident.status, IncidentStatus::Pending);
            assert_eq!(incident.reported_at, 1_000);
        }
    }

    #[test]
    fn same_seed_same_city() {
        let params = ScenarioParams::default().with_seed(99);
        let a = seed_scenario(&InMemoryStore::new(), &params, 0).expect("seed");
        let b = seed_scenario(&InMemoryStore::new(), &params, 0).expect("seed");
        assert_eq!(a.units, b.units);
        assert_eq!(a.incidents, b.incidents);
    }
}
