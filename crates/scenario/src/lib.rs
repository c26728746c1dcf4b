//! Synthetic arrival loads for exercising the agent.
//!
//! Every generator is driven by a seeded [`StdRng`], so the same seed always
//! yields the same patients.

#![warn(missing_docs)]

use chrono::Duration;
use edflow_core::{ArrivalDescriptor, PatientId, Time, TriageClass, Vitals};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Class mix of ordinary traffic, in percent: minor, standard, urgent, critical.
const STEADY_MIX: [u32; 4] = [30, 40, 20, 10];

/// Class mix of a mass-casualty surge.
const SURGE_MIX: [u32; 4] = [10, 20, 35, 35];

/// Seeded arrival generator.
#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    rng: StdRng,
    start: Time,
    prefix: String,
    next_id: u64,
}

impl ScenarioGenerator {
    /// Create a generator whose scenarios start at `start`.
    pub fn new(seed: u64, start: Time) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start,
            prefix: "P".to_string(),
            next_id: 1,
        }
    }

    /// Prefix for generated patient ids.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Vitals that score in the band of `class`.
    ///
    /// Severity bands: minor 0, standard 1-3, urgent 4-6, critical 7 and up.
    pub fn vitals_for(&mut self, class: TriageClass) -> Vitals {
        let rng = &mut self.rng;
        let normal = Vitals {
            heart_rate: rng.random_range(60..=88) as f64,
            systolic_bp: rng.random_range(115..=140) as f64,
            respiratory_rate: rng.random_range(12..=18) as f64,
            oxygen_saturation: rng.random_range(96..=100) as f64,
            temperature: rng.random_range(362..=378) as f64 / 10.0,
            ..Vitals::default()
        };

        match class {
            TriageClass::Minor => Vitals {
                pain_score: rng.random_range(0..=3) as f64,
                ..normal
            },
            TriageClass::Standard => Vitals {
                heart_rate: rng.random_range(92..=108) as f64,
                temperature: if rng.random_bool(0.5) {
                    rng.random_range(382..=389) as f64 / 10.0
                } else {
                    normal.temperature
                },
                pain_score: rng.random_range(3..=6) as f64,
                ..normal
            },
            TriageClass::Urgent => Vitals {
                heart_rate: rng.random_range(112..=128) as f64,
                temperature: rng.random_range(392..=401) as f64 / 10.0,
                oxygen_saturation: if rng.random_bool(0.5) { 95.0 } else { normal.oxygen_saturation },
                pain_score: rng.random_range(5..=9) as f64,
                ..normal
            },
            TriageClass::Critical => Vitals {
                heart_rate: rng.random_range(135..=170) as f64,
                systolic_bp: rng.random_range(70..=88) as f64,
                respiratory_rate: rng.random_range(25..=36) as f64,
                oxygen_saturation: rng.random_range(80..=90) as f64,
                consciousness: rng.random_range(8..=15) as f64,
                pain_score: rng.random_range(6..=10) as f64,
                ..normal
            },
        }
    }

    /// One patient of a given class arriving at `at`.
    pub fn patient(&mut self, class: TriageClass, at: Time) -> ArrivalDescriptor {
        let id = PatientId::new(format!("{}{:04}", self.prefix, self.next_id));
        self.next_id += 1;
        ArrivalDescriptor {
            id,
            arrival_time: at,
            vitals: self.vitals_for(class),
            requested_specialty: None,
        }
    }

    /// One patient drawn from the ordinary class mix.
    pub fn random_patient(&mut self, at: Time) -> ArrivalDescriptor {
        let class = self.draw_class(&STEADY_MIX);
        self.patient(class, at)
    }

    /// `n` patients, one every `spacing`, from the ordinary mix.
    pub fn steady(&mut self, n: usize, spacing: Duration) -> Vec<ArrivalDescriptor> {
        let arrivals: Vec<_> = (0..n)
            .map(|i| {
                let at = self.start + spacing * i as i32;
                self.random_patient(at)
            })
            .collect();
        debug!("Generated steady scenario: {} arrivals", arrivals.len());
        arrivals
    }

    /// `n` patients arriving together, skewed towards severe cases.
    pub fn surge(&mut self, n: usize) -> Vec<ArrivalDescriptor> {
        let start = self.start;
        let arrivals: Vec<_> = (0..n)
            .map(|_| {
                let class = self.draw_class(&SURGE_MIX);
                self.patient(class, start)
            })
            .collect();
        debug!("Generated surge scenario: {} arrivals", arrivals.len());
        arrivals
    }

    /// `n` standard patients who arrived more than six hours before the start.
    pub fn long_wait(&mut self, n: usize) -> Vec<ArrivalDescriptor> {
        (0..n)
            .map(|_| {
                let waited = Duration::hours(6) + Duration::minutes(self.rng.random_range(15..=180));
                let at = self.start - waited;
                self.patient(TriageClass::Standard, at)
            })
            .collect()
    }

    /// Twice as many arrivals as beds, spread over the first half hour.
    pub fn saturation(&mut self, capacity: usize) -> Vec<ArrivalDescriptor> {
        let n = capacity.max(1) * 2;
        (0..n)
            .map(|_| {
                let at = self.start + Duration::minutes(self.rng.random_range(0..30));
                self.random_patient(at)
            })
            .collect()
    }

    fn draw_class(&mut self, mix: &[u32; 4]) -> TriageClass {
        let total: u32 = mix.iter().sum();
        let mut roll = self.rng.random_range(0..total);
        for (weight, class) in mix.iter().zip(CLASSES) {
            if roll < *weight {
                return class;
            }
            roll -= weight;
        }
        TriageClass::Standard
    }
}

const CLASSES: [TriageClass; 4] = [
    TriageClass::Minor,
    TriageClass::Standard,
    TriageClass::Urgent,
    TriageClass::Critical,
];
