//! Scalar resource vectors.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub const CPU_RESOURCE_NAME: &str = "CPU";
pub const MEMORY_RESOURCE_NAME: &str = "Memory";

/// Tolerance for scalar comparisons.
pub const EPSILON: f64 = 1e-8;

/// Named scalar quantities such as `CPU` (millicores) and `Memory` (MB).
///
/// Ordered by name so that iteration, display and derived keys are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    scalars: BTreeMap<String, f64>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources with only `CPU` and `Memory` set.
    pub fn cpu_memory(cpu: f64, memory: f64) -> Self {
        Self::new()
            .with(CPU_RESOURCE_NAME, cpu)
            .with(MEMORY_RESOURCE_NAME, memory)
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.scalars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    pub fn cpu(&self) -> Option<f64> {
        self.get(CPU_RESOURCE_NAME)
    }

    pub fn memory(&self) -> Option<f64> {
        self.get(MEMORY_RESOURCE_NAME)
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.scalars.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// No dimension has gone negative.
    pub fn is_valid(&self) -> bool {
        self.scalars.values().all(|v| *v > -EPSILON)
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for (name, value) in &rhs.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        for (name, value) in &rhs.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) -= value;
        }
    }
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Resources> for &Resources {
    type Output = Resources;

    fn sub(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            scalars: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
