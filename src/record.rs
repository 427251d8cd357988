// 🏫 School Profile - typed view over one unified record
//
// The unified table stays string-keyed so any source can add columns.
// Code that reasons about schools reads this instead, through the field map.

use crate::config::FieldMap;
use crate::merge::{UnifiedRecord, UnifiedTable};
use crate::normalize::SchoolKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// SAT
// ============================================================================

/// One SAT section average. Always a whole number in 200..=800.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SatScore(u16);

impl SatScore {
    pub const MIN: u16 = 200;
    pub const MAX: u16 = 800;

    pub fn new(value: f64) -> Option<Self> {
        if value.fract() != 0.0 || value < Self::MIN as f64 || value > Self::MAX as f64 {
            return None;
        }
        Some(SatScore(value as u16))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

/// All three sections, each in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatScores {
    pub reading: SatScore,
    pub math: SatScore,
    pub writing: SatScore,
}

impl SatScores {
    pub fn total(&self) -> u16 {
        self.reading.get() + self.math.get() + self.writing.get()
    }
}

// ============================================================================
// LOCATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// The five boroughs, as framed by the safety map.
pub const NYC_BOUNDS: BoundingBox = BoundingBox {
    min_lat: 40.496044,
    max_lat: 40.915256,
    min_lon: -74.255735,
    max_lon: -73.700272,
};

impl BoundingBox {
    pub fn contains(&self, point: Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}

// ============================================================================
// PROFILE
// ============================================================================

/// Raw readings are kept as found; range checks live in the quality engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolProfile {
    pub key: SchoolKey,
    pub name: Option<String>,
    pub borough: Option<String>,
    pub district: Option<String>,
    pub sat_reading: Option<f64>,
    pub sat_math: Option<f64>,
    pub sat_writing: Option<f64>,
    pub sat_total: Option<f64>,
    pub demographics: BTreeMap<String, Option<f64>>,
    pub safety: BTreeMap<String, Option<f64>>,
    pub graduation_rate: Option<f64>,
    pub coordinates: Option<Coordinates>,
}

impl SchoolProfile {
    pub fn from_record(table: &UnifiedTable, record: &UnifiedRecord, fields: &FieldMap) -> Self {
        let text = |column: &str| {
            table
                .value(record, column)
                .and_then(|v| v.render())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let number = |column: &str| table.number(record, column);
        let numbers = |columns: &BTreeMap<String, String>| {
            columns
                .iter()
                .map(|(label, column)| (label.clone(), number(column)))
                .collect::<BTreeMap<_, _>>()
        };

        let coordinates = match (number(&fields.latitude), number(&fields.longitude)) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };

        SchoolProfile {
            key: record.key.clone(),
            name: text(&fields.name),
            borough: text(&fields.borough),
            district: text(&fields.district),
            sat_reading: number(&fields.sat_reading),
            sat_math: number(&fields.sat_math),
            sat_writing: number(&fields.sat_writing),
            sat_total: number(&fields.sat_total),
            demographics: numbers(&fields.demographics),
            safety: numbers(&fields.safety),
            graduation_rate: number(&fields.graduation_rate),
            coordinates,
        }
    }

    /// Typed SAT sections, when all three are present and valid.
    pub fn sat_scores(&self) -> Option<SatScores> {
        Some(SatScores {
            reading: SatScore::new(self.sat_reading?)?,
            math: SatScore::new(self.sat_math?)?,
            writing: SatScore::new(self.sat_writing?)?,
        })
    }

    pub fn has_sat_data(&self) -> bool {
        self.sat_reading.is_some()
            || self.sat_math.is_some()
            || self.sat_writing.is_some()
            || self.sat_total.is_some()
    }
}

/// Profiles for every record in the table, in key order.
pub fn profiles(table: &UnifiedTable, fields: &FieldMap) -> Vec<SchoolProfile> {
    table
        .records()
        .iter()
        .map(|record| SchoolProfile::from_record(table, record, fields))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
