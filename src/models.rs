use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which time series to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    /// National carbon intensity (forecast/actual/index)
    National,
    /// Per-region carbon intensity plus embedded generation mix
    Regional,
    /// National generation mix
    Generation,
}

/// Half-hour settlement period boundaries, always UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimePeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Carbon intensity for one settlement period
///
/// `region` is `None` for national data. `actual` is only published after
/// the period has settled, and the API occasionally omits `forecast` too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntensityRecord {
    pub period: TimePeriod,
    pub region: Option<u32>,
    pub forecast: Option<u32>,
    pub actual: Option<u32>,
    pub index: String,
}

/// Generation mix for one settlement period
///
/// Maps fuel name (biomass, coal, imports, gas, nuclear, other, hydro,
/// solar, wind) to its percentage share. Shares sum to roughly 100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationMixRecord {
    pub period: TimePeriod,
    pub region: Option<u32>,
    pub mix: BTreeMap<String, f64>,
}

/// Uniform result of every query
///
/// Which vectors are populated depends on the series: national intensity
/// fills only `intensity`, generation fills only `generation_mix`, regional
/// fills both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarbonData {
    pub intensity: Vec<IntensityRecord>,
    pub generation_mix: Vec<GenerationMixRecord>,
}

/// Comprehensive error type for API operations
#[derive(Debug, Error)]
pub enum CarbonApiError {
    /// Request could not be sent or no response was received
    #[error("Network error: {0}")]
    Network(String),
    /// Non-2xx HTTP response, with status code and body
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    /// Response body was not valid JSON or was missing expected fields
    #[error("Parse error: {0}")]
    Parse(String),
    /// Caller passed an invalid query (e.g. start after end)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

// Wire format. Timestamps stay as strings here because the API emits
// minute-precision ISO-8601 ("2020-04-01T00:30Z") which chrono's RFC 3339
// deserializer rejects; they are parsed when flattened into records.

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IntensityValue {
    pub(crate) forecast: Option<u32>,
    pub(crate) actual: Option<u32>,
    pub(crate) index: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FuelShare {
    pub(crate) fuel: String,
    pub(crate) perc: f64,
}

/// One period from the national intensity endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NationalEntry {
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) intensity: IntensityValue,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NationalEnvelope {
    pub(crate) data: Vec<NationalEntry>,
}

/// One region inside a period of the all-regions endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionSnapshot {
    pub(crate) regionid: u32,
    pub(crate) intensity: IntensityValue,
    pub(crate) generationmix: Vec<FuelShare>,
}

/// One period from the all-regions endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionalEntry {
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) regions: Vec<RegionSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionalEnvelope {
    pub(crate) data: Vec<RegionalEntry>,
}

/// One period from the single-region endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionPeriodEntry {
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) intensity: IntensityValue,
    pub(crate) generationmix: Vec<FuelShare>,
}

/// Period list for one region, as returned by the regionid endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionSeries {
    pub(crate) regionid: u32,
    pub(crate) data: Vec<RegionPeriodEntry>,
}

/// `/regional/intensity/{from}/{to}/regionid/{id}` wraps a single object
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SingleRegionEnvelope {
    pub(crate) data: RegionSeries,
}

/// `/regional/regionid/{id}` wraps a one-element array
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegionListEnvelope {
    pub(crate) data: Vec<RegionSeries>,
}

/// One period from the generation endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GenerationEntry {
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) generationmix: Vec<FuelShare>,
}

/// `/generation` wraps a single object
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GenerationEnvelope {
    pub(crate) data: GenerationEntry,
}

/// `/generation/{from}/{to}` wraps an array
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GenerationRangeEnvelope {
    pub(crate) data: Vec<GenerationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn national_envelope_deserializes() {
        let json = r#"{
            "data": [
                {"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z",
                 "intensity": {"forecast": 186, "actual": 190, "index": "moderate"}},
                {"from": "2020-04-01T00:30Z", "to": "2020-04-01T01:00Z",
                 "intensity": {"forecast": 182, "actual": null, "index": "moderate"}}
            ]
        }"#;
        let envelope: NationalEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.len(), 2);
        assert_eq!(envelope.data[0].intensity.forecast, Some(186));
        assert_eq!(envelope.data[1].intensity.actual, None);
        assert_eq!(envelope.data[1].intensity.index, "moderate");
    }

    #[test]
    fn regional_envelope_deserializes() {
        let json = r#"{
            "data": [
                {"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z",
                 "regions": [
                    {"regionid": 1, "dnoregion": "Scottish Hydro Electric Power Distribution",
                     "shortname": "North Scotland",
                     "intensity": {"forecast": 21, "index": "very low"},
                     "generationmix": [
                        {"fuel": "wind", "perc": 72.4}, {"fuel": "nuclear", "perc": 27.6}
                     ]}
                 ]}
            ]
        }"#;
        let envelope: RegionalEnvelope = serde_json::from_str(json).unwrap();
        let region = &envelope.data[0].regions[0];
        assert_eq!(region.regionid, 1);
        assert_eq!(region.intensity.actual, None);
        assert_eq!(region.generationmix[0].fuel, "wind");
    }

    #[test]
    fn single_region_envelope_data_is_an_object() {
        let json = r#"{
            "data": {
                "regionid": 13, "dnoregion": "London", "shortname": "London",
                "data": [
                    {"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z",
                     "intensity": {"forecast": 199, "index": "moderate"},
                     "generationmix": [{"fuel": "gas", "perc": 100.0}]}
                ]
            }
        }"#;
        let envelope: SingleRegionEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.regionid, 13);
        assert_eq!(envelope.data.data.len(), 1);
    }

    #[test]
    fn generation_envelopes_deserialize() {
        let current = r#"{
            "data": {"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z",
                     "generationmix": [{"fuel": "gas", "perc": 39.1},
                                       {"fuel": "wind", "perc": 60.9}]}
        }"#;
        let envelope: GenerationEnvelope = serde_json::from_str(current).unwrap();
        assert_eq!(envelope.data.generationmix.len(), 2);

        let range = r#"{
            "data": [{"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z",
                      "generationmix": [{"fuel": "coal", "perc": 1.2}]}]
        }"#;
        let envelope: GenerationRangeEnvelope = serde_json::from_str(range).unwrap();
        assert_eq!(envelope.data[0].generationmix[0].perc, 1.2);
    }

    #[test]
    fn missing_intensity_field_is_an_error() {
        let json = r#"{"data": [{"from": "2020-04-01T00:00Z", "to": "2020-04-01T00:30Z"}]}"#;
        assert!(serde_json::from_str::<NationalEnvelope>(json).is_err());
    }
}
