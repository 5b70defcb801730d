use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Timelike, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{
    CarbonApiError, CarbonData, FuelShare, GenerationEntry, GenerationEnvelope,
    GenerationMixRecord, GenerationRangeEnvelope, IntensityRecord, NationalEntry,
    NationalEnvelope, RegionListEnvelope, RegionSeries, RegionalEntry, RegionalEnvelope, Series,
    SingleRegionEnvelope, TimePeriod,
};

/// Client for the National Grid ESO Carbon Intensity API
pub struct CarbonIntensityClient {
    http_client: HttpClient,
    base_url: String,
    max_range: TimeDelta,
}

impl CarbonIntensityClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.carbonintensity.org.uk";

    /// Longest range the API serves in a single request
    const MAX_RANGE_DAYS: i64 = 14;

    /// Create a new Carbon Intensity API client
    pub fn new() -> Result<Self, CarbonApiError> {
        Self::with_base_url(Self::DEFAULT_BASE_URL.to_string())
    }

    /// Create a new client with custom base URL (for testing)
    pub fn with_base_url(base_url: String) -> Result<Self, CarbonApiError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CarbonApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            max_range: TimeDelta::days(Self::MAX_RANGE_DAYS),
        })
    }

    /// Get the latest available record(s) for a series.
    ///
    /// # Arguments
    /// * `series` - Which series to fetch
    /// * `region` - Restrict `Series::Regional` to one region id (1-17)
    ///
    /// # Returns
    /// * `Ok(CarbonData)` - Latest settlement-period record(s)
    /// * `Err(CarbonApiError)` - Network, API status, parse or query error
    pub async fn current(
        &self,
        series: Series,
        region: Option<u32>,
    ) -> Result<CarbonData, CarbonApiError> {
        check_region_filter(series, region)?;

        match (series, region) {
            (Series::National, _) => {
                let url = format!("{}/intensity", self.base_url);
                let envelope: NationalEnvelope = self.get_json(&url).await?;
                collect_national(envelope.data)
            }
            (Series::Regional, None) => {
                let url = format!("{}/regional", self.base_url);
                let envelope: RegionalEnvelope = self.get_json(&url).await?;
                collect_regional(envelope.data)
            }
            (Series::Regional, Some(id)) => {
                let url = format!("{}/regional/regionid/{}", self.base_url, id);
                let envelope: RegionListEnvelope = self.get_json(&url).await?;
                collect_region_series(envelope.data)
            }
            (Series::Generation, _) => {
                let url = format!("{}/generation", self.base_url);
                let envelope: GenerationEnvelope = self.get_json(&url).await?;
                collect_generation(vec![envelope.data])
            }
        }
    }

    /// Get all records for a series between two instants.
    ///
    /// Both bounds are rounded up to the end of the half hour they fall in
    /// (the API labels settlement periods by their end time). Ranges longer
    /// than 14 days are split into consecutive sub-ranges, fetched in order
    /// and concatenated; a boundary period served twice is kept once.
    ///
    /// # Arguments
    /// * `start` - Start of the range, inclusive
    /// * `end` - End of the range, inclusive; must not precede `start`
    /// * `series` - Which series to fetch
    /// * `region` - Restrict `Series::Regional` to one region id (1-17)
    ///
    /// # Returns
    /// * `Ok(CarbonData)` - Records ordered by period start, no duplicates
    /// * `Err(CarbonApiError)` - Network, API status, parse or query error
    pub async fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        series: Series,
        region: Option<u32>,
    ) -> Result<CarbonData, CarbonApiError> {
        check_region_filter(series, region)?;
        if start > end {
            return Err(CarbonApiError::InvalidQuery(format!(
                "Start ({}) must not be after end ({})",
                start, end
            )));
        }

        let start = ceil_half_hour(start);
        let end = ceil_half_hour(end);

        let mut result = CarbonData::default();
        for (sub_start, sub_end) in sub_ranges(start, end, self.max_range) {
            let mut chunk = self.fetch_range(series, region, sub_start, sub_end).await?;
            result.intensity.append(&mut chunk.intensity);
            result.generation_mix.append(&mut chunk.generation_mix);
        }
        normalize(&mut result);

        Ok(result)
    }

    /// Fetch and flatten one sub-range of a date-range query
    async fn fetch_range(
        &self,
        series: Series,
        region: Option<u32>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CarbonData, CarbonApiError> {
        let url = format!("{}{}", self.base_url, range_path(series, region, from, to));

        match (series, region) {
            (Series::National, _) => {
                let envelope: NationalEnvelope = self.get_json(&url).await?;
                collect_national(envelope.data)
            }
            (Series::Regional, None) => {
                let envelope: RegionalEnvelope = self.get_json(&url).await?;
                collect_regional(envelope.data)
            }
            (Series::Regional, Some(_)) => {
                let envelope: SingleRegionEnvelope = self.get_json(&url).await?;
                collect_region_series(vec![envelope.data])
            }
            (Series::Generation, _) => {
                let envelope: GenerationRangeEnvelope = self.get_json(&url).await?;
                collect_generation(envelope.data)
            }
        }
    }

    /// Issue a GET request and deserialize the JSON response
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CarbonApiError> {
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(url)
            .headers(self.create_headers())
            .send()
            .await
            .map_err(|e| CarbonApiError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Carbon Intensity API returned {}: {}", status, body);
            return Err(CarbonApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CarbonApiError::Parse(format!("Failed to parse response: {}", e)))
    }

    fn create_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }
}

/// Path of the range endpoint for a series, relative to the base URL
fn range_path(
    series: Series,
    region: Option<u32>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> String {
    let from = path_timestamp(from);
    let to = path_timestamp(to);
    match (series, region) {
        (Series::National, _) => format!("/intensity/{}/{}", from, to),
        (Series::Regional, None) => format!("/regional/intensity/{}/{}", from, to),
        (Series::Regional, Some(id)) => {
            format!("/regional/intensity/{}/{}/regionid/{}", from, to, id)
        }
        (Series::Generation, _) => format!("/generation/{}/{}", from, to),
    }
}

fn path_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Round an instant up to the end of the half hour it falls in
fn ceil_half_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    let spare_minutes = (instant.minute() % 30) as i64;
    if spare_minutes == 0 && instant.second() == 0 && instant.nanosecond() == 0 {
        return instant;
    }
    instant - TimeDelta::minutes(spare_minutes)
        - TimeDelta::seconds(instant.second() as i64)
        - TimeDelta::nanoseconds(instant.nanosecond() as i64)
        + TimeDelta::minutes(30)
}

/// Split `[start, end]` into consecutive sub-ranges of at most `max_range`.
///
/// Bounds name settlement-period end times and are inclusive, so a
/// sub-range starting at `s` covers periods up to `s + max_range - 30 min`
/// and the next one starts at `s + max_range`. A zero-length range still
/// produces one sub-range, for the single period ending at `start`.
fn sub_ranges(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_range: TimeDelta,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut ranges = Vec::new();
    let mut sub_start = start;
    loop {
        let sub_end = end.min(sub_start + max_range - TimeDelta::minutes(30));
        ranges.push((sub_start, sub_end));
        sub_start += max_range;
        if sub_start > end {
            break;
        }
    }
    ranges
}

fn check_region_filter(series: Series, region: Option<u32>) -> Result<(), CarbonApiError> {
    if region.is_some() && series != Series::Regional {
        return Err(CarbonApiError::InvalidQuery(
            "Region filter only applies to the regional series".to_string(),
        ));
    }
    Ok(())
}

/// Parse a period timestamp from the API.
///
/// The API emits minute precision ("2020-04-01T00:30Z"); full RFC 3339 is
/// accepted as a fallback.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CarbonApiError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%MZ")
        .map(|naive| naive.and_utc())
        .or_else(|_| {
            DateTime::parse_from_rfc3339(value).map(|instant| instant.with_timezone(&Utc))
        })
        .map_err(|e| CarbonApiError::Parse(format!("Bad period timestamp {:?}: {}", value, e)))
}

fn parse_period(from: &str, to: &str) -> Result<TimePeriod, CarbonApiError> {
    Ok(TimePeriod {
        from: parse_timestamp(from)?,
        to: parse_timestamp(to)?,
    })
}

fn fuel_map(shares: Vec<FuelShare>) -> BTreeMap<String, f64> {
    shares.into_iter().map(|s| (s.fuel, s.perc)).collect()
}

/// Flatten national intensity entries into records
fn collect_national(entries: Vec<NationalEntry>) -> Result<CarbonData, CarbonApiError> {
    let mut data = CarbonData::default();
    for entry in entries {
        let period = parse_period(&entry.from, &entry.to)?;
        data.intensity.push(IntensityRecord {
            period,
            region: None,
            forecast: entry.intensity.forecast,
            actual: entry.intensity.actual,
            index: entry.intensity.index,
        });
    }
    Ok(data)
}

/// Flatten all-regions entries into per-region intensity and mix records
fn collect_regional(entries: Vec<RegionalEntry>) -> Result<CarbonData, CarbonApiError> {
    let mut data = CarbonData::default();
    for entry in entries {
        let period = parse_period(&entry.from, &entry.to)?;
        for snapshot in entry.regions {
            data.intensity.push(IntensityRecord {
                period,
                region: Some(snapshot.regionid),
                forecast: snapshot.intensity.forecast,
                actual: snapshot.intensity.actual,
                index: snapshot.intensity.index,
            });
            data.generation_mix.push(GenerationMixRecord {
                period,
                region: Some(snapshot.regionid),
                mix: fuel_map(snapshot.generationmix),
            });
        }
    }
    Ok(data)
}

/// Flatten single-region period lists into records
fn collect_region_series(series: Vec<RegionSeries>) -> Result<CarbonData, CarbonApiError> {
    let mut data = CarbonData::default();
    for region in series {
        for entry in region.data {
            let period = parse_period(&entry.from, &entry.to)?;
            data.intensity.push(IntensityRecord {
                period,
                region: Some(region.regionid),
                forecast: entry.intensity.forecast,
                actual: entry.intensity.actual,
                index: entry.intensity.index,
            });
            data.generation_mix.push(GenerationMixRecord {
                period,
                region: Some(region.regionid),
                mix: fuel_map(entry.generationmix),
            });
        }
    }
    Ok(data)
}

/// Flatten national generation entries into mix records
fn collect_generation(entries: Vec<GenerationEntry>) -> Result<CarbonData, CarbonApiError> {
    let mut data = CarbonData::default();
    for entry in entries {
        let period = parse_period(&entry.from, &entry.to)?;
        data.generation_mix.push(GenerationMixRecord {
            period,
            region: None,
            mix: fuel_map(entry.generationmix),
        });
    }
    Ok(data)
}

/// Order records by period start and drop duplicate (period, region) pairs
fn normalize(data: &mut CarbonData) {
    data.intensity.sort_by_key(|r| (r.period.from, r.region));
    data.intensity.dedup_by_key(|r| (r.period.from, r.region));
    data.generation_mix.sort_by_key(|r| (r.period.from, r.region));
    data.generation_mix.dedup_by_key(|r| (r.period.from, r.region));
}
