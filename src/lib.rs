//! Client library for the National Grid ESO Carbon Intensity API.
//!
//! Fetches carbon-intensity and generation-mix time series from
//! `https://api.carbonintensity.org.uk` and returns them as plain record
//! vectors. Date ranges longer than the API's 14-day per-request cap are
//! transparently split into sequential requests.

pub mod client;
pub mod models;

pub use client::CarbonIntensityClient;
pub use models::{
    CarbonApiError, CarbonData, GenerationMixRecord, IntensityRecord, Series, TimePeriod,
};
