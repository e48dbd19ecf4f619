//! Signal and reference fetchers for the external data sources.
//!
//! This module contains submodules for pulling trend signals and
//! reference imagery from third-party APIs. Each fetcher is a thin REST
//! client that decodes into the crate's models and degrades gracefully:
//! a source that fails is logged and skipped, never fatal to the run.
//!
//! # Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Google Trends | [`trends`] | BigQuery jobs.query | Public dataset of rising search terms |
//! | GDELT | [`gdelt`] | Doc 2.0 ArtList API | News coverage per term, no key needed |
//! | Google Images | [`serpimages`] | SerpApi search | Reference images, validated and saved to disk |

pub mod gdelt;
pub mod serpimages;
pub mod trends;
