//! Durable artifacts a pipeline run leaves on disk.
//!
//! # Submodules
//!
//! - [`sheet`]: Writes harvested posts to a timestamped CSV sheet and
//!   reads the text column back for downstream stages
//!
//! # Output Structure
//!
//! ```text
//! data/raw/
//! ├── x_tweets_20260214_091500.csv   # Harvested posts
//! ├── gdelt_<term>.json              # Raw news coverage snapshots
//! ├── visuals/
//! │   └── <term>/
//! │       └── raw_0.jpg              # Reference images
//! └── final/
//!     └── <term>.png                 # Manufactured assets
//! ```

pub mod sheet;
