//! Upstream feed retrieval and normalization into [`Snapshot`]s.
//!
//! ```text
//! ingest
//! ├── gbfs      GBFS station_information + station_status (+ regions) client
//! └── fixtures  (test only) representative GBFS payloads
//! ```

pub mod gbfs;
#[cfg(test)]
pub(crate) mod fixtures;

use async_trait::async_trait;
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::Snapshot;
pub use gbfs::GbfsFetcher;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed {what} payload: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A source of live station observations.
///
/// Implementations never fail outward: any network or parse problem is
/// logged and reported as an empty batch, which callers must read as
/// "no update this cycle", not "every station disappeared".
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_live(&self) -> Vec<Snapshot>;
}

/// Case- and diacritic-insensitive form of `s` used for region matching.
///
/// NFKD strips accents; letters with a stroke have no decomposition and are
/// mapped by hand.
pub fn fold_text(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'ł' => 'l',
            'Ł' => 'L',
            'đ' => 'd',
            'Đ' => 'D',
            'ø' => 'o',
            'Ø' => 'O',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}
