//! Home page section widgets.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use mangasync_api_types::{RankedSeries, SeriesCard};
use tracing::{debug, instrument};

use crate::application::error::ApiError;
use crate::cache::{QueryCache, QueryKey};
use crate::domain::error::DomainError;

const SECTIONS_ROOT: &str = "/api/sections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Featured,
    Pinned,
    PopularToday,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Featured, Section::Pinned, Section::PopularToday];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Featured => "featured",
            Section::Pinned => "pinned",
            Section::PopularToday => "popular-today",
        }
    }

    pub fn path(self) -> String {
        format!("{SECTIONS_ROOT}/{}", self.as_str())
    }

    /// Nested under the sections root so series pushes reach it.
    pub fn cache_key(self) -> QueryKey {
        QueryKey::from([SECTIONS_ROOT, self.as_str()])
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "featured" => Ok(Section::Featured),
            "pinned" => Ok(Section::Pinned),
            "popular" | "popular-today" => Ok(Section::PopularToday),
            other => Err(DomainError::validation(format!("unknown section `{other}`"))),
        }
    }
}

#[async_trait]
pub trait SectionsApi: Send + Sync {
    async fn section(&self, section: Section) -> Result<Vec<SeriesCard>, ApiError>;
}

pub struct SectionService {
    api: Arc<dyn SectionsApi>,
    cache: QueryCache,
}

impl SectionService {
    pub fn new(api: Arc<dyn SectionsApi>, cache: QueryCache) -> Self {
        Self { api, cache }
    }

    /// Cards of one section. Failures read as an empty section.
    #[instrument(skip(self))]
    pub async fn load(&self, section: Section) -> Vec<SeriesCard> {
        let key = section.cache_key();
        match self
            .cache
            .fetch_query(&key, || self.api.section(section))
            .await
        {
            Ok(cards) => cards,
            Err(err) => {
                debug!(section = %section, error = %err, "Section unavailable; showing none");
                Vec::new()
            }
        }
    }

    pub async fn featured(&self) -> Vec<SeriesCard> {
        self.load(Section::Featured).await
    }

    pub async fn pinned(&self) -> Vec<SeriesCard> {
        self.load(Section::Pinned).await
    }

    /// Popular today, ranked from 1 in server order.
    pub async fn popular_today(&self) -> Vec<RankedSeries> {
        rank(self.load(Section::PopularToday).await)
    }
}

pub fn rank(cards: Vec<SeriesCard>) -> Vec<RankedSeries> {
    cards
        .into_iter()
        .zip(1u32..)
        .map(|(series, rank)| RankedSeries { rank, series })
        .collect()
}
