//! Library synchronization: pages through each configured section and
//! collects normalized items, isolating failures per section.

use std::sync::Arc;

use artsync_core::types::{LibrarySection, MediaItem};
use serde::Serialize;
use tracing::{info, warn};

use crate::{MediaServer, MediaServerError};

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// How one section's pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Complete,
    /// The first page reported no items. Not an error.
    NoItems,
    /// A page failed; items from earlier pages are kept.
    Failed(MediaServerError),
}

#[derive(Debug, Clone)]
pub struct SectionSync {
    pub section: LibrarySection,
    pub items: Vec<MediaItem>,
    pub outcome: SyncOutcome,
    /// Offsets requested, in order.
    pub pages: Vec<usize>,
}

impl SectionSync {
    pub fn items_processed(&self) -> usize {
        self.items.len()
    }

    pub fn error(&self) -> Option<&MediaServerError> {
        match &self.outcome {
            SyncOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of a run over several sections.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub sections: Vec<SectionSync>,
}

#[derive(Debug, Serialize)]
pub struct SectionSummary<'a> {
    pub section: &'a str,
    pub status: &'static str,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn items(&self) -> impl Iterator<Item = &MediaItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    pub fn failed(&self) -> usize {
        self.sections.iter().filter(|s| s.error().is_some()).count()
    }

    pub fn summaries(&self) -> Vec<SectionSummary<'_>> {
        self.sections
            .iter()
            .map(|s| SectionSummary {
                section: &s.section.title,
                status: match s.outcome {
                    SyncOutcome::Complete => "complete",
                    SyncOutcome::NoItems => "no_items",
                    SyncOutcome::Failed(_) => "failed",
                },
                items: s.items.len(),
                error: s.error().map(ToString::to_string),
            })
            .collect()
    }
}

pub struct LibrarySynchronizer {
    server: Arc<dyn MediaServer>,
    page_size: usize,
}

impl LibrarySynchronizer {
    pub fn new(server: Arc<dyn MediaServer>) -> Self {
        Self::with_page_size(server, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(server: Arc<dyn MediaServer>, page_size: usize) -> Self {
        Self {
            server,
            page_size: page_size.max(1),
        }
    }

    /// Walk one section page by page. Offsets advance by the page size, not
    /// by the number of items kept, since type filtering shrinks pages.
    pub async fn synchronize(&self, section: &LibrarySection) -> SectionSync {
        let mut items = Vec::new();
        let mut pages = Vec::new();
        let mut offset = 0;

        let outcome = loop {
            pages.push(offset);
            let page = match self
                .server
                .fetch_library_section_items(section, offset, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        section = %section.title,
                        offset,
                        kept = items.len(),
                        error = %err,
                        "section page failed, stopping this section"
                    );
                    break SyncOutcome::Failed(err);
                }
            };

            if offset == 0 && page.total == 0 && page.items.is_empty() {
                info!(section = %section.title, "section has no items");
                break SyncOutcome::NoItems;
            }

            items.extend(page.items);
            offset += self.page_size;
            if offset >= page.total {
                break SyncOutcome::Complete;
            }
        };

        if outcome == SyncOutcome::Complete {
            info!(
                section = %section.title,
                items = items.len(),
                pages = pages.len(),
                "section synchronized"
            );
        }
        SectionSync {
            section: section.clone(),
            items,
            outcome,
            pages,
        }
    }

    /// Sections run concurrently; one failing never stops the others.
    pub async fn synchronize_all(&self, sections: &[LibrarySection]) -> SyncReport {
        let sections =
            futures::future::join_all(sections.iter().map(|s| self.synchronize(s))).await;
        SyncReport { sections }
    }
}
