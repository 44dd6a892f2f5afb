//! Lazy, restartable queries over the activity log and conflict records.
//!
//! A query only holds its filter; each call to `stream()` starts a fresh
//! pass that pages through the store on demand, oldest first.

use std::sync::Arc;

use futures::{stream::BoxStream, StreamExt, TryStreamExt};

use crate::{
    domain::{ActivityFilter, ActivityLogEntry, ActivityStats, ConflictFilter, ConflictInfo},
    store::{ActivityRepository, ConflictCursor, ConflictRepository, PersistenceStore},
    Error, Result,
};

#[derive(Clone)]
pub struct ActivityQuery {
    store: Arc<dyn PersistenceStore>,
    filter: ActivityFilter,
    page_size: usize,
}

impl ActivityQuery {
    pub fn new(store: Arc<dyn PersistenceStore>, filter: ActivityFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
        }
    }

    pub const fn filter(&self) -> &ActivityFilter {
        &self.filter
    }

    /// Matching entries in append order (non-decreasing timestamps), capped
    /// at `filter.limit`.
    pub fn stream(&self) -> BoxStream<'static, Result<ActivityLogEntry>> {
        let store = Arc::clone(&self.store);
        let filter = self.filter.clone();
        let page_size = self.page_size;

        let pages = futures::stream::try_unfold(Some(None::<i64>), move |cursor| {
            let store = Arc::clone(&store);
            let filter = filter.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = store.activity_page(&filter, after, page_size).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = (page.len() == page_size)
                    .then(|| page.last().map(|e| e.id))
                    .flatten()
                    .map(Some);
                let items = futures::stream::iter(page.into_iter().map(Ok::<_, Error>));
                Ok::<_, Error>(Some((items, next)))
            }
        });

        let entries = pages.try_flatten();
        match self.filter.limit {
            Some(limit) => entries.take(limit).boxed(),
            None => entries.boxed(),
        }
    }

    pub async fn collect(&self) -> Result<Vec<ActivityLogEntry>> {
        self.stream().try_collect().await
    }

    /// Totals by source and by command over the matching entries.
    pub async fn stats(&self) -> Result<ActivityStats> {
        self.stream()
            .try_fold(ActivityStats::default(), |mut stats, entry| async move {
                stats.total += 1;
                *stats.by_source.entry(entry.source).or_insert(0) += 1;
                *stats.by_command.entry(entry.command.clone()).or_insert(0) += 1;
                if matches!(entry.outcome, crate::domain::Outcome::Failure { .. }) {
                    stats.failures += 1;
                }
                Ok::<_, Error>(stats)
            })
            .await
    }
}

#[derive(Clone)]
pub struct ConflictQuery {
    store: Arc<dyn PersistenceStore>,
    filter: ConflictFilter,
    page_size: usize,
}

impl ConflictQuery {
    pub fn new(store: Arc<dyn PersistenceStore>, filter: ConflictFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
        }
    }

    /// Matching conflicts ordered by detection time.
    pub fn stream(&self) -> BoxStream<'static, Result<ConflictInfo>> {
        let store = Arc::clone(&self.store);
        let filter = self.filter.clone();
        let page_size = self.page_size;

        futures::stream::try_unfold(Some(None::<ConflictCursor>), move |cursor| {
            let store = Arc::clone(&store);
            let filter = filter.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = store.conflict_page(&filter, after.as_ref(), page_size).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = (page.len() == page_size)
                    .then(|| page.last().map(|c| (c.detected_at, c.id.clone())))
                    .flatten()
                    .map(Some);
                let items = futures::stream::iter(page.into_iter().map(Ok::<_, Error>));
                Ok::<_, Error>(Some((items, next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    pub async fn collect(&self) -> Result<Vec<ConflictInfo>> {
        self.stream().try_collect().await
    }
}
