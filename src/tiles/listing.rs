//! Device-wide paginated listing for list screens
//!
//! Pages are cached by continuation token until the next invalidation.
//! Geofences created locally since the first page was fetched are carried
//! separately and shown ahead of that page.

use crate::data::filter::filter_for_device;
use crate::data::geofence::{merge_records, Geofence, GeofenceId};
use crate::prelude::HashMap;
use crate::tiles::source::{FetchError, PageResult, PageToken};
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) type PageReply = oneshot::Sender<Result<GeofencePage, FetchError>>;

/// One page of the device-wide listing, filtered for the current device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeofencePage {
    /// Created locally after the first page was fetched; only set on the
    /// first page
    pub recently_created: Vec<Arc<Geofence>>,
    pub geofences: Vec<Arc<Geofence>>,
    pub next_token: Option<PageToken>,
}

impl GeofencePage {
    /// Recently created records first, then the page itself
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Geofence>> {
        self.recently_created.iter().chain(self.geofences.iter())
    }

    pub fn len(&self) -> usize {
        self.recently_created.len() + self.geofences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a listing fetch, answered once the engine has published
pub(crate) struct Delivery {
    /// Records that joined the cache
    pub added: Vec<Geofence>,
    waiters: Vec<PageReply>,
    outcome: Result<GeofencePage, FetchError>,
}

impl Delivery {
    pub fn deliver(self) {
        for waiter in self.waiters {
            let _ = waiter.send(self.outcome.clone());
        }
    }
}

/// Page cache and in-flight bookkeeping, owned by the engine task
#[derive(Default)]
pub(crate) struct PageCache {
    pages: HashMap<Option<PageToken>, PageResult>,
    /// Callers waiting on the outstanding fetch of a token
    waiters: HashMap<Option<PageToken>, Vec<PageReply>>,
    recently_created: Vec<Geofence>,
    /// Every record from the cached pages, merged by id
    records: HashMap<GeofenceId, Geofence>,
}

impl PageCache {
    /// The cached page for `token`, if any
    pub fn cached(&self, token: &Option<PageToken>, device_id: &str) -> Option<GeofencePage> {
        self.pages
            .get(token)
            .map(|page| self.build(token, page, device_id))
    }

    /// Queues `reply` for `token`; true when no fetch for it is outstanding
    /// and the caller must start one
    pub fn wait(&mut self, token: Option<PageToken>, reply: PageReply) -> bool {
        let waiters = self.waiters.entry(token).or_default();
        waiters.push(reply);
        waiters.len() == 1
    }

    pub fn has_waiters(&self, token: &Option<PageToken>) -> bool {
        self.waiters.get(token).map_or(false, |w| !w.is_empty())
    }

    /// Applies a current-generation result; waiters are answered by the
    /// returned [`Delivery`]
    pub fn loaded(
        &mut self,
        token: Option<PageToken>,
        result: Result<PageResult, FetchError>,
        device_id: &str,
    ) -> Delivery {
        let waiters = self.waiters.remove(&token).unwrap_or_default();
        let page = match result {
            Ok(page) => page,
            Err(cause) => {
                return Delivery {
                    added: Vec::new(),
                    waiters,
                    outcome: Err(cause),
                }
            }
        };

        if token.is_none() {
            self.recently_created.clear();
        }
        merge_records(&mut self.records, page.records.clone());
        let outcome = Ok(self.build(&token, &page, device_id));
        let added = page.records.clone();
        self.pages.insert(token, page);
        Delivery {
            added,
            waiters,
            outcome,
        }
    }

    /// Remembers locally created records until the first page is refetched
    pub fn created(&mut self, records: &[Geofence]) {
        for record in records {
            self.recently_created.retain(|r| r.id != record.id);
            self.recently_created.push(record.clone());
        }
    }

    pub fn records(&self) -> Vec<Geofence> {
        self.records.values().cloned().collect()
    }

    /// Drops every cached page. Outstanding fetches keep their waiters and
    /// are restarted when their stale result arrives.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.records.clear();
        self.recently_created.clear();
    }

    fn build(&self, token: &Option<PageToken>, page: &PageResult, device_id: &str) -> GeofencePage {
        let filtered = |records: &[Geofence]| -> Vec<Arc<Geofence>> {
            records
                .iter()
                .map(|r| Arc::new(filter_for_device(r, device_id)))
                .collect()
        };
        GeofencePage {
            recently_created: if token.is_none() {
                // newest creation first
                let mut created = filtered(&self.recently_created);
                created.reverse();
                created
            } else {
                Vec::new()
            },
            geofences: filtered(&page.records),
            next_token: page.next_token.clone(),
        }
    }
}
