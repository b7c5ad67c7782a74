//! Per-tile state machine
//!
//! [`TileIndex`] is the pure bookkeeping half of the cache engine: it knows
//! which tiles exist, what state each one is in, which fetches are
//! outstanding and for which generation. It performs no I/O; every
//! transition returns an outcome telling the engine what to do next.

use crate::core::geohash::{TileBounds, TileKey};
use crate::data::geofence::{merge_records, Geofence, GeofenceId};
use crate::prelude::{HashMap, HashSet};
use crate::tiles::source::{FetchError, PageRequest, PageResult, PageToken};
use chrono::{DateTime, Utc};

/// State of one tile
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TileState {
    /// Never requested, or reset by invalidation
    #[default]
    Empty,
    /// A fetch is in flight; `page_token` is `None` while the first page loads
    Loading { page_token: Option<PageToken> },
    /// Every page merged
    Completed { records: Vec<Geofence> },
    /// The last attempt failed; earlier completed records are kept aside
    Error { cause: FetchError },
}

impl TileState {
    pub fn status(&self) -> TileStatus {
        match self {
            Self::Empty => TileStatus::Empty,
            Self::Loading { .. } => TileStatus::Loading,
            Self::Completed { .. } => TileStatus::Completed,
            Self::Error { cause } => TileStatus::Error(cause.clone()),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

/// Record-free view of [`TileState`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileStatus {
    Empty,
    Loading,
    Completed,
    Error(FetchError),
}

/// Read-only diagnostic projection of one tile
#[derive(Debug, Clone, PartialEq)]
pub struct TileSnapshot {
    pub tile: TileKey,
    pub bounds: TileBounds,
    pub status: TileStatus,
    pub page_token: Option<PageToken>,
    /// Records currently contributed to the published collection
    pub record_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TileEntry {
    state: TileState,
    /// Records of the pages merged so far in the running fetch
    accumulator: HashMap<GeofenceId, Geofence>,
    pages: usize,
    /// Last completed record set; survives errors and refreshes
    completed: Option<Vec<Geofence>>,
    /// Position in completion order, used for last-write-wins across tiles
    completed_seq: u64,
    updated_at: DateTime<Utc>,
}

impl TileEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: TileState::Empty,
            accumulator: HashMap::default(),
            pages: 0,
            completed: None,
            completed_seq: 0,
            updated_at: now,
        }
    }

    fn start(&mut self, now: DateTime<Utc>) {
        self.state = TileState::Loading { page_token: None };
        self.accumulator.clear();
        self.pages = 0;
        self.updated_at = now;
    }
}

/// What the engine should do after [`TileIndex::request`]
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Issue this fetch, stamped with `generation`
    Start { request: PageRequest, generation: u64 },
    /// A fetch of an older generation is still outstanding; the tile will
    /// start once it returns
    Deferred,
    /// Already loading
    Deduplicated,
    /// Already completed
    Cached,
}

/// What the engine should do after [`TileIndex::page_loaded`]
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// Request the next page with the same generation
    Continue(PageRequest),
    /// Tile completed; the published collection must be rebuilt
    Completed { records: usize },
    /// Tile failed
    Failed(FetchError),
    /// The result belonged to an invalidated generation and was dropped;
    /// `restart` is set when the tile had been requested again meanwhile
    Stale { restart: Option<(PageRequest, u64)> },
}

/// Map of tile key to tile entry plus in-flight bookkeeping
#[derive(Debug, Default)]
pub struct TileIndex {
    entries: HashMap<TileKey, TileEntry>,
    /// Outstanding fetcher call per tile, with the generation it was made for
    in_flight: HashMap<TileKey, u64>,
    /// Tiles requested while a stale fetch was still outstanding
    deferred: HashSet<TileKey>,
    generation: u64,
    completion_counter: u64,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State of a tile; unknown tiles are `Empty`
    pub fn state(&self, tile: &TileKey) -> TileState {
        self.entries
            .get(tile)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    /// True while any tile is loading
    pub fn is_loading(&self) -> bool {
        self.entries.values().any(|entry| entry.state.is_loading())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Ensure a tile is loaded: starts a fetch for `Empty` and `Error` tiles
    pub fn request(&mut self, tile: &TileKey, now: DateTime<Utc>) -> RequestOutcome {
        match self.entries.get(tile).map(|entry| &entry.state) {
            Some(TileState::Completed { .. }) => RequestOutcome::Cached,
            Some(TileState::Loading { .. }) => RequestOutcome::Deduplicated,
            _ => self.start(tile, now),
        }
    }

    /// Re-fetch a tile even if it completed; prior records stay published
    /// until the new fetch completes
    pub fn refresh(&mut self, tile: &TileKey, now: DateTime<Utc>) -> RequestOutcome {
        match self.entries.get(tile).map(|entry| &entry.state) {
            Some(TileState::Loading { .. }) => RequestOutcome::Deduplicated,
            _ => self.start(tile, now),
        }
    }

    fn start(&mut self, tile: &TileKey, now: DateTime<Utc>) -> RequestOutcome {
        let entry = self
            .entries
            .entry(tile.clone())
            .or_insert_with(|| TileEntry::new(now));
        entry.start(now);

        if self.in_flight.contains_key(tile) {
            self.deferred.insert(tile.clone());
            return RequestOutcome::Deferred;
        }

        self.in_flight.insert(tile.clone(), self.generation);
        RequestOutcome::Start {
            request: PageRequest::first(tile.clone()),
            generation: self.generation,
        }
    }

    /// Applies the result of a fetch made for `generation`
    pub fn page_loaded(
        &mut self,
        tile: &TileKey,
        generation: u64,
        result: Result<PageResult, FetchError>,
        max_pages: usize,
        now: DateTime<Utc>,
    ) -> PageOutcome {
        if generation != self.generation {
            return self.discard_stale(tile, generation);
        }

        let Some(entry) = self.entries.get_mut(tile) else {
            // a current-generation fetch always has an entry
            self.in_flight.remove(tile);
            return PageOutcome::Stale { restart: None };
        };
        entry.updated_at = now;

        let page = match result {
            Ok(page) => page,
            Err(cause) => {
                self.in_flight.remove(tile);
                entry.accumulator.clear();
                entry.state = TileState::Error {
                    cause: cause.clone(),
                };
                return PageOutcome::Failed(cause);
            }
        };

        merge_records(&mut entry.accumulator, page.records);
        entry.pages += 1;

        match page.next_token {
            Some(token) if entry.pages >= max_pages => {
                let cause = FetchError::Decode(format!(
                    "tile {} still paginating after {} pages (last token {})",
                    tile, entry.pages, token
                ));
                self.in_flight.remove(tile);
                entry.accumulator.clear();
                entry.state = TileState::Error {
                    cause: cause.clone(),
                };
                PageOutcome::Failed(cause)
            }
            Some(token) => {
                entry.state = TileState::Loading {
                    page_token: Some(token.clone()),
                };
                PageOutcome::Continue(PageRequest::next(tile.clone(), token))
            }
            None => {
                self.in_flight.remove(tile);
                let mut records: Vec<Geofence> =
                    entry.accumulator.drain().map(|(_, record)| record).collect();
                records.sort_by(|a, b| a.id.cmp(&b.id));

                self.completion_counter += 1;
                entry.completed_seq = self.completion_counter;
                entry.completed = Some(records.clone());
                let count = records.len();
                entry.state = TileState::Completed { records };
                PageOutcome::Completed { records: count }
            }
        }
    }

    fn discard_stale(&mut self, tile: &TileKey, generation: u64) -> PageOutcome {
        if self.in_flight.get(tile) == Some(&generation) {
            self.in_flight.remove(tile);
        }

        let restart = if self.deferred.remove(tile) {
            self.in_flight.insert(tile.clone(), self.generation);
            Some((PageRequest::first(tile.clone()), self.generation))
        } else {
            None
        };
        PageOutcome::Stale { restart }
    }

    /// Every tile back to `Empty`; outstanding fetches become stale
    pub fn invalidate_all(&mut self) -> u64 {
        self.generation += 1;
        self.entries.clear();
        self.deferred.clear();
        self.generation
    }

    /// Completed record sets in tile completion order, oldest first
    pub fn completed_in_order(&self) -> Vec<&[Geofence]> {
        let mut completed: Vec<(u64, &[Geofence])> = self
            .entries
            .values()
            .filter_map(|entry| {
                entry
                    .completed
                    .as_deref()
                    .map(|records| (entry.completed_seq, records))
            })
            .collect();
        completed.sort_by_key(|(seq, _)| *seq);
        completed.into_iter().map(|(_, records)| records).collect()
    }

    /// Diagnostic projection of every tile, ordered by key
    pub fn snapshots(&self) -> Vec<TileSnapshot> {
        let mut snapshots: Vec<TileSnapshot> = self
            .entries
            .iter()
            .map(|(tile, entry)| TileSnapshot {
                tile: tile.clone(),
                bounds: tile.bounds(),
                status: entry.state.status(),
                page_token: match &entry.state {
                    TileState::Loading { page_token } => page_token.clone(),
                    _ => None,
                },
                record_count: entry.completed.as_ref().map_or(0, Vec::len),
                updated_at: entry.updated_at,
            })
            .collect();
        snapshots.sort_by(|a, b| a.tile.cmp(&b.tile));
        snapshots
    }
}
