//! Durable collection of every logged record plus the derived "today" view.
//!
//! The ledger has exactly one writer at a time: it is shared as
//! `Arc<tokio::sync::Mutex<Ledger>>` and every mutation, including its
//! persistence and the widget refresh, runs while that lock is held.

pub mod rollover;
pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use time::{Date, Duration};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::images::services::delete_orphaned_images;
use crate::meals::model::{Nutrients, NutritionRecord, RecordEdit};
use crate::storage::StorageClient;
use crate::widget::publisher::WidgetPublisher;
use crate::widget::{Goals, WidgetSnapshot};
use store::LedgerStore;

pub type SharedLedger = Arc<Mutex<Ledger>>;

pub const DEFAULT_RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// Records or the pending placeholder changed; recompute views.
    Changed,
    /// The local calendar date moved on. History is untouched.
    DayRolledOver { date: Date },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The record's local date is not today; nothing was stored.
    DroppedNotToday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsScope {
    Today,
    Day(Date),
    /// Today and the `n - 1` days before it.
    LastDays(u32),
    All,
}

impl TotalsScope {
    /// `today`, `all`, `days:N`, `date:YYYY-MM-DD`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s {
            "" | "today" => return Some(TotalsScope::Today),
            "all" => return Some(TotalsScope::All),
            _ => {}
        }
        if let Some(n) = s.strip_prefix("days:") {
            return n.parse().ok().filter(|n| *n > 0).map(TotalsScope::LastDays);
        }
        if let Some(d) = s.strip_prefix("date:") {
            let fmt = time::macros::format_description!("[year]-[month]-[day]");
            return Date::parse(d, fmt).ok().map(TotalsScope::Day);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NutritionTotals {
    #[serde(flatten)]
    pub nutrients: Nutrients,
    pub count: usize,
}

impl NutritionTotals {
    fn add(&mut self, r: &NutritionRecord) {
        self.nutrients += r.nutrients;
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTotals {
    pub date: String,
    #[serde(flatten)]
    pub totals: NutritionTotals,
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerOptions {
    pub retention_days: i64,
    pub goals: Goals,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            goals: Goals::default(),
        }
    }
}

pub struct Ledger {
    records: Vec<NutritionRecord>,
    placeholder: Option<NutritionRecord>,
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    images: Arc<dyn StorageClient>,
    widget: Option<WidgetPublisher>,
    options: LedgerOptions,
    last_observed: Date,
    events: broadcast::Sender<LedgerEvent>,
}

impl Ledger {
    /// Loads the persisted ledger and applies retention once.
    pub async fn open(
        store: LedgerStore,
        clock: Arc<dyn Clock>,
        images: Arc<dyn StorageClient>,
        options: LedgerOptions,
    ) -> Result<Self, LedgerError> {
        let records = store.load().await?;
        let (events, _) = broadcast::channel(64);
        let mut ledger = Self {
            records,
            placeholder: None,
            store,
            last_observed: clock.today(),
            clock,
            images,
            widget: None,
            options,
            events,
        };
        let loaded = std::mem::take(&mut ledger.records);
        let (kept, expired) = ledger.split_expired(loaded);
        ledger.records = kept;
        if !expired.is_empty() {
            ledger.store.save(&ledger.records).await?;
            ledger.cleanup_images(&expired).await;
        }
        info!(records = ledger.records.len(), purged = expired.len(), "ledger opened");
        Ok(ledger)
    }

    pub fn with_widget(mut self, widget: WidgetPublisher) -> Self {
        self.widget = Some(widget);
        self.publish_snapshot();
        self
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    // --- reads ---

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn all(&self) -> &[NutritionRecord] {
        &self.records
    }

    pub fn get(&self, id: Uuid) -> Option<&NutritionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn pending_placeholder(&self) -> Option<&NutritionRecord> {
        self.placeholder.as_ref()
    }

    /// Today's records, newest first, including a pending placeholder.
    pub fn today(&self) -> Vec<NutritionRecord> {
        let mut out = self.today_logged();
        if let Some(p) = &self.placeholder {
            out.push(p.clone());
            sort_newest_first(&mut out);
        }
        out
    }

    /// Today's committed records, newest first.
    pub fn today_logged(&self) -> Vec<NutritionRecord> {
        let today = self.clock.today();
        let mut out: Vec<NutritionRecord> = self
            .records
            .iter()
            .filter(|r| self.clock.local_date(r.timestamp) == today)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        out
    }

    pub fn totals(&self, scope: TotalsScope) -> NutritionTotals {
        let today = self.clock.today();
        let in_scope = |d: Date| match scope {
            TotalsScope::Today => d == today,
            TotalsScope::Day(day) => d == day,
            TotalsScope::LastDays(n) => {
                let first = today - Duration::days(i64::from(n.max(1)) - 1);
                d >= first && d <= today
            }
            TotalsScope::All => true,
        };
        let mut totals = NutritionTotals::default();
        for r in &self.records {
            if in_scope(self.clock.local_date(r.timestamp)) {
                totals.add(r);
            }
        }
        totals
    }

    /// Per-day totals for the last `days` local dates, newest first. Days
    /// without records are included with zero totals.
    pub fn history(&self, days: u32) -> Vec<DayTotals> {
        let today = self.clock.today();
        let days = days.max(1);
        let first = today - Duration::days(i64::from(days) - 1);
        let mut by_day: BTreeMap<Date, NutritionTotals> = BTreeMap::new();
        for r in &self.records {
            let d = self.clock.local_date(r.timestamp);
            if d >= first && d <= today {
                by_day.entry(d).or_default().add(r);
            }
        }
        (0..i64::from(days))
            .map(|i| {
                let date = today - Duration::days(i);
                DayTotals {
                    date: date.to_string(),
                    totals: by_day.get(&date).copied().unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        let totals = self.totals(TotalsScope::Today);
        WidgetSnapshot::new(&totals.nutrients, totals.count, self.options.goals)
    }

    // --- mutations ---

    /// Appends a record whose local date is today. Anything else is dropped
    /// without error; the caller re-derives time and meal type and retries.
    pub async fn append(&mut self, record: NutritionRecord) -> Result<AppendOutcome, LedgerError> {
        if !self.is_today(&record) {
            warn!(record_id = %record.id, timestamp = %record.timestamp, "append dropped: record is not dated today");
            return Ok(AppendOutcome::DroppedNotToday);
        }
        let record_id = record.id;
        let mut next = self.records.clone();
        next.push(record);
        self.persist(next, Vec::new()).await?;
        debug!(%record_id, "record appended");
        Ok(AppendOutcome::Appended)
    }

    /// Shows the in-progress entry. Never persisted.
    pub fn insert_placeholder(&mut self, placeholder: NutritionRecord) -> Result<(), LedgerError> {
        if self.placeholder.is_some() {
            return Err(LedgerError::PlaceholderPending);
        }
        debug!(placeholder_id = %placeholder.id, "placeholder inserted");
        self.placeholder = Some(placeholder);
        self.notify(LedgerEvent::Changed);
        Ok(())
    }

    /// Removes the placeholder. Returns whether it was present.
    pub fn discard_placeholder(&mut self, placeholder_id: Uuid) -> bool {
        match &self.placeholder {
            Some(p) if p.id == placeholder_id => {
                self.placeholder = None;
                debug!(%placeholder_id, "placeholder discarded");
                self.notify(LedgerEvent::Changed);
                true
            }
            _ => false,
        }
    }

    /// Swaps the placeholder for a capture's records in one step: readers
    /// holding the lock see either the placeholder or the records.
    /// Returns the records that were actually appended.
    pub async fn commit_placeholder(
        &mut self,
        placeholder_id: Uuid,
        records: Vec<NutritionRecord>,
    ) -> Result<Vec<NutritionRecord>, LedgerError> {
        let (appended, dropped): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| self.is_today(r));
        for r in &dropped {
            warn!(record_id = %r.id, timestamp = %r.timestamp, "capture record dropped: not dated today");
        }
        let mut next = self.records.clone();
        next.extend(appended.iter().cloned());
        // the placeholder only goes once the records are durable
        self.persist_with(next, dropped, |ledger| {
            if !ledger.discard_placeholder_silently(placeholder_id) {
                warn!(%placeholder_id, "committing capture without a matching placeholder");
            }
        })
        .await?;
        info!(%placeholder_id, appended = appended.len(), "capture committed");
        Ok(appended)
    }

    pub async fn remove(&mut self, id: Uuid) -> Result<NutritionRecord, LedgerError> {
        let pos = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(LedgerError::NotFound(id))?;
        let mut next = self.records.clone();
        let removed = next.remove(pos);
        self.persist(next, vec![removed.clone()]).await?;
        info!(record_id = %id, name = %removed.name, "record removed");
        Ok(removed)
    }

    /// Replaces the record with a freshly built one carrying the same id.
    pub async fn update(&mut self, id: Uuid, edit: &RecordEdit) -> Result<NutritionRecord, LedgerError> {
        let pos = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(LedgerError::NotFound(id))?;
        let updated = edit.apply(&self.records[pos]);
        let mut next = self.records.clone();
        next[pos] = updated.clone();
        self.persist(next, Vec::new()).await?;
        info!(record_id = %id, "record updated");
        Ok(updated)
    }

    /// Notices a local date change. Retention runs on every check; history
    /// is never dropped because of the rollover itself.
    pub async fn check_rollover(&mut self) -> Result<Option<Date>, LedgerError> {
        let today = self.clock.today();
        let rolled = if today != self.last_observed {
            info!(from = %self.last_observed, to = %today, "local day rolled over");
            self.last_observed = today;
            true
        } else {
            false
        };

        let (kept, expired) = self.split_expired(self.records.clone());
        if !expired.is_empty() {
            self.store.save(&kept).await?;
            self.records = kept;
            self.cleanup_images(&expired).await;
        }

        if rolled {
            self.notify(LedgerEvent::DayRolledOver { date: today });
            self.publish_snapshot();
            Ok(Some(today))
        } else {
            if !expired.is_empty() {
                self.notify(LedgerEvent::Changed);
            }
            Ok(None)
        }
    }

    // --- internals ---

    fn is_today(&self, r: &NutritionRecord) -> bool {
        self.clock.local_date(r.timestamp) == self.clock.today()
    }

    fn discard_placeholder_silently(&mut self, id: Uuid) -> bool {
        match &self.placeholder {
            Some(p) if p.id == id => {
                self.placeholder = None;
                true
            }
            _ => false,
        }
    }

    /// Splits `records` into (kept, expired) by the retention cutoff.
    fn split_expired(&self, records: Vec<NutritionRecord>) -> (Vec<NutritionRecord>, Vec<NutritionRecord>) {
        let cutoff = self.clock.now() - Duration::days(self.options.retention_days);
        let (kept, expired): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.timestamp >= cutoff);
        if !expired.is_empty() {
            info!(count = expired.len(), %cutoff, "expired records purged");
        }
        (kept, expired)
    }

    async fn persist(&mut self, next: Vec<NutritionRecord>, removed: Vec<NutritionRecord>) -> Result<(), LedgerError> {
        self.persist_with(next, removed, |_| {}).await
    }

    /// Retention, persistence, then the in-memory swap. Nothing in memory
    /// changes unless the save succeeded. Orphaned images, widget and
    /// listeners follow.
    async fn persist_with(
        &mut self,
        next: Vec<NutritionRecord>,
        mut removed: Vec<NutritionRecord>,
        on_saved: impl FnOnce(&mut Self),
    ) -> Result<(), LedgerError> {
        let (next, expired) = self.split_expired(next);
        removed.extend(expired);
        self.store.save(&next).await?;
        self.records = next;
        on_saved(self);
        self.cleanup_images(&removed).await;
        self.publish_snapshot();
        self.notify(LedgerEvent::Changed);
        Ok(())
    }

    async fn cleanup_images(&self, removed: &[NutritionRecord]) {
        let candidates: Vec<Uuid> = removed.iter().filter_map(|r| r.image_id).collect();
        if candidates.is_empty() {
            return;
        }
        let referenced: HashSet<Uuid> = self
            .records
            .iter()
            .chain(self.placeholder.iter())
            .filter_map(|r| r.image_id)
            .collect();
        let deleted = delete_orphaned_images(self.images.as_ref(), candidates, &referenced).await;
        if deleted > 0 {
            debug!(deleted, "orphaned images deleted");
        }
    }

    fn publish_snapshot(&self) {
        if let Some(w) = &self.widget {
            if let Err(e) = w.publish(self.snapshot()) {
                warn!(error = %e, "widget snapshot not queued");
            }
        }
    }

    fn notify(&self, event: LedgerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn sort_newest_first(records: &mut [NutritionRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
