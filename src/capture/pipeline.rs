//! One capture, from "analyze this photo" to records in the ledger.
//!
//! `Idle -> PlaceholderInserted -> Analyzing -> {Committing | Failed} -> Idle`
//!
//! The placeholder shows up in today's view as soon as a capture starts and
//! is swapped for the final records under the ledger lock, so readers never
//! see both or neither. Only one capture runs at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::correction::{self, CorrectionInput};
use crate::error::CaptureError;
use crate::images::services::upload_capture_image;
use crate::inference::{DetectedFood, InferenceClient};
use crate::ledger::{AppendOutcome, SharedLedger};
use crate::meals::model::{MealType, Nutrients, NutritionRecord};

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    PlaceholderInserted {
        placeholder_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        started_at: OffsetDateTime,
    },
    Analyzing {
        placeholder_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        started_at: OffsetDateTime,
    },
    Committing {
        placeholder_id: Uuid,
        items: usize,
    },
    Failed {
        placeholder_id: Uuid,
        reason: String,
    },
}

impl CaptureState {
    fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::PlaceholderInserted { .. } => "placeholder_inserted",
            CaptureState::Analyzing { .. } => "analyzing",
            CaptureState::Committing { .. } => "committing",
            CaptureState::Failed { .. } => "failed",
        }
    }
}

/// Raw and corrected values of the most confident item, shown inline right
/// after a capture so the numbers on screen never change silently later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineResult {
    pub record_id: Uuid,
    pub name: String,
    pub confidence: f64,
    pub multiplier: f64,
    pub raw: Nutrients,
    pub corrected: Nutrients,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub records: Vec<NutritionRecord>,
    pub inline: Option<InlineResult>,
    pub description: Option<String>,
    pub suggestions: Vec<String>,
    /// Records lost to a midnight crossing during analysis.
    pub dropped: usize,
}

struct CorrectedItem {
    index: usize,
    raw: DetectedFood,
    multiplier: f64,
    record: NutritionRecord,
}

#[derive(Clone)]
pub struct CapturePipeline {
    ledger: SharedLedger,
    inference: Arc<dyn InferenceClient>,
    images: Arc<dyn crate::storage::StorageClient>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    state: Arc<Mutex<CaptureState>>,
}

impl CapturePipeline {
    pub fn new(
        ledger: SharedLedger,
        inference: Arc<dyn InferenceClient>,
        images: Arc<dyn crate::storage::StorageClient>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            inference,
            images,
            clock,
            timeout,
            state: Arc::new(Mutex::new(CaptureState::Idle)),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Runs a capture to completion. The work continues on its own task, so
    /// dropping the returned future does not abandon the capture.
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn capture(
        &self,
        image: Bytes,
        meal_type: Option<MealType>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let now = self.clock.now();
        let meal_type = MealType::resolve(meal_type, now);
        let placeholder = NutritionRecord::placeholder(now, meal_type);
        let placeholder_id = placeholder.id;

        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != CaptureState::Idle {
                info!(current = state.name(), "capture rejected; another capture is pending");
                return Err(CaptureError::Busy);
            }
            *state = CaptureState::PlaceholderInserted {
                placeholder_id,
                started_at: now,
            };
        }

        // nothing below the state flip may await on the caller's future
        let this = self.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = this.ledger.lock().await.insert_placeholder(placeholder) {
                this.set_state(CaptureState::Idle);
                return Err(e.into());
            }
            info!(%placeholder_id, %meal_type, "capture started");
            this.run(image, placeholder_id, now, meal_type).await
        });
        match task.await {
            Ok(result) => result,
            Err(join) => {
                error!(error = %join, %placeholder_id, "capture task died");
                self.ledger.lock().await.discard_placeholder(placeholder_id);
                self.set_state(CaptureState::Idle);
                Err(CaptureError::Aborted(join.to_string()))
            }
        }
    }

    async fn run(
        &self,
        image: Bytes,
        placeholder_id: Uuid,
        started_at: OffsetDateTime,
        meal_type: MealType,
    ) -> Result<CaptureOutcome, CaptureError> {
        let result = self
            .analyze_and_commit(image, placeholder_id, started_at, meal_type)
            .await;
        if let Err(e) = &result {
            self.set_state(CaptureState::Failed {
                placeholder_id,
                reason: e.to_string(),
            });
            self.ledger.lock().await.discard_placeholder(placeholder_id);
            if e.is_not_detected() {
                info!(%placeholder_id, "no food detected");
            } else {
                warn!(error = %e, %placeholder_id, "capture failed");
            }
        }
        self.set_state(CaptureState::Idle);
        result
    }

    async fn analyze_and_commit(
        &self,
        image: Bytes,
        placeholder_id: Uuid,
        started_at: OffsetDateTime,
        meal_type: MealType,
    ) -> Result<CaptureOutcome, CaptureError> {
        self.set_state(CaptureState::Analyzing {
            placeholder_id,
            started_at,
        });

        let analysis = match tokio::time::timeout(self.timeout, self.inference.analyze_image(image.clone())).await {
            Err(_) => return Err(CaptureError::InferenceTimeout(self.timeout)),
            Ok(Err(e)) => return Err(CaptureError::InferenceTransport(e)),
            Ok(Ok(a)) => a,
        };

        let usable = analysis.usable_items();
        debug!(detected = analysis.items.len(), usable = usable.len(), "analysis received");
        if usable.is_empty() {
            return Err(CaptureError::InferenceEmptyResult);
        }

        self.set_state(CaptureState::Committing {
            placeholder_id,
            items: usable.len(),
        });

        let image_id = upload_capture_image(self.images.as_ref(), image).await;
        let items = correct_all(usable, started_at, meal_type, image_id).await?;
        let inline = inline_result(&items);
        let records: Vec<NutritionRecord> = items.into_iter().map(|i| i.record).collect();
        let built = records.len();

        let appended = self
            .ledger
            .lock()
            .await
            .commit_placeholder(placeholder_id, records)
            .await?;
        let dropped = built - appended.len();
        info!(%placeholder_id, committed = appended.len(), dropped, "capture complete");

        Ok(CaptureOutcome {
            inline: inline.filter(|i| appended.iter().any(|r| r.id == i.record_id)),
            records: appended,
            description: analysis.description,
            suggestions: analysis.suggestions,
            dropped,
        })
    }

    /// Logs a typed-in food using the name-estimate endpoint. No
    /// underestimation heuristics apply; the estimate is for a named dish.
    #[instrument(skip(self))]
    pub async fn log_by_name(
        &self,
        name: &str,
        meal_type: Option<MealType>,
    ) -> Result<(NutritionRecord, AppendOutcome), CaptureError> {
        let estimate = match tokio::time::timeout(self.timeout, self.inference.estimate_from_name(name)).await {
            Err(_) => return Err(CaptureError::InferenceTimeout(self.timeout)),
            Ok(Err(e)) => return Err(CaptureError::InferenceTransport(e)),
            Ok(Ok(e)) => e,
        };
        // time is taken after the call so a slow estimate can't straddle midnight
        let now = self.clock.now();
        let mut record = NutritionRecord::new(
            estimate.name.clone(),
            estimate.nutrients(),
            now,
            MealType::resolve(meal_type, now),
        );
        record.portion_size = estimate.serving_description.clone();
        let outcome = self.ledger.lock().await.append(record.clone()).await?;
        info!(record_id = %record.id, name = %record.name, calories = record.nutrients.calories, "logged by name");
        Ok((record, outcome))
    }

    fn set_state(&self, next: CaptureState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        debug!(from = state.name(), to = next.name(), "capture state");
        *state = next;
    }
}

/// Correction and record construction for every item, concurrently. The
/// join waits for all of them; results come back in detection order.
async fn correct_all(
    usable: Vec<DetectedFood>,
    timestamp: OffsetDateTime,
    meal_type: MealType,
    image_id: Option<Uuid>,
) -> Result<Vec<CorrectedItem>, CaptureError> {
    let co_detected = usable.len();
    let mut set = JoinSet::new();
    for (index, raw) in usable.into_iter().enumerate() {
        set.spawn(async move {
            let multiplier = correction::correct(&CorrectionInput {
                name: &raw.name,
                raw_calories: raw.calories,
                meal_type,
                co_detected,
                portion_label: raw.portion_label.as_deref(),
            });
            let record = build_record(&raw, multiplier, timestamp, meal_type, image_id);
            CorrectedItem {
                index,
                raw,
                multiplier,
                record,
            }
        });
    }

    let mut items = Vec::with_capacity(co_detected);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(item) => items.push(item),
            Err(e) => return Err(CaptureError::Aborted(e.to_string())),
        }
    }
    items.sort_by_key(|i| i.index);
    Ok(items)
}

fn build_record(
    raw: &DetectedFood,
    multiplier: f64,
    timestamp: OffsetDateTime,
    meal_type: MealType,
    image_id: Option<Uuid>,
) -> NutritionRecord {
    let mut record = NutritionRecord::new(
        raw.name.trim(),
        raw.nutrients().scaled(multiplier),
        timestamp,
        meal_type,
    );
    record.ingredients = Some(raw.ingredients.clone()).filter(|i| !i.is_empty());
    record.portion_size = raw.portion_label.clone();
    record.macro_character = raw.macro_character.clone();
    record.image_id = image_id;
    if multiplier != 1.0 {
        debug!(name = %record.name, multiplier, raw_calories = raw.calories, calories = record.nutrients.calories, "correction applied");
    }
    record
}

/// Most confident item; the earliest detected wins ties.
fn inline_result(items: &[CorrectedItem]) -> Option<InlineResult> {
    let mut best: Option<&CorrectedItem> = None;
    for item in items {
        if best.map_or(true, |b| item.raw.confidence > b.raw.confidence) {
            best = Some(item);
        }
    }
    best.map(|i| InlineResult {
        record_id: i.record.id,
        name: i.record.name.clone(),
        confidence: i.raw.confidence,
        multiplier: i.multiplier,
        raw: i.raw.nutrients(),
        corrected: i.record.nutrients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::inference::fake::{item, FakeInference};
    use crate::inference::parse::fallback_analysis;
    use crate::inference::{FoodAnalysis, NameEstimate};
    use crate::ledger::store::LedgerStore;
    use crate::ledger::testing::NOW;
    use crate::ledger::{Ledger, LedgerOptions};
    use crate::storage::memory::MemoryStorage;
    use time::macros::datetime;

    struct Harness {
        pipeline: CapturePipeline,
        ledger: SharedLedger,
        inference: Arc<FakeInference>,
        images: Arc<MemoryStorage>,
        clock: FixedClock,
    }

    async fn harness(inference: FakeInference) -> Harness {
        let clock = FixedClock::new(NOW);
        let images = Arc::new(MemoryStorage::default());
        let ledger = Ledger::open(
            LedgerStore::Memory,
            Arc::new(clock.clone()),
            images.clone(),
            LedgerOptions::default(),
        )
        .await
        .unwrap()
        .into_shared();
        let inference = Arc::new(inference);
        let pipeline = CapturePipeline::new(
            ledger.clone(),
            inference.clone(),
            images.clone(),
            Arc::new(clock.clone()),
            DEFAULT_INFERENCE_TIMEOUT,
        );
        Harness {
            pipeline,
            ledger,
            inference,
            images,
            clock,
        }
    }

    fn analysis(items: Vec<DetectedFood>) -> FoodAnalysis {
        FoodAnalysis {
            items,
            overall_confidence: 0.8,
            description: Some("a plate".into()),
            suggestions: vec![],
        }
    }

    fn jpeg() -> Bytes {
        Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0])
    }

    #[tokio::test]
    async fn chicken_fried_rice_scenario() {
        let mut rice = item("Chicken Fried Rice", 90.0, 0.8);
        rice.protein = 4.0;
        rice.carbs = 12.0;
        rice.fat = 3.0;
        let h = harness(FakeInference::with_analysis(analysis(vec![rice]))).await;

        let out = h
            .pipeline
            .capture(jpeg(), Some(MealType::Dinner))
            .await
            .unwrap();
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.nutrients.calories, 270.0);
        assert_eq!(r.nutrients.protein, 12.0);
        assert_eq!(r.nutrients.carbs, 36.0);
        assert_eq!(r.nutrients.fat, 9.0);
        assert_eq!(r.meal_type, MealType::Dinner);

        let inline = out.inline.unwrap();
        assert_eq!(inline.multiplier, 3.0);
        assert_eq!(inline.raw.calories, 90.0);
        assert_eq!(inline.corrected.calories, 270.0);
    }

    #[tokio::test]
    async fn corrected_fields_equal_raw_times_multiplier() {
        let mut pasta = item("pasta with broccoli", 76.0, 0.9);
        pasta.fiber = 2.5;
        pasta.sugar = 1.25;
        pasta.sodium = 40.0;
        let raw = pasta.nutrients();
        let h = harness(FakeInference::with_analysis(analysis(vec![pasta]))).await;

        let out = h.pipeline.capture(jpeg(), Some(MealType::Lunch)).await.unwrap();
        let got = out.records[0].nutrients;
        assert_eq!(got, raw.scaled(4.0));
        assert_eq!(got.calories, 304.0);
    }

    #[tokio::test]
    async fn three_items_share_timestamp_and_image() {
        let h = harness(FakeInference::with_analysis(analysis(vec![
            item("Steak", 450.0, 0.7),
            item("Mashed potatoes", 220.0, 0.95),
            item("Green beans", 60.0, 0.6),
        ])))
        .await;

        let out = h.pipeline.capture(jpeg(), None).await.unwrap();
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.dropped, 0);

        let ledger = h.ledger.lock().await;
        let today = ledger.today();
        assert_eq!(today.len(), 3);
        assert!(ledger.pending_placeholder().is_none());
        let ts = today[0].timestamp;
        assert!(today.iter().all(|r| r.timestamp == ts));
        let image_id = today[0].image_id.expect("image stored");
        assert!(today.iter().all(|r| r.image_id == Some(image_id)));
        assert_eq!(h.images.keys().len(), 1);
        // 13:00 falls in the lunch band
        assert!(today.iter().all(|r| r.meal_type == MealType::Lunch));
        // order follows detection
        assert_eq!(
            out.records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["Steak", "Mashed potatoes", "Green beans"]
        );
        assert_eq!(out.inline.unwrap().name, "Mashed potatoes");
        assert_eq!(h.inference.call_count(), 1);
    }

    #[tokio::test]
    async fn nothing_usable_leaves_ledger_unchanged() {
        let h = harness(FakeInference::with_analysis(analysis(vec![
            item("unknown", 200.0, 0.3),
            item("Soup", 0.0, 0.5),
        ])))
        .await;

        let err = h.pipeline.capture(jpeg(), None).await.unwrap_err();
        assert!(err.is_not_detected());
        let ledger = h.ledger.lock().await;
        assert!(ledger.today().is_empty());
        assert!(ledger.pending_placeholder().is_none());
        assert_eq!(ledger.len(), 0);
        assert!(h.images.keys().is_empty());
        drop(ledger);
        assert_eq!(h.pipeline.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn unreadable_output_fallback_is_not_detected() {
        let h = harness(FakeInference::with_analysis(fallback_analysis())).await;
        let err = h.pipeline.capture(jpeg(), None).await.unwrap_err();
        assert!(matches!(err, CaptureError::InferenceEmptyResult));
    }

    #[tokio::test]
    async fn transport_error_cleans_up() {
        let fake = FakeInference::default();
        fake.push_analysis(Err(anyhow::anyhow!("connection reset")));
        let h = harness(fake).await;

        let err = h.pipeline.capture(jpeg(), None).await.unwrap_err();
        assert!(matches!(err, CaptureError::InferenceTransport(_)));
        assert!(h.ledger.lock().await.today().is_empty());
        assert_eq!(h.pipeline.state(), CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cleans_up() {
        let fake = FakeInference::with_delay(Duration::from_secs(31));
        fake.push_analysis(Ok(analysis(vec![item("Toast", 200.0, 0.9)])));
        let h = harness(fake).await;

        let err = h.pipeline.capture(jpeg(), None).await.unwrap_err();
        assert!(matches!(err, CaptureError::InferenceTimeout(d) if d == Duration::from_secs(30)));
        let ledger = h.ledger.lock().await;
        assert!(ledger.today().is_empty());
        assert!(ledger.pending_placeholder().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_capture_is_rejected_while_pending() {
        let fake = FakeInference::with_delay(Duration::from_secs(5));
        fake.push_analysis(Ok(analysis(vec![item("Bagel", 250.0, 0.9)])));
        let h = harness(fake).await;

        let first = {
            let p = h.pipeline.clone();
            tokio::spawn(async move { p.capture(jpeg(), None).await })
        };
        // let the first capture insert its placeholder
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(h.pipeline.state(), CaptureState::Analyzing { .. }));
        {
            let ledger = h.ledger.lock().await;
            let today = ledger.today();
            assert_eq!(today.len(), 1);
            assert_eq!(today[0].name, crate::meals::model::PLACEHOLDER_NAME);
        }

        let err = h.pipeline.capture(jpeg(), None).await.unwrap_err();
        assert!(matches!(err, CaptureError::Busy));

        let out = first.await.unwrap().unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(h.inference.call_count(), 1);
        assert_eq!(h.ledger.lock().await.today().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_does_not_abandon_capture() {
        let fake = FakeInference::with_delay(Duration::from_secs(2));
        fake.push_analysis(Ok(analysis(vec![item("Ramen noodles", 500.0, 0.9)])));
        let h = harness(fake).await;

        let caller = {
            let p = h.pipeline.clone();
            tokio::spawn(async move { p.capture(jpeg(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let ledger = h.ledger.lock().await;
        assert_eq!(ledger.today().len(), 1);
        assert_eq!(ledger.today()[0].name, "Ramen noodles");
        assert!(ledger.pending_placeholder().is_none());
        drop(ledger);
        assert_eq!(h.pipeline.state(), CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_dropped_while_ledger_is_busy_still_returns_to_idle() {
        let fake = FakeInference::default();
        fake.push_analysis(Ok(analysis(vec![item("Omelette", 320.0, 0.9)])));
        fake.push_analysis(Ok(analysis(vec![item("Apple pie", 410.0, 0.9)])));
        let h = harness(fake).await;

        let held = h.ledger.lock().await;
        let caller = {
            let p = h.pipeline.clone();
            tokio::spawn(async move { p.capture(jpeg(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        let _ = caller.await;
        drop(held);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.pipeline.state(), CaptureState::Idle);
        assert_eq!(h.ledger.lock().await.today()[0].name, "Omelette");

        let out = h.pipeline.capture(jpeg(), None).await.unwrap();
        assert_eq!(out.records[0].name, "Apple pie");
        assert_eq!(h.ledger.lock().await.today().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn midnight_crossing_drops_records_and_image() {
        let fake = FakeInference::with_delay(Duration::from_secs(10));
        fake.push_analysis(Ok(analysis(vec![item("Burger", 600.0, 0.9)])));
        let h = harness(fake).await;
        h.clock.set(datetime!(2026-06-15 23:59:55 +02:00));

        let capture = {
            let p = h.pipeline.clone();
            tokio::spawn(async move { p.capture(jpeg(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.clock.set(datetime!(2026-06-16 00:00:05 +02:00));

        let out = capture.await.unwrap().unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.dropped, 1);
        assert!(out.inline.is_none());
        let ledger = h.ledger.lock().await;
        assert_eq!(ledger.len(), 0);
        assert!(ledger.pending_placeholder().is_none());
        assert!(h.images.keys().is_empty());
    }

    #[tokio::test]
    async fn log_by_name_appends_estimate() {
        let fake = FakeInference::default();
        fake.push_estimate(Ok(NameEstimate {
            name: "Greek yogurt".into(),
            calories: 130.0,
            protein: 11.0,
            carbs: 6.0,
            fat: 7.0,
            fiber: 0.0,
            sugar: 6.0,
            sodium: 50.0,
            serving_description: Some("1 cup".into()),
            confidence: 0.9,
        }));
        let h = harness(fake).await;

        let (record, outcome) = h
            .pipeline
            .log_by_name("greek yogurt", Some(MealType::Snack))
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(record.nutrients.calories, 130.0);
        assert_eq!(record.portion_size.as_deref(), Some("1 cup"));
        assert_eq!(h.ledger.lock().await.today()[0].id, record.id);
    }

    #[tokio::test]
    async fn log_by_name_fallback_still_logs_a_row() {
        let h = harness(FakeInference::default()).await;
        let (record, _) = h.pipeline.log_by_name("mystery stew", None).await.unwrap();
        assert_eq!(record.name, "mystery stew");
        assert_eq!(record.nutrients.calories, 0.0);
        assert_eq!(h.ledger.lock().await.len(), 1);
    }
}
