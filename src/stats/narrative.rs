use async_trait::async_trait;
use serde::Serialize;
use time::Date;

use super::{wall_clock, DailyStatistics};
use crate::meals::model::{MealType, NutritionRecord};
use crate::widget::round1;

/// Fixed instruction shipped with every narrative request.
pub const USE_PROVIDED_AGGREGATES: &str = "Use the provided aggregates verbatim. \
Today's totals are statistics.totalCalories and statistics.totalMacros; do not add up the \
records or the per-meal-type figures yourself. The largest meal is statistics.largestMealType; \
if it is null, do not name a largest meal. The single biggest item is statistics.largestRecord \
and is not the same thing as the largest meal.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRecord {
    pub name: String,
    pub meal_type: MealType,
    pub time: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

/// Everything the external summary writer receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRequest {
    pub instructions: &'static str,
    pub date: String,
    pub records: Vec<NarrativeRecord>,
    pub statistics: DailyStatistics,
}

/// External writer of the end-of-day summary.
#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn summarize(&self, request: &NarrativeRequest) -> anyhow::Result<String>;
}

/// Records are listed oldest first, which reads naturally in a summary.
pub fn build_request(date: Date, records: &[NutritionRecord], statistics: DailyStatistics) -> NarrativeRequest {
    let mut sorted: Vec<&NutritionRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);
    NarrativeRequest {
        instructions: USE_PROVIDED_AGGREGATES,
        date: date.to_string(),
        records: sorted
            .into_iter()
            .map(|r| NarrativeRecord {
                name: r.name.clone(),
                meal_type: r.meal_type,
                time: wall_clock(r.timestamp),
                calories: round1(r.nutrients.calories),
                protein: round1(r.nutrients.protein),
                carbs: round1(r.nutrients.carbs),
                fat: round1(r.nutrients.fat),
            })
            .collect(),
        statistics,
    }
}
