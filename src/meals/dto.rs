use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::model::{MealType, NutritionRecord};
use crate::ledger::{DayTotals, NutritionTotals};

/// POST /records. Amounts arrive as typed by the user and are clamped, not
/// rejected.
#[derive(Debug, Deserialize)]
pub struct SaveRecordRequest {
    pub name: String,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default)]
    pub fiber: f64,
    #[serde(default)]
    pub sugar: f64,
    #[serde(default)]
    pub sodium: f64,
    pub meal_type: Option<MealType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub ingredients: Option<Vec<String>>,
    pub location: Option<String>,
    pub portion_size: Option<String>,
}

/// POST /records/estimate { name: "banana", meal_type?: "snack" }
#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub name: String,
    pub meal_type: Option<MealType>,
}

#[derive(Debug, Serialize)]
pub struct SavedRecordResponse {
    pub record: NutritionRecord,
    /// False when the record was not dated today and therefore not stored.
    pub stored: bool,
}

#[derive(Debug, Serialize)]
pub struct TodayResponse {
    pub date: String,
    pub records: Vec<NutritionRecord>,
    pub totals: NutritionTotals,
    pub analyzing: bool,
}

#[derive(Debug, Deserialize)]
pub struct TotalsQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub days: Vec<DayTotals>,
}
