//! Deterministic statistics over today's records.
//!
//! `total_macros` / `total_calories` are the one source of truth for the
//! day's totals. Consumers must not re-add the per-meal-type figures.

pub mod handlers;
pub mod narrative;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::meals::model::{MealType, NutritionRecord};
use crate::widget::round1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacroTotals {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealTypeStats {
    pub meal_type: MealType,
    pub count: usize,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    /// Share of the day's calories, one decimal. Shares add up to exactly
    /// 100 whenever the day has any calories.
    pub calorie_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LargestRecord {
    pub id: Uuid,
    pub name: String,
    pub calories: f64,
    pub meal_type: MealType,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatistics {
    pub record_count: usize,
    /// Always all four meal types, in breakfast, lunch, dinner, snack order.
    pub meal_types: Vec<MealTypeStats>,
    pub total_calories: f64,
    pub total_macros: MacroTotals,
    pub earliest_time: Option<String>,
    pub latest_time: Option<String>,
    /// Never set when no meal type has calories.
    pub largest_meal_type: Option<MealType>,
    pub largest_record: Option<LargestRecord>,
}

impl DailyStatistics {
    pub fn meal_type(&self, meal_type: MealType) -> &MealTypeStats {
        // meal_types always holds all four in `MealType::ALL` order
        &self.meal_types[MealType::ALL
            .iter()
            .position(|m| *m == meal_type)
            .unwrap_or_default()]
    }
}

#[derive(Default, Clone, Copy)]
struct Acc {
    count: usize,
    calories: f64,
    protein: f64,
    carbs: f64,
    fat: f64,
}

/// Pure and total: any slice of records, in any order.
pub fn extract(records: &[NutritionRecord]) -> DailyStatistics {
    let mut per_type = [Acc::default(); 4];
    let mut total = Acc::default();
    for r in records {
        let slot = &mut per_type[meal_index(r.meal_type)];
        for acc in [slot, &mut total] {
            acc.count += 1;
            acc.calories += r.nutrients.calories;
            acc.protein += r.nutrients.protein;
            acc.carbs += r.nutrients.carbs;
            acc.fat += r.nutrients.fat;
        }
    }

    let percentages = calorie_percentages(&per_type.map(|a| a.calories));
    let meal_types = MealType::ALL
        .iter()
        .zip(per_type.iter())
        .zip(percentages)
        .map(|((meal_type, acc), pct)| MealTypeStats {
            meal_type: *meal_type,
            count: acc.count,
            calories: round1(acc.calories),
            protein: round1(acc.protein),
            carbs: round1(acc.carbs),
            fat: round1(acc.fat),
            calorie_percentage: pct,
        })
        .collect();

    let earliest = records.iter().map(|r| r.timestamp).min();
    let latest = records.iter().map(|r| r.timestamp).max();

    DailyStatistics {
        record_count: records.len(),
        meal_types,
        total_calories: round1(total.calories),
        total_macros: MacroTotals {
            protein: round1(total.protein),
            carbs: round1(total.carbs),
            fat: round1(total.fat),
        },
        earliest_time: earliest.map(wall_clock),
        latest_time: latest.map(wall_clock),
        largest_meal_type: largest_meal_type(&per_type),
        largest_record: largest_record(records),
    }
}

fn meal_index(m: MealType) -> usize {
    match m {
        MealType::Breakfast => 0,
        MealType::Lunch => 1,
        MealType::Dinner => 2,
        MealType::Snack => 3,
    }
}

/// Highest summed calories as reported (one decimal); earlier meal types win
/// ties; zero never wins.
fn largest_meal_type(per_type: &[Acc; 4]) -> Option<MealType> {
    let mut best: Option<(MealType, f64)> = None;
    for (meal_type, acc) in MealType::ALL.iter().zip(per_type) {
        let calories = round1(acc.calories);
        if calories <= 0.0 {
            continue;
        }
        if best.map_or(true, |(_, c)| calories > c) {
            best = Some((*meal_type, calories));
        }
    }
    best.map(|(m, _)| m)
}

/// First record with the most calories; none when every record is zero.
fn largest_record(records: &[NutritionRecord]) -> Option<LargestRecord> {
    let mut best: Option<&NutritionRecord> = None;
    for r in records {
        if r.nutrients.calories <= 0.0 {
            continue;
        }
        if best.map_or(true, |b| r.nutrients.calories > b.nutrients.calories) {
            best = Some(r);
        }
    }
    best.map(|r| LargestRecord {
        id: r.id,
        name: r.name.clone(),
        calories: round1(r.nutrients.calories),
        meal_type: r.meal_type,
        time: wall_clock(r.timestamp),
    })
}

/// `HH:MM` from the timestamp's own fields, with no zone conversion.
pub fn wall_clock(ts: OffsetDateTime) -> String {
    format!("{:02}:{:02}", ts.hour(), ts.minute())
}

/// Largest-remainder rounding to tenths so the shares total exactly 100.0.
fn calorie_percentages(calories: &[f64; 4]) -> [f64; 4] {
    let total: f64 = calories.iter().sum();
    if !(total > 0.0) {
        return [0.0; 4];
    }
    let exact: Vec<f64> = calories.iter().map(|c| c / total * 1000.0).collect();
    let mut tenths: Vec<i64> = exact.iter().map(|e| e.floor() as i64).collect();
    let mut leftover = 1000 - tenths.iter().sum::<i64>();
    let mut order: Vec<usize> = (0..4).collect();
    // biggest remainder first; stable sort keeps meal-type priority on ties
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    for i in order {
        if leftover <= 0 {
            break;
        }
        if calories[i] > 0.0 {
            tenths[i] += 1;
            leftover -= 1;
        }
    }
    let mut out = [0.0; 4];
    for (o, t) in out.iter_mut().zip(tenths) {
        *o = t as f64 / 10.0;
    }
    out
}
