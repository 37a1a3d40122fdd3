use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

/// Name carried by the transient "analysis in progress" entry.
pub const PLACEHOLDER_NAME: &str = "Analyzing food...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    /// Tie-break priority order, highest first.
    pub const ALL: [MealType; 4] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
    ];

    /// Fixed wall-clock bands: 04:00-10:00 breakfast, 10:00-15:30 lunch,
    /// 17:00-24:00 dinner, anything else is a snack.
    pub fn from_time(ts: OffsetDateTime) -> Self {
        let minutes = u32::from(ts.hour()) * 60 + u32::from(ts.minute());
        match minutes {
            240..=599 => MealType::Breakfast,
            600..=929 => MealType::Lunch,
            1020..=1439 => MealType::Dinner,
            _ => MealType::Snack,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Some(MealType::Breakfast),
            "lunch" => Some(MealType::Lunch),
            "dinner" => Some(MealType::Dinner),
            "snack" | "snacks" => Some(MealType::Snack),
            _ => None,
        }
    }

    /// Explicit choice when given, otherwise derived from `ts`.
    pub fn resolve(explicit: Option<MealType>, ts: OffsetDateTime) -> Self {
        explicit.unwrap_or_else(|| Self::from_time(ts))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nutrient amounts. Calories in kcal, sodium in mg, the rest in grams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
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
}

impl Nutrients {
    /// Same factor on every field so macro ratios are preserved.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            protein: self.protein * factor,
            carbs: self.carbs * factor,
            fat: self.fat * factor,
            fiber: self.fiber * factor,
            sugar: self.sugar * factor,
            sodium: self.sodium * factor,
        }
    }

    /// Negative, NaN and infinite amounts become zero.
    pub fn sanitized(&self) -> Self {
        Self {
            calories: clamp_nutrient(self.calories),
            protein: clamp_nutrient(self.protein),
            carbs: clamp_nutrient(self.carbs),
            fat: clamp_nutrient(self.fat),
            fiber: clamp_nutrient(self.fiber),
            sugar: clamp_nutrient(self.sugar),
            sodium: clamp_nutrient(self.sodium),
        }
    }
}

impl Add for Nutrients {
    type Output = Nutrients;

    fn add(mut self, rhs: Nutrients) -> Nutrients {
        self += rhs;
        self
    }
}

impl AddAssign for Nutrients {
    fn add_assign(&mut self, rhs: Nutrients) {
        self.calories += rhs.calories;
        self.protein += rhs.protein;
        self.carbs += rhs.carbs;
        self.fat += rhs.fat;
        self.fiber += rhs.fiber;
        self.sugar += rhs.sugar;
        self.sodium += rhs.sodium;
    }
}

pub fn clamp_nutrient(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// One logged entry. Edits build a new value with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub nutrients: Nutrients,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub meal_type: MealType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portion_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_character: Option<String>,
    /// Key into the image content store; the payload itself never lives here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<Uuid>,
}

impl NutritionRecord {
    pub fn new(
        name: impl Into<String>,
        nutrients: Nutrients,
        timestamp: OffsetDateTime,
        meal_type: MealType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nutrients: nutrients.sanitized(),
            timestamp,
            meal_type,
            ingredients: None,
            location: None,
            portion_size: None,
            macro_character: None,
            image_id: None,
        }
    }

    pub fn placeholder(timestamp: OffsetDateTime, meal_type: MealType) -> Self {
        Self::new(PLACEHOLDER_NAME, Nutrients::default(), timestamp, meal_type)
    }
}

/// Partial edit. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEdit {
    pub name: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: Option<f64>,
    pub meal_type: Option<MealType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub ingredients: Option<Vec<String>>,
    pub location: Option<String>,
    pub portion_size: Option<String>,
    pub macro_character: Option<String>,
}

impl RecordEdit {
    /// Builds the edited record. Invalid amounts are clamped to zero rather
    /// than rejected.
    pub fn apply(&self, current: &NutritionRecord) -> NutritionRecord {
        let pick = |field: &'static str, new: Option<f64>, old: f64| match new {
            Some(v) => {
                let clamped = clamp_nutrient(v);
                if clamped != v {
                    warn!(record_id = %current.id, field, value = v, "invalid nutrient edit clamped to zero");
                }
                clamped
            }
            None => old,
        };
        let n = &current.nutrients;
        NutritionRecord {
            id: current.id,
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| current.name.clone()),
            nutrients: Nutrients {
                calories: pick("calories", self.calories, n.calories),
                protein: pick("protein", self.protein, n.protein),
                carbs: pick("carbs", self.carbs, n.carbs),
                fat: pick("fat", self.fat, n.fat),
                fiber: pick("fiber", self.fiber, n.fiber),
                sugar: pick("sugar", self.sugar, n.sugar),
                sodium: pick("sodium", self.sodium, n.sodium),
            },
            timestamp: self.timestamp.unwrap_or(current.timestamp),
            meal_type: self.meal_type.unwrap_or(current.meal_type),
            ingredients: self.ingredients.clone().or_else(|| current.ingredients.clone()),
            location: self.location.clone().or_else(|| current.location.clone()),
            portion_size: self.portion_size.clone().or_else(|| current.portion_size.clone()),
            macro_character: self
                .macro_character
                .clone()
                .or_else(|| current.macro_character.clone()),
            image_id: current.image_id,
        }
    }
}

/// Lenient numeric parse for user-typed amounts ("12.5", "120 kcal", "-3").
/// Anything unparsable or negative yields zero.
pub fn parse_amount(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().map(clamp_nutrient).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn meal_type_time_bands() {
        let at = |h: u8, m: u8| datetime!(2026-05-01 00:00 UTC).replace_time(time::Time::from_hms(h, m, 0).unwrap());
        assert_eq!(MealType::from_time(at(3, 59)), MealType::Snack);
        assert_eq!(MealType::from_time(at(4, 0)), MealType::Breakfast);
        assert_eq!(MealType::from_time(at(9, 59)), MealType::Breakfast);
        assert_eq!(MealType::from_time(at(10, 0)), MealType::Lunch);
        assert_eq!(MealType::from_time(at(15, 29)), MealType::Lunch);
        assert_eq!(MealType::from_time(at(15, 30)), MealType::Snack);
        assert_eq!(MealType::from_time(at(16, 59)), MealType::Snack);
        assert_eq!(MealType::from_time(at(17, 0)), MealType::Dinner);
        assert_eq!(MealType::from_time(at(23, 59)), MealType::Dinner);
        assert_eq!(MealType::from_time(at(0, 0)), MealType::Snack);
    }

    #[test]
    fn meal_type_parse_is_lenient() {
        assert_eq!(MealType::parse(" Lunch "), Some(MealType::Lunch));
        assert_eq!(MealType::parse("SNACKS"), Some(MealType::Snack));
        assert_eq!(MealType::parse("brunch"), None);
    }

    #[test]
    fn new_record_clamps_negative_macros() {
        let n = Nutrients {
            calories: -10.0,
            protein: f64::NAN,
            carbs: 5.0,
            ..Default::default()
        };
        let r = NutritionRecord::new("x", n, datetime!(2026-05-01 12:00 UTC), MealType::Lunch);
        assert_eq!(r.nutrients.calories, 0.0);
        assert_eq!(r.nutrients.protein, 0.0);
        assert_eq!(r.nutrients.carbs, 5.0);
    }

    #[test]
    fn edit_keeps_id_and_clamps() {
        let r = NutritionRecord::new(
            "Oatmeal",
            Nutrients {
                calories: 150.0,
                protein: 5.0,
                ..Default::default()
            },
            datetime!(2026-05-01 08:00 UTC),
            MealType::Breakfast,
        );
        let edit = RecordEdit {
            name: Some("Oatmeal with berries".into()),
            calories: Some(210.0),
            protein: Some(-4.0),
            ..Default::default()
        };
        let edited = edit.apply(&r);
        assert_eq!(edited.id, r.id);
        assert_eq!(edited.name, "Oatmeal with berries");
        assert_eq!(edited.nutrients.calories, 210.0);
        assert_eq!(edited.nutrients.protein, 0.0);
        assert_eq!(edited.meal_type, MealType::Breakfast);
        assert_eq!(edited.timestamp, r.timestamp);
    }

    #[test]
    fn record_serializes_flat_with_rfc3339_timestamp() {
        let r = NutritionRecord::new(
            "Apple",
            Nutrients {
                calories: 95.0,
                ..Default::default()
            },
            datetime!(2026-05-01 15:45:10 +02:00),
            MealType::Snack,
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["calories"], 95.0);
        assert_eq!(json["timestamp"], "2026-05-01T15:45:10+02:00");
        assert_eq!(json["meal_type"], "snack");
        assert!(json.get("image_id").is_none());
        let back: NutritionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn parse_amount_is_lenient() {
        assert_eq!(parse_amount("12.5"), 12.5);
        assert_eq!(parse_amount("120 kcal"), 120.0);
        assert_eq!(parse_amount("-3"), 0.0);
        assert_eq!(parse_amount("abc"), 0.0);
        assert_eq!(parse_amount(""), 0.0);
    }
}
