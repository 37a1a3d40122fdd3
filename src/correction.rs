//! Calorie correction for AI-detected foods.
//!
//! Single-ingredient recognition of a composite dish tends to undercount, so
//! below a few calorie floors the detected values are scaled up. A portion
//! label scales everything as well. Both factors compose multiplicatively and
//! are applied to every nutrient field alike.

use crate::meals::model::MealType;

/// Underestimation heuristics only fire below this many kcal.
const UNDERESTIMATE_CEILING: f64 = 150.0;

const COMPOSITE_KEYWORDS: &[&str] = &[
    "pasta", "rice", "noodle", "pizza", "burger", "sandwich", "wrap", "burrito", "taco", "curry",
    "stir-fry", "stir fry", "casserole", "spaghetti", "penne", "fettuccine", "linguine",
    "macaroni", "lasagna", "lasagne", "ravioli", "rigatoni", "fusilli", "tortellini", "farfalle",
    "orzo",
];

const LOW_CALORIE_VEGETABLES: &[&str] = &[
    "broccoli", "spinach", "lettuce", "cucumber", "celery", "kale", "cabbage", "zucchini",
    "asparagus", "cauliflower", "green bean", "bell pepper", "tomato", "mushroom", "brussels",
    "arugula", "bok choy",
];

/// Input for one detected food.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionInput<'a> {
    pub name: &'a str,
    pub raw_calories: f64,
    pub meal_type: MealType,
    pub co_detected: usize,
    pub portion_label: Option<&'a str>,
}

/// Combined multiplier for one detected food.
pub fn correct(input: &CorrectionInput<'_>) -> f64 {
    portion_multiplier(input.portion_label)
        * underestimation_multiplier(
            input.name,
            input.raw_calories,
            input.meal_type,
            input.co_detected,
        )
}

/// small 0.75, large 1.5; medium, missing and unrecognized labels are 1.0.
pub fn portion_multiplier(label: Option<&str>) -> f64 {
    match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("small") => 0.75,
        Some("large") => 1.5,
        _ => 1.0,
    }
}

pub fn underestimation_multiplier(
    name: &str,
    raw_calories: f64,
    meal_type: MealType,
    co_detected: usize,
) -> f64 {
    if !(raw_calories < UNDERESTIMATE_CEILING) {
        return 1.0;
    }
    let name = name.to_lowercase();
    let composite = contains_any(&name, COMPOSITE_KEYWORDS);
    let single = co_detected == 1;
    let snack = meal_type == MealType::Snack;

    if composite {
        return if raw_calories < 50.0 {
            5.0
        } else if raw_calories < 80.0 {
            4.0
        } else if raw_calories < 120.0 {
            3.0
        } else {
            2.0
        };
    }

    if !snack && contains_any(&name, LOW_CALORIE_VEGETABLES) {
        return if single && raw_calories < 80.0 {
            3.0
        } else if raw_calories < 100.0 {
            2.0
        } else {
            1.0
        };
    }

    if !snack && single && raw_calories < 80.0 {
        return 2.5;
    }

    1.0
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|k| haystack.contains(k))
}
