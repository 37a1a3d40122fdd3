//! Today's totals mirrored to the home-screen widget's shared key/value
//! store. The store lives outside this process and gives no transactional
//! guarantee, so writes are debounced and verified by reading back.

pub mod publisher;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meals::model::Nutrients;

pub const KEY_TODAY_CALORIES: &str = "today_calories";
pub const KEY_TODAY_PROTEIN: &str = "today_protein";
pub const KEY_TODAY_CARBS: &str = "today_carbs";
pub const KEY_TODAY_FAT: &str = "today_fat";
pub const KEY_TODAY_ITEM_COUNT: &str = "today_item_count";
pub const KEY_GOAL_CALORIES: &str = "goal_calories";
pub const KEY_GOAL_PROTEIN: &str = "goal_protein";
pub const KEY_GOAL_CARBS: &str = "goal_carbs";
pub const KEY_GOAL_FAT: &str = "goal_fat";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Goals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            calories: 2000.0,
            protein: 150.0,
            carbs: 250.0,
            fat: 65.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidgetSnapshot {
    pub today_calories: f64,
    pub today_protein: f64,
    pub today_carbs: f64,
    pub today_fat: f64,
    pub today_item_count: u64,
    pub goals: Goals,
}

impl WidgetSnapshot {
    /// Values are rounded to one decimal so read-back comparison is stable.
    pub fn new(totals: &Nutrients, item_count: usize, goals: Goals) -> Self {
        Self {
            today_calories: round1(totals.calories),
            today_protein: round1(totals.protein),
            today_carbs: round1(totals.carbs),
            today_fat: round1(totals.fat),
            today_item_count: item_count as u64,
            goals,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert(KEY_TODAY_CALORIES.into(), Value::from(self.today_calories));
        m.insert(KEY_TODAY_PROTEIN.into(), Value::from(self.today_protein));
        m.insert(KEY_TODAY_CARBS.into(), Value::from(self.today_carbs));
        m.insert(KEY_TODAY_FAT.into(), Value::from(self.today_fat));
        m.insert(KEY_TODAY_ITEM_COUNT.into(), Value::from(self.today_item_count));
        m.insert(KEY_GOAL_CALORIES.into(), Value::from(self.goals.calories));
        m.insert(KEY_GOAL_PROTEIN.into(), Value::from(self.goals.protein));
        m.insert(KEY_GOAL_CARBS.into(), Value::from(self.goals.carbs));
        m.insert(KEY_GOAL_FAT.into(), Value::from(self.goals.fat));
        m
    }

    /// `None` when any key is missing or not a number.
    pub fn from_map(m: &BTreeMap<String, Value>) -> Option<Self> {
        let num = |k: &str| m.get(k).and_then(Value::as_f64);
        Some(Self {
            today_calories: num(KEY_TODAY_CALORIES)?,
            today_protein: num(KEY_TODAY_PROTEIN)?,
            today_carbs: num(KEY_TODAY_CARBS)?,
            today_fat: num(KEY_TODAY_FAT)?,
            today_item_count: m.get(KEY_TODAY_ITEM_COUNT).and_then(Value::as_u64)?,
            goals: Goals {
                calories: num(KEY_GOAL_CALORIES)?,
                protein: num(KEY_GOAL_PROTEIN)?,
                carbs: num(KEY_GOAL_CARBS)?,
                fat: num(KEY_GOAL_FAT)?,
            },
        })
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_round_trip_uses_fixed_keys() {
        let s = WidgetSnapshot::new(
            &Nutrients {
                calories: 1234.56,
                protein: 80.04,
                carbs: 150.0,
                fat: 40.25,
                ..Default::default()
            },
            5,
            Goals::default(),
        );
        let m = s.to_map();
        assert_eq!(m.len(), 9);
        assert_eq!(m[KEY_TODAY_CALORIES], Value::from(1234.6));
        assert_eq!(m[KEY_TODAY_ITEM_COUNT], Value::from(5u64));
        assert_eq!(WidgetSnapshot::from_map(&m), Some(s));
    }

    #[test]
    fn missing_key_is_none() {
        let mut m = WidgetSnapshot::new(&Nutrients::default(), 0, Goals::default()).to_map();
        m.remove(KEY_GOAL_FAT);
        assert_eq!(WidgetSnapshot::from_map(&m), None);
    }
}
