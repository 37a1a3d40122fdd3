pub mod client;
pub mod parse;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::meals::model::Nutrients;
use parse::{lenient_confidence, lenient_f64, lenient_opt_string, lenient_strings};

/// One food the model found in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFood {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fiber: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sugar: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sodium: f64,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(default, alias = "portion_label", alias = "portionSize", deserialize_with = "lenient_opt_string")]
    pub portion_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub ingredients: Vec<String>,
    #[serde(default, alias = "macro_character", deserialize_with = "lenient_opt_string")]
    pub macro_character: Option<String>,
}

impl DetectedFood {
    /// A named item with a positive calorie count.
    pub fn is_usable(&self) -> bool {
        let name = self.name.trim().to_ascii_lowercase();
        !name.is_empty()
            && !name.starts_with("unidentified")
            && name != "unknown"
            && !name.starts_with("unknown ")
            && self.calories > 0.0
    }

    pub fn nutrients(&self) -> Nutrients {
        Nutrients {
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            fiber: self.fiber,
            sugar: self.sugar,
            sodium: self.sodium,
        }
        .sanitized()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodAnalysis {
    #[serde(default)]
    pub items: Vec<DetectedFood>,
    #[serde(default, alias = "overall_confidence", deserialize_with = "lenient_confidence")]
    pub overall_confidence: f64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub suggestions: Vec<String>,
}

impl FoodAnalysis {
    pub fn usable_items(&self) -> Vec<DetectedFood> {
        self.items.iter().filter(|i| i.is_usable()).cloned().collect()
    }
}

/// Nutrition guess for a typed-in food name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameEstimate {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fiber: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sugar: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sodium: f64,
    #[serde(default, alias = "serving_description", deserialize_with = "lenient_opt_string")]
    pub serving_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

impl NameEstimate {
    pub fn nutrients(&self) -> Nutrients {
        Nutrients {
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            fiber: self.fiber,
            sugar: self.sugar,
            sodium: self.sodium,
        }
        .sanitized()
    }
}

/// Remote food-recognition service. Implementations never fail on malformed
/// model output; only transport problems are errors.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn analyze_image(&self, image: Bytes) -> anyhow::Result<FoodAnalysis>;
    async fn estimate_from_name(&self, name: &str) -> anyhow::Result<NameEstimate>;
}

#[cfg(test)]
pub mod fake {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Scripted inference: pops one queued response per call.
    #[derive(Default)]
    pub struct FakeInference {
        analyses: Mutex<VecDeque<anyhow::Result<FoodAnalysis>>>,
        estimates: Mutex<VecDeque<anyhow::Result<NameEstimate>>>,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl FakeInference {
        pub fn with_analysis(analysis: FoodAnalysis) -> Self {
            let fake = Self::default();
            fake.push_analysis(Ok(analysis));
            fake
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn push_analysis(&self, result: anyhow::Result<FoodAnalysis>) {
            self.analyses.lock().unwrap().push_back(result);
        }

        pub fn push_estimate(&self, result: anyhow::Result<NameEstimate>) {
            self.estimates.lock().unwrap().push_back(result);
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceClient for FakeInference {
        async fn analyze_image(&self, _image: Bytes) -> anyhow::Result<FoodAnalysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.analyses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FoodAnalysis::default()))
        }

        async fn estimate_from_name(&self, name: &str) -> anyhow::Result<NameEstimate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.estimates
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(parse::fallback_estimate(name)))
        }
    }

    pub fn item(name: &str, calories: f64, confidence: f64) -> DetectedFood {
        DetectedFood {
            name: name.into(),
            calories,
            protein: calories / 20.0,
            carbs: calories / 10.0,
            fat: calories / 40.0,
            fiber: 1.0,
            sugar: 0.0,
            sodium: 0.0,
            confidence,
            portion_label: Some("medium".into()),
            ingredients: vec![],
            macro_character: None,
        }
    }
}
