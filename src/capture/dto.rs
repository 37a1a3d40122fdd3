use serde::Deserialize;

use crate::meals::model::MealType;

#[derive(Debug, Default, Deserialize)]
pub struct CaptureQuery {
    pub meal_type: Option<String>,
}

/// POST /captures/base64 { image_b64: "...", meal_type?: "lunch" }
#[derive(Debug, Deserialize)]
pub struct CaptureBase64 {
    pub image_b64: String,
    pub meal_type: Option<MealType>,
}
