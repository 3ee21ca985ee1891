//! Per-AQI activity advice relative to a runner's personal threshold.

use serde::Serialize;

use crate::health::{HealthCondition, HealthProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionStatus {
    Excellent,
    Good,
    Moderate,
    Poor,
    Hazardous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suitability {
    Recommended,
    Limited,
    NotRecommended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Normal,
    Moderate,
    Easy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLength {
    Normal,
    Reduced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Moderate,
    Easy,
    Walk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConditions {
    pub status: ConditionStatus,
    pub advice: &'static str,
    pub aqi: f64,
    pub threshold_aqi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityAdvice {
    pub suitability: Suitability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Intensity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<SessionLength>,
    pub notes: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecommendations {
    pub current: CurrentConditions,
    pub running: ActivityAdvice,
    pub cycling: ActivityAdvice,
    pub walking: ActivityAdvice,
    pub outdoor_sports: ActivityAdvice,
}

fn advice(
    suitability: Suitability,
    intensity: Option<Intensity>,
    length: Option<SessionLength>,
    notes: &'static str,
) -> ActivityAdvice {
    ActivityAdvice {
        suitability,
        intensity,
        length,
        notes,
    }
}

pub fn current_conditions(aqi: f64, threshold: f64) -> CurrentConditions {
    let (status, advice) = if aqi < threshold * 0.5 {
        (ConditionStatus::Excellent, "Perfect conditions for outdoor exercise")
    } else if aqi < threshold * 0.75 {
        (ConditionStatus::Good, "Good conditions for outdoor activities")
    } else if aqi < threshold {
        (
            ConditionStatus::Moderate,
            "Consider shorter duration or reduced intensity",
        )
    } else if aqi < threshold * 1.5 {
        (
            ConditionStatus::Poor,
            "Limit outdoor activity, consider indoor alternatives",
        )
    } else {
        (ConditionStatus::Hazardous, "Avoid outdoor exercise, stay indoors")
    };
    CurrentConditions {
        status,
        advice,
        aqi,
        threshold_aqi: threshold,
    }
}

pub fn running_advice(aqi: f64, threshold: f64) -> ActivityAdvice {
    use Suitability::*;
    if aqi < threshold * 0.5 {
        advice(
            Recommended,
            Some(Intensity::Normal),
            Some(SessionLength::Normal),
            "Excellent conditions for running",
        )
    } else if aqi < threshold * 0.75 {
        advice(
            Recommended,
            Some(Intensity::Moderate),
            Some(SessionLength::Normal),
            "Good conditions, stay hydrated",
        )
    } else if aqi < threshold {
        advice(
            Recommended,
            Some(Intensity::Easy),
            Some(SessionLength::Reduced),
            "Run at easy pace, consider shorter route",
        )
    } else {
        advice(
            NotRecommended,
            None,
            None,
            "Consider indoor treadmill or postpone",
        )
    }
}

/// Cycling breathes harder than running, so its threshold is lowered.
pub fn cycling_advice(aqi: f64, threshold: f64) -> ActivityAdvice {
    let threshold = threshold * 0.85;
    if aqi < threshold * 0.5 {
        advice(
            Suitability::Recommended,
            Some(Intensity::Normal),
            None,
            "Great conditions for cycling",
        )
    } else if aqi < threshold {
        advice(
            Suitability::Recommended,
            Some(Intensity::Moderate),
            None,
            "Moderate pace recommended, avoid high-traffic areas",
        )
    } else {
        advice(
            Suitability::NotRecommended,
            None,
            None,
            "Indoor cycling recommended",
        )
    }
}

pub fn walking_advice(aqi: f64, threshold: f64) -> ActivityAdvice {
    if aqi < threshold * 1.3 {
        advice(
            Suitability::Recommended,
            None,
            Some(SessionLength::Normal),
            "Walking is fine, choose parks if available",
        )
    } else {
        advice(
            Suitability::NotRecommended,
            None,
            None,
            "Limit time outdoors",
        )
    }
}

pub fn sports_advice(aqi: f64, threshold: f64) -> ActivityAdvice {
    if aqi < threshold * 0.6 {
        advice(
            Suitability::Recommended,
            None,
            None,
            "Good conditions for outdoor sports",
        )
    } else if aqi < threshold {
        advice(
            Suitability::Limited,
            None,
            None,
            "Light activities only, frequent breaks",
        )
    } else {
        advice(
            Suitability::NotRecommended,
            None,
            None,
            "Move activities indoors",
        )
    }
}

pub fn activity_recommendations(aqi: f64, threshold: f64) -> ActivityRecommendations {
    ActivityRecommendations {
        current: current_conditions(aqi, threshold),
        running: running_advice(aqi, threshold),
        cycling: cycling_advice(aqi, threshold),
        walking: walking_advice(aqi, threshold),
        outdoor_sports: sports_advice(aqi, threshold),
    }
}

/// Pace for a stretch of route at `aqi`. The cut-off starts at AQI 100 and
/// shrinks for each respiratory condition on file.
pub fn recommended_pace(aqi: f64, profile: &HealthProfile) -> Pace {
    let mut cutoff = 100.0;
    if profile.conditions.contains(&HealthCondition::Asthma) {
        cutoff *= 0.6;
    }
    if profile.conditions.contains(&HealthCondition::Copd) {
        cutoff *= 0.5;
    }

    if aqi > cutoff {
        Pace::Walk
    } else if aqi > cutoff * 0.7 {
        Pace::Easy
    } else {
        Pace::Moderate
    }
}
