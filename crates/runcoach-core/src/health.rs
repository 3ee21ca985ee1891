//! Personal AQI threshold, budget limit and risk ladder.

use serde::{Deserialize, Serialize};

/// Threshold used as the reference point for budget scaling.
pub const REFERENCE_THRESHOLD_AQI: f64 = 75.0;
/// Share of the weekly limit a single day may use.
pub const DAILY_SHARE_OF_WEEK: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Rest,
    Light,
    #[default]
    Moderate,
    Vigorous,
}

impl ActivityLevel {
    pub fn base_threshold(self) -> f64 {
        match self {
            ActivityLevel::Rest => 150.0,
            ActivityLevel::Light => 100.0,
            ActivityLevel::Moderate => 75.0,
            ActivityLevel::Vigorous => 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCondition {
    Asthma,
    Copd,
    HeartDisease,
    Allergies,
    Pregnancy,
    Diabetes,
    Hypertension,
}

impl HealthCondition {
    pub fn threshold_multiplier(self) -> f64 {
        match self {
            HealthCondition::Asthma => 0.6,
            HealthCondition::Copd => 0.5,
            HealthCondition::HeartDisease => 0.65,
            HealthCondition::Allergies => 0.8,
            HealthCondition::Pregnancy => 0.7,
            HealthCondition::Diabetes => 0.85,
            HealthCondition::Hypertension => 0.8,
        }
    }

    pub fn is_respiratory(self) -> bool {
        matches!(self, HealthCondition::Asthma | HealthCondition::Copd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "0-12")]
    Child,
    #[serde(rename = "13-17")]
    Teen,
    #[serde(rename = "18-24")]
    YoungAdult,
    #[serde(rename = "25-34")]
    Adult,
    #[serde(rename = "35-44")]
    Adult35,
    #[serde(rename = "45-54")]
    Adult45,
    #[serde(rename = "55-64")]
    Adult55,
    #[serde(rename = "65+")]
    Senior,
}

impl AgeGroup {
    pub fn multiplier(self) -> f64 {
        match self {
            AgeGroup::Child => 0.6,
            AgeGroup::Teen => 0.8,
            AgeGroup::YoungAdult | AgeGroup::Adult => 1.0,
            AgeGroup::Adult35 => 0.95,
            AgeGroup::Adult45 => 0.9,
            AgeGroup::Adult55 => 0.8,
            AgeGroup::Senior => 0.7,
        }
    }
}

/// Multiplier applied when no age group is on file.
const UNKNOWN_AGE_MULTIPLIER: f64 = 0.9;

/// Runner health and sensitivity profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthProfile {
    #[serde(default)]
    pub activity_level: ActivityLevel,
    #[serde(default)]
    pub age_group: Option<AgeGroup>,
    #[serde(default)]
    pub conditions: Vec<HealthCondition>,
    #[serde(default)]
    pub vo2_max: Option<f64>,
    #[serde(default)]
    pub resting_hr: Option<f64>,
    #[serde(default)]
    pub hrv_ms: Option<f64>,
    #[serde(default)]
    pub pollen_sensitive: bool,
    /// Explicit exposure weighting, replaces the condition-derived one
    #[serde(default)]
    pub elevated_weighting: Option<f64>,
}

impl HealthProfile {
    pub fn has_respiratory_condition(&self) -> bool {
        self.conditions.iter().any(|c| c.is_respiratory())
    }

    pub fn has_heart_condition(&self) -> bool {
        self.conditions.contains(&HealthCondition::HeartDisease)
    }

    pub fn validate(&self) -> Result<(), crate::CoreError> {
        let checks = [
            ("vo2_max", self.vo2_max),
            ("resting_hr", self.resting_hr),
            ("hrv_ms", self.hrv_ms),
            ("elevated_weighting", self.elevated_weighting),
        ];
        for (field, value) in checks {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(crate::CoreError::Validation(format!(
                        "{} must be a positive number, got {}",
                        field, v
                    )));
                }
            }
        }
        Ok(())
    }
}

fn fitness_multiplier(profile: &HealthProfile) -> f64 {
    let mut multiplier = 1.0;
    if let Some(vo2) = profile.vo2_max {
        if vo2 < 35.0 {
            multiplier *= 0.85;
        } else if vo2 > 60.0 {
            multiplier *= 1.25;
        } else if vo2 > 50.0 {
            multiplier *= 1.15;
        }
    }
    if let Some(hr) = profile.resting_hr {
        if hr > 80.0 {
            multiplier *= 0.9;
        } else if hr < 45.0 {
            multiplier *= 1.2;
        } else if hr < 55.0 {
            multiplier *= 1.1;
        }
    }
    f64::clamp(multiplier, 0.8, 1.3)
}

fn hrv_multiplier(profile: &HealthProfile) -> f64 {
    match profile.hrv_ms {
        Some(hrv) if hrv < 30.0 => 0.85,
        Some(hrv) if hrv < 50.0 => 0.95,
        Some(hrv) if hrv > 70.0 => 1.1,
        _ => 1.0,
    }
}

/// AQI above which outdoor running is considered unsafe for this runner.
pub fn personal_threshold(profile: &HealthProfile) -> f64 {
    let condition = profile
        .conditions
        .iter()
        .map(|c| c.threshold_multiplier())
        .fold(1.0, f64::min);
    let age = profile
        .age_group
        .map(AgeGroup::multiplier)
        .unwrap_or(UNKNOWN_AGE_MULTIPLIER);

    profile.activity_level.base_threshold()
        * condition
        * age
        * fitness_multiplier(profile)
        * hrv_multiplier(profile)
}

/// Weekly limit in exposure units. Lower thresholds give smaller budgets.
pub fn budget_limit_units(weekly_base_units: f64, threshold: f64) -> f64 {
    (weekly_base_units * threshold / REFERENCE_THRESHOLD_AQI).max(f64::EPSILON)
}

pub fn daily_limit_units(weekly_limit_units: f64) -> f64 {
    weekly_limit_units * DAILY_SHARE_OF_WEEK
}

/// Weight applied to every sample's contribution when scoring a route.
pub fn sensitivity_multiplier(profile: &HealthProfile) -> f64 {
    if let Some(weight) = profile.elevated_weighting {
        return weight;
    }
    if profile.has_respiratory_condition() {
        2.0
    } else if profile.has_heart_condition() {
        1.5
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

/// Risk ladder over `consumed / limit`.
pub fn risk_level(usage_ratio: f64) -> RiskLevel {
    if usage_ratio < 0.5 {
        RiskLevel::VeryLow
    } else if usage_ratio < 0.75 {
        RiskLevel::Low
    } else if usage_ratio < 1.0 {
        RiskLevel::Moderate
    } else if usage_ratio < 1.5 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_adult_gets_moderate_base() {
        let profile = HealthProfile {
            age_group: Some(AgeGroup::Adult),
            ..Default::default()
        };
        assert!((personal_threshold(&profile) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn most_severe_condition_wins() {
        let profile = HealthProfile {
            age_group: Some(AgeGroup::Adult),
            conditions: vec![HealthCondition::Allergies, HealthCondition::Copd],
            ..Default::default()
        };
        assert!((personal_threshold(&profile) - 37.5).abs() < 1e-9);
    }

    #[test]
    fn fitness_multiplier_is_clamped() {
        let profile = HealthProfile {
            vo2_max: Some(65.0),
            resting_hr: Some(40.0),
            ..Default::default()
        };
        // 1.25 * 1.2 = 1.5, capped at 1.3
        assert!((fitness_multiplier(&profile) - 1.3).abs() < 1e-9);
    }

    #[test]
    fn unknown_age_uses_default_multiplier() {
        let profile = HealthProfile::default();
        assert!((personal_threshold(&profile) - 75.0 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn budget_scales_with_threshold() {
        assert!((budget_limit_units(1000.0, 75.0) - 1000.0).abs() < 1e-9);
        assert!((budget_limit_units(1000.0, 37.5) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn daily_limit_is_a_fifth_of_the_week() {
        assert!((daily_limit_units(900.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn sensitivity_prefers_explicit_weighting() {
        let mut profile = HealthProfile {
            conditions: vec![HealthCondition::Asthma],
            ..Default::default()
        };
        assert_eq!(sensitivity_multiplier(&profile), 2.0);
        profile.elevated_weighting = Some(1.3);
        assert_eq!(sensitivity_multiplier(&profile), 1.3);
    }

    #[test]
    fn risk_ladder_boundaries() {
        assert_eq!(risk_level(0.0), RiskLevel::VeryLow);
        assert_eq!(risk_level(0.5), RiskLevel::Low);
        assert_eq!(risk_level(0.99), RiskLevel::Moderate);
        assert_eq!(risk_level(1.07), RiskLevel::High);
        assert_eq!(risk_level(2.0), RiskLevel::VeryHigh);
    }

    #[test]
    fn profile_deserializes_age_labels() {
        let profile: HealthProfile = serde_json::from_str(
            r#"{"activity_level":"vigorous","age_group":"65+","conditions":["heart_disease"]}"#,
        )
        .unwrap();
        assert_eq!(profile.age_group, Some(AgeGroup::Senior));
        assert_eq!(profile.conditions, vec![HealthCondition::HeartDisease]);
    }
}
