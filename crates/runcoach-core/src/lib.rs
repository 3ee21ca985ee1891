pub mod advice;
pub mod budget;
pub mod candidates;
pub mod error;
pub mod health;
pub mod models;
pub mod sampler;
pub mod scorer;
pub mod selection;
pub mod spatial;
pub mod time_windows;
pub mod zones;

pub use advice::{
    activity_recommendations, recommended_pace, running_advice, ActivityRecommendations, Pace,
};
pub use budget::{canonical_total, exposure_units, iso_week_start, replay_week, WeekStatus};
pub use candidates::{
    filter_alternates, generate_candidates, generate_routes, CandidateConfig, RouteShape,
};
pub use error::CoreError;
pub use health::{
    budget_limit_units, daily_limit_units, personal_threshold, risk_level, sensitivity_multiplier,
    ActivityLevel, AgeGroup, HealthCondition, HealthProfile, RiskLevel,
};
pub use models::{
    Difficulty, ExposureBudget, ExposureSample, OptimizationResult, OptimizationType, Route,
    RouteExposureScore, RouteType, RunSession, TimeWindow, Waypoint, WindowQuality,
};
pub use sampler::{sample_route, SamplePoint, SamplerConfig};
pub use scorer::{score_samples, AQI_REFERENCE_MAX};
pub use selection::{select_winner, CandidateScore, Selection};
pub use spatial::haversine_distance;
pub use time_windows::{
    plan_schedule, quality_for_aqi, rank_windows, window_confidence, ScheduleDay,
};
pub use zones::{PollutionZone, ZoneKind, ZoneMap};
