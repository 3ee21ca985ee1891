//! Route optimization pipeline.
//!
//! Candidate 0 is always the base route. Every candidate is scored
//! concurrently under a shared semaphore, results are collected by index,
//! and the winner is picked only once all of them are in, so completion
//! order never affects the outcome. A whole run is bounded by a deadline.

use runcoach_core::candidates::loop_pivot;
use runcoach_core::{
    filter_alternates, generate_candidates, select_winner, CandidateConfig, CandidateScore,
    CoreError, OptimizationType, Route, RouteExposureScore, Selection, Waypoint,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::providers::{ProviderError, RoutingProvider};
use crate::scoring::{RouteScorer, RunContext};

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub candidates: CandidateConfig,
    pub max_concurrent_scorings: usize,
    pub min_improvement_pct: f64,
    pub deadline: Duration,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            candidates: CandidateConfig {
                max_candidates: config.max_candidates,
                ..CandidateConfig::default()
            },
            max_concurrent_scorings: config.max_concurrent_scorings.max(1),
            min_improvement_pct: config.min_improvement_pct,
            deadline: config.request_deadline(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub optimization_type: OptimizationType,
    pub run: RunContext,
    pub seed: u64,
}

/// What an optimization run found. `winner` is set only for an improvement.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub selection: Selection,
    pub base_score: RouteExposureScore,
    pub winner: Option<(Route, RouteExposureScore)>,
    /// Candidates proposed, excluding the base
    pub candidates_evaluated: usize,
    /// Candidates that produced a score, excluding the base
    pub candidates_scored: usize,
}

impl OptimizationOutcome {
    pub fn improvement_pct(&self) -> f64 {
        match self.selection {
            Selection::Improved {
                improvement_pct: pct,
                ..
            } => pct,
            Selection::NoImprovement { .. } => 0.0,
        }
    }
}

pub struct RouteOptimizer {
    scorer: Arc<RouteScorer>,
    routing: Arc<dyn RoutingProvider>,
    settings: OptimizerSettings,
}

impl RouteOptimizer {
    pub fn new(
        scorer: Arc<RouteScorer>,
        routing: Arc<dyn RoutingProvider>,
        settings: OptimizerSettings,
    ) -> Self {
        Self {
            scorer,
            routing,
            settings,
        }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub async fn optimize(
        &self,
        base: &Route,
        request: &OptimizationRequest,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome, ApiError> {
        let run = self.run(base, request, cancel);
        match tokio::time::timeout(self.settings.deadline, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!(route_id = %base.id, "Optimization deadline exceeded");
                Err(ApiError::DeadlineExceeded(format!(
                    "optimization of route {} did not finish within {}s",
                    base.id,
                    self.settings.deadline.as_secs()
                )))
            }
        }
    }

    async fn run(
        &self,
        base: &Route,
        request: &OptimizationRequest,
        cancel: &CancellationToken,
    ) -> Result<OptimizationOutcome, ApiError> {
        let candidates = self
            .propose_candidates(base, request.optimization_type, request.seed)
            .await?;
        let candidates_evaluated = candidates.len();
        debug!(
            route_id = %base.id,
            candidates = candidates_evaluated,
            optimization_type = request.optimization_type.as_str(),
            "Scoring candidates"
        );

        let mut routes = Vec::with_capacity(candidates.len() + 1);
        routes.push(base.clone());
        routes.extend(candidates);

        let scores = score_all(
            Arc::clone(&self.scorer),
            &routes,
            &request.run,
            self.settings.max_concurrent_scorings,
            cancel,
        )
        .await;

        let Ranked {
            selection,
            base_score,
            winner,
            candidates_scored,
        } = rank_scores(&routes, scores, self.settings.min_improvement_pct)?;

        match &selection {
            Selection::Improved {
                improvement_pct: pct,
                ..
            } => info!(
                route_id = %base.id,
                candidates = candidates_evaluated,
                improvement_pct = *pct,
                "Found lower-exposure route"
            ),
            Selection::NoImprovement {
                best_improvement_pct,
            } => info!(
                route_id = %base.id,
                candidates = candidates_evaluated,
                best_improvement_pct = best_improvement_pct.unwrap_or(0.0),
                "No improving candidate"
            ),
        }

        Ok(OptimizationOutcome {
            selection,
            base_score,
            winner,
            candidates_evaluated,
            candidates_scored,
        })
    }

    /// Provider alternates first, then perturbations, up to the candidate budget.
    async fn propose_candidates(
        &self,
        base: &Route,
        optimization_type: OptimizationType,
        seed: u64,
    ) -> Result<Vec<Route>, ApiError> {
        let config = &self.settings.candidates;
        let mut candidates = Vec::new();

        if optimization_type.uses_alternates() {
            match self.alternate_polylines(base).await {
                Ok(polylines) => {
                    let mut alternates = filter_alternates(base, polylines, config);
                    alternates.truncate(config.max_candidates);
                    candidates.extend(alternates);
                }
                Err(err) if optimization_type == OptimizationType::ProviderAlternates => {
                    return Err(ApiError::ProviderUnavailable(format!(
                        "routing provider unavailable: {}",
                        err
                    )));
                }
                Err(ProviderError::Disabled) => {
                    debug!(route_id = %base.id, "No routing provider, skipping alternates");
                }
                Err(err) => {
                    warn!(route_id = %base.id, error = %err, "Routing alternates unavailable");
                }
            }
        }

        if optimization_type.uses_perturbation() {
            let remaining = config.max_candidates.saturating_sub(candidates.len());
            if remaining > 0 {
                let budget = CandidateConfig {
                    max_candidates: remaining,
                    ..config.clone()
                };
                candidates.extend(generate_candidates(base, self.scorer.zones(), &budget, seed));
            }
        }
        Ok(candidates)
    }

    /// Point-to-point routes ask for start→end. Loops are split at their
    /// farthest point and each outbound leg is paired with each return leg.
    async fn alternate_polylines(&self, base: &Route) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        if !base.is_closed_loop() {
            return self.routing.alternates(base.start(), base.end()).await;
        }

        let Some(pivot) = loop_pivot(base) else {
            return Ok(Vec::new());
        };
        let outbound = self.routing.alternates(base.start(), pivot).await?;
        let inbound = self.routing.alternates(pivot, base.end()).await?;

        let mut polylines = Vec::new();
        for out_leg in &outbound {
            for in_leg in &inbound {
                let mut polyline = out_leg.clone();
                polyline.extend(in_leg.iter().skip(1).cloned());
                polylines.push(polyline);
            }
        }
        Ok(polylines)
    }
}

struct Ranked {
    selection: Selection,
    base_score: RouteExposureScore,
    winner: Option<(Route, RouteExposureScore)>,
    candidates_scored: usize,
}

/// Select among `routes` given their scores in the same order. `routes[0]`
/// is the base and must score; a candidate that failed to score is dropped.
fn rank_scores(
    routes: &[Route],
    scores: Vec<Result<RouteExposureScore, CoreError>>,
    min_improvement_pct: f64,
) -> Result<Ranked, ApiError> {
    let mut scores = scores.into_iter();
    let base_score = match scores.next() {
        Some(Ok(score)) => score,
        Some(Err(err)) => return Err(err.into()),
        None => {
            return Err(CoreError::InsufficientData {
                route_id: routes.first().map(|r| r.id.clone()).unwrap_or_default(),
                samples_total: 0,
            }
            .into())
        }
    };

    let mut scored: Vec<Option<RouteExposureScore>> = vec![None];
    for (idx, result) in scores.enumerate() {
        match result {
            Ok(score) => scored.push(Some(score)),
            Err(err) => {
                debug!(route_id = %routes[idx + 1].id, error = %err, "Candidate dropped");
                scored.push(None);
            }
        }
    }
    let ranking: Vec<CandidateScore> = scored
        .iter()
        .enumerate()
        .filter_map(|(index, score)| {
            score.as_ref().map(|s| CandidateScore {
                index,
                weighted_exposure: s.weighted_exposure,
            })
        })
        .collect();

    let selection = select_winner(base_score.weighted_exposure, &ranking, min_improvement_pct);
    let winner = match selection {
        Selection::Improved { index, .. } => scored[index]
            .take()
            .map(|score| (routes[index].clone(), score)),
        Selection::NoImprovement { .. } => None,
    };
    Ok(Ranked {
        selection,
        base_score,
        winner,
        candidates_scored: ranking.len(),
    })
}

/// Score every route concurrently, at most `max_concurrent` at a time.
/// Results come back in input order.
pub async fn score_all(
    scorer: Arc<RouteScorer>,
    routes: &[Route],
    run: &RunContext,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Vec<Result<RouteExposureScore, CoreError>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, route) in routes.iter().cloned().enumerate() {
        let scorer = Arc::clone(&scorer);
        let semaphore = Arc::clone(&semaphore);
        let run = run.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            let result = scorer.score_route(&route, &run, &cancel).await;
            (idx, result)
        });
    }

    let mut results: Vec<Option<Result<RouteExposureScore, CoreError>>> =
        (0..routes.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, result)) => results[idx] = Some(result),
            Err(err) => warn!(error = %err, "Scoring task failed"),
        }
    }

    results
        .into_iter()
        .zip(routes)
        .map(|(result, route)| {
            result.unwrap_or_else(|| {
                Err(CoreError::InsufficientData {
                    route_id: route.id.clone(),
                    samples_total: 0,
                })
            })
        })
        .collect()
}
