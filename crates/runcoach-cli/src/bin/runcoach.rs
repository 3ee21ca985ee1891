use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use runcoach_cli::auth::{issue_token, TokenConfig};
use runcoach_cli::{parse_waypoints, RunCoachClient};
use runcoach_core::OptimizationType;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Exposure optimizer server URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// User the requests are made as
    #[arg(long, default_value = "runner-1")]
    user: String,

    /// Shared JWT secret (defaults to RUNCOACH_JWT_SECRET)
    #[arg(long)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a bearer token for the user
    Token {
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
    /// Save a route from `lat,lon;lat,lon;...`
    CreateRoute {
        #[arg(long)]
        waypoints: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Generate scored routes around a start point
    Generate {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long, default_value_t = 5.0)]
        distance_km: f64,
        #[arg(long, default_value_t = 4)]
        count: usize,
    },
    /// Score a route against current conditions
    Exposure { route_id: String },
    /// Look for a cleaner variant of a route
    Optimize {
        route_id: String,
        #[arg(long, value_enum, default_value_t = Strategy::Combined)]
        strategy: Strategy,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Rank upcoming start times for a route
    OptimalTimes {
        route_id: String,
        #[arg(long, default_value_t = 48)]
        horizon_hours: u32,
        #[arg(long, default_value_t = 2)]
        window_hours: u32,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Record a completed run
    LogRun {
        route_id: String,
        #[arg(long)]
        duration_min: f64,
        #[arg(long)]
        avg_aqi: f64,
        /// RFC 3339 start time; defaults to `duration_min` ago
        #[arg(long)]
        started_at: Option<String>,
    },
    /// Recent runs and weekly budgets
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// This week's exposure budget and today's usage
    Budget {
        /// Adds run advice for this AQI
        #[arg(long)]
        current_aqi: Option<f64>,
    },
    /// Personal risk and activity advice at an AQI
    HealthRisk {
        #[arg(long)]
        current_aqi: f64,
        /// Overrides the profile's activity level (rest, light, moderate, vigorous)
        #[arg(long)]
        activity_level: Option<String>,
    },
    /// Spread runs on a route over the cleanest upcoming days
    WeeklySchedule {
        route_id: String,
        #[arg(long, default_value_t = 3)]
        runs_per_week: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    Perturbation,
    ProviderAlternates,
    Combined,
}

impl From<Strategy> for OptimizationType {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Perturbation => OptimizationType::Perturbation,
            Strategy::ProviderAlternates => OptimizationType::ProviderAlternates,
            Strategy::Combined => OptimizationType::Combined,
        }
    }
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let secret = args
        .secret
        .clone()
        .or_else(|| std::env::var("RUNCOACH_JWT_SECRET").ok())
        .unwrap_or_else(|| TokenConfig::default().secret);

    if let Command::Token { hours } = args.command {
        let token = issue_token(
            &args.user,
            &TokenConfig {
                secret,
                expiry_hours: hours,
            },
        )?;
        println!("{}", token);
        return Ok(());
    }

    let token = issue_token(
        &args.user,
        &TokenConfig {
            secret,
            ..TokenConfig::default()
        },
    )?;
    let client = RunCoachClient::new(args.url, token);

    let response = match args.command {
        Command::Token { .. } => return Ok(()),
        Command::CreateRoute { waypoints, name } => {
            let waypoints = parse_waypoints(&waypoints)?;
            client.create_route(name.as_deref(), &waypoints)?
        }
        Command::Generate {
            lat,
            lon,
            distance_km,
            count,
        } => client.generate(lat, lon, distance_km, count)?,
        Command::Exposure { route_id } => client.exposure(&route_id)?,
        Command::Optimize {
            route_id,
            strategy,
            seed,
        } => {
            let result = client.optimize(&route_id, strategy.into(), seed)?;
            match result["status"].as_str() {
                Some("improved") => println!(
                    "Improved by {:.1}%: {}",
                    result["optimization_result"]["actual_improvement"]
                        .as_f64()
                        .unwrap_or_default(),
                    result["optimized_route_id"].as_str().unwrap_or("?")
                ),
                _ => println!("No cleaner variant found"),
            }
            result
        }
        Command::OptimalTimes {
            route_id,
            horizon_hours,
            window_hours,
            top_k,
        } => client.optimal_times(&route_id, horizon_hours, window_hours, top_k)?,
        Command::LogRun {
            route_id,
            duration_min,
            avg_aqi,
            started_at,
        } => {
            let started_at = match started_at {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid start time {:?}", raw))?
                    .with_timezone(&Utc),
                None => Utc::now() - Duration::seconds((duration_min * 60.0) as i64),
            };
            client.log_run(&route_id, started_at, duration_min, avg_aqi)?
        }
        Command::History { limit } => client.history(limit)?,
        Command::Budget { current_aqi } => client.budget(current_aqi)?,
        Command::HealthRisk {
            current_aqi,
            activity_level,
        } => client.health_risk(current_aqi, activity_level.as_deref())?,
        Command::WeeklySchedule {
            route_id,
            runs_per_week,
        } => client.weekly_schedule(&route_id, runs_per_week)?,
    };

    print(&response)
}
