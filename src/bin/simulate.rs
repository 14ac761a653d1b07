use clap::Parser;
use merge_drop_server::config::ClientConfig;
use merge_drop_server::engine::{GameEngine, GameEngineOptions};
use merge_drop_server::kv_store::FileStore;
use merge_drop_server::rank_remote::{HttpRemote, NoRemote, RemoteRanking};
use merge_drop_server::ranking_store::{RankingStore, UpsertOutcome};
use merge_drop_server::rng::Rng;
use merge_drop_server::session::SessionController;
use merge_drop_server::types::{RankSlot, RuntimeEvent, Tier};
use merge_drop_server::world::SandboxWorld;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STEP_LIMIT_REASON: &str = "step_limit";

#[derive(Parser, Debug)]
#[command(author, version, about = "Plays seeded headless sessions and ranks the results")]
struct Cli {
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, default_value_t = 3)]
    runs: u32,
    #[arg(long, default_value_t = 20_000)]
    max_steps: u32,
    #[arg(long, default_value_t = 0.05)]
    drop_chance: f32,
    #[arg(long, default_value = "Simulator")]
    player: String,
    /// Overrides RANK_API_URL.
    #[arg(long)]
    rank_url: Option<String>,
    /// Overrides LOCAL_RANK_DIR.
    #[arg(long)]
    local_dir: Option<PathBuf>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct RunResultLine {
    run: u32,
    seed: u32,
    player: String,
    reason: String,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    score: u64,
    drops: u32,
    merges: u32,
    #[serde(rename = "dangerEpisodes")]
    danger_episodes: u32,
    #[serde(rename = "highestTier")]
    highest_tier: Tier,
    submitted: String,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    step: u32,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "runCount")]
    run_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageDurationMs")]
    average_duration_ms: u64,
    #[serde(rename = "reasonCounts")]
    reason_counts: BTreeMap<String, usize>,
    leaderboard: Vec<RankSlot>,
    runs: Vec<RunResultLine>,
}

#[derive(Clone, Debug)]
struct RunPlan {
    run: u32,
    seed: u32,
    max_steps: u32,
    drop_chance: f32,
    player: String,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.rank_url.clone() {
        config.rank_api_url = Some(url);
    }
    if let Some(dir) = cli.local_dir.clone() {
        config.local_dir = dir;
    }

    let local = FileStore::new(&config.local_dir);
    let exit_code = match config.rank_api_url.clone() {
        Some(url) => {
            info!(url = %url, "[simulate] using remote ranking");
            let ranking = RankingStore::new(HttpRemote::new(url), local, &config.local_clear_secret);
            run_all(&cli, Arc::new(ranking)).await
        }
        None => {
            info!(dir = %config.local_dir.display(), "[simulate] using local ranking only");
            let ranking = RankingStore::new(NoRemote, local, &config.local_clear_secret);
            run_all(&cli, Arc::new(ranking)).await
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

async fn run_all<R: RemoteRanking>(
    cli: &Cli,
    ranking: Arc<RankingStore<R, FileStore>>,
) -> i32 {
    let run_started_at_ms = now_ms();
    let base_seed = cli.seed.unwrap_or_else(rand::random::<u32>);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(base_seed, run_started_at_ms));

    let mut has_anomaly = false;
    let mut results = Vec::new();
    let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_duration_ms = 0u64;
    let mut total_anomalies = 0usize;
    let mut leaderboard = Vec::new();

    for run in 0..cli.runs.max(1) {
        let plan = RunPlan {
            run: run + 1,
            seed: base_seed.wrapping_add(run),
            max_steps: cli.max_steps.max(1),
            drop_chance: cli.drop_chance.clamp(0.0, 1.0),
            player: cli.player.clone(),
        };
        info!(match_id = %match_id, run = plan.run, seed = plan.seed, "[simulate] run started");
        let (result, records, board) = run_session(&plan, ranking.clone()).await;

        for record in &records {
            warn!(
                match_id = %match_id,
                run = plan.run,
                step = record.step,
                message = %record.message,
                "[simulate] anomaly detected"
            );
        }
        has_anomaly |= !result.anomalies.is_empty();
        total_anomalies += records.len();
        total_duration_ms += result.duration_ms;
        *reason_counts.entry(result.reason.clone()).or_insert(0) += 1;
        info!(
            match_id = %match_id,
            run = plan.run,
            reason = %result.reason,
            score = result.score,
            "[simulate] run finished"
        );

        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(error = %err, "[simulate] failed to encode result line"),
        }
        leaderboard = board;
        results.push(result);
    }

    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        now_ms(),
        results,
        reason_counts,
        total_anomalies,
        total_duration_ms,
        leaderboard,
    );

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(path = %path.display(), error = %err, "[simulate] summary write failed");
            return 2;
        }
    }
    info!(
        match_id = %match_id,
        runs = summary.run_count,
        anomalies = summary.anomaly_count,
        average_duration_ms = summary.average_duration_ms,
        "[simulate] all runs finished"
    );
    for slot in &summary.leaderboard {
        info!("[simulate] {slot}");
    }

    if has_anomaly {
        1
    } else {
        0
    }
}

async fn run_session<R: RemoteRanking>(
    plan: &RunPlan,
    ranking: Arc<RankingStore<R, FileStore>>,
) -> (RunResultLine, Vec<AnomalyRecord>, Vec<RankSlot>) {
    let options = GameEngineOptions {
        seed: plan.seed,
        ..GameEngineOptions::default()
    };
    let merge_score = options.rules.merge_score;
    let world = SandboxWorld::new(options.rules.well_width, options.rules.well_height);
    let engine = GameEngine::new(&plan.player, world, 0, options);
    let mut controller = SessionController::start(engine, ranking).await;
    let mut policy = Rng::new(plan.seed ^ 0x9e37_79b9);

    let mut anomalies = Vec::new();
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut merges = 0u32;
    let mut danger_episodes = 0u32;
    let mut report = None;
    let mut step = 0u32;

    while step < plan.max_steps {
        step += 1;
        let now = controller.engine().world().now_ms();
        if controller.engine().can_drop(now) && policy.bool(plan.drop_chance) {
            let (width, _) = controller.engine().bounds();
            controller.move_preview(policy.range_f32(0.0, width));
            controller.drop_next(now);
        }

        let Some(frame) = controller.engine_mut().world_mut().step() else {
            push_anomaly(
                &mut anomalies,
                &mut records,
                &mut seen,
                step,
                "physics halted before the session ended".to_string(),
            );
            break;
        };
        let ended = controller.advance(&frame).await;

        for event in controller.engine_mut().drain_events() {
            match event {
                RuntimeEvent::BallsMerged { .. } => merges += 1,
                RuntimeEvent::DangerStarted { .. } => danger_episodes += 1,
                _ => {}
            }
        }
        for message in collect_session_anomalies(&controller, merge_score) {
            push_anomaly(&mut anomalies, &mut records, &mut seen, step, message);
        }

        if let Some(found) = ended {
            report = Some(found);
            break;
        }
    }

    let engine = controller.engine();
    if report.is_some() && engine.world().is_running() {
        push_anomaly(
            &mut anomalies,
            &mut records,
            &mut seen,
            step,
            "physics still running after game over".to_string(),
        );
    }

    let view = engine.view();
    let (reason, duration_ms, highest_tier, submitted, leaderboard) = match report {
        Some(report) => (
            report.summary.reason.key().to_string(),
            report.summary.duration_ms,
            report.summary.highest_tier,
            submitted_key(report.submitted).to_string(),
            report.leaderboard,
        ),
        None => (
            STEP_LIMIT_REASON.to_string(),
            engine.clock_ms(),
            Tier::MIN,
            "skipped".to_string(),
            controller.leaderboard().to_vec(),
        ),
    };

    (
        RunResultLine {
            run: plan.run,
            seed: plan.seed,
            player: view.player_name,
            reason,
            duration_ms,
            score: view.score,
            drops: view.drops_count,
            merges,
            danger_episodes,
            highest_tier,
            submitted,
            anomalies,
        },
        records,
        leaderboard,
    )
}

fn collect_session_anomalies<R: RemoteRanking>(
    controller: &SessionController<SandboxWorld, R, FileStore>,
    merge_score: u64,
) -> Vec<String> {
    let engine = controller.engine();
    let mut anomalies = Vec::new();
    if engine.ball_count() != engine.world().body_count() {
        anomalies.push(format!(
            "ball registry out of sync: {} tracked, {} in world",
            engine.ball_count(),
            engine.world().body_count()
        ));
    }
    if merge_score > 0 && engine.score() % merge_score != 0 {
        anomalies.push(format!("score is not a merge multiple: {}", engine.score()));
    }
    if engine.merge_lock().len() % 2 != 0 {
        anomalies.push(format!("odd merge lock size: {}", engine.merge_lock().len()));
    }
    anomalies
}

fn submitted_key(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Ignored => "ignored",
        UpsertOutcome::Remote => "remote",
        UpsertOutcome::Local { updated: true } => "local_updated",
        UpsertOutcome::Local { updated: false } => "local_kept",
        UpsertOutcome::Dropped => "dropped",
    }
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    step: u32,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        step,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

#[allow(clippy::too_many_arguments)]
fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    runs: Vec<RunResultLine>,
    reason_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    total_duration_ms: u64,
    leaderboard: Vec<RankSlot>,
) -> RunSummary {
    let run_count = runs.len();
    let average_duration_ms = if run_count == 0 {
        0
    } else {
        total_duration_ms / run_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        run_count,
        anomaly_count,
        average_duration_ms,
        reason_counts,
        leaderboard,
        runs,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
