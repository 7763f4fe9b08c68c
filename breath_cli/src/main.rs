use breath_core::csv_rollup::{cleanup_processed_wals, wal_to_csv_and_archive};
use breath_core::history::last_session_for;
use breath_core::wal::{export_event_log, read_event_log};
use breath_core::*;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "breathe")]
#[command(about = "Guided breathing sessions with adaptive safety limits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List breathing patterns and whether each is available
    Patterns,

    /// Run a simulated session on a pattern
    Session {
        /// Pattern id (see `breathe patterns`)
        #[arg(long)]
        pattern: String,

        /// Number of cycles (defaults to the pattern's recommendation)
        #[arg(long)]
        cycles: Option<u32>,

        /// Simulated heart rate in beats per minute
        #[arg(long)]
        heart_rate: Option<f64>,

        /// Simulate the session surface being hidden
        #[arg(long)]
        hidden: bool,

        /// Abandon the session after this many seconds
        #[arg(long)]
        stop_after: Option<f64>,

        /// Simulation frame rate (defaults to kernel.frames_per_second)
        #[arg(long)]
        fps: Option<u32>,

        /// Run the session without saving the outcome
        #[arg(long)]
        dry_run: bool,

        /// Write the session's event log as JSONL
        #[arg(long)]
        export_log: Option<PathBuf>,
    },

    /// Show per-pattern safety state and practice totals
    Status,

    /// Roll up WAL sessions to CSV
    Rollup {
        /// Clean up processed WAL files after rollup
        #[arg(long)]
        cleanup: bool,
    },

    /// Rebuild the final kernel state from an exported event log
    Replay {
        /// Event log written by `session --export-log`
        path: PathBuf,

        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
}

/// File layout under the data directory
struct DataPaths {
    wal_dir: PathBuf,
    registry: PathBuf,
    wal: PathBuf,
    csv: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        let wal_dir = data_dir.join("wal");
        Self {
            registry: wal_dir.join("safety_registry.json"),
            wal: wal_dir.join("sessions.wal"),
            csv: data_dir.join("sessions.csv"),
            wal_dir,
        }
    }
}

fn main() -> Result<()> {
    breath_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);

    match cli.command {
        Commands::Patterns => cmd_patterns(&paths, &config),
        Commands::Session {
            pattern,
            cycles,
            heart_rate,
            hidden,
            stop_after,
            fps,
            dry_run,
            export_log,
        } => cmd_session(
            &paths,
            &config,
            SessionOptions {
                pattern_id: pattern,
                cycles,
                heart_rate,
                hidden,
                stop_after,
                fps,
                dry_run,
                export_log,
            },
        ),
        Commands::Status => cmd_status(&paths, &config),
        Commands::Rollup { cleanup } => cmd_rollup(&paths, cleanup),
        Commands::Replay { path, json } => cmd_replay(&path, &config, json),
    }
}

fn load_catalog(config: &Config) -> Result<Catalog> {
    let catalog = Catalog::with_custom(&config.patterns.custom);
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation(errors.join("; ")));
    }
    Ok(catalog)
}

fn load_practice(paths: &DataPaths, config: &Config) -> Result<(Vec<SessionRecord>, PracticeStats)> {
    let history = load_session_history(&paths.wal, &paths.csv)?;
    let stats = PracticeStats::from_records(&history, config.safety.quality_session_secs);
    Ok((history, stats))
}

fn format_timestamp(secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| format!("{:.0}", secs))
}

fn cmd_patterns(paths: &DataPaths, config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    let registry = RegistryStore::new(&paths.registry).load()?;
    let (_, stats) = load_practice(paths, config)?;
    let now = SystemClock.now();

    let mut current_tier = 0;
    for pattern in catalog.by_tier() {
        if pattern.tier != current_tier {
            current_tier = pattern.tier;
            println!("\nTier {}", current_tier);
        }
        let t = &pattern.timings;
        let eligibility = check_eligibility(pattern, &registry, &stats, now, &config.safety);
        let availability = match &eligibility {
            Eligibility::Allowed => "available".to_string(),
            Eligibility::Locked { until } => format!("locked until {}", format_timestamp(*until)),
            other => other.describe(),
        };
        println!(
            "  {:<10} {:<24} {}/{}/{}/{}  x{:<3} {}",
            pattern.id,
            pattern.label,
            t.inhale,
            t.hold_in,
            t.exhale,
            t.hold_out,
            pattern.recommended_cycles,
            availability
        );
    }
    println!();
    Ok(())
}

struct SessionOptions {
    pattern_id: String,
    cycles: Option<u32>,
    heart_rate: Option<f64>,
    hidden: bool,
    stop_after: Option<f64>,
    fps: Option<u32>,
    dry_run: bool,
    export_log: Option<PathBuf>,
}

/// Prints phase cues to the terminal
struct ConsoleCues;

impl CueSink for ConsoleCues {
    fn cue(&mut self, phase: Phase, duration: f64) -> Result<()> {
        println!("  → {:<13} {:>4.1}s", phase.label(), duration);
        Ok(())
    }
}

fn cmd_session(paths: &DataPaths, config: &Config, opts: SessionOptions) -> Result<()> {
    let catalog = load_catalog(config)?;
    let store = RegistryStore::new(&paths.registry);
    let registry = store.load()?;
    let (_, stats) = load_practice(paths, config)?;

    let pattern = catalog
        .get(&opts.pattern_id)
        .cloned()
        .ok_or_else(|| Error::Other(format!("Unknown pattern '{}'", opts.pattern_id)))?;

    let started_at = Utc::now();
    let wall_start = SystemClock.now();

    match check_eligibility(&pattern, &registry, &stats, wall_start, &config.safety) {
        Eligibility::Allowed => {}
        Eligibility::Locked { until } => {
            return Err(Error::PatternLocked {
                pattern_id: pattern.id,
                until,
            })
        }
        other => {
            return Err(Error::TierLocked {
                pattern_id: pattern.id,
                reason: other.describe(),
            })
        }
    }

    let cycles = opts.cycles.unwrap_or(pattern.recommended_cycles).max(1);
    let fps = opts.fps.unwrap_or(config.kernel.frames_per_second).max(1);

    // Simulated time runs from the real start so lock windows line up
    let clock = SimulatedClock::starting_at(wall_start);
    let mut kernel = Kernel::validated(catalog, config, clock.clone())?;
    kernel.use_middleware(TraceMiddleware);
    kernel.use_middleware(CueMiddleware::new(ConsoleCues));

    let recorded = Rc::new(RefCell::new(Vec::new()));
    if opts.export_log.is_some() {
        let sink = Rc::clone(&recorded);
        kernel.use_middleware(
            move |event: &KernelEvent,
                  _: &RuntimeState,
                  _: &RuntimeState,
                  _: &mut Deferred|
                  -> Result<()> {
                sink.borrow_mut().push(event.clone());
                Ok(())
            },
        );
    }

    kernel.init();
    kernel.load_safety_registry(registry.clone());
    kernel.dispatch(KernelEvent::LoadProtocol {
        pattern_id: pattern.id.clone(),
        timestamp: clock.now(),
    });
    if kernel.state().pattern.is_none() {
        let until = registry.locked_until(&pattern.id, clock.now()).unwrap_or(0.0);
        return Err(Error::PatternLocked {
            pattern_id: pattern.id,
            until,
        });
    }

    println!("\n{} ({} cycles)", pattern.label, cycles);
    kernel.dispatch(KernelEvent::StartSession {
        timestamp: clock.now(),
    });

    let dt = kernel.clamp_dt(1.0 / f64::from(fps));
    let stop_after = opts.stop_after.unwrap_or(f64::INFINITY);
    let session_start = kernel.state().session_start_time;

    while kernel.state().is_running()
        && kernel.state().cycle_count < cycles
        && clock.now() - session_start < stop_after
    {
        clock.advance(dt);
        let mut observation = Observation::empty(dt, clock.now());
        if let Some(bpm) = opts.heart_rate {
            observation = observation.with_heart_rate(bpm, 0.9);
        }
        if opts.hidden {
            observation.visibility_state = VisibilityState::Hidden;
        }
        kernel.tick(dt, observation)?;
    }

    let final_state = kernel.state().clone();
    let duration = (clock.now() - session_start).max(0.0);
    let interdicted = final_state.status == KernelStatus::SafetyLock;
    kernel.dispose();

    let outcome = if interdicted {
        SessionOutcome::Adverse
    } else {
        SessionOutcome::evaluate(
            duration,
            final_state.belief.prediction_error,
            &config.safety,
        )
    };

    println!();
    println!("  Duration:         {:.1}s", duration);
    println!("  Cycles:           {}", final_state.cycle_count);
    println!(
        "  Prediction error: {:.3}",
        final_state.belief.prediction_error
    );
    println!("  Outcome:          {:?}", outcome);
    if interdicted {
        println!("  ⚠ Session stopped by the safety guard");
    }

    if let Some(path) = &opts.export_log {
        export_event_log(path, &recorded.borrow())?;
        println!("  Event log:        {}", path.display());
    }

    let diagnostics = kernel.diagnostics();
    if diagnostics.callback_failures > 0 {
        tracing::warn!(
            "{} callback failures during session",
            diagnostics.callback_failures
        );
    }

    if opts.dry_run {
        println!("\n[Dry run - not logging session]");
        return Ok(());
    }

    let completed_time = clock.now();
    // Applied to the latest registry under the store lock
    let next = store.update(|current| {
        Ok(record_outcome(
            current,
            &pattern.id,
            outcome,
            completed_time,
            &config.safety,
        ))
    })?;

    let record = SessionRecord {
        id: uuid::Uuid::new_v4(),
        pattern_id: pattern.id.clone(),
        started_at,
        completed_at: started_at + Duration::milliseconds((duration * 1000.0) as i64),
        duration_secs: duration,
        cycles: final_state.cycle_count,
        final_prediction_error: final_state.belief.prediction_error,
        outcome,
    };
    let mut sink = JsonlSink::new(&paths.wal);
    sink.append(&record)?;

    println!("\n✓ Session logged!");
    if let Some(until) = next.locked_until(&pattern.id, completed_time) {
        println!(
            "⚠ Too many adverse sessions: '{}' is locked until {}",
            pattern.id,
            format_timestamp(until)
        );
    }
    Ok(())
}

fn cmd_status(paths: &DataPaths, config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    let registry = RegistryStore::new(&paths.registry).load()?;
    let (history, stats) = load_practice(paths, config)?;
    let now = SystemClock.now();

    println!("Quality sessions: {}", stats.quality_sessions);
    println!("Perfect sessions: {}", registry.perfect_sessions());

    if registry.is_empty() {
        println!("\nNo sessions recorded yet.");
        return Ok(());
    }

    println!();
    for (pattern_id, profile) in registry.iter() {
        let label = catalog
            .get(pattern_id)
            .map(|p| p.label.as_str())
            .unwrap_or("(unknown pattern)");
        println!("{} - {}", pattern_id, label);
        println!("  Stress score: {}", profile.cumulative_stress_score);
        match profile.average_resonance() {
            Some(avg) => println!(
                "  Resonance:    {:.2} over last {}",
                avg,
                profile.resonance_history.len()
            ),
            None => println!("  Resonance:    -"),
        }
        if profile.is_locked(now) {
            println!(
                "  Locked until: {}",
                format_timestamp(profile.safety_lock_until)
            );
        }
        if let Some(last) = last_session_for(&history, pattern_id) {
            println!(
                "  Last session: {} ({:?})",
                last.completed_at.format("%Y-%m-%d %H:%M"),
                last.outcome
            );
        }
    }
    Ok(())
}

fn cmd_rollup(paths: &DataPaths, cleanup: bool) -> Result<()> {
    if !paths.wal.exists() {
        println!("No WAL file found - nothing to roll up.");
        return Ok(());
    }

    let count = wal_to_csv_and_archive(&paths.wal, &paths.csv)?;

    println!("✓ Rolled up {} sessions to CSV", count);
    println!("  CSV: {}", paths.csv.display());

    if cleanup {
        let cleaned = cleanup_processed_wals(&paths.wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed WAL files", cleaned);
        }
    }
    Ok(())
}

fn cmd_replay(path: &Path, config: &Config, json: bool) -> Result<()> {
    let catalog = load_catalog(config)?;
    let events = read_event_log(path)?;
    let state = replay(RuntimeState::default(), &events, &catalog);

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Replayed {} events", events.len());
    println!("  Status:           {:?}", state.status);
    println!("  Pattern:          {}", state.pattern_id().unwrap_or("-"));
    println!("  Phase:            {}", state.phase.label());
    println!("  Cycles:           {}", state.cycle_count);
    println!(
        "  Prediction error: {:.3}",
        state.belief.prediction_error
    );
    Ok(())
}
