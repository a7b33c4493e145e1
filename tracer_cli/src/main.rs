mod cli;
mod error_fmt;
mod rt;
mod run;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::{Result, WrapErr};
use run::{RunOutput, SelfCheck, print_stats};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracer_config::{Config, Logging, PersistedCalibration};
use tracer_core::conversions::records_from_entries;
use tracer_core::util::ticks_to_meters;
use tracer_core::{FileStore, MarkRecord, RecordStore, RunOutcome};

fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;
    let _ = color_eyre::install();

    let code = match real_main(cli) {
        Ok(code) => code,
        Err(e) => {
            if json_mode {
                eprintln!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

fn real_main(cli: Cli) -> Result<i32> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "ctrl-c handler not installed");
        }
    }

    let csv = cli
        .calibration
        .as_deref()
        .map(|p| tracer_config::load_calibration_csv(p, cfg.sensing.threshold))
        .transpose()?;
    let mut store = FileStore::new(&cfg.store.path);
    let stored = store.load().wrap_err("load record store")?.calibration;
    let cal = run::resolve_calibration(&cfg, csv.as_ref(), stored.as_ref())?;

    match cli.cmd {
        Commands::Explore {
            save,
            velocity,
            run: args,
        } => {
            let out = run::explore(&cfg, cal, velocity, save, &args, &mut store, &shutdown)?;
            if args.stats {
                print_stats(&out.stats);
            }
            report_run(&out, cli.json, &store);
            Ok(run_exit_code(&out))
        }
        Commands::Replay {
            peak,
            base,
            run: args,
        } => {
            let out = run::replay(&cfg, cal, peak, base, &args, &mut store, &shutdown)?;
            if args.stats {
                print_stats(&out.stats);
            }
            report_run(&out, cli.json, &store);
            Ok(run_exit_code(&out))
        }
        Commands::Course { yes, run: args } => {
            let outs = run::course(&cfg, cal, yes, &args, &mut store, &shutdown)?;
            let mut code = 0;
            for out in &outs {
                if args.stats {
                    print_stats(&out.stats);
                }
                report_run(out, cli.json, &store);
                if code == 0 {
                    code = run_exit_code(out);
                }
            }
            Ok(code)
        }
        Commands::Calibrate { sweeps, save } => {
            let cal = run::calibrate(&cfg, sweeps)?;
            let persisted = PersistedCalibration::from(&cal);
            let saved = if save {
                let mut rec = store.load().wrap_err("load record store")?;
                rec.calibration = Some(persisted.clone());
                Some(store.flush(&rec))
            } else {
                None
            };
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "bias": persisted.bias,
                        "range": persisted.range,
                        "threshold": persisted.threshold,
                        "saved": saved,
                    })
                );
            } else {
                print!(
                    "{}",
                    toml::to_string(&persisted).wrap_err("render calibration")?
                );
                match saved {
                    Some(true) => println!("saved to {}", store.path().display()),
                    Some(false) => println!("save FAILED ({})", store.path().display()),
                    None => {}
                }
            }
            Ok(if saved == Some(false) { 1 } else { 0 })
        }
        Commands::Marks => {
            let rec = store.load().wrap_err("load record store")?;
            let marks = records_from_entries(&rec.marks);
            if cli.json {
                println!("{}", json!({ "marks": marks_json(&marks) }));
            } else if marks.is_empty() {
                println!("no stored mark log");
            } else {
                for (i, m) in marks.iter().enumerate() {
                    println!("{i:>3}  {}  {:>8}", m.kind.symbol(), m.tick);
                }
            }
            Ok(0)
        }
        Commands::SelfCheck => {
            let check = run::self_check(&cfg, cal)?;
            report_self_check(&check, cli.json);
            Ok(0)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = tracer_config::load_toml(&text).wrap_err("parse config")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };
    let mut layers = vec![console];

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file must name a file, got {file:?}"))?;
        std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {}", dir.display()))?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::new(logging.level.as_deref().unwrap_or("info"));
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}

/// A requested save that failed turns a completed run into exit 1, the same
/// as `calibrate --save`.
fn run_exit_code(out: &RunOutput) -> i32 {
    match out.report.outcome {
        RunOutcome::Completed if out.saved == Some(false) => 1,
        RunOutcome::Completed => 0,
        RunOutcome::LineOut => 3,
    }
}

fn marks_json(marks: &[MarkRecord]) -> Vec<serde_json::Value> {
    marks
        .iter()
        .map(|m| json!({ "kind": m.kind.symbol().to_string(), "tick": m.tick }))
        .collect()
}

fn report_run(out: &RunOutput, json_mode: bool, store: &FileStore) {
    let r = &out.report;
    let distance_m = ticks_to_meters(r.traveled_ticks, out.ticks_per_meter);
    if json_mode {
        println!(
            "{}",
            json!({
                "mode": out.mode.as_str(),
                "outcome": r.outcome.as_str(),
                "traveled_ticks": r.traveled_ticks,
                "distance_m": distance_m,
                "duration_ms": r.duration_ms,
                "in_sync": r.in_sync,
                "marks": marks_json(&r.marks),
                "saved": out.saved,
            })
        );
        return;
    }
    let symbols: String = r.marks.iter().map(|m| m.kind.symbol()).collect();
    println!(
        "{}: {} after {:.2} m ({} ticks) in {} ms, marks [{}]",
        out.mode.as_str(),
        r.outcome.as_str(),
        distance_m,
        r.traveled_ticks,
        r.duration_ms,
        symbols
    );
    if out.mode == tracer_core::RunMode::Replay && !r.in_sync {
        println!("replay lost sync with the stored log");
    }
    match out.saved {
        Some(true) => println!("mark log saved to {}", store.path().display()),
        Some(false) => println!("mark log NOT saved"),
        None => {}
    }
}

fn report_self_check(check: &SelfCheck, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            json!({
                "ok": true,
                "supply_v": check.supply_v,
                "sweeps": check.sweeps,
                "odometry": check.odometry,
            })
        );
    } else {
        println!(
            "self-check ok: supply {:.2} V, {} sweeps, odometry {} / {}",
            check.supply_v, check.sweeps, check.odometry[0], check.odometry[1]
        );
    }
}
