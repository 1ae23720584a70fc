#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod cli;
mod error_fmt;
mod run;

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use serde_json::json;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::{RunOptions, RunReport};

fn main() {
    if let Err(e) = real_main() {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            println!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main() -> Result<()> {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let mut cfg: isp3a_config::Config =
        toml::from_str(&text).wrap_err("invalid configuration: TOML parse failed")?;

    init_tracing(cli.json, &cli.log_level, &cfg.logging);

    if let Some(path) = &cli.windows {
        cfg.exposure.windows = isp3a_config::load_windows_csv(path)?;
        tracing::info!(path = %path.display(), count = cfg.exposure.windows.len(), "metering windows loaded");
    }
    cfg.validate().wrap_err("invalid configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match cli.cmd {
        Commands::Run {
            frames,
            max_run_ms,
            direct,
            lock_after,
            trace_frames,
            print_runtime,
        } => {
            let opts = RunOptions {
                frames,
                max_run_ms,
                direct,
                lock_after,
                trace_frames,
            };
            let report = run::run_sim(&cfg, &opts, shutdown)?;
            print_report(&report, cli.json, print_runtime);
        }
        Commands::SelfCheck => {
            let r = run::self_check(&cfg)?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "status": "ok",
                        "frame_id": r.frame_id,
                        "exposure": r.exposure.disposition.name(),
                        "white_balance": r.white_balance.disposition.name(),
                        "focus": r.focus.disposition.name(),
                    })
                );
            } else {
                println!("self-check ok");
                println!("{}", run::frame_line(&r));
            }
        }
        Commands::Timing { exposure_us, gain } => {
            let model = run::sensor_model(&cfg)?;
            print_timing(&model, &exposure_us, &gain, cli.json);
        }
    }
    Ok(())
}

fn init_tracing(json: bool, level: &str, logging: &isp3a_config::Logging) {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    // JSON lines file sink, rotated per [logging].rotation
    let file_layer = logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| OsString::from("isp3a.log"), ToOwned::to_owned);
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(file_filter)
    });

    let _ = tracing_subscriber::registry()
        .with(console.with_filter(console_filter))
        .with(file_layer)
        .try_init();
}

fn counts_json(c: &isp3a_core::runner::DispositionCounts) -> serde_json::Value {
    json!({ "recomputed": c.recomputed, "reused": c.reused, "fallback": c.fallback })
}

fn print_report(report: &RunReport, json: bool, print_runtime: bool) {
    let s = &report.summary;
    let elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX);
    if json {
        let last = s.last.as_ref().map(|r| {
            let e = &r.exposure.state;
            let wb = &r.white_balance.state;
            json!({
                "frame_id": r.frame_id,
                "coarse_integration_time": e.coarse_integration_time,
                "analog_gain_code": e.analog_gain_code,
                "analog_gain_multiplier": e.analog_gain_multiplier,
                "exposure_time_us": e.exposure_time_us,
                "wb_gains": [wb.red_gain, wb.green_r_gain, wb.green_b_gain, wb.blue_gain],
                "cct_kelvin": wb.cct_kelvin,
                "lens_position": r.focus.state.lens_position,
            })
        });
        let obj = json!({
            "status": if report.interrupted { "interrupted" } else { "ok" },
            "frames": s.frames,
            "exposure_converged_at": s.exposure_converged_at,
            "exposure": counts_json(&s.exposure),
            "white_balance": counts_json(&s.white_balance),
            "focus": counts_json(&s.focus),
            "last": last,
            "elapsed_ms": elapsed_ms,
        });
        println!("{obj}");
        return;
    }

    if report.interrupted {
        println!("run interrupted after {} frames", s.frames);
    } else {
        println!("run complete: {} frames", s.frames);
    }
    match s.exposure_converged_at {
        Some(at) => println!("exposure converged at frame {at}"),
        None => println!("exposure did not converge"),
    }
    for (name, c) in [
        ("exposure", &s.exposure),
        ("white balance", &s.white_balance),
        ("focus", &s.focus),
    ] {
        println!(
            "{name:<14} recomputed={} reused={} fallback={}",
            c.recomputed, c.reused, c.fallback
        );
    }
    if let Some(r) = &s.last {
        println!("last: {}", run::frame_line(r));
    }
    if print_runtime {
        println!("runtime: {elapsed_ms} ms");
    }
}

fn print_timing(model: &isp3a_core::SensorModel, exposure_us: &[f64], gains: &[f64], json: bool) {
    let t = model.timing();
    let g = model.gain();
    let conversions: Vec<_> = exposure_us
        .iter()
        .map(|&us| {
            let lines = t.time_to_lines(us);
            (us, lines, t.lines_to_time(lines))
        })
        .collect();
    let codes: Vec<_> = gains
        .iter()
        .map(|&x| {
            let code = g.multiplier_to_code(x);
            (x, code, g.code_to_multiplier(code))
        })
        .collect();

    if json {
        let obj = json!({
            "line_period_us": t.line_period_us(),
            "frame_duration_us": t.frame_duration_us(),
            "coarse_min": t.coarse_min(),
            "coarse_max": t.coarse_max(),
            "gain_max_code": g.max_code(),
            "gain_max_multiplier": g.max_multiplier(),
            "exposures": conversions
                .iter()
                .map(|(us, lines, back)| json!({ "exposure_us": us, "lines": lines, "actual_us": back }))
                .collect::<Vec<_>>(),
            "gains": codes
                .iter()
                .map(|(x, code, back)| json!({ "multiplier": x, "code": code, "actual": back }))
                .collect::<Vec<_>>(),
        });
        println!("{obj}");
        return;
    }

    println!("line period:    {:.3} us", t.line_period_us());
    println!("frame duration: {:.1} us", t.frame_duration_us());
    println!("coarse range:   {}..={} lines", t.coarse_min(), t.coarse_max());
    println!("gain range:     0..={} ({:.2}x)", g.max_code(), g.max_multiplier());
    for (us, lines, back) in conversions {
        println!("{us:.1} us -> {lines} lines ({back:.1} us)");
    }
    for (x, code, back) in codes {
        println!("{x:.2}x -> code {code} ({back:.3}x)");
    }
}
