//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_RUN;

/// Stable name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    use isp3a_core::error::{BuildError, ControlError};

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Timeout => "Timeout",
            ControlError::Source(_) => "SourceError",
            ControlError::MissingSensorTiming | ControlError::InvalidTiming(_) => "SensorTiming",
            ControlError::Config(_) => "InvalidConfig",
            ControlError::AllocationFailure { .. } => "AllocationFailure",
            ControlError::NullEngineOutput | ControlError::Engine(_) => "EngineError",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "BuildError";
    }
    "Error"
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use isp3a_core::error::{BuildError, ControlError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingExposureEngine
            | BuildError::MissingWhiteBalanceEngine
            | BuildError::MissingFocusEngine => format!(
                "What happened: The pipeline was built without an engine ({be}).\nLikely causes: An estimation engine failed to initialize or was not wired into the builder.\nHow to fix: Pass all three engines via with_exposure_engine, with_white_balance_engine and with_focus_engine."
            ),
            BuildError::WrongDomain(slot) => format!(
                "What happened: The {slot} slot received an engine for another domain.\nLikely causes: Engines were passed to the builder in the wrong order.\nHow to fix: Check that each engine's domain() matches the slot it is registered in."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/isp3a_config.toml for a sample."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Timeout => "What happened: Statistics read timed out.\nLikely causes: The sensor stopped streaming or statistics.timeout_ms is too low for the frame rate.\nHow to fix: Check the sensor stream and consider increasing statistics.timeout_ms in the config.".to_string(),
            ControlError::MissingSensorTiming | ControlError::InvalidTiming(_) => format!(
                "What happened: The sensor timing model is unusable ({ce}).\nLikely causes: [sensor] or [sensor_mode] is missing or inconsistent.\nHow to fix: Provide exactly one of [sensor] or [sensor_mode] with non-zero clock and line length."
            ),
            ControlError::Source(msg) if msg.contains("max run time") => "What happened: max run time was exceeded.\nLikely causes: Too many frames requested for the frame rate, or a slow statistics source.\nHow to fix: Increase --max-run-ms or request fewer frames.".to_string(),
            ControlError::Source(msg) => format!(
                "What happened: The statistics source failed ({msg}).\nLikely causes: The sensor stream ended or reported an error.\nHow to fix: Re-run with --log-level=debug to see the failing frame."
            ),
            // Fallback to generic for other domain errors
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    // Metering window CSV header special-case
    if lower.contains("metering window csv must have headers") {
        return "Invalid headers in metering window CSV. Expected 'x_start,y_start,x_end,y_end,weight'.".to_string();
    }

    if lower.contains("metering window csv") {
        return format!(
            "What happened: The metering window CSV could not be used.\nLikely causes: Missing file, malformed rows, or more than six windows.\nHow to fix: Fix the CSV and rerun. Details: {}",
            err.root_cause()
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing TOML file via --config. Details: {}",
            err.root_cause()
        );
    }

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid or incomplete ({}).\nLikely causes: Missing [image] or [sensor] sections, or out-of-range values.\nHow to fix: Edit the TOML config and try again.",
            err.root_cause()
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map typed failures to stable exit codes; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use isp3a_core::error::{BuildError, ControlError};
    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Timeout => 3,
            ControlError::Source(_) => 4,
            ControlError::MissingSensorTiming | ControlError::InvalidTiming(_) => 5,
            _ => 1,
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return 6;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use isp3a_core::error::ControlError;
    use serde_json::json;

    let reason = reason_name(err);
    let msg = humanize(err);
    let details = LAST_RUN.get();

    let detail_obj = match err.downcast_ref::<ControlError>() {
        Some(ControlError::Timeout) => details.map(|r| json!({ "timeout_ms": r.timeout_ms })),
        Some(ControlError::Source(m)) if m.contains("max run time") => {
            details.map(|r| json!({ "max_run_ms": r.max_run_ms, "frames": r.frames }))
        }
        _ => None,
    };

    let obj = if let Some(d) = detail_obj {
        json!({ "reason": reason, "details": d, "message": msg })
    } else {
        json!({ "reason": reason, "message": msg })
    };
    obj.to_string()
}
