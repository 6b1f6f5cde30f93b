// Output formatting helpers for CLI commands

use strata_engine::{UnitPath, UnitStatus};

use std::time::Duration;

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a dim success message
pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

/// Print a dim failure message
pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

/// Print a stage header: "  Stage 2 (3 units)"
pub fn stage_header(index: usize, total_units: usize) {
    eprintln!(
        "\x1b[1;34m  Stage\x1b[0m {} ({} unit{})",
        index + 1,
        total_units,
        if total_units == 1 { "" } else { "s" }
    );
}

fn unit_line(unit: &UnitPath, status: UnitStatus, duration: Duration, detail: Option<&str>) -> String {
    let line = format!(
        "    {} {} ({:.2}s)",
        unit,
        status.as_str().to_uppercase(),
        duration.as_secs_f64()
    );
    match detail {
        Some(detail) => format!("{}: {}", line, detail),
        None => line,
    }
}

/// Print the terminal line for one unit, colored by outcome
pub fn unit_result(unit: &UnitPath, status: UnitStatus, duration: Duration, detail: Option<&str>) {
    let line = unit_line(unit, status, duration, detail);
    match status {
        UnitStatus::Applied | UnitStatus::Succeeded | UnitStatus::Destroyed => dim_success(&line),
        UnitStatus::Failed => dim_failure(&line),
        _ => dim(&line),
    }
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_line() {
        let unit = UnitPath::new("dev/network").unwrap();

        assert_eq!(
            unit_line(&unit, UnitStatus::Applied, Duration::from_millis(1500), None),
            "    dev/network APPLIED (1.50s)"
        );
        assert_eq!(
            unit_line(
                &unit,
                UnitStatus::Failed,
                Duration::from_secs(2),
                Some("quota exceeded")
            ),
            "    dev/network FAILED (2.00s): quota exceeded"
        );
        assert_eq!(
            unit_line(&UnitPath::root(), UnitStatus::Cancelled, Duration::ZERO, None),
            "    . CANCELLED (0.00s)"
        );
    }
}
