//! CLI command handlers, one file per command.

mod add;
mod cancel;
mod pause;
mod remove;
mod resume;
mod retry;
mod serve;
mod show;
mod status;
mod token;
mod watch;

pub use add::{run_add, AddArgs};
pub use cancel::run_cancel;
pub use pause::run_pause;
pub use remove::run_remove;
pub use resume::run_resume;
pub use retry::run_retry;
pub use serve::run_serve;
pub use show::run_show;
pub use status::{run_status, StatusArgs};
pub use token::run_token;
pub use watch::run_watch;

use hubq_core::broadcast::JobView;
use hubq_core::DownloadJob;

/// Human-readable byte count with binary units.
pub(crate) fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// `40.0 MiB / 100.0 MiB (40%)`, or just the downloaded amount when the total is unknown.
pub(crate) fn format_progress(job: &DownloadJob) -> String {
    let p = &job.progress;
    match (p.total_bytes, p.fraction()) {
        (Some(total), Some(frac)) => format!(
            "{} / {} ({:.0}%)",
            format_bytes(p.bytes_downloaded),
            format_bytes(total),
            frac * 100.0
        ),
        _ => format_bytes(p.bytes_downloaded),
    }
}

/// Rate and ETA suffix for a job view (empty unless downloading).
pub(crate) fn format_rate(view: &JobView) -> String {
    let mut out = String::new();
    if let Some(rate) = view.rate_bytes_per_sec {
        out.push_str(&format!(" {}/s", format_bytes(rate as u64)));
    }
    if let Some(eta) = view.eta_secs {
        out.push_str(&format!(" eta {}", format_eta(eta)));
    }
    out
}

fn format_eta(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
