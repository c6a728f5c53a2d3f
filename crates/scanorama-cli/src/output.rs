//! Human-readable rendering of core types for terminal output.

use colored::Colorize;
use scanorama_core::{JobStatus, ScanJob, ScanTarget};

pub fn print_targets(targets: &[ScanTarget]) {
    if targets.is_empty() {
        println!("{}", "no scan targets".bright_black());
        return;
    }
    for target in targets {
        let enabled = if target.enabled {
            "enabled".green()
        } else {
            "disabled".bright_black()
        };
        println!(
            "{}  {:<20} {:<20} ports={:<20} type={:<13} interval={}s [{}]",
            target.id.to_string().bright_black(),
            target.name.bright_white().bold(),
            target.network.to_string(),
            target.ports.to_string(),
            target.scan_type.to_string().bright_cyan(),
            target.scan_interval_seconds,
            enabled
        );
    }
}

pub fn print_job(job: &ScanJob) {
    let status = match job.status {
        JobStatus::Completed => job.status.to_string().green(),
        JobStatus::Failed => job.status.to_string().red(),
        JobStatus::Running => job.status.to_string().yellow(),
        JobStatus::Pending => job.status.to_string().bright_black(),
    };
    println!("job {} [{}]", job.job_id.to_string().bright_white(), status);
    if let Some(stats) = job.stats {
        println!(
            "  hosts_up={} hosts_down={} total_hosts={} duration_seconds={}",
            stats.hosts_up, stats.hosts_down, stats.total_hosts, stats.duration_seconds
        );
    }
    if let Some(err) = &job.error_message {
        println!("  {} {}", "error:".red(), err);
    }
}
