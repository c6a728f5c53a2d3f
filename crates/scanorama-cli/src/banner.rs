//! Startup banner for the `scanorama` binary.

use colored::Colorize;

pub struct Banner {
    version: String,
}

impl Banner {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }

    pub fn print(&self) {
        println!(
            "{} {}",
            "scanorama".bright_cyan().bold(),
            format!("v{}", self.version).bright_green()
        );
        println!(
            "{}",
            "periodic port scan execution daemon".bright_black()
        );
        println!();
    }
}
