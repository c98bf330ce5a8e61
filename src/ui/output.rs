use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

/// `project / stack`, plus the platform when one is configured
pub fn target(project: &str, stack: &str, platform: Option<&str>) {
    let label = match platform {
        Some(platform) => format!("{} / {} on {}", project, stack, platform),
        None => format!("{} / {}", project, stack),
    };
    println!("{} {}", Icons::CLOUD, label.style(theme().info.clone()));
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn phase(name: &str) {
    println!();
    println!("{} {}", Icons::GEAR.style(theme().info.clone()), name.style(theme().header.clone()));
}

pub fn bundle_written(file: &Path) {
    println!("  {} {}", Icons::PACKAGE, file.display().style(theme().dim.clone()));
}

pub fn architecture_written(file: &Path) {
    println!("{} architecture written to {}", Icons::FILE, file.display());
}

pub fn timing(elapsed: &str) {
    println!("{} {}", Icons::CLOCK.style(theme().dim.clone()), elapsed);
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}
