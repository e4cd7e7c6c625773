use std::path::Path;

use console::{Emoji, style};

use crate::core::extraction::StageRunResult;

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Success(String),
    Warn(String),
    Blank,
}

/// A titled block of console output.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn success(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Success(text.to_string()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Warn(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    fn render(&self) -> Vec<String> {
        let mut out = vec![String::new(), format!(" {}", style(&self.title).bold().underlined())];
        for line in &self.lines {
            out.push(match line {
                GuideLine::Command(name, description) => {
                    format!("   {:<16} {}", style(name).green(), description)
                }
                GuideLine::Status(label, value) => {
                    format!("   {} {}", style(format!("{}:", label)).bold().cyan(), value)
                }
                GuideLine::Text(text) => format!("   {}", text),
                GuideLine::Success(text) => format!("   {}{}", SUCCESS_ICON, style(text).green()),
                GuideLine::Warn(text) => format!("   {}{}", WARN_ICON, style(text).yellow()),
                GuideLine::Blank => String::new(),
            });
        }
        out
    }

    pub fn print(self) {
        for line in self.render() {
            println!("{}", line);
        }
    }
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "            _                                                _   ",
        "  ___  ___ | |__   ___ _ __ ___   __ _ ___  ___ ___  _   _ | |_ ",
        " / __|/ __|| '_ \\ / _ \\ '_ ` _ \\ / _` / __|/ __/ _ \\| | | || __|",
        " \\__ \\ (__ | | | |  __/ | | | | | (_| \\__ \\ (_| (_) | |_| || |_ ",
        " |___/\\___||_| |_|\\___|_| |_| |_|\\__,_|___/\\___\\___/ \\__,_| \\__|",
    ];

    // Gradient: #22d3ee → #818cf8, left to right
    let from: (u8, u8, u8) = (34, 211, 238);
    let to: (u8, u8, u8) = (129, 140, 248);
    let max_w = 66u32;

    println!();
    for line in lines {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let t = ((x as u32) * 1000 / max_w).min(1000);
            let (r, g, b) = lerp_color(from, to, t);
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;129;140;248mSchema metadata, validated before it lands.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

/// Attempts, verdict, final candidate and report of one stage run.
pub fn print_execution_summary(result: &StageRunResult, document: &Path) {
    let rule = "=".repeat(60);
    let verdict = if result.converged {
        style("PASSED").green().bold()
    } else {
        style("FAILED").red().bold()
    };

    println!("\n{}", rule);
    println!("{}{} ({})", CHART, style("EXECUTION SUMMARY").bold(), result.stage());
    println!("{}", rule);
    print_status("Target", &result.target.describe());
    print_status("Total attempts", &result.attempts_used.to_string());
    print_status("Validation status", &verdict.to_string());
    print_status("Document", &document.display().to_string());

    println!("\n{}", style("ANALYST RESULT").bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&result.final_candidate.to_document()).unwrap_or_default()
    );

    println!("\n{}", style("VALIDATOR RESULT").bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&result.final_report).unwrap_or_default()
    );
    println!("{}", rule);

    if !result.converged {
        print_warn(&format!(
            "Retry budget exhausted for {}. Review the issues above before using {}.",
            result.target.describe(),
            document.display()
        ));
    }
}
