use console::{style, Emoji};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

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

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// A titled block of CLI output, built line by line and printed at once.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, about: &str) -> Self {
        self.lines
            .push(format!("  {:<28} {}", style(name).green().bold(), about));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(format!("  {} {}: {}", GEAR, style(label).bold().cyan(), value));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn bullet(mut self, text: &str) -> Self {
        self.lines.push(format!("  • {}", text));
        self
    }

    pub fn hint(mut self, example: &str, about: &str) -> Self {
        let line = if about.is_empty() {
            format!("    $ {}", style(example).cyan())
        } else {
            format!("    $ {}  {}", style(example).cyan(), style(about).dim())
        };
        self.lines.push(line);
        self
    }

    pub fn info(mut self, msg: &str) -> Self {
        self.lines
            .push(format!("  {} {}", INFO_ICON, style(msg).blue()));
        self
    }

    pub fn warn(mut self, msg: &str) -> Self {
        self.lines
            .push(format!("  {} {}", WARN_ICON, style(msg).yellow()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in self.lines {
            println!("{}", line);
        }
    }
}

/// `status` words colored the way every listing shows them.
pub fn styled_status(status: &str) -> String {
    match status {
        "success" | "completed" | "active" => style(status.to_uppercase()).green().bold(),
        "timeout" | "paused" | "queued" | "running" => {
            style(status.to_uppercase()).yellow().bold()
        }
        "disabled" | "archived" => style(status.to_uppercase()).dim(),
        _ => style(status.to_uppercase()).red().bold(),
    }
    .to_string()
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "                 _       _      _ ",
        " ___  ___ _ __ (_)_ __ | |_ __| |",
        "/ __|/ __| '__|| | '_ \\| __/ _` |",
        "\\__ \\ (__| |   | | |_) | || (_| |",
        "|___/\\___|_|   |_| .__/ \\__\\__,_|",
        "                 |_|              ",
    ];

    // Gradient: #34d399 -> #22d3ee -> #818cf8 (diagonal top-left -> bottom-right)
    let stops: [(u8, u8, u8); 3] = [(52, 211, 153), (34, 211, 238), (129, 140, 248)];
    let max_w = 34u32;
    let max_d = max_w + 5 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mYour scripts, on call.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("scriptd signing off.")
            .bold()
            .cyan()
    );
}
