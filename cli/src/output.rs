use colored::Colorize;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

pub fn info(msg: &str) {
    eprintln!("{} {}", "info:".blue().bold(), msg);
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Colored label for a root state as reported by the registry.
pub fn state_label(state: &str) -> colored::ColoredString {
    match state {
        "ready" => state.green(),
        "disabled" => state.dimmed(),
        _ => state.red().bold()
    }
}
