//! Terminal output helpers.
//!
//! Human-facing lines go to stderr so `hublink call` output on stdout stays
//! machine-readable.

use colored::Colorize;

/// Print a success message.
pub fn success(msg: &str) {
    eprintln!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Red error + yellow "fix:" suggestion.
pub fn error_with_fix(msg: &str, fix: &str) {
    error(msg);
    eprintln!("    {} {}", "fix:".bright_yellow(), fix);
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    eprintln!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    eprintln!("  {:<13}{}", format!("{label}:"), value);
}

/// Key-value with a dimmed value.
pub fn kv_dim(label: &str, value: &str) {
    eprintln!("  {:<13}{}", format!("{label}:"), value.dimmed());
}

/// Hint line: "  hint: message" in dimmed text.
pub fn hint(msg: &str) {
    eprintln!("  {} {}", "hint:".dimmed(), msg.dimmed());
}
