//! Operator-facing report lines

use console::style;

pub fn info(message: impl AsRef<str>) {
    println!("{} {}", style("[INFO]").blue(), message.as_ref());
}

pub fn success(message: impl AsRef<str>) {
    println!("{} {}", style("[SUCCESS]").green(), message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    println!("{} {}", style("[WARN]").yellow(), message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    eprintln!("{} {}", style("[ERROR]").red().bold(), message.as_ref());
}

pub fn step(message: impl AsRef<str>) {
    println!("{} {}", style(">>>").cyan(), message.as_ref());
}

pub fn header(title: impl AsRef<str>) {
    println!();
    println!("{}", style(format!("=== {} ===", title.as_ref())).bold().cyan());
}

pub fn detail(message: impl AsRef<str>) {
    println!("    {}", style(message.as_ref()).dim());
}

pub fn blank() {
    println!();
}
