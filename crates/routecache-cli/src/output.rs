use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_field(name: &str, value: &str) {
    println!("{}: {}", name.cyan(), value);
}

/// Print a cached value, pretty-printing it when it is JSON.
pub fn print_cached(value: Option<&str>) {
    match value {
        None => println!("{}", "(null)".dimmed()),
        Some("") => println!("{}", "(empty)".dimmed()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => match serde_json::to_string_pretty(&json) {
                Ok(pretty) => println!("{pretty}"),
                Err(_) => println!("{raw}"),
            },
            Err(_) => println!("{raw}"),
        },
    }
}
