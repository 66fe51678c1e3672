use colored::Colorize;

fn main() {
    if let Err(e) = stagegate::run() {
        eprintln!("{} {}", "stagegate:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
