use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // try_init: tests and embedders may have installed a logger already.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("-");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "[{} {} {} {}] {}",
                        name.cyan(),
                        level_str,
                        thread_name.dimmed(),
                        path,
                        record.args()
                    )
                }
                _ => format!(
                    "[{} {}] {}",
                    name.cyan(),
                    thread_name.dimmed(),
                    record.args()
                ),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
