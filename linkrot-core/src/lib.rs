pub mod data;
pub mod render;
pub mod scan;

use colored::Colorize;

pub use data::{Database, ScanSummary, SqliteSink};
pub use render::ReportFormat;
pub use scan::{ScanOptions, ScanService, execute_scan};

const BANNER: &str = r#"
  _ _       _            _
 | (_)_ __ | | ___ __ __| |_
 | | | '_ \| |/ / '__/ _ \ __|
 | | | | | |   <| | | (_) | |_
 |_|_|_| |_|_|\_\_|  \___/ \__|
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "broken link scanner".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
