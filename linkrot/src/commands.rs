use crate::CLAP_STYLING;
use clap::{arg, command};

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/linkrot/";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("linkrot")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("linkrot")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Log engine activity to stderr")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-C --"config-dir" <PATH>)
                .required(false)
                .help("Directory holding config.json and linkrot.db")
                .default_value(DEFAULT_CONFIG_DIR)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Creates the linkrot config file and scan database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to initialize (defaults to --config-dir)"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing config and database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("scan")
                .about("Check a page and the links on it for rot")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The seed URL to scan")
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of seed URLs, scanned one after another")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"mode" <MODE>)
                        .required(false)
                        .help("single: check the seed only; all: check every link on the seed page")
                        .value_parser(["single", "all"])
                        .default_value("all"),
                )
                .arg(
                    arg!(-F --"follow")
                        .help("Also extract links from every internal page that is checked")
                        .required(false),
                )
                .arg(
                    arg!(--"no-check")
                        .help("Record discovered links without requesting their status")
                        .required(false),
                )
                .arg(
                    arg!(-m --"max-links" <N>)
                        .required(false)
                        .help("Maximum number of links to record (clamped to the configured cap)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-d --"max-depth" <N>)
                        .required(false)
                        .help("Stop extracting links below this depth")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(-w --"workers" <N>)
                        .required(false)
                        .help("Concurrent requests per scan")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-t --"timeout" <SECONDS>)
                        .required(false)
                        .help("Per-request timeout")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"scan-timeout" <SECONDS>)
                        .required(false)
                        .help("Stop the whole scan after this long and keep the partial report")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"retries" <N>)
                        .required(false)
                        .help("Extra attempts after a request times out")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(--"scope" <POLICY>)
                        .required(false)
                        .help("Which hosts count as internal: exact, subdomains or domain")
                        .value_parser(["exact", "subdomains", "domain"]),
                )
                .arg(
                    arg!(--"user-agent" <AGENT>)
                        .required(false)
                        .help("User-Agent header sent with every request"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format")
                        .value_parser(["text", "json", "csv", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write the report to a file (a directory when scanning a hosts file)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"no-save")
                        .help("Do not record this scan in the database")
                        .required(false),
                )
                .arg(
                    arg!(--"fail-on-broken")
                        .help("Exit with status 2 when any broken link is found")
                        .required(false),
                ),
        )
        .subcommand(
            command!("report")
                .about("Render a stored scan")
                .arg(arg!(<SCAN_ID>).help("Scan identifier, as printed by `linkrot list`"))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format")
                        .value_parser(["text", "json", "csv", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write the report to a file instead of stdout")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("list").about("List stored scans, newest first").arg(
                arg!(-n --"limit" <N>)
                    .required(false)
                    .help("Number of scans to show")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("20"),
            ),
        )
        .subcommand(
            command!("delete")
                .about("Remove a stored scan and its links")
                .arg(arg!(<SCAN_ID>).help("Scan identifier")),
        )
}
