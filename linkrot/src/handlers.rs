use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use linkrot_core::data::Database;
use linkrot_core::render::{ReportFormat, generate_scan_list, render, save_report};
use linkrot_core::scan::{ScanOptions, execute_scan};
use linkrot_scanner::config::{CrawlMode, ScanConfig, ScanRequest, ScopePolicy};
use linkrot_scanner::report::{ScanId, ScanReport, ScanStatus};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use url::Url;

pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "linkrot.db";

/// Where the CLI keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub dir: PathBuf,
    pub config_file: PathBuf,
    pub database: PathBuf,
}

impl ConfigPaths {
    pub fn resolve(dir: &str) -> Self {
        let expanded = shellexpand::tilde(dir);
        let dir = PathBuf::from(expanded.as_ref());
        Self {
            config_file: dir.join(CONFIG_FILE),
            database: dir.join(DATABASE_FILE),
            dir,
        }
    }
}

/// How a scan run ended, from the shell's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Broken,
    Failed,
}

impl ScanVerdict {
    pub fn of(report: &ScanReport) -> Self {
        if report.status == ScanStatus::Failed {
            ScanVerdict::Failed
        } else if report.total_broken > 0 {
            ScanVerdict::Broken
        } else {
            ScanVerdict::Clean
        }
    }

    /// The worse of two verdicts.
    pub fn merge(self, other: ScanVerdict) -> Self {
        match (self, other) {
            (ScanVerdict::Failed, _) | (_, ScanVerdict::Failed) => ScanVerdict::Failed,
            (ScanVerdict::Broken, _) | (_, ScanVerdict::Broken) => ScanVerdict::Broken,
            _ => ScanVerdict::Clean,
        }
    }

    pub fn exit_code(self, fail_on_broken: bool) -> ExitCode {
        match self {
            ScanVerdict::Failed => ExitCode::FAILURE,
            ScanVerdict::Broken if fail_on_broken => ExitCode::from(2),
            _ => ExitCode::SUCCESS,
        }
    }
}

// Helper functions for the scan handler

/// Load seeds from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&String>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        // An unparseable seed still goes to the engine, which fails the scan
        // with a proper reason.
        Ok(vec![with_default_scheme(url).unwrap_or_else(|| url.clone())])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, adding http:// when there is no scheme
pub fn parse_url_line(line: &str) -> Option<String> {
    let parsed = with_default_scheme(line);
    if parsed.is_none() {
        eprintln!("{}  Skipping invalid URL '{}'", "⚠".yellow(), line);
    }
    parsed
}

fn with_default_scheme(line: &str) -> Option<String> {
    if line.contains("://") {
        return Url::parse(line).ok().map(|_| line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    Url::parse(&with_scheme).ok().map(|_| with_scheme)
}

/// The config file if `linkrot init` has written one, defaults otherwise.
pub fn load_config(paths: &ConfigPaths) -> Result<ScanConfig> {
    if !paths.config_file.exists() {
        return Ok(ScanConfig::default());
    }
    ScanConfig::load(&paths.config_file)
        .with_context(|| format!("Failed to load {}", paths.config_file.display()))
}

/// Apply `scan` flags on top of the loaded config.
pub fn build_scan_config(args: &ArgMatches, base: ScanConfig) -> Result<ScanConfig> {
    let mut config = base;

    if let Some(&workers) = args.get_one::<usize>("workers") {
        config.workers = workers;
    }
    if let Some(&secs) = args.get_one::<u64>("timeout") {
        config = config.with_request_timeout(Duration::from_secs(secs));
    }
    if let Some(&secs) = args.get_one::<u64>("scan-timeout") {
        config = config.with_scan_timeout(Duration::from_secs(secs));
    }
    if let Some(&retries) = args.get_one::<u32>("retries") {
        config.retries_on_timeout = retries;
    }
    if let Some(&depth) = args.get_one::<u32>("max-depth") {
        config = config.with_max_depth(Some(depth));
    }
    if let Some(scope) = args.get_one::<String>("scope") {
        let policy = ScopePolicy::from_str(scope)
            .ok_or_else(|| anyhow!("Unknown scope policy '{}'", scope))?;
        config = config.with_scope_policy(policy);
    }
    if let Some(agent) = args.get_one::<String>("user-agent") {
        config.user_agent = agent.clone();
    }

    config.validate()?;
    Ok(config)
}

pub fn build_scan_request(seed: String, args: &ArgMatches) -> ScanRequest {
    let mode = args
        .get_one::<String>("mode")
        .and_then(|m| CrawlMode::from_str(m))
        .unwrap_or(CrawlMode::AllLinks);

    let mut request = ScanRequest::new(seed)
        .with_crawl_mode(mode)
        .with_check_status_codes(!args.get_flag("no-check"))
        .with_auto_follow_internal(args.get_flag("follow"));
    if let Some(&max_links) = args.get_one::<usize>("max-links") {
        request = request.with_max_links(max_links);
    }
    request
}

pub fn selected_format(args: &ArgMatches) -> Result<ReportFormat> {
    let name = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    ReportFormat::from_str(name).ok_or_else(|| anyhow!("Unknown report format '{}'", name))
}

/// File a report is written to. With several seeds `output` is a directory
/// and each report is named after its scan id.
pub fn report_destination(
    output: &Path,
    report: &ScanReport,
    format: ReportFormat,
    multiple: bool,
) -> PathBuf {
    if multiple {
        output.join(format!("{}.{}", report.id, format.extension()))
    } else {
        output.to_path_buf()
    }
}

fn open_database(paths: &ConfigPaths) -> Result<Database> {
    if !Database::exists(&paths.database) {
        bail!(
            "No database at {}. Run `linkrot init` first.",
            paths.database.display()
        );
    }
    Database::new(&paths.database)
        .with_context(|| format!("Failed to open {}", paths.database.display()))
}

fn parse_scan_id(args: &ArgMatches) -> Result<ScanId> {
    let raw = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("A scan id is required"))?;
    ScanId::parse(raw).ok_or_else(|| anyhow!("'{}' is not a valid scan id", raw))
}

fn emit(content: &str, output: Option<&PathBuf>, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            save_report(content, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                eprintln!(
                    "{} Report written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bright_white()
                );
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn divider() -> colored::ColoredString {
    "═".repeat(60).bright_blue().bold()
}

fn print_divider() {
    println!("{}", divider());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn print_scan_summary(report: &ScanReport) {
    eprintln!();
    eprintln!("{}", divider());
    eprintln!("{}", "  SCAN SUMMARY".bright_white().bold());
    eprintln!("{}", divider());

    let status = match report.status {
        ScanStatus::Completed => report.status.as_str().green().bold(),
        ScanStatus::Failed => report.status.as_str().red().bold(),
        ScanStatus::Running => report.status.as_str().yellow().bold(),
    };
    eprintln!("{} Scan:    {}", "→".blue(), report.id.to_string().bright_white());
    eprintln!("{} Seed:    {}", "→".blue(), report.seed_url.bright_white());
    eprintln!("{} Status:  {}", "→".blue(), status);

    if let Some(ref failure) = report.failure {
        eprintln!("{} {}", "✗".red().bold(), failure.message);
        eprintln!();
        return;
    }
    if let Some(note) = report.note {
        eprintln!("{} {}", "⚠".yellow().bold(), note.describe().yellow());
    }

    eprintln!(
        "{} Links:   {} found, {} checked",
        "→".blue(),
        report.nodes.len(),
        report.total_checked
    );
    if report.total_broken > 0 {
        eprintln!(
            "{} Broken:  {}",
            "✗".red().bold(),
            report.total_broken.to_string().red().bold()
        );
    } else {
        eprintln!("{} No broken links", "✓".green().bold());
    }
    eprintln!();
}

pub fn handle_init(args: &ArgMatches, paths: &ConfigPaths) -> Result<()> {
    let force = args.get_flag("force");
    let paths = match args.get_one::<String>("PATH") {
        Some(dir) => ConfigPaths::resolve(dir),
        None => paths.clone(),
    };

    print_divider();
    println!("{}", "  LINKROT INITIALIZATION".bright_white().bold());
    print_divider();
    println!();
    println!(
        "{} Target: {}",
        "→".blue(),
        paths.dir.display().to_string().bright_white()
    );
    println!();

    let config_exists = paths.config_file.exists();
    let db_exists = Database::exists(&paths.database);

    if (config_exists || db_exists) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("An existing installation was found:");
        for existing in [&paths.config_file, &paths.database] {
            if existing.exists() {
                println!(
                    "  {} {}",
                    "•".yellow(),
                    existing.display().to_string().bright_white()
                );
            }
        }
        println!();
        println!(
            "{}",
            "This operation will overwrite them, including all scan history.".yellow()
        );

        let response = print_prompt("Do you want to continue? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Failed to create {}", paths.dir.display()))?;
    println!("{} Config directory ready", "✓".green().bold());

    ScanConfig::default()
        .save(&paths.config_file)
        .with_context(|| format!("Failed to write {}", paths.config_file.display()))?;
    println!(
        "{} Wrote {}",
        "✓".green().bold(),
        paths.config_file.display().to_string().bright_white()
    );

    if db_exists {
        Database::drop(&paths.database)
            .with_context(|| format!("Failed to remove {}", paths.database.display()))?;
    }
    Database::new(&paths.database)
        .with_context(|| format!("Failed to create {}", paths.database.display()))?;
    println!(
        "{} Created {}",
        "✓".green().bold(),
        paths.database.display().to_string().bright_white()
    );

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Run {} to scan a site",
        "→".blue(),
        "linkrot scan -u <URL>".bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_scan(args: &ArgMatches, paths: &ConfigPaths) -> Result<ScanVerdict> {
    let quiet = args.get_flag("quiet");
    let seeds = load_urls_from_source(
        args.get_one::<String>("url"),
        args.get_one::<PathBuf>("hosts-file"),
    )
    .map_err(|e| anyhow!(e))?;

    let config = build_scan_config(args, load_config(paths)?)?;
    let format = selected_format(args)?;
    let output = args.get_one::<PathBuf>("output");

    let db_path = if args.get_flag("no-save") {
        None
    } else if Database::exists(&paths.database) {
        Some(paths.database.clone())
    } else {
        if !quiet {
            eprintln!(
                "{} No database at {}; this scan will not be saved. Run {} to keep history.",
                "⚠".yellow(),
                paths.database.display(),
                "linkrot init".bright_white()
            );
        }
        None
    };

    let multiple = seeds.len() > 1;
    if multiple && let Some(dir) = output {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut verdict = ScanVerdict::Clean;
    for seed in seeds {
        let options = ScanOptions {
            request: build_scan_request(seed, args),
            config: config.clone(),
            db_path: db_path.clone(),
            show_progress_bars: !quiet,
        };
        let report = execute_scan(options).await.context("Scan could not be run")?;

        let rendered = render(&report, format).context("Failed to render report")?;
        let destination = output.map(|path| report_destination(path, &report, format, multiple));
        emit(&rendered, destination.as_ref(), quiet)?;

        if !quiet {
            print_scan_summary(&report);
        }
        verdict = verdict.merge(ScanVerdict::of(&report));
    }

    Ok(verdict)
}

pub fn handle_report(args: &ArgMatches, paths: &ConfigPaths) -> Result<()> {
    let id = parse_scan_id(args)?;
    let db = open_database(paths)?;
    let report = db
        .load_report(id)
        .context("Failed to read scan")?
        .ok_or_else(|| anyhow!("No scan with id {}", id))?;

    let rendered = render(&report, selected_format(args)?).context("Failed to render report")?;
    emit(&rendered, args.get_one::<PathBuf>("output"), args.get_flag("quiet"))
}

pub fn handle_list(args: &ArgMatches, paths: &ConfigPaths) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(20);
    let db = open_database(paths)?;
    let scans = db.list_scans(limit).context("Failed to list scans")?;
    print!("{}", generate_scan_list(&scans));
    Ok(())
}

pub fn handle_delete(args: &ArgMatches, paths: &ConfigPaths) -> Result<()> {
    let id = parse_scan_id(args)?;
    let db = open_database(paths)?;
    if !db.delete_scan(id).context("Failed to delete scan")? {
        bail!("No scan with id {}", id);
    }
    if !args.get_flag("quiet") {
        println!("{} Deleted scan {}", "✓".green().bold(), id);
    }
    Ok(())
}
