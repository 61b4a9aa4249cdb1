use colored::Colorize;
use linkrot::commands::command_argument_builder;
use linkrot::handlers::{
    ConfigPaths, handle_delete, handle_init, handle_list, handle_report, handle_scan,
};
use linkrot_core::print_banner;
use std::process::ExitCode;
use tracing::Level;

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(chosen_command.get_flag("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let config_dir = chosen_command
        .get_one::<String>("config-dir")
        .map(String::as_str)
        .unwrap_or(linkrot::commands::DEFAULT_CONFIG_DIR);
    let paths = ConfigPaths::resolve(config_dir);

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => {
            handle_init(primary_command, &paths).map(|_| ExitCode::SUCCESS)
        }
        Some(("scan", primary_command)) => handle_scan(primary_command, &paths)
            .await
            .map(|verdict| verdict.exit_code(primary_command.get_flag("fail-on-broken"))),
        Some(("report", primary_command)) => {
            handle_report(primary_command, &paths).map(|_| ExitCode::SUCCESS)
        }
        Some(("list", primary_command)) => {
            handle_list(primary_command, &paths).map(|_| ExitCode::SUCCESS)
        }
        Some(("delete", primary_command)) => {
            handle_delete(primary_command, &paths).map(|_| ExitCode::SUCCESS)
        }
        // No subcommand provided, just show the banner
        _ => Ok(ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
