// Report rendering for finished and in-progress scans

use crate::data::ScanSummary;
use linkrot_scanner::report::{ScanReport, ScanStatus};
use linkrot_scanner::result::ScannedLink;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use url::Url;

const RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Markdown => "md",
        }
    }
}

pub fn render(report: &ScanReport, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(report)),
        ReportFormat::Json => generate_json_report(report),
        ReportFormat::Csv => Ok(generate_csv_report(report)),
        ReportFormat::Markdown => Ok(generate_markdown_report(report)),
    }
}

/// Path component of a URL, `/` for the root.
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let mut path = u.path().to_string();
            if path.is_empty() {
                path.push('/');
            }
            if let Some(query) = u.query() {
                path.push('?');
                path.push_str(query);
            }
            path
        })
        .unwrap_or_else(|| url.to_string())
}

/// Links grouped by host. Hosts are sorted; broken links come first within
/// each host.
pub fn group_by_host(links: &[ScannedLink]) -> BTreeMap<String, Vec<&ScannedLink>> {
    let mut by_host: BTreeMap<String, Vec<&ScannedLink>> = BTreeMap::new();

    for link in links {
        let host = Url::parse(&link.node.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        by_host.entry(host).or_default().push(link);
    }

    for host_links in by_host.values_mut() {
        host_links.sort_by_key(|link| !link.result.is_broken);
    }

    by_host
}

fn status_label(report: &ScanReport) -> String {
    let base = match report.status {
        ScanStatus::Running => "Running",
        ScanStatus::Completed => "Completed",
        ScanStatus::Failed => "Failed",
    };
    match (&report.failure, &report.note) {
        (Some(failure), _) => format!("{} ({})", base, failure.kind.as_str()),
        (None, Some(note)) => format!("{} ({})", base, note.as_str()),
        _ => base.to_string(),
    }
}

fn link_outcome(link: &ScannedLink) -> String {
    let result = &link.result;
    if !result.checked {
        return "unchecked".to_string();
    }
    match (result.status_code, result.error) {
        (Some(code), _) => code.to_string(),
        (None, Some(cause)) => cause.as_str().to_string(),
        (None, None) => "-".to_string(),
    }
}

fn link_marker(link: &ScannedLink) -> &'static str {
    if !link.result.checked {
        "·"
    } else if link.result.is_broken {
        "✗"
    } else {
        match link.result.status_code {
            Some(300..=399) => "→",
            _ => "✓",
        }
    }
}

fn redirected_to(link: &ScannedLink) -> Option<&str> {
    link.result
        .final_url
        .as_deref()
        .filter(|final_url| *final_url != link.node.url)
}

pub fn generate_text_report(report: &ScanReport) -> String {
    let mut out = String::new();

    out.push_str(RULE);
    out.push_str("                           LINKROT SCAN REPORT\n");
    out.push_str(RULE);
    out.push('\n');

    out.push_str(&format!("Scan ID:      {}\n", report.id));
    out.push_str(&format!("Seed:         {}\n", report.seed_url));
    out.push_str(&format!("Status:       {}\n", status_label(report)));
    out.push_str(&format!(
        "Started:      {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(duration) = report.duration_secs() {
        out.push_str(&format!("Duration:     {} seconds\n", duration));
    }
    out.push_str(&format!("Links Found:  {}\n", report.nodes.len()));
    out.push_str(&format!("Checked:      {}\n", report.total_checked));
    out.push_str(&format!("Broken:       {}\n", report.total_broken));

    if let Some(ref failure) = report.failure {
        out.push_str(&format!("\nReason:       {}\n", failure.message));
    } else if let Some(note) = report.note {
        out.push_str(&format!("\nNote:         {}\n", note.describe()));
    }
    out.push('\n');

    if report.total_broken > 0 {
        out.push_str(RULE);
        out.push_str("BROKEN LINKS\n");
        out.push_str(RULE);
        out.push('\n');

        for (idx, link) in report.broken_links().enumerate() {
            out.push_str(&format!("[{}] {}\n", idx + 1, link.node.url));
            out.push_str(&format!("    Result:   {}\n", link_outcome(link)));
            if let Some(ref parent) = link.node.parent_url {
                out.push_str(&format!("    Found on: {}\n", parent));
            }
            if let Some(target) = redirected_to(link) {
                out.push_str(&format!("    Redirect: {}\n", target));
            }
        }
        out.push('\n');
    }

    if !report.nodes.is_empty() {
        out.push_str(RULE);
        out.push_str("ALL LINKS BY HOST\n");
        out.push_str(RULE);
        out.push('\n');

        for (host, links) in group_by_host(&report.nodes) {
            let broken = links.iter().filter(|l| l.result.is_broken).count();
            out.push_str(&format!("## {}\n", host));
            out.push_str(&format!("  {} links, {} broken\n\n", links.len(), broken));

            for link in links {
                let mut line = format!(
                    "  {} {:<9} {}",
                    link_marker(link),
                    link_outcome(link),
                    extract_url_path(&link.node.url)
                );
                if let Some(target) = redirected_to(link) {
                    line.push_str(&format!(" -> {}", target));
                }
                out.push_str(&line);
                out.push('\n');
            }
            out.push('\n');
        }
    }

    out.push_str(RULE);
    out.push_str("                              End of Report\n");
    out.push_str(RULE);
    out.push_str(&format!("\nGenerated by linkrot v{}\n", env!("CARGO_PKG_VERSION")));

    out
}

pub fn generate_json_report(report: &ScanReport) -> Result<String, serde_json::Error> {
    let broken: Vec<&ScannedLink> = report.broken_links().collect();

    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "linkrot",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "scan": {
                "id": report.id,
                "seed_url": report.seed_url,
                "status": report.status.as_str(),
                "started_at": report.started_at.to_rfc3339(),
                "completed_at": report.completed_at.map(|t| t.to_rfc3339()),
                "duration_seconds": report.duration_secs(),
                "failure": report.failure,
                "note": report.note.map(|n| n.as_str())
            },
            "summary": {
                "total_links": report.nodes.len(),
                "total_checked": report.total_checked,
                "total_broken": report.total_broken
            },
            "broken_links": broken,
            "links": report.nodes
        }
    });

    serde_json::to_string_pretty(&json_report)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn generate_csv_report(report: &ScanReport) -> String {
    let mut out = String::from(
        "url,parent_url,depth,scope,final_url,status_code,is_broken,error,checked,checked_at\n",
    );

    for link in &report.nodes {
        let fields = [
            csv_field(&link.node.url),
            csv_field(link.node.parent_url.as_deref().unwrap_or("")),
            link.node.depth.to_string(),
            link.node.scope.as_str().to_string(),
            csv_field(link.result.final_url.as_deref().unwrap_or("")),
            link.result
                .status_code
                .map(|c| c.to_string())
                .unwrap_or_default(),
            link.result.is_broken.to_string(),
            link.result
                .error
                .map(|e| e.as_str().to_string())
                .unwrap_or_default(),
            link.result.checked.to_string(),
            link.result.checked_at.to_rfc3339(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

fn md_escape(value: &str) -> String {
    value.replace('|', "\\|")
}

pub fn generate_markdown_report(report: &ScanReport) -> String {
    let mut out = String::new();

    out.push_str("# linkrot scan report\n\n");
    out.push_str(&format!("- **Scan ID:** `{}`\n", report.id));
    out.push_str(&format!("- **Seed:** {}\n", report.seed_url));
    out.push_str(&format!("- **Status:** {}\n", status_label(report)));
    out.push_str(&format!(
        "- **Started:** {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(duration) = report.duration_secs() {
        out.push_str(&format!("- **Duration:** {}s\n", duration));
    }
    out.push_str(&format!(
        "- **Links:** {} found, {} checked, {} broken\n",
        report.nodes.len(),
        report.total_checked,
        report.total_broken
    ));
    if let Some(ref failure) = report.failure {
        out.push_str(&format!("- **Reason:** {}\n", failure.message));
    } else if let Some(note) = report.note {
        out.push_str(&format!("- **Note:** {}\n", note.describe()));
    }
    out.push('\n');

    out.push_str("## Broken links\n\n");
    if report.total_broken == 0 {
        out.push_str("No broken links found.\n\n");
    } else {
        out.push_str("| URL | Result | Found on |\n");
        out.push_str("|-----|--------|----------|\n");
        for link in report.broken_links() {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                md_escape(&link.node.url),
                link_outcome(link),
                md_escape(link.node.parent_url.as_deref().unwrap_or("-"))
            ));
        }
        out.push('\n');
    }

    out.push_str("## All links\n\n");
    for (host, links) in group_by_host(&report.nodes) {
        out.push_str(&format!("### {}\n\n", host));
        out.push_str("| Path | Result | Scope | Depth |\n");
        out.push_str("|------|--------|-------|-------|\n");
        for link in links {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                md_escape(&extract_url_path(&link.node.url)),
                link_outcome(link),
                link.node.scope.as_str(),
                link.node.depth
            ));
        }
        out.push('\n');
    }

    out
}

/// One line per stored scan, newest first.
pub fn generate_scan_list(scans: &[ScanSummary]) -> String {
    if scans.is_empty() {
        return "No scans recorded yet.\n".to_string();
    }

    let mut out = format!(
        "{:<36}  {:<10}  {:>6}  {:>6}  {:<19}  {}\n",
        "SCAN ID", "STATUS", "LINKS", "BROKEN", "STARTED", "SEED"
    );
    for scan in scans {
        out.push_str(&format!(
            "{:<36}  {:<10}  {:>6}  {:>6}  {:<19}  {}\n",
            scan.id.to_string(),
            scan.status.as_str(),
            scan.total_links,
            scan.total_broken,
            scan.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            scan.seed_url
        ));
    }
    out
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
