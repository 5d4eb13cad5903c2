use anyhow::Context;
use blobtree_check::{CheckReport, Checker};
use colored::Colorize;

use crate::cli::{Cli, OutputFormat};

/// Run the check and print the report. Returns `true` when the database is clean.
pub fn run_command(cli: Cli) -> anyhow::Result<bool> {
    let report = Checker::new(&cli.database)
        .run()
        .with_context(|| format!("checking {}", cli.database.display()))?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report, cli.verbose),
    }
    Ok(report.is_clean())
}

fn print_text(report: &CheckReport, verbose: bool) {
    println!("Checking {}", report.root.display().to_string().bold());
    if verbose {
        let prime = report
            .starting_prime
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        println!("  Starting prime: {}", prime.cyan());
        println!("  Directories: {}", report.directories);
        println!("  Leaves: {}", report.leaves);
        println!("  Keys: {}", report.keys);
    }
    if report.is_clean() {
        println!("{} No problems found.", "✓".green().bold());
        return;
    }
    for problem in &report.problems {
        println!("  {} {}", "✗".red(), problem);
    }
    println!(
        "{} {} problem(s) found.",
        "✗".red().bold(),
        report.problems.len().to_string().yellow()
    );
}
