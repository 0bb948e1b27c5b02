//! Command implementations for the CLI

use crate::{
    cli::{
        Command,
        args::{SortKey, SourceFilter},
    },
    core::{
        CacheStatus, CommandRecord, CommandTable, Context, GitClient, InstallOutcome,
        InstallRequest, Invocation, RepoLayout, Source,
        metadata::format_timestamp,
    },
    error::DispatchError,
    utils::{fs::FileSystemUtils, process::ProcessRunner},
};
use anyhow::Context as _;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Run timeout for `ppc test` when none is configured
const TEST_RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute the appropriate command and return the process exit status
#[instrument(skip(ctx))]
pub fn execute_command(ctx: &Context, command: Option<&Command>) -> anyhow::Result<u8> {
    let Some(command) = command else {
        execute_help_command(ctx);
        return Ok(0);
    };

    match command {
        Command::Install {
            repo_url,
            name,
            branch,
            force,
            no_shallow,
            no_verify,
        } => {
            let request = InstallRequest {
                repo_url: repo_url.clone(),
                name: name.clone(),
                branch: branch.clone(),
                force: *force,
                shallow: !no_shallow,
                verify: !no_verify,
            };
            execute_install_command(ctx, &request)
        }
        Command::Update { name, force } => execute_update_command(ctx, name, *force),
        Command::Uninstall { name, yes } => execute_uninstall_command(ctx, name, *yes),
        Command::List {
            source,
            sort,
            reverse,
            detailed,
        } => execute_list_command(ctx, *source, *sort, *reverse, *detailed),
        Command::Info { name } => execute_info_command(ctx, name),
        Command::Search { term, source } => execute_search_command(ctx, term, *source),
        Command::Doctor { verbose } => Ok(execute_doctor_command(ctx, *verbose)),
        Command::Test {
            file,
            validate,
            args,
        } => execute_test_command(ctx, file, *validate, args),
        Command::Run(argv) => execute_run_command(ctx, argv),
    }
}

/// Process exit status for an error returned by [`execute_command`]
pub fn exit_status(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<DispatchError>()
        .map_or(1, DispatchError::exit_code)
}

fn discover(ctx: &Context) -> CommandTable {
    ctx.discovery().discover(ctx.config.cache.enabled)
}

fn matches_source(record: &CommandRecord, filter: SourceFilter) -> bool {
    match filter {
        SourceFilter::All => true,
        SourceFilter::Official => record.source == Source::Official,
        SourceFilter::Community => record.source == Source::Community,
    }
}

/// Print rows under headers with every column padded to its widest cell
fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[&str]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<w$}", w = *width))
            .collect();
        println!("  {}", padded.join("  ").trim_end());
    };

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    line(headers);
    line(&rule.iter().map(String::as_str).collect::<Vec<_>>());
    for row in rows {
        line(&row.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

fn summary_row(record: &CommandRecord) -> Vec<String> {
    vec![
        record.name.clone(),
        record.version.clone(),
        record.author.clone(),
        record.description.clone(),
    ]
}

/// Overview shown when no command is given
#[instrument(skip(ctx))]
fn execute_help_command(ctx: &Context) {
    let table = discover(ctx);

    if table.is_empty() {
        println!("No commands found.");
    }

    for (source, title) in [
        (Source::Official, "Official Commands"),
        (Source::Community, "Community Commands"),
    ] {
        let rows: Vec<Vec<String>> = table
            .values()
            .filter(|record| record.source == source)
            .map(summary_row)
            .collect();
        if rows.is_empty() {
            continue;
        }
        println!("{title}");
        print_table(&["Command", "Version", "Author", "Description"], &rows);
        println!();
    }

    println!("Management:");
    println!("  ppc install <repo_url> [--name NAME] [--branch BRANCH] [--force] [--no-shallow] [--no-verify]");
    println!("  ppc update <name> [--force]");
    println!("  ppc uninstall <name> [--yes]");
    println!("  ppc list | info <name> | search <term> | doctor | test");
    println!();
    println!("Run 'ppc <command> [args...]' to run a command.");
}

/// Execute the install command
#[instrument(skip(ctx))]
fn execute_install_command(ctx: &Context, request: &InstallRequest) -> anyhow::Result<u8> {
    let installer = ctx.installer()?;
    let outcome = installer
        .install(request)
        .with_context(|| format!("Failed to install {}", request.repo_url))?;

    let InstallOutcome::Installed { name, layout, .. } = outcome else {
        return Ok(0);
    };

    let installed = match layout {
        RepoLayout::MultiCommand(commands) => commands,
        RepoLayout::Legacy => vec![name],
    };

    let table = discover(ctx);
    for command in installed {
        match table.get(&command) {
            Some(record) => print_info(record),
            None => warn!("Installed command '{}' was not discovered", command),
        }
    }
    Ok(0)
}

/// Execute the update command
#[instrument(skip(ctx))]
fn execute_update_command(ctx: &Context, name: &str, force: bool) -> anyhow::Result<u8> {
    ctx.installer()?
        .update(name, force)
        .with_context(|| format!("Failed to update '{name}'"))?;
    Ok(0)
}

/// Execute the uninstall command
#[instrument(skip(ctx))]
fn execute_uninstall_command(ctx: &Context, name: &str, yes: bool) -> anyhow::Result<u8> {
    ctx.installer()?
        .uninstall(name, yes)
        .with_context(|| format!("Failed to uninstall '{name}'"))?;
    Ok(0)
}

/// Execute the list command
#[instrument(skip(ctx))]
fn execute_list_command(
    ctx: &Context,
    source: SourceFilter,
    sort: SortKey,
    reverse: bool,
    detailed: bool,
) -> anyhow::Result<u8> {
    let table = discover(ctx);
    let mut records: Vec<&CommandRecord> = table
        .values()
        .filter(|record| matches_source(record, source))
        .collect();

    if records.is_empty() {
        println!("No commands found.");
        return Ok(0);
    }

    match sort {
        SortKey::Name => {}
        SortKey::Version => records.sort_by(|a, b| a.version.cmp(&b.version)),
        SortKey::Author => records.sort_by(|a, b| a.author.cmp(&b.author)),
        SortKey::Installed => records.sort_by(|a, b| a.installed_at.cmp(&b.installed_at)),
    }
    if reverse {
        records.reverse();
    }

    let mut headers = vec!["Command", "Version", "Author", "Source", "Description"];
    if detailed {
        headers.extend(["Installed", "Dependencies"]);
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            let mut row = vec![
                record.name.clone(),
                record.version.clone(),
                record.author.clone(),
                record.source.to_string(),
                record.description.clone(),
            ];
            if detailed {
                row.push(match (&record.installed_at, record.source) {
                    (Some(raw), _) => format_timestamp(raw),
                    (None, Source::Official) => "Built-in".to_string(),
                    (None, Source::Community) => "Unknown".to_string(),
                });
                row.push(if record.dependencies.is_empty() {
                    "None".to_string()
                } else {
                    record.dependencies.join(", ")
                });
            }
            row
        })
        .collect();

    print_table(&headers, &rows);

    let official = records
        .iter()
        .filter(|r| r.source == Source::Official)
        .count();
    println!();
    println!(
        "Total: {} commands ({} official, {} community)",
        records.len(),
        official,
        records.len() - official
    );
    Ok(0)
}

fn print_info(record: &CommandRecord) {
    println!("Command: {}", record.name);
    println!("  Version:      {}", record.version);
    println!("  Author:       {}", record.author);
    println!("  Source:       {}", record.source);
    println!("  Description:  {}", record.description);
    println!("  File:         {}", record.file_path.display());
    if let Some(url) = &record.repo_url {
        println!("  Repository:   {url}");
    }
    if let Some(installed) = &record.installed_at {
        println!("  Installed:    {}", format_timestamp(installed));
        if let Some(updated) = &record.last_updated_at {
            if updated != installed {
                println!("  Last updated: {}", format_timestamp(updated));
            }
        }
    }
    if !record.dependencies.is_empty() {
        println!("  Dependencies: {}", record.dependencies.join(", "));
    }
}

/// Execute the info command
#[instrument(skip(ctx))]
fn execute_info_command(ctx: &Context, name: &str) -> anyhow::Result<u8> {
    let table = discover(ctx);
    let record = table.get(name).ok_or_else(|| DispatchError::UnknownCommand {
        name: name.to_string(),
    })?;
    print_info(record);
    Ok(0)
}

/// Execute the search command
#[instrument(skip(ctx))]
fn execute_search_command(ctx: &Context, term: &str, source: SourceFilter) -> anyhow::Result<u8> {
    let needle = term.to_lowercase();
    let table = discover(ctx);

    let rows: Vec<Vec<String>> = table
        .values()
        .filter(|record| matches_source(record, source))
        .filter(|record| {
            [&record.name, &record.description, &record.author]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .map(summary_row)
        .collect();

    if rows.is_empty() {
        info!("No commands found matching '{}'", term);
        return Ok(0);
    }

    print_table(&["Command", "Version", "Author", "Description"], &rows);
    println!();
    println!("Found {} command(s) matching '{}'", rows.len(), term);
    Ok(0)
}

/// Outcome of one doctor check
struct Check {
    name: &'static str,
    passed: bool,
    details: Vec<String>,
}

impl Check {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            details: Vec::new(),
        }
    }

    fn pass(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }

    fn fail(&mut self, detail: impl Into<String>) {
        self.passed = false;
        self.details.push(detail.into());
    }
}

fn check_directories(ctx: &Context) -> Check {
    let fs_utils = FileSystemUtils::new();
    let mut check = Check::new("Directories");
    let config = &ctx.config;

    for (label, dir) in [
        ("official", &config.official_dir),
        ("community", &config.community_dir),
        ("cache", &config.cache_dir),
    ] {
        if !dir.is_dir() {
            check.fail(format!("{label}: {} does not exist", dir.display()));
        } else if !fs_utils.is_writable_dir(dir) {
            check.fail(format!("{label}: {} is not writable", dir.display()));
        } else {
            check.pass(format!("{label}: {}", dir.display()));
        }
    }
    check
}

fn check_commands(ctx: &Context) -> Check {
    let mut check = Check::new("Commands");
    let table = ctx.discovery().discover(false);
    let executor = ctx.executor();

    if table.is_empty() {
        check.pass("no commands installed");
    }

    for record in table.values() {
        if !record.file_path.is_file() {
            check.fail(format!("{}: {} is missing", record.name, record.file_path.display()));
            continue;
        }
        match executor.probe(&record.name, &record.file_path) {
            Ok(()) => check.pass(format!("{}: ok", record.name)),
            Err(e) => check.fail(format!("{}: {e}", record.name)),
        }
    }
    check
}

fn check_interpreter(ctx: &Context) -> Check {
    let mut check = Check::new("Interpreter");
    let interpreter = &ctx.config.runtime.interpreter;
    let runner = ProcessRunner::new(ctx.config.debug);

    if !runner.command_exists(interpreter) {
        check.fail(format!("{interpreter} not found on PATH"));
        return check;
    }
    match runner.run_command_with_output(interpreter, &["--version"]) {
        Ok(result) => {
            let version = if result.stdout.trim().is_empty() {
                result.stderr.trim()
            } else {
                result.stdout.trim()
            };
            check.pass(format!("{interpreter}: {version}"));
        }
        Err(e) => check.fail(format!("{interpreter}: {e}")),
    }
    check
}

fn check_git(ctx: &Context) -> Check {
    let mut check = Check::new("Git");
    match GitClient::new(&ctx.config.install.git_binary, ctx.config.debug).version() {
        Ok(version) => check.pass(version),
        Err(e) => check.fail(format!("git unavailable: {e}")),
    }
    check
}

fn check_cache(ctx: &Context) -> Check {
    let mut check = Check::new("Cache");
    let hours = |age: Duration| age.as_secs_f64() / 3600.0;

    match ctx.discovery().cache().status() {
        CacheStatus::Absent => check.pass("not built yet"),
        CacheStatus::Valid { entries, age } => {
            check.pass(format!("{entries} entries, {:.1}h old", hours(age)));
        }
        CacheStatus::Expired { entries, age } => check.pass(format!(
            "expired ({entries} entries, {:.1}h old), rebuilt on next use",
            hours(age)
        )),
        CacheStatus::Corrupt(reason) => check.fail(format!("unreadable: {reason}")),
    }
    check
}

/// Execute the doctor command. Returns 1 when any check fails.
#[instrument(skip(ctx))]
fn execute_doctor_command(ctx: &Context, verbose: bool) -> u8 {
    let checks = [
        check_directories(ctx),
        check_interpreter(ctx),
        check_commands(ctx),
        check_git(ctx),
        check_cache(ctx),
    ];

    for check in &checks {
        println!("[{}] {}", if check.passed { "PASS" } else { "FAIL" }, check.name);
        if verbose || !check.passed {
            for detail in &check.details {
                println!("       {detail}");
            }
        }
    }

    if checks.iter().all(|c| c.passed) {
        println!("\nAll checks passed.");
        0
    } else {
        println!("\nSome checks failed.");
        1
    }
}

/// Execute the test command
#[instrument(skip(ctx, args))]
fn execute_test_command(
    ctx: &Context,
    file: &Path,
    validate: bool,
    args: &[String],
) -> anyhow::Result<u8> {
    if !file.is_file() {
        return Err(DispatchError::validation(format!("File not found: {}", file.display())).into());
    }

    if validate {
        ctx.security()?.validate_script(file, ctx.prompter())?;
    }

    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("test")
        .to_string();
    let timeout = ctx.config.runtime.run_timeout.unwrap_or(TEST_RUN_TIMEOUT);
    info!("Testing {} with timeout {}s...", file.display(), timeout.as_secs());

    let invocation = ctx.executor().execute(&name, file, args, Some(timeout))?;
    let status = report_invocation(&name, invocation)?;
    if status == 0 {
        info!("Test completed successfully.");
    }
    Ok(status)
}

/// Exit status for what a plugin's `main` did
fn report_invocation(name: &str, invocation: Invocation) -> Result<u8, DispatchError> {
    match invocation {
        Invocation::Success | Invocation::EarlyExit(0) => Ok(0),
        Invocation::EarlyExit(code) => Err(DispatchError::PluginExit {
            name: name.to_string(),
            code,
        }),
        Invocation::Fault(message) => Err(DispatchError::PluginFault {
            name: name.to_string(),
            message,
        }),
    }
}

/// Run a discovered command with the remaining arguments
#[instrument(skip(ctx))]
fn execute_run_command(ctx: &Context, argv: &[String]) -> anyhow::Result<u8> {
    let Some((name, args)) = argv.split_first() else {
        return Err(DispatchError::validation("No command given").into());
    };

    let table = discover(ctx);
    let Some(record) = table.get(name) else {
        info!("Run 'ppc' to see available commands");
        return Err(DispatchError::UnknownCommand { name: name.clone() }.into());
    };

    if record.source == Source::Community {
        ctx.security()?
            .validate_script(&record.file_path, ctx.prompter())?;
    }

    let result = ctx
        .executor()
        .execute(name, &record.file_path, args, ctx.config.runtime.run_timeout);

    match result {
        Ok(invocation) => Ok(report_invocation(name, invocation)?),
        Err(e @ DispatchError::LoadFailed { .. }) => {
            if !record.dependencies.is_empty() {
                warn!("This command requires: {}", record.dependencies.join(", "));
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_invocation() {
        assert_eq!(report_invocation("x", Invocation::Success).unwrap(), 0);
        assert_eq!(report_invocation("x", Invocation::EarlyExit(0)).unwrap(), 0);
        for code in [2, 3, 4, -1, 300] {
            let early = report_invocation("x", Invocation::EarlyExit(code)).unwrap_err();
            assert_eq!(early.exit_code(), 10);
            assert!(early.to_string().contains(&format!("status {code}")));
        }
        let fault = report_invocation("x", Invocation::Fault("boom".into())).unwrap_err();
        assert_eq!(fault.exit_code(), 6);
    }

    #[test]
    fn test_exit_status_sees_through_context() {
        let error = anyhow::Error::from(DispatchError::UnknownCommand {
            name: "nope".to_string(),
        })
        .context("Failed to run");
        assert_eq!(exit_status(&error), 2);

        assert_eq!(exit_status(&anyhow::anyhow!("plain")), 1);
    }
}
