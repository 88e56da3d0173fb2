use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;
use wiktbot_core::api::{MediaWikiClient, OfflineWiki, WikiWriteApi};
use wiktbot_core::config::{BotCredentials, load_config};
use wiktbot_core::delete::{DeleteOptions, DeleteReport, delete_pages};
use wiktbot_core::edit::{EditOptions, PageProcessor, RunReport, run_edits};
use wiktbot_core::pages::{PageRange, PageSelection, PageSource, collect_pages, parse_namespace};
use wiktbot_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_config, normalize_for_display,
    resolve_paths,
};
use wiktbot_core::tasks::redundant::RemoveRedundantParam;
use wiktbot_core::tasks::reports::{FindRegex, TallyParams};
use wiktbot_core::tasks::templates::{CharacterCat, RemoveParam, RenameParam, RenameTemplate};
use wiktbot_core::tasks::text::{RegexReplace, RenameHeader};
use wiktbot_core::tasks::{LanguageScope, split_list};

#[derive(Debug, Parser)]
#[command(
    name = "wiktbot",
    version,
    about = "Bulk maintenance tasks for Wiktionary entries (dry run unless --save)"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(flatten)]
    run: RunArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[arg(long, global = true, help = "Save changes to the wiki (default is a dry run)")]
    save: bool,
    #[arg(long, global = true, help = "Log diffs and debug output")]
    verbose: bool,
    #[arg(long, global = true, value_name = "N", help = "First page to process (1-based)")]
    start: Option<usize>,
    #[arg(long, global = true, value_name = "N", help = "Last page to process (inclusive)")]
    end: Option<usize>,
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[arg(long, global = true, value_name = "CAT[,CAT]", help = "Pages in these categories")]
    cats: Option<String>,
    #[arg(long, global = true, help = "Walk subcategories of --cats")]
    recursive: bool,
    #[arg(long, global = true, value_name = "TEMPLATE[,..]", help = "Pages transcluding these templates")]
    refs: Option<String>,
    #[arg(long, global = true, value_name = "TITLE[,..]", help = "Pages linking to these titles")]
    links: Option<String>,
    #[arg(long, global = true, value_name = "T1,T2", help = "Explicit page titles")]
    pages: Option<String>,
    #[arg(long, global = true, value_name = "PATH", help = "File with one title per line")]
    pagefile: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH|-", help = "Text dump to read pages from")]
    dump: Option<PathBuf>,
    #[arg(long, global = true, value_name = "NS[,NS]", help = "Namespace filter for wiki sources")]
    namespace: Option<String>,
    #[arg(long, global = true, value_name = "LANG", help = "Only edit the ==LANG== section")]
    lang: Option<String>,
    #[arg(long, global = true, help = "Input text is already the --lang section")]
    partial_page: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write a starter .wiktbot/config.toml")]
    Init(InitArgs),
    #[command(about = "Rename template invocations")]
    RenameTemplate(RenameTemplateArgs),
    #[command(about = "Rename a template parameter")]
    RenameParam(RenameParamArgs),
    #[command(about = "Remove a template parameter")]
    RemoveParam(RemoveParamArgs),
    #[command(about = "Convert {{charactercat}} to {{auto cat}}")]
    Charactercat,
    #[command(about = "Apply a regex substitution")]
    RegexReplace(RegexReplaceArgs),
    #[command(about = "Rename section headers")]
    RenameHeader(RenameHeaderArgs),
    #[command(about = "Remove a parameter that does not change the template's expansion")]
    RemoveRedundantParam(TemplateParamArgs),
    #[command(about = "Count parameter values used with a template")]
    TallyParams(TallyParamsArgs),
    #[command(about = "List lines (or pages) matching a regex")]
    FindRegex(FindRegexArgs),
    #[command(about = "Delete pages")]
    DeletePages(DeletePagesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, value_name = "URL", help = "API endpoint to record in the config")]
    api_url: Option<String>,
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct RenameTemplateArgs {
    #[arg(long, value_name = "NAME[,NAME]", help = "Template name(s) to rename")]
    from: String,
    #[arg(long, value_name = "NAME")]
    to: String,
}

#[derive(Debug, Args)]
struct RenameParamArgs {
    #[arg(long, value_name = "NAME[,NAME]")]
    template: String,
    #[arg(long, value_name = "PARAM")]
    from: String,
    #[arg(long, value_name = "PARAM")]
    to: String,
}

#[derive(Debug, Args)]
struct RemoveParamArgs {
    #[arg(long, value_name = "NAME[,NAME]")]
    template: String,
    #[arg(long, value_name = "PARAM")]
    param: String,
    #[arg(long, value_name = "VALUE", help = "Only remove when the value matches")]
    value: Option<String>,
}

#[derive(Debug, Args)]
struct RegexReplaceArgs {
    #[arg(long, value_name = "REGEX")]
    pattern: String,
    #[arg(long, value_name = "TEXT", help = "Replacement; $1 refers to capture groups")]
    replacement: String,
    #[arg(long, value_name = "TEXT", help = "Edit summary note")]
    comment: Option<String>,
}

#[derive(Debug, Args)]
struct RenameHeaderArgs {
    #[arg(long, value_name = "TITLE")]
    from: String,
    #[arg(long, value_name = "TITLE")]
    to: String,
}

#[derive(Debug, Args)]
struct TemplateParamArgs {
    #[arg(long, value_name = "NAME[,NAME]")]
    template: String,
    #[arg(long, value_name = "PARAM")]
    param: String,
}

#[derive(Debug, Args)]
struct TallyParamsArgs {
    #[arg(long, value_name = "NAME[,NAME]")]
    template: String,
}

#[derive(Debug, Args)]
struct FindRegexArgs {
    #[arg(long, value_name = "REGEX")]
    pattern: String,
    #[arg(long, help = "Emit whole matching pages in text dump format")]
    output_dump: bool,
}

#[derive(Debug, Args)]
struct DeletePagesArgs {
    #[arg(long, value_name = "TEXT")]
    reason: String,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

struct Task {
    name: &'static str,
    processor: Box<dyn PageProcessor>,
    default_sources: Vec<PageSource>,
}

#[derive(Serialize)]
struct TaskOutput<'a> {
    task: &'a str,
    report: &'a RunReport,
    output: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.run.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::DeletePages(args)) => run_delete(&runtime, &cli.run, args),
        Some(command) => run_task(&runtime, &cli.run, build_task(command)?),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "info,wiktbot=debug,wiktbot_core=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .format_level(false)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let wrote = init_config(&paths, args.api_url.as_deref(), args.force)?;

    println!("Initialized wiktbot runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("wrote_config: {wrote}");
    if !wrote {
        println!("hint: pass --force to overwrite the existing config");
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn build_task(command: Commands) -> Result<Task> {
    let task = match command {
        Commands::RenameTemplate(args) => {
            let from = split_list(&args.from);
            Task {
                name: "rename-template",
                default_sources: reference_sources(&from),
                processor: Box::new(RenameTemplate::new(from, &args.to)),
            }
        }
        Commands::RenameParam(args) => {
            let templates = split_list(&args.template);
            Task {
                name: "rename-param",
                default_sources: reference_sources(&templates),
                processor: Box::new(RenameParam::new(templates, &args.from, &args.to)),
            }
        }
        Commands::RemoveParam(args) => {
            let templates = split_list(&args.template);
            Task {
                name: "remove-param",
                default_sources: reference_sources(&templates),
                processor: Box::new(RemoveParam::new(templates, &args.param, args.value)),
            }
        }
        Commands::Charactercat => Task {
            name: "charactercat",
            default_sources: reference_sources(&["charactercat".to_string()]),
            processor: Box::new(CharacterCat),
        },
        Commands::RegexReplace(args) => Task {
            name: "regex-replace",
            default_sources: Vec::new(),
            processor: Box::new(RegexReplace::new(
                &args.pattern,
                &args.replacement,
                args.comment,
            )?),
        },
        Commands::RenameHeader(args) => Task {
            name: "rename-header",
            default_sources: Vec::new(),
            processor: Box::new(RenameHeader::new(&args.from, &args.to)),
        },
        Commands::RemoveRedundantParam(args) => {
            let templates = split_list(&args.template);
            Task {
                name: "remove-redundant-param",
                default_sources: reference_sources(&templates),
                processor: Box::new(RemoveRedundantParam::new(templates, &args.param)),
            }
        }
        Commands::TallyParams(args) => {
            let templates = split_list(&args.template);
            Task {
                name: "tally-params",
                default_sources: reference_sources(&templates),
                processor: Box::new(TallyParams::new(templates)),
            }
        }
        Commands::FindRegex(args) => Task {
            name: "find-regex",
            default_sources: Vec::new(),
            processor: Box::new(FindRegex::new(&args.pattern, args.output_dump)?),
        },
        Commands::Init(_) | Commands::DeletePages(_) => {
            bail!("command is not a page-editing task")
        }
    };
    Ok(task)
}

fn reference_sources(templates: &[String]) -> Vec<PageSource> {
    templates
        .iter()
        .map(|template| PageSource::References {
            template: template.clone(),
        })
        .collect()
}

fn page_selection(run: &RunArgs, default_sources: Vec<PageSource>) -> Result<PageSelection> {
    let mut sources = Vec::new();
    if let Some(cats) = &run.cats {
        for name in split_list(cats) {
            sources.push(PageSource::Category {
                name,
                recursive: run.recursive,
            });
        }
    }
    if let Some(refs) = &run.refs {
        sources.extend(reference_sources(&split_list(refs)));
    }
    if let Some(links) = &run.links {
        for title in split_list(links) {
            sources.push(PageSource::Links { title });
        }
    }
    if let Some(pages) = &run.pages {
        sources.push(PageSource::Titles(split_list(pages)));
    }
    if let Some(path) = &run.pagefile {
        sources.push(PageSource::PageFile(path.clone()));
    }
    if let Some(path) = &run.dump {
        sources.push(PageSource::Dump(path.clone()));
    }
    if sources.is_empty() {
        sources = default_sources;
    }
    if sources.is_empty() {
        bail!("no page source given; use --cats, --refs, --links, --pages, --pagefile or --dump");
    }

    let namespaces = match &run.namespace {
        Some(value) => split_list(value)
            .iter()
            .map(|name| parse_namespace(name))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(PageSelection {
        sources,
        namespaces,
        range: PageRange {
            start: run.start,
            end: run.end,
        },
    })
}

fn run_task(runtime: &RuntimeOptions, run: &RunArgs, task: Task) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let selection = page_selection(run, task.default_sources)?;
    let mut processor = LanguageScope::new(task.processor, run.lang.clone(), run.partial_page);
    let options = EditOptions {
        dry_run: !run.save,
        verbose: run.verbose,
        summary_prefix: config.edit_summary_prefix().map(ToString::to_string),
        max_conflict_retries: config.max_conflict_retries(),
        ..EditOptions::default()
    };

    let report = match config.api_url_owned() {
        Some(_) => {
            let mut client = MediaWikiClient::from_config(&config)?;
            execute_edits(&mut client, &selection, &mut processor, &options, run)?
        }
        None => execute_edits(&mut OfflineWiki, &selection, &mut processor, &options, run)?,
    };

    let output = processor.summary().filter(|output| !output.is_empty());
    match run.format {
        OutputFormat::Json => {
            let payload = TaskOutput {
                task: task.name,
                report: &report,
                output,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            if let Some(output) = &output {
                print!("{output}");
                if !output.ends_with('\n') {
                    println!();
                }
                print_run_report(&mut io::stderr(), task.name, &report)?;
            } else {
                print_run_report(&mut io::stdout(), task.name, &report)?;
            }
        }
    }
    if runtime.diagnostics {
        eprintln!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn execute_edits<A: WikiWriteApi>(
    api: &mut A,
    selection: &PageSelection,
    processor: &mut LanguageScope,
    options: &EditOptions,
    run: &RunArgs,
) -> Result<RunReport> {
    if run.save {
        login(api)?;
    }
    let pages = collect_pages(selection, api)?;
    info!(
        "processing {} pages ({})",
        pages.len(),
        if run.save { "saving" } else { "dry run" }
    );
    Ok(run_edits(api, &pages, processor, options))
}

fn run_delete(runtime: &RuntimeOptions, run: &RunArgs, args: DeletePagesArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let selection = page_selection(run, Vec::new())?;
    let options = DeleteOptions {
        dry_run: !run.save,
        max_attempts: config.delete_attempts(),
        ..DeleteOptions::new(&args.reason)
    };

    let report = match config.api_url_owned() {
        Some(_) => {
            let mut client = MediaWikiClient::from_config(&config)?;
            execute_delete(&mut client, &selection, &options, run)?
        }
        None => execute_delete(&mut OfflineWiki, &selection, &options, run)?,
    };

    match run.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_delete_report(&report),
    }
    if runtime.diagnostics {
        eprintln!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn execute_delete<A: WikiWriteApi>(
    api: &mut A,
    selection: &PageSelection,
    options: &DeleteOptions,
    run: &RunArgs,
) -> Result<DeleteReport> {
    if run.save {
        login(api)?;
    }
    let pages = collect_pages(selection, api)?;
    delete_pages(api, &pages, options)
}

fn login<A: WikiWriteApi>(api: &mut A) -> Result<()> {
    let credentials = BotCredentials::from_env()?;
    api.login(&credentials.username, &credentials.password)
        .with_context(|| format!("failed to log in as {}", credentials.username))?;
    info!("logged in as {}", credentials.username);
    Ok(())
}

fn print_run_report(out: &mut dyn Write, task: &str, report: &RunReport) -> Result<()> {
    writeln!(out, "task: {task}")?;
    writeln!(out, "dry_run: {}", report.dry_run)?;
    writeln!(out, "visited: {}", report.visited)?;
    writeln!(out, "changed: {}", report.changed)?;
    writeln!(out, "saved: {}", report.saved)?;
    writeln!(out, "unchanged: {}", report.unchanged)?;
    writeln!(out, "skipped: {}", report.skipped)?;
    writeln!(out, "errors: {}", report.errors)?;
    writeln!(out, "conflicts: {}", report.conflicts)?;
    writeln!(out, "request_count: {}", report.request_count)?;
    Ok(())
}

fn print_delete_report(report: &DeleteReport) {
    println!("task: delete-pages");
    println!("dry_run: {}", report.dry_run);
    println!("reason: {}", report.reason);
    println!("deleted: {}", report.deleted);
    println!("already_missing: {}", report.already_missing);
    println!("failed: {}", report.failed);
    println!("request_count: {}", report.request_count);
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use tempfile::tempdir;
    use wiktbot_core::api::OfflineWiki;
    use wiktbot_core::edit::{EditOptions, PageProcessor};
    use wiktbot_core::pages::{PageSource, format_dump_entry, parse_text_dump};
    use wiktbot_core::tasks::LanguageScope;

    use super::{Cli, Commands, OutputFormat, build_task, execute_edits, page_selection};

    #[test]
    fn global_run_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "wiktbot",
            "rename-template",
            "--from",
            "l-self,lself",
            "--to",
            "l",
            "--save",
            "--start",
            "2",
            "--end",
            "5",
            "--format",
            "json",
        ])
        .expect("parse");
        assert!(cli.run.save);
        assert_eq!(cli.run.start, Some(2));
        assert_eq!(cli.run.end, Some(5));
        assert_eq!(cli.run.format, OutputFormat::Json);
        assert!(matches!(cli.command, Some(Commands::RenameTemplate(_))));
    }

    #[test]
    fn template_tasks_default_to_references() {
        let cli = Cli::try_parse_from(["wiktbot", "charactercat"]).expect("parse");
        let run = cli.run.clone();
        let task = build_task(cli.command.expect("command")).expect("task");
        let selection = page_selection(&run, task.default_sources).expect("selection");
        assert_eq!(
            selection.sources,
            vec![PageSource::References {
                template: "charactercat".to_string()
            }]
        );
    }

    #[test]
    fn explicit_sources_replace_defaults_and_namespaces_resolve() {
        let cli = Cli::try_parse_from([
            "wiktbot",
            "--pages",
            "a,b",
            "--namespace",
            "Main,Reconstruction",
            "tally-params",
            "--template",
            "m",
        ])
        .expect("parse");
        let run = cli.run.clone();
        let task = build_task(cli.command.expect("command")).expect("task");
        let selection = page_selection(&run, task.default_sources).expect("selection");
        assert_eq!(
            selection.sources,
            vec![PageSource::Titles(vec!["a".to_string(), "b".to_string()])]
        );
        assert_eq!(selection.namespaces, vec![0, 118]);
    }

    #[test]
    fn tasks_without_defaults_need_a_source() {
        let cli = Cli::try_parse_from(["wiktbot", "find-regex", "--pattern", "x"]).expect("parse");
        let run = cli.run.clone();
        let task = build_task(cli.command.expect("command")).expect("task");
        let error = page_selection(&run, task.default_sources).expect_err("must fail");
        assert!(error.to_string().contains("no page source given"));
    }

    #[test]
    fn lang_scoped_find_regex_dumps_only_the_language_section() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("dump.txt");
        let dump = [
            format_dump_entry(1, "one", "==English==\nplain\n==French==\nneedle\n"),
            format_dump_entry(2, "two", "==English==\na needle\n==French==\nfrench needle\n"),
            format_dump_entry(3, "three", "==German==\nneedle\n"),
        ]
        .concat();
        fs::write(&path, dump).expect("write dump");
        let dump_arg = path.to_string_lossy().to_string();

        let cli = Cli::try_parse_from([
            "wiktbot",
            "--lang",
            "English",
            "--dump",
            dump_arg.as_str(),
            "find-regex",
            "--pattern",
            "needle",
            "--output-dump",
        ])
        .expect("parse");
        let run = cli.run.clone();
        let task = build_task(cli.command.expect("command")).expect("task");
        let selection = page_selection(&run, task.default_sources).expect("selection");
        let mut processor = LanguageScope::new(task.processor, run.lang.clone(), run.partial_page);

        let report = execute_edits(
            &mut OfflineWiki,
            &selection,
            &mut processor,
            &EditOptions::default(),
            &run,
        )
        .expect("run");
        assert_eq!(report.visited, 3);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 0);

        let output = processor.summary().expect("output");
        let entries = parse_text_dump(&output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "two");
        assert!(entries[0].1.contains("a needle"));
        assert!(!entries[0].1.contains("French"));
        assert!(output.starts_with("Page 2 two: "));
    }
}
