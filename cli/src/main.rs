mod test_runner;

use std::path::Path;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};

use lessonmd::section::{Section, SectionNode};
use session::{LoadError, Session, SessionConfig, Submission};

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

#[derive(Parser)]
#[command(name = "lesson", version, about = "Interactive lesson runner")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a lesson document, driving every exercise's default code
    Run(RunArgs),

    /// Run .test.md test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Lesson Markdown file to run
    file: String,

    /// Load and validate only, don't execute (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Print the section/exercise/dataset outline and exit
    #[arg(long)]
    outline: bool,

    /// Run only this section's exercises
    #[arg(long)]
    section: Option<String>,

    /// Disable progressive unlocking (all sections start unlocked)
    #[arg(long)]
    no_progressive: bool,

    /// Per-submission wall-clock budget in seconds
    #[arg(long)]
    time_budget: Option<u64>,

    /// Suppress narrative and outputs; report faults only
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.md file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // Backwards compatibility: if the first positional arg is not a known
    // subcommand, inject "run" so `lesson file.md` works like
    // `lesson run file.md`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(first_pos) = args.iter().skip(1).find(|a| !a.starts_with('-')) {
        let first_pos = first_pos.clone();
        if !SUBCOMMANDS.contains(&first_pos.as_str()) {
            let pos = args.iter().position(|a| *a == first_pos).unwrap();
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);

    match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn do_run(args: RunArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    // Set up the codespan file database; the session parses with file id 0,
    // which matches the first file added here.
    let mut files = SimpleFiles::new();
    files.add(args.file.clone(), source.clone());

    let config = SessionConfig {
        progressive: !args.no_progressive && args.section.is_none(),
        time_budget: args.time_budget.map(Duration::from_secs),
    };

    let mut session = match Session::load(&source, config) {
        Ok(s) => s,
        Err(error) => {
            emit_load_error(&error, &files, color_choice);
            process::exit(1);
        }
    };

    if args.check {
        eprintln!(
            "ok: {} loaded ({} sections, {} datasets, {} exercises)",
            args.file,
            session.sections().len(),
            session.datasets().len(),
            session.exercises().count()
        );
        return;
    }

    if args.outline {
        print_outline(&session);
        return;
    }

    // Drive the lesson front to back with the author-default code.
    let sections: Vec<Section> = session
        .sections()
        .iter()
        .map(|s| s.section().clone())
        .collect();

    let mut faults = 0usize;
    for section in &sections {
        if let Some(only) = &args.section {
            if &section.title != only {
                continue;
            }
        }

        if !args.quiet {
            println!("# {}", section.title);
            println!();
        }

        for node in &section.nodes {
            match node {
                SectionNode::Narrative(narrative) => {
                    if !args.quiet {
                        print!("{}", narrative);
                    }
                }
                SectionNode::Exercise(decl) => {
                    let code = decl.code.clone();
                    let Ok(result) = session.submit(&decl.id, &code) else {
                        continue;
                    };
                    match result {
                        Submission::Completed { output, warnings } => {
                            for warning in &warnings {
                                eprintln!("warning [{}]: {}", decl.id, warning);
                            }
                            if !args.quiet {
                                println!("[exercise {}]", decl.id);
                                println!("{}", output);
                            }
                        }
                        Submission::Faulted(fault) => {
                            faults += 1;
                            eprintln!("fault [{}]: {}", decl.id, fault);
                        }
                    }
                }
            }
        }

        let _ = session.advance(&section.title);
    }

    if faults > 0 {
        eprintln!("{} exercise(s) faulted", faults);
        process::exit(1);
    }
}

fn print_outline(session: &Session) {
    for state in session.sections() {
        let lock = match state.lock() {
            session::LockState::Locked => "locked",
            session::LockState::Unlocked => "unlocked",
            session::LockState::Completed => "completed",
        };
        println!("# {} ({})", state.title(), lock);
        for id in state.exercise_ids() {
            println!("  exercise {}", id);
        }
    }
    for name in session.datasets().names() {
        let rows = session
            .datasets()
            .get(name)
            .map(|t| t.row_count())
            .unwrap_or(0);
        println!("dataset {} ({} rows)", name, rows);
    }
}

fn emit_load_error(
    error: &LoadError,
    files: &SimpleFiles<String, String>,
    color_choice: ColorChoice,
) {
    let parse_errors = error.parse_errors();
    if parse_errors.is_empty() {
        eprintln!("error: {}", error);
        return;
    }

    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();
    for parse_error in parse_errors {
        let diagnostic = parse_error.to_diagnostic();
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic);
    }
}
