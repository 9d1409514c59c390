use aster::compiler;
use aster::compiler::display_messages::print_compiler_messages;
use saying::say;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

enum Command {
    /// Compiles an entry file (and everything it imports) to textual IR.
    Build { entry: PathBuf, output: Option<PathBuf> },
    Help,
}

#[derive(PartialEq, Debug)]
pub enum Flag {
    DisableWarnings,
    DisableTimers,
}

fn main() -> ExitCode {
    let compiler_args: Vec<String> = env::args().collect();

    if compiler_args.len() < 2 {
        print_help(false);
        return ExitCode::SUCCESS;
    }

    let command = match get_command(&compiler_args[1..]) {
        Ok(command) => command,
        Err(e) => {
            say!(Red "{}", e);
            print_help(true);
            return ExitCode::FAILURE;
        }
    };

    // Gather a list of any additional flags
    let flags = get_flags(&compiler_args);

    match command {
        Command::Help => {
            print_help(false);
            ExitCode::SUCCESS
        }

        Command::Build { entry, output } => {
            let output = output.unwrap_or_else(|| entry.with_extension("ll"));
            let start = Instant::now();

            let mut messages = compiler::build(&entry, &output);
            if flags.contains(&Flag::DisableWarnings) {
                messages.warnings.clear();
            }
            if messages.has_errors() {
                print_compiler_messages(&messages);
                return ExitCode::FAILURE;
            }
            print_compiler_messages(&messages);

            if !flags.contains(&Flag::DisableTimers) {
                say!(Green "Compiled ", output.display(), " in ", #start.elapsed());
            }
            ExitCode::SUCCESS
        }
    }
}

fn get_command(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        Some("help") => Ok(Command::Help),

        Some("build") => {
            let entry = match args.get(1) {
                Some(path) if !path.is_empty() && !path.starts_with('-') => PathBuf::from(path),
                _ => return Err("`build` needs an entry file, e.g. `asterc build src/main.as`".to_string()),
            };
            let mut output = None;
            if args.get(2).map(String::as_str) == Some("-o") {
                match args.get(3) {
                    Some(path) => output = Some(PathBuf::from(path)),
                    None => return Err("`-o` needs an output path".to_string()),
                }
            }
            Ok(Command::Build { entry, output })
        }

        Some(other) => Err(format!("Invalid command: `{other}` is not a command")),
        None => Err("No command given".to_string()),
    }
}

fn get_flags(args: &[String]) -> Vec<Flag> {
    let mut flags = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--hide-warnings" => flags.push(Flag::DisableWarnings),
            "--hide-timers" => flags.push(Flag::DisableTimers),

            _ => {}
        }
    }

    flags
}

fn print_help(commands_only: bool) {
    if !commands_only {
        say!(Green "The Aster compiler");
        say!("Usage: asterc <command> <args>");
    }
    say!(Green "Commands:");
    say!("  build <path> [-o <out>]  - Compiles an entry file to textual IR");
    say!("  help                     - Shows this help");
    say!("Flags: --hide-warnings --hide-timers");
    say!("Environment: CACHE CACHE_DIR OLEVEL DEBUG NATIVE FAST_MATH LINK_OBJ LINK_ACCELERATE DUMP_AST DUMP_HIR");
}
