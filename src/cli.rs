use std::time::Duration;

use clap::{App, AppSettings, Arg, ArgMatches};

#[derive(Debug)]
pub struct Args {
    pub cmd: Vec<String>,
    pub wait_for: Option<String>,
    pub timeout: Option<Duration>,
    pub grace: Duration,
    pub lines: usize,
    pub workdir: Option<String>,
    pub env: Vec<(String, String)>,
    pub quiet: bool,
    pub print_console: bool,
    pub debug: bool,
}

fn is_env_pair(value: String) -> Result<(), String> {
    if value.contains('=') && !value.starts_with('=') {
        Ok(())
    } else {
        Err(format!("expected KEY=VALUE, got '{}'", value))
    }
}

pub fn get_args() -> Args {
    let args = App::new("managed-process")
        .version(crate_version!())
        .about("Run a command, capture its console, and make sure it goes away")
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name("command")
                .help("Command to run, followed by its arguments")
                .multiple(true)
                .required(true),
        )
        .arg(
            Arg::with_name("wait-for")
                .help("Wait until the command prints a line containing this text")
                .short("p")
                .long("wait-for")
                .takes_value(true)
                .value_name("text"),
        )
        .arg(
            Arg::with_name("timeout")
                .help("Destroy the command if it hasn't exited after this long")
                .short("t")
                .long("timeout")
                .takes_value(true)
                .value_name("milliseconds"),
        )
        .arg(
            Arg::with_name("grace")
                .help("How long a destroyed command gets to exit before it is killed [default: 1000]")
                .long("grace")
                .takes_value(true)
                .value_name("milliseconds"),
        )
        .arg(
            Arg::with_name("lines")
                .help("How many lines of console output to keep [default: 100]")
                .short("n")
                .long("lines")
                .takes_value(true)
                .value_name("count"),
        )
        .arg(
            Arg::with_name("workdir")
                .help("Working directory of the command")
                .short("w")
                .long("workdir")
                .takes_value(true)
                .value_name("dir"),
        )
        .arg(
            Arg::with_name("env")
                .help("Set an environment variable for the command")
                .short("E")
                .long("env")
                .number_of_values(1)
                .multiple(true)
                .takes_value(true)
                .value_name("KEY=VALUE")
                .validator(is_env_pair),
        )
        .arg(
            Arg::with_name("quiet")
                .help("Don't echo the command's output as it runs")
                .short("q")
                .long("quiet"),
        )
        .arg(
            Arg::with_name("print-console")
                .help("Print the kept console lines once the command is done")
                .short("c")
                .long("print-console"),
        )
        .arg(
            Arg::with_name("verbose")
                .help("Print debugging messages to stderr")
                .short("v")
                .long("verbose"),
        )
        .get_matches();

    from_matches(&args)
}

fn millis(args: &ArgMatches<'_>, name: &str) -> Option<Duration> {
    if args.occurrences_of(name) > 0 {
        Some(Duration::from_millis(
            value_t!(args.value_of(name), u64).unwrap_or_else(|e| e.exit()),
        ))
    } else {
        None
    }
}

fn from_matches(args: &ArgMatches<'_>) -> Args {
    let cmd = values_t!(args.values_of("command"), String).unwrap_or_else(|e| e.exit());

    let env = args
        .values_of("env")
        .map(|values| {
            values
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    Some((parts.next()?.to_owned(), parts.next()?.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default();

    let lines = if args.occurrences_of("lines") > 0 {
        value_t!(args.value_of("lines"), usize).unwrap_or_else(|e| e.exit())
    } else {
        managed_process::config::DEFAULT_CONSOLE_LINES
    };

    Args {
        cmd,
        wait_for: args.value_of("wait-for").map(str::to_string),
        timeout: millis(args, "timeout"),
        grace: millis(args, "grace").unwrap_or_else(|| Duration::from_secs(1)),
        lines,
        workdir: args.value_of("workdir").map(str::to_string),
        env,
        quiet: args.is_present("quiet"),
        print_console: args.is_present("print-console"),
        debug: args.is_present("verbose"),
    }
}
