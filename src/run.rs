use std::{
    io::Write,
    time::{Duration, Instant},
};

use log::LevelFilter;
use managed_process::{ConsoleSink, Error, ManagedProcess, ManagedProcessBuilder, Result};

use crate::cli::Args;

/// Exit code used when the command was destroyed for running too long, as timeout(1) does.
pub const TIMED_OUT: i32 = 124;

pub fn init_logger(debug: bool) {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .format(|buf, r| writeln!(buf, "*** {}", r.args()))
        .filter_level(if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });

    if let Ok(filters) = std::env::var("RUST_LOG") {
        log_builder.parse_filters(&filters);
    }

    log_builder.init();
}

/// Maps a failure to the exit code the binary ends with.
pub fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::Timeout { .. } => TIMED_OUT,
        Error::StartFailure { .. } => 127,
        Error::NonZeroExit(code) => *code,
        _ => 1,
    }
}

pub fn run(args: &Args) -> Result<i32> {
    let (program, rest) = args
        .cmd
        .split_first()
        .ok_or_else(|| Error::Config("no command given".into()))?;

    let mut builder = ManagedProcessBuilder::new(program);
    builder
        .args(rest)
        .console_buffer_max_lines(args.lines)
        .destroy_grace(args.grace)
        .console_sink(if args.quiet {
            ConsoleSink::Log
        } else {
            ConsoleSink::Inherit
        });
    if let Some(dir) = &args.workdir {
        builder.working_directory(dir);
    }
    for (key, value) in &args.env {
        builder.env(key, value);
    }

    let process = builder.build()?;
    let deadline = args.timeout.map(|t| Instant::now() + t);
    let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

    process.start()?;
    debug!("Started with pid {:?}", process.pid());

    if let Some(pattern) = &args.wait_for {
        let seen = match remaining() {
            Some(left) => process.wait_for_pattern_timeout(pattern, left),
            None => process.wait_for_pattern(pattern),
        };

        match seen {
            Ok(()) => info!("Saw {:?} in the output", pattern),
            Err(err @ Error::Timeout { .. }) => {
                // dropping would destroy it too, but the console is only complete after this
                destroy_unless_gone(&process)?;
                print_console(args, &process.console(), process.console_buffer_max_lines());
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    }

    let ended = match remaining() {
        Some(left) => process.wait_for_or_destroy(left),
        None => process.wait_for(),
    };

    print_console(args, &process.console(), process.console_buffer_max_lines());
    ended
}

/// Destroys the process, unless it already exited on its own.
fn destroy_unless_gone(process: &ManagedProcess) -> Result<()> {
    match process.destroy() {
        Ok(()) | Err(Error::IllegalState { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

fn print_console(args: &Args, console: &str, lines: usize) {
    if args.print_console {
        println!("Recent {} lines of console output:", lines);
        print!("{}", console);
    }
}

/// Rounds a duration for display in messages.
pub fn human(duration: Duration) -> String {
    if duration.as_millis() < 1000 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{destroy_unless_gone, exit_code_for, human, TIMED_OUT};
    use managed_process::{ConsoleSink, Error, ManagedProcessBuilder};

    #[test]
    fn exit_codes() {
        assert_eq!(
            exit_code_for(&Error::Timeout {
                operation: "wait_for",
                timeout: Duration::from_secs(1)
            }),
            TIMED_OUT
        );
        assert_eq!(exit_code_for(&Error::NonZeroExit(3)), 3);
        assert_eq!(exit_code_for(&Error::Config("bad".into())), 1);
    }

    #[test]
    fn human_durations() {
        assert_eq!(human(Duration::from_millis(250)), "250ms");
        assert_eq!(human(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    #[cfg(unix)]
    fn destroying_an_exited_process_is_fine() {
        let process = ManagedProcessBuilder::new("true")
            .console_sink(ConsoleSink::Discard)
            .build()
            .expect("valid config");
        process.start().expect("start");
        process.wait_for().expect("wait");

        destroy_unless_gone(&process).expect("already gone is not an error");
        assert_eq!(process.exit_value().expect("terminated"), 0);
    }

    #[test]
    #[cfg(unix)]
    fn destroying_a_running_process() {
        let process = ManagedProcessBuilder::new("sleep")
            .arg("60")
            .console_sink(ConsoleSink::Discard)
            .build()
            .expect("valid config");
        process.start().expect("start");

        destroy_unless_gone(&process).expect("destroy");
        assert!(!process.is_alive());
    }
}
