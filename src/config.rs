//! Configuration for managed processes.
//!
//! The [`ProcessConfig`] struct is not constructable, use [`ManagedProcessBuilder`].
//!
//! # Examples
//!
//! ```
//! # use managed_process::ManagedProcessBuilder;
//! let process = ManagedProcessBuilder::new("echo")
//!     .arg("hello")
//!     .arg("world")
//!     .env("GREETING", "1")
//!     .build()
//!     .expect("mission failed");
//!
//! assert!(!process.is_alive());
//! ```

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};

use crate::{
    console::ConsoleSink,
    error::{Error, Result},
    process::ManagedProcess,
};

/// Lines kept in the console buffer unless configured otherwise.
pub const DEFAULT_CONSOLE_LINES: usize = 100;

/// How to launch and supervise a process.
#[derive(Builder, Clone, Debug)]
#[builder(name = "ManagedProcessBuilder")]
#[builder(setter(into))]
#[builder(build_fn(name = "build_config", validate = "Self::validate"))]
#[non_exhaustive]
pub struct ProcessConfig {
    /// The executable, looked up in `PATH` if it is not a path.
    pub program: PathBuf,
    /// Arguments, in order. Passed as-is, without any shell.
    #[builder(default)]
    pub arguments: Vec<OsString>,
    /// Working directory of the process. Inherited if unset.
    #[builder(default, setter(into, strip_option))]
    pub working_directory: Option<PathBuf>,
    /// Variables added to (or overriding) the environment.
    #[builder(default)]
    pub environment: BTreeMap<OsString, OsString>,
    /// Start from an empty environment instead of inheriting ours.
    #[builder(default)]
    pub clear_environment: bool,
    /// How many recent lines of output to keep.
    #[builder(default = "DEFAULT_CONSOLE_LINES")]
    pub console_buffer_max_lines: usize,
    /// Where captured lines go besides the buffer.
    #[builder(default)]
    pub console_sink: ConsoleSink,
    /// How long `destroy` waits after a polite termination request before
    /// killing the process outright.
    #[builder(default = "Duration::from_secs(1)")]
    pub destroy_grace: Duration,
    /// How long to wait, once the process exited, for its output pipes to be
    /// fully read.
    #[builder(default = "Duration::from_secs(2)")]
    pub drain_timeout: Duration,
    /// How often the exit monitor asks the OS whether the process is done.
    #[builder(default = "Duration::from_millis(10)")]
    pub exit_poll_interval: Duration,
}

impl ManagedProcessBuilder {
    /// Starts a builder for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let mut builder = Self::default();
        builder.program(program);
        builder
    }

    /// Appends one argument.
    pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.arguments
            .get_or_insert_with(Vec::new)
            .push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments
            .get_or_insert_with(Vec::new)
            .extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable.
    pub fn env(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Validates the configuration and makes an unstarted [`ManagedProcess`].
    pub fn build(&self) -> Result<ManagedProcess> {
        let config = self.build_config().map_err(Error::Config)?;
        ManagedProcess::new(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self
            .program
            .as_ref()
            .map_or(true, |p| p.as_os_str().is_empty())
        {
            return Err("program must not be empty".into());
        }

        if self.console_buffer_max_lines == Some(0) {
            return Err("console buffer must hold at least one line".into());
        }

        if self.exit_poll_interval == Some(Duration::from_secs(0)) {
            return Err("exit poll interval must not be zero".into());
        }

        Ok(())
    }
}

impl ProcessConfig {
    /// The program and its arguments, for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// A spawnable command with piped output and no input.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.clear_environment {
            command.env_clear();
        }
        command.envs(&self.environment);

        if let Some(dir) = &self.working_directory {
            command.current_dir(dir);
        }

        command
    }
}
