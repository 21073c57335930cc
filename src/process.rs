//! The managed process lifecycle.

use std::{
    fmt, io,
    process::Child,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    config::ProcessConfig,
    console::{ConsoleBuffer, Stream},
    error::{Error, Result},
    pattern::Outcome,
    pump,
    signal::{self, Signal},
};

/// Extra time allowed, past the drain timeout, for the monitor to mark an
/// exited process terminated.
const MONITOR_SETTLE: Duration = Duration::from_secs(5);

/// Where a [`ManagedProcess`] is in its life.
///
/// States only ever move forward: `NotStarted`, then `Running`, then `Terminated`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    /// Built but not yet started.
    NotStarted,
    /// Started, and not yet seen to exit.
    Running,
    /// Exited (by itself or destroyed) and its output fully drained.
    Terminated {
        /// The exit code. On Unix, death by signal N is `128 + N`.
        exit_code: i32,
    },
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running => f.write_str("running"),
            Self::Terminated { .. } => f.write_str("terminated"),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ProcessState>,
    changed: Condvar,
    child: Mutex<Option<Child>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks the OS whether the child has exited, without blocking.
    fn poll_exit(&self) -> io::Result<Option<i32>> {
        let mut guard = self.child();
        let child = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "process was never spawned"))?;
        Ok(child.try_wait()?.map(signal::exit_code))
    }

    fn signal(&self, signal: Signal) -> io::Result<()> {
        match self.child().as_mut() {
            Some(child) => signal::send(child, signal),
            None => Ok(()),
        }
    }

    fn wait_terminated(&self) -> i32 {
        let mut state = self.state();
        loop {
            if let ProcessState::Terminated { exit_code } = *state {
                return exit_code;
            }

            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_terminated_timeout(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let ProcessState::Terminated { exit_code } = *state {
                return Some(exit_code);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn finish(&self, exit_code: i32) {
        let mut state = self.state();
        if *state == ProcessState::Running {
            *state = ProcessState::Terminated { exit_code };
            self.changed.notify_all();
        }
    }
}

/// A supervised OS process.
///
/// Build one with [`ManagedProcessBuilder`](crate::config::ManagedProcessBuilder),
/// then [`start`](Self::start) it. Output is captured into a rolling console
/// buffer from the moment the process starts. Every operation checks the
/// current [`ProcessState`] and refuses with [`Error::IllegalState`] when
/// called at the wrong time.
///
/// All methods take `&self`, so the process can be shared between threads,
/// e.g. to wait in one and destroy from another. Dropping a process that is
/// still running destroys it.
#[derive(Debug)]
pub struct ManagedProcess {
    config: ProcessConfig,
    console: Arc<ConsoleBuffer>,
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ManagedProcess {
    /// Makes an unstarted process from a configuration.
    pub fn new(config: ProcessConfig) -> Result<Self> {
        let label = config
            .program
            .file_name()
            .unwrap_or_else(|| config.program.as_os_str())
            .to_string_lossy()
            .into_owned();
        let console =
            ConsoleBuffer::new(config.console_buffer_max_lines, config.console_sink, label)?;

        Ok(Self {
            config,
            console: Arc::new(console),
            shared: Arc::new(Shared {
                state: Mutex::new(ProcessState::NotStarted),
                changed: Condvar::new(),
                child: Mutex::new(None),
            }),
            monitor: Mutex::new(None),
        })
    }

    /// The configuration this process was built with.
    #[must_use]
    pub const fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.shared.state()
    }

    /// The OS process id, once started.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.child().as_ref().map(Child::id)
    }

    /// Spawns the process and starts capturing its output.
    ///
    /// Fails with [`Error::StartFailure`] if the OS cannot run the program, in
    /// which case the process stays unstarted.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state();
        if *state != ProcessState::NotStarted {
            return Err(illegal("start", *state));
        }

        info!("Starting {}", self.config.command_line());
        let mut child = self
            .config
            .to_command()
            .spawn()
            .map_err(|source| Error::StartFailure {
                program: self.config.program.to_string_lossy().into_owned(),
                source,
            })?;
        let pid = child.id();

        let pumps = match self.attach_pumps(&mut child) {
            Ok(pumps) => pumps,
            Err(err) => {
                reap_abandoned(child);
                return Err(err.into());
            }
        };

        *self.shared.child() = Some(child);

        let shared = self.shared.clone();
        let console = self.console.clone();
        let poll = self.config.exit_poll_interval;
        let drain = self.config.drain_timeout;
        let spawned = thread::Builder::new()
            .name(format!("monitor-{}", pid))
            .spawn(move || monitor(&shared, &console, pumps, poll, drain));

        match spawned {
            Ok(handle) => {
                *self
                    .monitor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => {
                if let Some(child) = self.shared.child().take() {
                    reap_abandoned(child);
                }
                return Err(err.into());
            }
        }

        *state = ProcessState::Running;
        debug!("Process {} is running", pid);
        Ok(())
    }

    fn attach_pumps(&self, child: &mut Child) -> io::Result<Vec<JoinHandle<()>>> {
        let pid = child.id();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump::spawn(Stream::Stdout, stdout, self.console.clone(), pid)?);
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump::spawn(Stream::Stderr, stderr, self.console.clone(), pid)?);
        }
        Ok(pumps)
    }

    /// Whether the process is running.
    ///
    /// Asks the OS first, so a process that exited on its own is reported
    /// dead even before anyone waited for it.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        if *self.shared.state() != ProcessState::Running {
            return false;
        }

        match self.settle_if_exited() {
            Ok(exited) => !exited,
            Err(err) => {
                warn!("Couldn't query process status: {}", err);
                false
            }
        }
    }

    /// Asks the OS whether the child is gone, and if so waits for the monitor
    /// to drain its output and mark it terminated.
    fn settle_if_exited(&self) -> io::Result<bool> {
        if self.shared.poll_exit()?.is_none() {
            return Ok(false);
        }

        let settle = self.config.exit_poll_interval + self.config.drain_timeout + MONITOR_SETTLE;
        if self.shared.wait_terminated_timeout(settle).is_none() {
            warn!(
                "Process exited but was not marked terminated within {:?}",
                settle
            );
        }
        Ok(true)
    }

    /// Blocks until the process has terminated, and returns its exit code.
    pub fn wait_for(&self) -> Result<i32> {
        self.require_started("wait for")?;
        Ok(self.shared.wait_terminated())
    }

    /// Blocks until the process has terminated or `timeout` has elapsed.
    ///
    /// On timeout, fails with [`Error::Timeout`] and leaves the process running.
    pub fn wait_for_timeout(&self, timeout: Duration) -> Result<i32> {
        self.require_started("wait for")?;
        self.shared
            .wait_terminated_timeout(timeout)
            .ok_or(Error::Timeout {
                operation: "wait_for",
                timeout,
            })
    }

    /// Like [`wait_for_timeout`](Self::wait_for_timeout), but destroys the
    /// process on timeout. The process is never running after this returns.
    pub fn wait_for_or_destroy(&self, timeout: Duration) -> Result<i32> {
        match self.wait_for_timeout(timeout) {
            Err(Error::Timeout { .. }) => {
                warn!(
                    "{} still running after {:?}, destroying it",
                    self.config.command_line(),
                    timeout
                );
                match self.destroy() {
                    Ok(()) => Err(Error::Timeout {
                        operation: "wait_for_or_destroy",
                        timeout,
                    }),
                    // it exited by itself in the meantime
                    Err(Error::IllegalState { .. }) => self.exit_value(),
                    Err(err) => Err(err),
                }
            }
            other => other,
        }
    }

    /// Blocks until the process has terminated, failing with
    /// [`Error::NonZeroExit`] if it was not successful.
    pub fn wait_for_success(&self) -> Result<()> {
        match self.wait_for()? {
            0 => Ok(()),
            code => Err(Error::NonZeroExit(code)),
        }
    }

    /// Blocks until `pattern` shows up in a line of output.
    ///
    /// Lines still held in the console buffer count. If the process terminates
    /// first, fails with [`Error::PatternNeverMatched`].
    pub fn wait_for_pattern(&self, pattern: &str) -> Result<()> {
        self.require_started("wait for output of")?;
        debug!("Waiting for {:?} in console output", pattern);

        if self.console.watch(pattern).wait() {
            Ok(())
        } else {
            Err(never_matched(pattern))
        }
    }

    /// Like [`wait_for_pattern`](Self::wait_for_pattern), giving up after
    /// `timeout` with [`Error::Timeout`]. The process is left running.
    pub fn wait_for_pattern_timeout(&self, pattern: &str, timeout: Duration) -> Result<()> {
        self.require_started("wait for output of")?;
        debug!("Waiting up to {:?} for {:?} in console output", timeout, pattern);

        let watcher = self.console.watch(pattern);
        let mut outcome = watcher.wait_timeout(timeout);
        if outcome == Outcome::Pending {
            self.console.unwatch(&watcher);
            // it may have matched between the timeout and the unwatch
            outcome = watcher.outcome();
        }

        match outcome {
            Outcome::Matched => Ok(()),
            Outcome::Abandoned => Err(never_matched(pattern)),
            Outcome::Pending => Err(Error::Timeout {
                operation: "wait_for_pattern",
                timeout,
            }),
        }
    }

    /// Terminates the process.
    ///
    /// Asks politely first, then kills the process if it is still there after
    /// the configured grace period. Returns once the process is gone and its
    /// output has been read, so [`console`](Self::console) is complete.
    ///
    /// A process the OS already reports as exited counts as terminated, and is
    /// refused with [`Error::IllegalState`] like any other terminated process.
    pub fn destroy(&self) -> Result<()> {
        {
            let state = self.shared.state();
            if *state != ProcessState::Running {
                return Err(illegal("destroy", *state));
            }
        }

        if self.settle_if_exited().map_err(Error::DestroyFailure)? {
            return Err(illegal("destroy", self.state()));
        }

        info!("Destroying {}", self.config.command_line());
        self.shared
            .signal(Signal::Terminate)
            .map_err(Error::DestroyFailure)?;

        if self
            .shared
            .wait_terminated_timeout(self.config.destroy_grace)
            .is_none()
            && self.shared.poll_exit().map_err(Error::DestroyFailure)?.is_none()
        {
            debug!(
                "Process ignored termination request for {:?}, killing it",
                self.config.destroy_grace
            );
            self.shared
                .signal(Signal::Kill)
                .map_err(Error::DestroyFailure)?;
        }

        let settle = self.config.drain_timeout + MONITOR_SETTLE;
        match self.shared.wait_terminated_timeout(settle) {
            Some(exit_code) => {
                debug!("Destroyed process exited with code {}", exit_code);
                Ok(())
            }
            None => Err(Error::DestroyFailure(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("process still present {:?} after being killed", settle),
            ))),
        }
    }

    /// The exit code of a terminated process.
    pub fn exit_value(&self) -> Result<i32> {
        match *self.shared.state() {
            ProcessState::Terminated { exit_code } => Ok(exit_code),
            state => Err(illegal("get the exit value of", state)),
        }
    }

    /// The most recent lines of output, each ending in a newline.
    #[must_use]
    pub fn console(&self) -> String {
        self.console.snapshot()
    }

    /// The most recent lines of output, oldest first.
    #[must_use]
    pub fn console_lines(&self) -> Vec<String> {
        self.console.lines()
    }

    /// How many lines the process printed in total, including those no longer held.
    #[must_use]
    pub fn console_total_lines(&self) -> u64 {
        self.console.total_lines()
    }

    /// How many lines of output are kept.
    #[must_use]
    pub fn console_buffer_max_lines(&self) -> usize {
        self.console.capacity()
    }

    /// Changes how many lines of output are kept. Only allowed before start.
    pub fn set_console_buffer_max_lines(&self, lines: usize) -> Result<()> {
        let state = self.shared.state();
        if *state != ProcessState::NotStarted {
            return Err(illegal("resize the console buffer of", *state));
        }

        self.console.set_capacity(lines)
    }

    fn require_started(&self, operation: &'static str) -> Result<()> {
        match *self.shared.state() {
            ProcessState::NotStarted => Err(illegal(operation, ProcessState::NotStarted)),
            _ => Ok(()),
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.state() == ProcessState::Running {
            debug!("Dropping running process {}", self.config.command_line());
            match self.destroy() {
                // exited by itself meanwhile
                Ok(()) | Err(Error::IllegalState { .. }) => {}
                Err(err) => {
                    error!("Couldn't destroy process on drop: {}", err);
                    return;
                }
            }
        }

        let monitor = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            if monitor.join().is_err() {
                warn!("Process monitor panicked");
            }
        }
    }
}

const fn illegal(operation: &'static str, state: ProcessState) -> Error {
    Error::IllegalState { operation, state }
}

fn never_matched(pattern: &str) -> Error {
    Error::PatternNeverMatched {
        pattern: pattern.to_owned(),
    }
}

/// Kills and reaps a child whose supervision could not be set up.
fn reap_abandoned(mut child: Child) {
    if let Err(err) = signal::send(&mut child, Signal::Kill) {
        warn!("Couldn't kill process {}: {}", child.id(), err);
    }
    if let Err(err) = child.wait() {
        warn!("Couldn't reap process {}: {}", child.id(), err);
    }
}

/// Watches for the child's exit, then drains its output and marks it terminated.
fn monitor(
    shared: &Shared,
    console: &ConsoleBuffer,
    pumps: Vec<JoinHandle<()>>,
    poll: Duration,
    drain: Duration,
) {
    let exit_code = loop {
        match shared.poll_exit() {
            Ok(Some(code)) => break code,
            Ok(None) => thread::sleep(poll),
            Err(err) => {
                error!("Lost track of process, killing it: {}", err);
                let _ = shared.signal(Signal::Kill);
                break -1;
            }
        }
    };
    debug!("Process exited with code {}", exit_code);

    if console.wait_drained(drain) {
        for pump in pumps {
            if pump.join().is_err() {
                warn!("Output pump panicked");
            }
        }
    } else {
        warn!(
            "Output still open {:?} after process exit, not waiting for the rest",
            drain
        );
    }

    shared.finish(exit_code);
    console.seal();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ProcessState;
    use crate::{config::ManagedProcessBuilder, error::Error};

    fn unstarted() -> super::ManagedProcess {
        ManagedProcessBuilder::new("someExec")
            .build()
            .expect("valid config")
    }

    #[test]
    fn fresh_process_is_not_alive() {
        let p = unstarted();
        assert!(!p.is_alive());
        assert_eq!(p.state(), ProcessState::NotStarted);
        assert_eq!(p.pid(), None);
    }

    #[test]
    fn fresh_process_refuses_everything_but_start() {
        let p = unstarted();
        assert!(matches!(p.destroy(), Err(Error::IllegalState { .. })));
        assert!(matches!(p.exit_value(), Err(Error::IllegalState { .. })));
        assert!(matches!(p.wait_for(), Err(Error::IllegalState { .. })));
        assert!(matches!(
            p.wait_for_timeout(Duration::from_millis(1)),
            Err(Error::IllegalState { .. })
        ));
        assert!(matches!(
            p.wait_for_or_destroy(Duration::from_millis(1)),
            Err(Error::IllegalState { .. })
        ));
        assert!(matches!(
            p.wait_for_pattern("Never say never..."),
            Err(Error::IllegalState { .. })
        ));
        assert!(matches!(
            p.wait_for_success(),
            Err(Error::IllegalState { .. })
        ));
    }

    #[test]
    fn missing_program_fails_to_start() {
        let p = ManagedProcessBuilder::new("this-program-does-not-exist-anywhere")
            .build()
            .expect("valid config");
        match p.start() {
            Err(Error::StartFailure { program, source }) => {
                assert_eq!(program, "this-program-does-not-exist-anywhere");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected a start failure, got {:?}", other),
        }
        assert_eq!(p.state(), ProcessState::NotStarted);
        assert!(!p.is_alive());
    }

    #[test]
    fn buffer_size_is_configurable_before_start() {
        let p = unstarted();
        assert_eq!(p.console_buffer_max_lines(), 100);
        p.set_console_buffer_max_lines(5).expect("resize before start");
        assert_eq!(p.console_buffer_max_lines(), 5);
        assert!(matches!(
            p.set_console_buffer_max_lines(0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn states_display() {
        assert_eq!(ProcessState::NotStarted.to_string(), "not started");
        assert_eq!(ProcessState::Running.to_string(), "running");
        assert_eq!(
            ProcessState::Terminated { exit_code: 1 }.to_string(),
            "terminated"
        );
    }
}
