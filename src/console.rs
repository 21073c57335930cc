//! The rolling console buffer shared by the stream pumps and their readers.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, Write},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    error::{Error, Result},
    pattern::PatternWatcher,
};

/// Which output stream of the child a line came from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Where captured lines are forwarded, in addition to the buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsoleSink {
    /// Only keep lines in the buffer.
    Discard,
    /// Emit every line through the `log` facade, at info level.
    Log,
    /// Echo every line to this process's own stdout or stderr.
    Inherit,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::Log
    }
}

#[derive(Debug)]
struct Inner {
    lines: VecDeque<String>,
    capacity: usize,
    total: u64,
    watchers: Vec<Arc<PatternWatcher>>,
    open_streams: usize,
    sealed: bool,
}

/// A capped, thread-safe buffer holding the most recent lines of output.
///
/// Lines are appended whole under a single lock, so output from stdout and
/// stderr never interleaves within a line. When full, the oldest line goes.
#[derive(Debug)]
pub struct ConsoleBuffer {
    inner: Mutex<Inner>,
    streams_closed: Condvar,
    sink: ConsoleSink,
    label: String,
}

impl ConsoleBuffer {
    /// Creates an empty buffer holding at most `capacity` lines.
    ///
    /// `label` prefixes lines forwarded to the log sink.
    pub fn new(capacity: usize, sink: ConsoleSink, label: impl Into<String>) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                total: 0,
                watchers: Vec::new(),
                open_streams: 0,
                sealed: false,
            }),
            streams_closed: Condvar::new(),
            sink,
            label: label.into(),
        })
    }

    /// Records a line, evicting the oldest one if the buffer is full.
    ///
    /// The line is also forwarded to the sink and offered to every pending
    /// pattern watcher.
    pub fn append(&self, stream: Stream, line: impl Into<String>) {
        let line = line.into();
        let mut inner = self.lock();

        self.forward(stream, &line);
        inner.watchers.retain(|watcher| !watcher.offer(&line));

        if inner.lines.len() >= inner.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line);
        inner.total += 1;
    }

    /// The retained lines, oldest first, each terminated by a newline.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let inner = self.lock();
        let mut out = String::with_capacity(inner.lines.iter().map(|l| l.len() + 1).sum());
        for line in &inner.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// The retained lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.iter().cloned().collect()
    }

    /// How many lines were ever appended, including evicted ones.
    #[must_use]
    pub fn total_lines(&self) -> u64 {
        self.lock().total
    }

    /// The maximum number of retained lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Changes the maximum number of retained lines, dropping the oldest if
    /// more are currently held.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        check_capacity(capacity)?;
        let mut inner = self.lock();
        inner.capacity = capacity;
        while inner.lines.len() > capacity {
            inner.lines.pop_front();
        }
        Ok(())
    }

    /// Starts watching for `pattern`.
    ///
    /// Lines still held in the buffer are checked first, then every line
    /// appended from now on. If the buffer is already sealed and nothing held
    /// matches, the watcher comes back abandoned.
    pub fn watch(&self, pattern: impl Into<String>) -> Arc<PatternWatcher> {
        let watcher = Arc::new(PatternWatcher::new(pattern));
        let mut inner = self.lock();

        if inner.lines.iter().any(|line| watcher.offer(line)) {
            return watcher;
        }

        if inner.sealed {
            watcher.abandon();
        } else {
            inner.watchers.push(watcher.clone());
        }

        watcher
    }

    /// Stops offering lines to a watcher, e.g. after its waiter timed out.
    pub fn unwatch(&self, watcher: &Arc<PatternWatcher>) {
        self.lock().watchers.retain(|w| !Arc::ptr_eq(w, watcher));
    }

    /// Declares that no more output will arrive.
    ///
    /// Every pending watcher is abandoned.
    pub fn seal(&self) {
        let mut inner = self.lock();
        inner.sealed = true;
        for watcher in inner.watchers.drain(..) {
            watcher.abandon();
        }
    }

    /// Whether [`seal`](Self::seal) was called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub(crate) fn open_stream(&self) {
        self.lock().open_streams += 1;
    }

    pub(crate) fn close_stream(&self) {
        let mut inner = self.lock();
        inner.open_streams = inner.open_streams.saturating_sub(1);
        if inner.open_streams == 0 {
            self.streams_closed.notify_all();
        }
    }

    /// Waits until every opened stream was closed. Returns false on timeout.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.open_streams > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            inner = self
                .streams_closed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }

    fn forward(&self, stream: Stream, line: &str) {
        match self.sink {
            ConsoleSink::Discard => {}
            ConsoleSink::Log => info!("{} {}: {}", self.label, stream, line),
            ConsoleSink::Inherit => {
                // a closed parent stdio is not the child's problem
                let _ = match stream {
                    Stream::Stdout => inherit(io::stdout().lock(), line),
                    Stream::Stderr => inherit(io::stderr().lock(), line),
                };
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn inherit<W: Write>(mut out: W, line: &str) -> io::Result<()> {
    writeln!(out, "{}", line)?;
    out.flush()
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        Err(Error::Config(
            "console buffer must hold at least one line".into(),
        ))
    } else {
        Ok(())
    }
}
