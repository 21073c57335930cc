//! Uniform termination requests and exit codes across platforms.

use std::{
    io,
    process::{Child, ExitStatus},
};

/// How hard to ask a process to stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    /// Ask politely: `SIGTERM` on Unix.
    ///
    /// Windows has no equivalent for console-less children, so this is the
    /// same as [`Signal::Kill`] there.
    Terminate,
    /// Stop it now: `SIGKILL` on Unix, `TerminateProcess` on Windows.
    Kill,
}

/// Sends `signal` to the child.
///
/// A child that already exited is not an error.
pub fn send(child: &mut Child, signal: Signal) -> io::Result<()> {
    debug!("Sending {:?} to child process {}", signal, child.id());
    match signal {
        Signal::Terminate => imp::terminate(child),
        Signal::Kill => kill(child),
    }
}

fn kill(child: &mut Child) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    child.kill()
}

/// Maps an exit status to a single integer code.
///
/// On Unix, a process killed by signal N reports `128 + N`, as shells do.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return 128 + signo;
        }
    }

    status.code().unwrap_or(-1)
}

#[cfg(unix)]
mod imp {
    use nix::{
        errno::Errno,
        sys::signal::{kill, Signal},
        unistd::Pid,
        Error,
    };
    use std::{convert::TryFrom, io, process::Child};

    fn from_nix_error(err: Error) -> io::Error {
        match err {
            Error::Sys(errno) => io::Error::from_raw_os_error(errno as i32),
            Error::InvalidPath => io::Error::new(io::ErrorKind::InvalidInput, err),
            _ => io::Error::new(io::ErrorKind::Other, err),
        }
    }

    pub fn terminate(child: &mut Child) -> io::Result<()> {
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        // the child is not reaped yet, so its pid cannot have been reused
        let pid = i32::try_from(child.id())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Error::Sys(Errno::ESRCH)) => Ok(()),
            Err(err) => Err(from_nix_error(err)),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::{io, process::Child};

    pub fn terminate(child: &mut Child) -> io::Result<()> {
        super::kill(child)
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use std::process::{Command, Stdio};

    use super::{exit_code, send, Signal};

    fn sleeper() -> std::process::Child {
        Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .expect("spawn sleep")
    }

    #[test]
    fn terminate_reports_sigterm() {
        let mut child = sleeper();
        send(&mut child, Signal::Terminate).expect("send SIGTERM");
        let status = child.wait().expect("wait for sleep");
        assert_eq!(exit_code(status), 128 + 15);
    }

    #[test]
    fn kill_reports_sigkill() {
        let mut child = sleeper();
        send(&mut child, Signal::Kill).expect("send SIGKILL");
        let status = child.wait().expect("wait for sleep");
        assert_eq!(exit_code(status), 128 + 9);
    }

    #[test]
    fn signalling_an_exited_child_is_fine() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        child.wait().expect("wait for true");
        send(&mut child, Signal::Terminate).expect("terminate exited child");
        send(&mut child, Signal::Kill).expect("kill exited child");
    }

    #[test]
    fn plain_exit_codes() {
        let status = Command::new("sh")
            .args(&["-c", "exit 7"])
            .status()
            .expect("run sh");
        assert_eq!(exit_code(status), 7);
    }
}
