//! Threads draining a child's output pipes into the console buffer.

use std::{
    io::{self, BufRead, BufReader, Read},
    sync::Arc,
    thread::{self, JoinHandle},
};

use crate::console::{ConsoleBuffer, Stream};

/// Spawns a thread copying `reader` into `console` line by line until EOF.
///
/// The stream is registered as open on the buffer before the thread starts,
/// and closed when the thread is done, whatever the reason.
pub fn spawn<R>(
    stream: Stream,
    reader: R,
    console: Arc<ConsoleBuffer>,
    pid: u32,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    console.open_stream();
    let closer = console.clone();
    thread::Builder::new()
        .name(format!("pump-{}-{}", pid, stream))
        .spawn(move || {
            drain(stream, reader, &console);
            console.close_stream();
        })
        .map_err(|err| {
            closer.close_stream();
            err
        })
}

fn drain<R: Read>(stream: Stream, reader: R, console: &ConsoleBuffer) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                debug!("{} reached end of input", stream);
                break;
            }
            Ok(_) => console.append(stream, decode_line(&buf)),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("stopped reading {}: {}", stream, err);
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use super::{decode_line, spawn};
    use crate::console::{ConsoleBuffer, ConsoleSink, Stream};

    #[test]
    fn strips_line_endings() {
        assert_eq!(decode_line(b"unix\n"), "unix");
        assert_eq!(decode_line(b"dos\r\n"), "dos");
        assert_eq!(decode_line(b"unterminated"), "unterminated");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{fffd}");
    }

    #[test]
    fn drains_everything_then_closes() {
        let console = Arc::new(
            ConsoleBuffer::new(10, ConsoleSink::Discard, "test").expect("valid capacity"),
        );
        let input = Cursor::new(b"one\ntwo\r\nthree".to_vec());

        let pump = spawn(Stream::Stdout, input, console.clone(), 0).expect("spawn pump");
        pump.join().expect("pump panicked");

        assert_eq!(console.lines(), vec!["one", "two", "three"]);
        assert!(console.wait_drained(std::time::Duration::from_millis(1)));
    }
}
