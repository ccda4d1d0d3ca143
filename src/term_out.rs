use std::io::Write as _;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub(crate) fn init(start: Instant, enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || thread_main(start, enable_progress, receiver))
        .expect("failed to spawn thread");

    Handle {
        join_handle,
        sender,
    }
}

const UPDATE_PERIOD: Duration = Duration::from_millis(100);

fn thread_main(start: Instant, enable_progress: bool, receiver: mpsc::Receiver<Command>) {
    let mut stderr = std::io::stderr();
    let mut current: Option<String> = None;
    let mut dirty = false;
    let mut last_draw: Option<Instant> = None;

    loop {
        let cmd = if current.is_some() && dirty {
            let wait = last_draw.map_or(Duration::ZERO, |t| UPDATE_PERIOD.saturating_sub(t.elapsed()));
            if wait.is_zero() {
                Err(mpsc::RecvTimeoutError::Timeout)
            } else {
                receiver.recv_timeout(wait)
            }
        } else {
            receiver.recv().map_err(mpsc::RecvTimeoutError::from)
        };

        match cmd {
            Ok(Command::SetProgress(progress)) => {
                if enable_progress {
                    current = Some(progress);
                    dirty = true;
                }
            }
            Ok(Command::PrintRawLine(line)) => {
                if current.is_some() {
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                }
                handle_err(stderr.write_all(&line));
                if let Some(ref progress) = current {
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::style::Print(render_progress_line(start, progress)),
                    ));
                    last_draw = Some(Instant::now());
                    dirty = false;
                }
                handle_err(stderr.flush());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(ref progress) = current {
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::cursor::MoveToColumn(0),
                        crossterm::style::Print(render_progress_line(start, progress)),
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
                    ));
                    handle_err(stderr.flush());
                    last_draw = Some(Instant::now());
                    dirty = false;
                }
            }
            Ok(Command::Finish) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(ref progress) = current {
                    if dirty {
                        handle_err(crossterm::queue!(
                            stderr,
                            crossterm::cursor::MoveToColumn(0),
                            crossterm::style::Print(render_progress_line(start, progress)),
                            crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
                        ));
                    }
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::style::Print('\n'),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    handle_err(stderr.flush());
                }
                break;
            }
        }
    }
}

fn render_progress_line(start: Instant, line: &str) -> String {
    let elapsed = start.elapsed().as_secs();
    let secs = elapsed % 60;
    let mins = (elapsed / 60) % 60;
    let hours = elapsed / 3600;

    format!("[{hours:02}:{mins:02}:{secs:02}] {line}")
}

fn handle_err<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

enum Command {
    Finish,
    PrintRawLine(Vec<u8>),
    SetProgress(String),
}

pub(crate) struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl Handle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Finish)
            .expect("term out endpoint closed");
        self.join_handle.join().expect("term out thread panicked");
    }

    pub(crate) fn get_progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProgressPrint {
    sender: mpsc::Sender<Command>,
}

impl ProgressPrint {
    pub(crate) fn set_progress(&self, progress: String) {
        self.sender
            .send(Command::SetProgress(progress))
            .expect("term out endpoint closed");
    }

    pub(crate) fn print_raw_line(&self, line: Vec<u8>) {
        self.sender
            .send(Command::PrintRawLine(line))
            .expect("term out endpoint closed");
    }
}
