// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{process::ExitStatus, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

use crate::{classify, CompositionInput, Error, Result, Signature, TranscoderParameters};

/// Lifecycle state of the transcoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The last start failed, nothing is running
    Failed,
}

/// Exit of a transcoder which was not requested by [`CompositorSupervisor::stop`].
#[derive(Debug)]
pub struct ProcessExit {
    /// Start counter of the exited process
    pub instance: u64,
    pub status: Option<ExitStatus>,
}

/// Outcome of the startup phase as reported by the monitor task
#[derive(Debug)]
enum Startup {
    Opened,
    Failed(Error),
    Exited(Option<ExitStatus>),
}

#[derive(Debug)]
struct Running {
    instance: u64,
    stop: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

/// Owns the transcoder process.
///
/// There is at most one process at a time. Its diagnostic output is read by a monitor task
/// which reports the startup outcome and unexpected exits.
#[derive(Debug)]
pub struct CompositorSupervisor {
    params: TranscoderParameters,
    state: CompositorState,
    /// Counts the spawned processes
    instance: u64,
    running: Option<Running>,
    exits_tx: mpsc::UnboundedSender<ProcessExit>,
    exits_rx: mpsc::UnboundedReceiver<ProcessExit>,
}

impl CompositorSupervisor {
    #[must_use]
    pub fn new(params: TranscoderParameters) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            params,
            state: CompositorState::Stopped,
            instance: 0,
            running: None,
            exits_tx,
            exits_rx,
        }
    }

    #[must_use]
    pub fn state(&self) -> CompositorState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == CompositorState::Running && self.running.is_some()
    }

    /// Return true if a process exists, started or not.
    #[must_use]
    pub fn has_process(&self) -> bool {
        self.running.is_some()
    }

    /// Start the transcoder for the given inputs.
    ///
    /// A previous process is stopped first. Returns once the transcoder reported that it
    /// opened its streams.
    ///
    /// # Errors
    ///
    /// Fails if there is nothing to compose, the process can not be spawned, a fatal
    /// diagnostic is printed, the process exits or it stays silent until the startup
    /// timeout. Nothing is left running in any of these cases.
    pub async fn start(&mut self, inputs: &[CompositionInput]) -> Result<()> {
        trace!("start( {} inputs )", inputs.len());

        self.stop().await;

        let args = self.params.command_line(inputs)?;
        tokio::fs::create_dir_all(&self.params.output_dir).await?;

        debug!(
            "Spawning {} {} {}",
            self.params.program,
            self.params.prefix_args.join(" "),
            args.join(" ")
        );
        let child = Command::new(&self.params.program)
            .args(&self.params.prefix_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.params.program.clone(),
                source,
            })?;

        self.instance += 1;
        self.state = CompositorState::Starting;

        let (startup_tx, startup_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            self.instance,
            child,
            self.params.stop_grace,
            startup_tx,
            stop_rx,
            self.exits_tx.clone(),
        ));
        self.running = Some(Running {
            instance: self.instance,
            stop: Some(stop_tx),
            monitor,
        });

        let startup_timeout = self.params.startup_timeout;
        let outcome = match timeout(startup_timeout, startup_rx).await {
            Ok(Ok(Startup::Opened)) => Ok(()),
            Ok(Ok(Startup::Failed(e))) => Err(e),
            Ok(Ok(Startup::Exited(status))) => Err(Error::ExitedDuringStartup { status }),
            Ok(Err(_)) => Err(Error::ExitedDuringStartup { status: None }),
            Err(_) => Err(Error::StartTimeout(startup_timeout)),
        };

        match outcome {
            Ok(()) => {
                info!("Transcoder #{} is running", self.instance);
                self.state = CompositorState::Running;
                Ok(())
            }
            Err(e) => {
                warn!("Transcoder #{} failed to start: {e}", self.instance);
                self.stop().await;
                self.state = CompositorState::Failed;
                Err(e)
            }
        }
    }

    /// Stop the transcoder and wait until it is gone.
    ///
    /// Does nothing if no process exists.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.as_mut() else {
            self.state = CompositorState::Stopped;
            return;
        };
        trace!("stop() transcoder #{}", running.instance);

        self.state = CompositorState::Stopping;
        if let Some(stop) = running.stop.take() {
            // the monitor is gone already if the process exited
            let _ = stop.send(());
        }
        if let Err(e) = (&mut running.monitor).await {
            error!("Transcoder monitor failed: {e}");
        }

        self.running = None;
        self.state = CompositorState::Stopped;
    }

    /// Wait for the next exit which was not requested.
    ///
    /// Exits of older processes are delivered as well, hand them to [`Self::reap`].
    pub async fn next_exit(&mut self) -> ProcessExit {
        match self.exits_rx.recv().await {
            Some(exit) => exit,
            // we hold a sender ourselves
            None => std::future::pending().await,
        }
    }

    /// Forget the process if `exit` belongs to it.
    ///
    /// Returns the error to report if the running transcoder exited.
    pub fn reap(&mut self, exit: ProcessExit) -> Option<Error> {
        let current = self.running.as_ref().map(|running| running.instance);
        if current != Some(exit.instance) {
            debug!("Ignoring exit of former transcoder #{}", exit.instance);
            return None;
        }
        self.running = None;
        self.state = CompositorState::Stopped;
        Some(Error::UnexpectedExit {
            status: exit.status,
        })
    }
}

/// Reads lines of the transcoder's stderr, lossy for non UTF-8 output.
struct DiagnosticLines {
    reader: Option<BufReader<ChildStderr>>,
    buffer: Vec<u8>,
}

impl DiagnosticLines {
    fn new(stderr: Option<ChildStderr>) -> Self {
        Self {
            reader: stderr.map(BufReader::new),
            buffer: vec![],
        }
    }

    /// Next line, pending forever once the stream is closed.
    async fn next(&mut self) -> String {
        if let Some(reader) = self.reader.as_mut() {
            self.buffer.clear();
            match reader.read_until(b'\n', &mut self.buffer).await {
                Ok(n) if n > 0 => {
                    return String::from_utf8_lossy(&self.buffer)
                        .trim_end()
                        .to_string();
                }
                Ok(_) => {}
                Err(e) => debug!("Unable to read transcoder output: {e}"),
            }
            self.reader = None;
        }
        std::future::pending().await
    }
}

async fn monitor(
    instance: u64,
    mut child: Child,
    grace: Duration,
    startup_tx: oneshot::Sender<Startup>,
    mut stop_rx: oneshot::Receiver<()>,
    exits: mpsc::UnboundedSender<ProcessExit>,
) {
    let mut lines = DiagnosticLines::new(child.stderr.take());
    let mut startup = Some(startup_tx);

    loop {
        select! {
            // a dropped sender stops as well
            _ = &mut stop_rx => {
                let status = terminate(&mut child, grace).await;
                debug!("Transcoder #{instance} stopped ({status:?})");
                return;
            }
            line = lines.next() => {
                trace!("transcoder #{instance}: {line}");
                if startup.is_none() {
                    continue;
                }
                let outcome = match classify(&line) {
                    Some(Signature::Opened) => Startup::Opened,
                    Some(Signature::Fatal(kind)) => Startup::Failed(Error::StartupFailed {
                        kind,
                        line: line.clone(),
                    }),
                    None => continue,
                };
                if let Some(startup) = startup.take() {
                    let _ = startup.send(outcome);
                }
            }
            status = child.wait() => {
                let status = match status {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("Unable to get exit status of transcoder #{instance}: {e}");
                        None
                    }
                };
                match startup.take() {
                    Some(startup) => {
                        let _ = startup.send(Startup::Exited(status));
                    }
                    None => {
                        let _ = exits.send(ProcessExit { instance, status });
                    }
                }
                return;
            }
        }
    }
}

/// Ask the process to terminate, kill it after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => return Some(status),
                Ok(Err(e)) => warn!("Unable to wait for transcoder: {e}"),
                Err(_) => warn!("Transcoder did not terminate within {grace:?}, killing it"),
            },
            Err(e) => warn!("Unable to send SIGTERM to transcoder: {e}"),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Unable to kill transcoder: {e}");
    }
    child.wait().await.ok()
}
