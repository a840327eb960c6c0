use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

use super::input::PdfInput;
use super::release::{ReleaseOnce, ReleaseReason};
use super::PreparedCommand;
use crate::classify::classify;
use crate::config::ExecutionOptions;
use crate::error::{ClassifiedError, Error, FailureKind, Result};
use crate::utils::process::{configure_command_no_window, diagnostics_text, first_non_empty_line};

const CHUNK_SIZE: usize = 64 * 1024;
/// Délai laissé au lecteur de diagnostic une fois la fin du process observée.
const DIAGNOSTICS_GRACE: Duration = Duration::from_secs(2);

struct Exit {
    status: ExitStatus,
    timed_out: bool,
}

/// Canaux encore actifs tant que le process n'est pas libéré.
struct Controls {
    kill: oneshot::Sender<()>,
    feeder: Option<JoinHandle<()>>,
}

impl Controls {
    fn close(self) {
        // Le superviseur a pu se terminer avant: l'envoi échoue alors sans effet.
        let _ = self.kill.send(());
        if let Some(feeder) = self.feeder {
            feeder.abort();
        }
    }
}

/// Sortie standard d'un outil poppler, lue à la demande.
///
/// Le flux est fini et ne peut pas être relancé. Le process est libéré une
/// seule fois, au premier des événements suivants: fin du process (même si
/// le flux n'est pas consommé), sortie lue jusqu'au bout, `stop()`, abandon
/// du flux, erreur de lecture ou délai dépassé. Libérer interrompt l'écriture
/// sur stdin et termine le process s'il tourne encore. Après une fin naturelle
/// la sortie déjà produite reste lisible jusqu'à sa fin; `stop()`, l'abandon
/// ou une erreur ferment aussi le lecteur de sortie et celui du diagnostic.
pub struct OutputStream {
    program: String,
    timeout: Option<Duration>,
    reader: Option<ChildStdout>,
    buffer: Box<[u8]>,
    supervisor: Option<JoinHandle<io::Result<Exit>>>,
    exit: Option<io::Result<Exit>>,
    diagnostics: Option<JoinHandle<io::Result<Vec<u8>>>>,
    controls: Arc<ReleaseOnce<Controls>>,
    stopped: bool,
    failure: Option<Error>,
    settling: Option<BoxFuture<'static, Result<ExitStatus>>>,
    status: Option<ExitStatus>,
    finished: bool,
}

/// Lance la commande et expose sa sortie standard comme un flux d'octets.
///
/// Doit être appelée depuis un runtime tokio.
pub fn spawn(
    command: PreparedCommand,
    input: PdfInput,
    options: &ExecutionOptions,
) -> Result<OutputStream> {
    let mut cmd = command.to_command();
    cmd.stdin(if input.uses_stdin() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
    configure_command_no_window(&mut cmd);

    log::debug!(
        "[poppler][process] spawn {} {:?} (input: {:?})",
        command.program.display(),
        command.args,
        input
    );
    let program = command.name;
    let mut child = cmd.spawn().map_err(|err| spawn_error(&program, err))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("unable to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("unable to capture stderr"))?;
    let feeder = child
        .stdin
        .take()
        .map(|stdin| tokio::spawn(feed(stdin, input, program.clone())));

    let limit = options.max_output_bytes;
    let diagnostics = tokio::spawn(async move { read_all_limited(stderr, limit).await });
    let (kill, kill_rx) = oneshot::channel();
    let controls = Arc::new(ReleaseOnce::new(Controls { kill, feeder }));
    let supervisor = tokio::spawn(supervise(
        child,
        kill_rx,
        Arc::clone(&controls),
        options.timeout,
        program.clone(),
    ));

    Ok(OutputStream {
        program,
        timeout: options.timeout,
        reader: Some(stdout),
        buffer: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
        supervisor: Some(supervisor),
        exit: None,
        diagnostics: Some(diagnostics),
        controls,
        stopped: false,
        failure: None,
        settling: None,
        status: None,
        finished: false,
    })
}

/// Lance la commande et accumule toute sa sortie.
///
/// Dépasser `max_output_bytes` arrête le process et échoue avec
/// `OutputTooLarge`; une fin en échec retourne l'erreur classée.
pub async fn run(
    command: PreparedCommand,
    input: PdfInput,
    options: &ExecutionOptions,
) -> Result<Bytes> {
    let limit = options.max_output_bytes;
    let mut stream = spawn(command, input, options)?;
    let mut output = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if output.len() + chunk.len() > limit {
            stream.stop();
            return Err(Error::OutputTooLarge {
                program: stream.program.clone(),
                limit,
            });
        }
        output.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(output))
}

impl OutputStream {
    /// Nom de l'outil lancé.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arrête le process et libère ses canaux sans attendre sa fin.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.release(ReleaseReason::Stopped);
    }

    pub fn is_released(&self) -> bool {
        self.controls.is_released()
    }

    /// Attend la fin du process en ignorant la sortie non lue.
    ///
    /// Après `stop()`, retourne le statut du process terminé sans erreur.
    /// Si le flux a déjà retourné une erreur, `wait` retourne la même.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.duplicate());
        }
        self.status
            .ok_or_else(|| Error::Io(io::Error::other("process status was already consumed")))
    }

    fn release(&mut self, reason: ReleaseReason) {
        if let Some(controls) = self.controls.release(reason) {
            controls.close();
        }
        if reason != ReleaseReason::Completed {
            self.reader = None;
            if let Some(diagnostics) = self.diagnostics.take() {
                diagnostics.abort();
            }
        }
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.finished = true;
        self.release(ReleaseReason::Failed);
        self.failure = Some(err.duplicate());
        Poll::Ready(Some(Err(err)))
    }

    /// Relève la fin du process sans bloquer la lecture.
    fn poll_exit(&mut self, cx: &mut Context<'_>) {
        if self.exit.is_some() {
            return;
        }
        let Some(supervisor) = self.supervisor.as_mut() else {
            return;
        };
        if let Poll::Ready(joined) = Pin::new(supervisor).poll(cx) {
            self.supervisor = None;
            let exit = flatten(joined, "supervisor");
            // Un petit-enfant du lanceur peut garder le tube ouvert après le kill.
            if matches!(&exit, Ok(exit) if exit.timed_out) {
                self.reader = None;
            }
            self.exit = Some(exit);
        }
    }

    fn settle(&mut self) -> BoxFuture<'static, Result<ExitStatus>> {
        let program = self.program.clone();
        let timeout = self.timeout;
        let stopped = self.stopped;
        let exit = self.exit.take();
        let supervisor = self.supervisor.take();
        let diagnostics = self.diagnostics.take();

        Box::pin(async move {
            let exit = match (exit, supervisor) {
                (Some(exit), _) => exit?,
                (None, Some(handle)) => flatten(handle.await, "supervisor")?,
                (None, None) => return Err(Error::Io(io::Error::other("process already settled"))),
            };
            let diagnostics = match diagnostics {
                Some(handle) => collect_diagnostics(handle).await,
                None => String::new(),
            };
            conclude(&program, exit, stopped, timeout, diagnostics)
        })
    }
}

impl Stream for OutputStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some(settling) = this.settling.as_mut() {
                let result = ready!(settling.as_mut().poll(cx));
                this.settling = None;
                this.finished = true;
                return match result {
                    Ok(status) => {
                        this.status = Some(status);
                        this.release(ReleaseReason::Completed);
                        Poll::Ready(None)
                    }
                    Err(err) => this.fail(err),
                };
            }

            this.poll_exit(cx);
            let Some(reader) = this.reader.as_mut() else {
                this.settling = Some(this.settle());
                continue;
            };

            let mut buf = ReadBuf::new(&mut this.buffer);
            match ready!(Pin::new(reader).poll_read(cx, &mut buf)) {
                Ok(()) if buf.filled().is_empty() => {
                    this.reader = None;
                }
                Ok(()) => return Poll::Ready(Some(Ok(Bytes::copy_from_slice(buf.filled())))),
                Err(err) => return this.fail(Error::Io(err)),
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.release(ReleaseReason::Dropped);
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("program", &self.program)
            .field("released", &self.is_released())
            .field("finished", &self.finished)
            .finish()
    }
}

fn spawn_error(program: &str, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        log::warn!("[poppler][process] {program} could not be started: {err}");
        Error::Process(ClassifiedError::new(
            FailureKind::ExecutableNotFound {
                name: program.to_string(),
            },
            err.to_string(),
            String::new(),
        ))
    } else {
        Error::Io(err)
    }
}

/// Écrit l'entrée sur stdin puis le ferme; un tube cassé n'est pas une erreur.
async fn feed(mut stdin: ChildStdin, input: PdfInput, program: String) {
    let written = match input {
        PdfInput::Bytes(bytes) => stdin.write_all(&bytes).await,
        PdfInput::Reader(mut reader) => tokio::io::copy(&mut reader, &mut stdin).await.map(drop),
        PdfInput::Path(_) => Ok(()),
    };
    let result = match written {
        Ok(()) => stdin.shutdown().await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
        Err(err) => log::debug!("[poppler][process] {program}: writing stdin failed: {err}"),
    }
}

/// Attend la fin du process, le termine sur demande ou à l'expiration du délai.
///
/// La fin du process libère les canaux sans attendre le consommateur du flux.
async fn supervise(
    child: Child,
    kill: oneshot::Receiver<()>,
    controls: Arc<ReleaseOnce<Controls>>,
    timeout: Option<Duration>,
    program: String,
) -> io::Result<Exit> {
    let exit = wait_or_kill(child, kill, timeout, program).await;
    if let Some(controls) = controls.release(ReleaseReason::Exited) {
        controls.close();
    }
    exit
}

async fn wait_or_kill(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    timeout: Option<Duration>,
    program: String,
) -> io::Result<Exit> {
    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => Ok(Exit { status: status?, timed_out: false }),
        _ = kill => {
            let status = terminate(&mut child).await?;
            Ok(Exit { status, timed_out: false })
        }
        _ = deadline => {
            log::warn!("[poppler][process] {program} timed out after {timeout:?}, killing it");
            let status = terminate(&mut child).await?;
            Ok(Exit { status, timed_out: true })
        }
    }
}

async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    if let Err(err) = child.start_kill() {
        log::debug!("[poppler][process] kill failed: {err}");
    }
    child.wait().await
}

fn conclude(
    program: &str,
    exit: Exit,
    stopped: bool,
    timeout: Option<Duration>,
    diagnostics: String,
) -> Result<ExitStatus> {
    if exit.timed_out {
        return Err(Error::TimedOut {
            program: program.to_string(),
            timeout: timeout.unwrap_or_default(),
            diagnostics,
        });
    }
    if stopped || exit.status.success() {
        return Ok(exit.status);
    }

    let message = match exit.status.code() {
        Some(code) => format!("{program} exited with status {code}"),
        None => format!("{program} was terminated by a signal"),
    };
    log::warn!(
        "[poppler][process] {message}: {}",
        first_non_empty_line(&diagnostics)
    );
    Err(Error::Process(classify(&message, &diagnostics)))
}

async fn collect_diagnostics(mut handle: JoinHandle<io::Result<Vec<u8>>>) -> String {
    match tokio::time::timeout(DIAGNOSTICS_GRACE, &mut handle).await {
        Ok(joined) => match flatten(joined, "stderr") {
            Ok(raw) => diagnostics_text(&raw),
            Err(err) => {
                log::debug!("[poppler][process] diagnostics unavailable: {err}");
                String::new()
            }
        },
        Err(_elapsed) => {
            handle.abort();
            String::new()
        }
    }
}

/// Lit tout le flux en ne gardant que `max_bytes` octets; le reste est drainé.
async fn read_all_limited<R>(mut reader: R, max_bytes: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut scratch = [0u8; 8192];
    loop {
        let count = reader.read(&mut scratch).await?;
        if count == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(buf.len());
        buf.extend_from_slice(&scratch[..remaining.min(count)]);
    }
    Ok(buf)
}

fn flatten<T>(joined: std::result::Result<io::Result<T>, JoinError>, name: &str) -> io::Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(io::Error::new(
            io::ErrorKind::Interrupted,
            format!("{name} task was cancelled"),
        )),
        Err(_panic) => Err(io::Error::other(format!("{name} task panicked"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_all_limited_keeps_prefix_and_drains() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let limited = read_all_limited(&data[..], 4).await.unwrap();
        assert_eq!(limited, vec![1, 2, 3, 4]);
    }

    #[cfg(unix)]
    mod unix {
        use std::collections::BTreeMap;
        use std::path::PathBuf;

        use super::*;
        use crate::config::ExecutionOptions;

        fn shell(script: &str) -> PreparedCommand {
            PreparedCommand {
                name: "fake-tool".to_string(),
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), script.into()],
                env: BTreeMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]),
            }
        }

        #[tokio::test]
        async fn buffered_run_collects_stdout() {
            let output = run(
                shell("printf 'page 1\\n'; printf 'page 2\\n'"),
                PdfInput::path("/unused.pdf"),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();
            assert_eq!(&output[..], b"page 1\npage 2\n");
        }

        #[tokio::test]
        async fn stdin_bytes_reach_the_process() {
            let output = run(
                shell("cat"),
                PdfInput::bytes(&b"%PDF-1.7 body"[..]),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();
            assert_eq!(&output[..], b"%PDF-1.7 body");
        }

        #[tokio::test]
        async fn stdin_reader_is_copied() {
            let reader = std::io::Cursor::new(b"streamed".to_vec());
            let output = run(shell("cat"), PdfInput::reader(reader), &ExecutionOptions::default())
                .await
                .unwrap();
            assert_eq!(&output[..], b"streamed");
        }

        #[tokio::test]
        async fn ignoring_stdin_is_not_an_error() {
            let output = run(
                shell("echo done"),
                PdfInput::bytes(vec![b'x'; 1024 * 1024]),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();
            assert_eq!(&output[..], b"done\n");
        }

        #[tokio::test]
        async fn failure_is_classified_with_diagnostics() {
            let err = run(
                shell("echo 'Command Line Error: Incorrect password' >&2; exit 1"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap_err();
            let classified = err.classified().unwrap();
            assert_eq!(classified.kind, FailureKind::PasswordProtected);
            assert_eq!(classified.message, "fake-tool exited with status 1");
            assert_eq!(classified.diagnostics, "Command Line Error: Incorrect password");
        }

        #[tokio::test]
        async fn missing_program_is_executable_not_found() {
            let mut command = shell("true");
            command.program = PathBuf::from("/definitely/not/pdftotext");
            command.name = "pdftotext".to_string();
            let err = run(command, PdfInput::path("/a.pdf"), &ExecutionOptions::default())
                .await
                .unwrap_err();
            assert_eq!(
                err.kind(),
                Some(&FailureKind::ExecutableNotFound {
                    name: "pdftotext".to_string()
                })
            );
        }

        #[tokio::test]
        async fn output_limit_stops_the_process() {
            let options = ExecutionOptions {
                max_output_bytes: 16,
                ..ExecutionOptions::default()
            };
            let err = run(
                shell("while true; do echo 0123456789; done"),
                PdfInput::path("/a.pdf"),
                &options,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::OutputTooLarge { limit: 16, .. }));
        }

        #[tokio::test]
        async fn timeout_kills_and_reports() {
            let options = ExecutionOptions {
                timeout: Some(Duration::from_millis(200)),
                ..ExecutionOptions::default()
            };
            let started = std::time::Instant::now();
            let err = run(
                shell("echo starting >&2; exec sleep 30"),
                PdfInput::path("/a.pdf"),
                &options,
            )
            .await
            .unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(10));
            match err {
                Error::TimedOut { program, diagnostics, .. } => {
                    assert_eq!(program, "fake-tool");
                    assert_eq!(diagnostics, "starting");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn stream_yields_chunks_then_releases() {
            let mut stream = spawn(
                shell("printf abc"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(collected, b"abc");
            assert!(stream.is_released());
            assert!(stream.next().await.is_none());
        }

        #[tokio::test]
        async fn stop_without_reading_terminates_the_process() {
            let mut stream = spawn(
                shell("exec sleep 30"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            stream.stop();
            assert!(stream.is_released());
            stream.stop();

            let status = tokio::time::timeout(Duration::from_secs(10), stream.wait())
                .await
                .unwrap()
                .unwrap();
            assert!(!status.success());
        }

        async fn until_released(stream: &OutputStream) {
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while !stream.is_released() && std::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        #[tokio::test]
        async fn exit_releases_an_unpolled_stream() {
            let mut stream = spawn(
                shell("echo 'Syntax Error: damaged xref' >&2; exit 3"),
                PdfInput::bytes(vec![b'x'; 4 * 1024 * 1024]),
                &ExecutionOptions::default(),
            )
            .unwrap();
            until_released(&stream).await;
            assert!(stream.is_released());
            assert!(stream.controls.release(ReleaseReason::Stopped).is_none());

            let err = stream.next().await.unwrap().unwrap_err();
            assert_eq!(err.kind(), Some(&FailureKind::InvalidInput));
            assert_eq!(err.classified().unwrap().diagnostics, "Syntax Error: damaged xref");
            assert!(stream.next().await.is_none());
        }

        #[tokio::test]
        async fn output_stays_readable_after_exit_release() {
            let mut stream = spawn(
                shell("printf 'page 1'"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            until_released(&stream).await;
            assert!(stream.is_released());

            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(collected, b"page 1");
        }

        #[tokio::test]
        async fn stop_and_drop_after_drain_are_no_ops() {
            let mut stream = spawn(
                shell("printf abc"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            while let Some(chunk) = stream.next().await {
                chunk.unwrap();
            }
            assert!(stream.is_released());

            stream.stop();
            assert!(stream.controls.release(ReleaseReason::Dropped).is_none());
            assert!(stream.next().await.is_none());
            let status = stream.wait().await.unwrap();
            assert!(status.success());
        }

        #[tokio::test]
        async fn stop_after_failure_keeps_the_error() {
            let mut stream = spawn(
                shell("echo 'Incorrect password' >&2; exit 1"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            let err = stream.next().await.unwrap().unwrap_err();
            assert_eq!(err.kind(), Some(&FailureKind::PasswordProtected));

            stream.stop();
            assert!(stream.is_released());
            assert!(stream.controls.release(ReleaseReason::Stopped).is_none());
            assert!(stream.next().await.is_none());

            let again = stream.wait().await.unwrap_err();
            assert_eq!(again.kind(), Some(&FailureKind::PasswordProtected));
            assert_eq!(again.to_string(), err.to_string());
        }

        #[tokio::test]
        async fn stream_reports_exit_failure_after_output() {
            let mut stream = spawn(
                shell("printf partial; echo 'Syntax Error: damaged xref' >&2; exit 3"),
                PdfInput::path("/a.pdf"),
                &ExecutionOptions::default(),
            )
            .unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(&first[..], b"partial");
            let err = stream.next().await.unwrap().unwrap_err();
            assert_eq!(err.kind(), Some(&FailureKind::InvalidInput));
            assert!(stream.is_released());
            assert!(stream.next().await.is_none());
        }
    }
}
