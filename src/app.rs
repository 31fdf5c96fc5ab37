use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::api::StegoApi;
use crate::config::{Config, NOTICE_TTL};
use crate::controller::{FileOfferTarget, OperationController};
use crate::intake::{FileIntake, OfferedFile};
use crate::notifier::{NoticeKind, StatusNotifier, StatusView};
use crate::output::{DiskOutput, OutputSink, Revealed};
use crate::state::{Mode, Outcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    FileOffered { mode: Mode, path: PathBuf },
    MessageChanged(String),
    Submit(Mode),
    /// Reset one mode, or both when `None`.
    Reset(Option<Mode>),
    Status,
    Quit,
}

pub struct AppContext {
    pub config: Config,
    pub api: Arc<dyn StegoApi>,
    pub encode: Arc<OperationController>,
    pub decode: Arc<OperationController>,
}

impl AppContext {
    pub fn new(config: Config, api: Arc<dyn StegoApi>, view: Arc<dyn StatusView>) -> Self {
        let output: Arc<dyn OutputSink> = Arc::new(DiskOutput::new(config.output_dir.clone()));
        Self::with_output(config, api, view, output)
    }

    pub fn with_output(
        config: Config,
        api: Arc<dyn StegoApi>,
        view: Arc<dyn StatusView>,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        let intake = FileIntake::new(config.max_file_size);
        let build = |mode| {
            Arc::new(OperationController::new(
                mode,
                intake.clone(),
                api.clone(),
                StatusNotifier::new(mode, NOTICE_TTL, view.clone()),
                output.clone(),
            ))
        };
        let encode = build(Mode::Encode);
        let decode = build(Mode::Decode);

        Self {
            config,
            api,
            encode,
            decode,
        }
    }

    pub fn controller(&self, mode: Mode) -> &Arc<OperationController> {
        match mode {
            Mode::Encode => &self.encode,
            Mode::Decode => &self.decode,
        }
    }

    pub async fn offer_path(&self, mode: Mode, path: PathBuf) {
        let controller = self.controller(mode);
        match OfferedFile::from_path(&path).await {
            Ok(file) => {
                // Rejections are already reported through the notifier.
                if let Err(e) = controller.on_file_offered(file) {
                    debug!("{mode}: {:?} rejected: {e}", path);
                }
            }
            Err(e) => {
                warn!("{mode}: cannot open {:?}: {e}", path);
                controller
                    .notifier()
                    .notify(format!("Cannot open {}: {e}", path.display()), NoticeKind::Error);
            }
        }
    }

    /// One line per mode. Builds the preview of a held selection if it
    /// was never asked for before.
    pub async fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("service: {}", self.config.api_url)];
        for mode in Mode::ALL {
            let controller = self.controller(mode);
            let selected = match controller.selection() {
                Some(selection) => {
                    let preview = match selection.preview_data().await {
                        Some(uri) => format!("preview {} chars", uri.len()),
                        None => "no preview".to_string(),
                    };
                    format!("{} ({preview})", selection.file.name)
                }
                None => "-".to_string(),
            };
            let mut line = format!("{mode}: {:?}, file {selected}", controller.state());
            if mode == Mode::Encode {
                line.push_str(&format!(", message {:?}", controller.message()));
            }
            if controller.can_submit() {
                line.push_str(" (ready)");
            }
            if let Some(label) = controller.notifier().busy() {
                line.push_str(&format!(" [{label}]"));
            }
            if let Some(notice) = controller.notifier().current() {
                line.push_str(&format!(" - {}", notice.text));
            }
            lines.push(line);
        }
        match self.decode.output().revealed() {
            Some(Revealed::Message(text)) => lines.push(format!("revealed: {text}")),
            Some(Revealed::NothingHidden) => lines.push("revealed: (nothing)".to_string()),
            None => {}
        }
        lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct AppOrchestrator {
    ctx: Arc<AppContext>,
    running: JoinSet<(Mode, Outcome)>,
}

impl AppOrchestrator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            running: JoinSet::new(),
        }
    }

    pub async fn handle(&mut self, event: AppEvent) -> Flow {
        debug!("event: {:?}", event);
        match event {
            AppEvent::FileOffered { mode, path } => self.ctx.offer_path(mode, path).await,
            AppEvent::MessageChanged(text) => {
                self.ctx.encode.set_message(text);
            }
            AppEvent::Submit(mode) => {
                let controller = self.ctx.controller(mode);
                if !controller.can_submit() {
                    let hint = match mode {
                        Mode::Encode => "choose an image and type a message first",
                        Mode::Decode => "choose an image first",
                    };
                    controller
                        .notifier()
                        .notify(format!("Cannot {mode} yet: {hint}"), NoticeKind::Info);
                    return Flow::Continue;
                }
                // Spawned so the other mode keeps responding meanwhile.
                let controller = controller.clone();
                self.running
                    .spawn(async move { (mode, controller.submit().await) });
            }
            AppEvent::Reset(Some(mode)) => {
                self.ctx.controller(mode).clear();
            }
            AppEvent::Reset(None) => {
                self.ctx.encode.clear();
                self.ctx.decode.clear();
                self.ctx.decode.output().clear_revealed();
            }
            AppEvent::Status => {
                for line in self.ctx.status_lines().await {
                    println!("{line}");
                }
            }
            AppEvent::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// Process events until `Quit` or until every sender is gone, then wait
    /// for submissions that are still running.
    pub async fn run(&mut self, mut events: mpsc::Receiver<AppEvent>) -> Result<()> {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if self.handle(event).await == Flow::Quit {
                        break;
                    }
                }
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    log_finished(joined);
                }
            }
        }
        self.drain().await;
        Ok(())
    }

    pub async fn drain(&mut self) -> Vec<(Mode, Outcome)> {
        if !self.running.is_empty() {
            info!("Waiting for {} running operation(s)", self.running.len());
        }
        let mut done = Vec::new();
        while let Some(joined) = self.running.join_next().await {
            if let Ok(result) = &joined {
                done.push(result.clone());
            }
            log_finished(joined);
        }
        done
    }
}

fn log_finished(joined: Result<(Mode, Outcome), tokio::task::JoinError>) {
    match joined {
        Ok((mode, outcome)) => debug!("{mode} finished: {:?}", outcome),
        Err(e) => warn!("submission task failed: {e}"),
    }
}

pub const HELP: &str = "\
commands:
  encode <path>          choose the image to hide a message in
  decode <path>          choose the image to read a message from
  message <text>         set the message to hide
  submit encode|decode   send the chosen image to the service
  reset [encode|decode]  clear one mode, or both
  status                 show both modes
  quit";

pub fn parse_line(line: &str) -> Result<Option<AppEvent>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let mode_arg = |rest: &str| {
        Mode::parse(rest).ok_or_else(|| format!("expected `encode` or `decode`, got {rest:?}"))
    };

    let event = match command.to_ascii_lowercase().as_str() {
        "encode" | "decode" if rest.is_empty() => {
            return Err(format!("usage: {command} <path>"));
        }
        "encode" => AppEvent::FileOffered {
            mode: Mode::Encode,
            path: PathBuf::from(rest),
        },
        "decode" => AppEvent::FileOffered {
            mode: Mode::Decode,
            path: PathBuf::from(rest),
        },
        "message" | "msg" => AppEvent::MessageChanged(rest.to_string()),
        "submit" | "send" => AppEvent::Submit(mode_arg(rest)?),
        "reset" | "clear" if rest.is_empty() || rest == "all" => AppEvent::Reset(None),
        "reset" | "clear" => AppEvent::Reset(Some(mode_arg(rest)?)),
        "status" => AppEvent::Status,
        "quit" | "exit" | "q" => AppEvent::Quit,
        "help" | "?" => return Err(HELP.to_string()),
        other => return Err(format!("unknown command {other:?}, type `help`")),
    };
    Ok(Some(event))
}

/// Forward stdin lines as events on a plain thread, so a pending read never
/// holds up runtime shutdown. Sends `Quit` on `quit` or end of input.
pub fn spawn_stdin_reader(
    tx: mpsc::Sender<AppEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || forward_lines(std::io::stdin().lock(), tx))
}

fn forward_lines(input: impl BufRead, tx: mpsc::Sender<AppEvent>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin: {e}");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(AppEvent::Quit)) => break,
            Ok(Some(event)) => {
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(help) => println!("{help}"),
        }
    }
    let _ = tx.blocking_send(AppEvent::Quit);
}
