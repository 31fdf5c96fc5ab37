use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::state::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    /// Neither a success nor an error, e.g. an image with nothing hidden.
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

pub trait StatusView: Send + Sync {
    fn show_notice(&self, mode: Mode, notice: &Notice);
    fn clear_notice(&self, mode: Mode);
    fn show_busy(&self, mode: Mode, label: &str);
    fn clear_busy(&self, mode: Mode);
}

pub struct TerminalView;

impl StatusView for TerminalView {
    fn show_notice(&self, mode: Mode, notice: &Notice) {
        let tag = match notice.kind {
            NoticeKind::Success => "ok",
            NoticeKind::Info => "info",
            NoticeKind::Error => "error",
        };
        println!("[{mode}] {tag}: {}", notice.text);
    }

    fn clear_notice(&self, mode: Mode) {
        debug!("[{mode}] notice expired");
    }

    fn show_busy(&self, mode: Mode, label: &str) {
        println!("[{mode}] {label}");
    }

    fn clear_busy(&self, mode: Mode) {
        debug!("[{mode}] idle");
    }
}

#[derive(Default)]
struct Board {
    notice: Option<Notice>,
    generation: u64,
    expiry: Option<JoinHandle<()>>,
    busy: Option<String>,
}

#[derive(Clone)]
pub struct StatusNotifier {
    mode: Mode,
    ttl: Duration,
    board: Arc<Mutex<Board>>,
    view: Arc<dyn StatusView>,
}

impl StatusNotifier {
    pub fn new(mode: Mode, ttl: Duration, view: Arc<dyn StatusView>) -> Self {
        Self {
            mode,
            ttl,
            board: Arc::default(),
            view,
        }
    }

    fn board(&self) -> MutexGuard<'_, Board> {
        // Board holds plain values; a panic elsewhere can't leave it torn.
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Show a notice, replacing whatever is on screen and its pending expiry.
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, text: impl Into<String>, kind: NoticeKind) {
        let notice = Notice {
            kind,
            text: text.into(),
        };
        match kind {
            NoticeKind::Error => warn!("[{}] {}", self.mode, notice.text),
            _ => info!("[{}] {}", self.mode, notice.text),
        }

        let mut board = self.board();
        if let Some(previous) = board.expiry.take() {
            previous.abort();
        }
        board.generation += 1;
        let generation = board.generation;
        self.view.show_notice(self.mode, &notice);
        board.notice = Some(notice);

        let this = self.clone();
        board.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(this.ttl).await;
            let mut board = this.board();
            if board.generation == generation {
                board.notice = None;
                board.expiry = None;
                this.view.clear_notice(this.mode);
            }
        }));
    }

    pub fn current(&self) -> Option<Notice> {
        self.board().notice.clone()
    }

    pub fn show_busy(&self, label: &str) {
        self.board().busy = Some(label.to_string());
        self.view.show_busy(self.mode, label);
    }

    pub fn clear_busy(&self) {
        if self.board().busy.take().is_some() {
            self.view.clear_busy(self.mode);
        }
    }

    pub fn busy(&self) -> Option<String> {
        self.board().busy.clone()
    }

    /// Show the busy indicator until the returned guard is dropped.
    pub fn busy_guard(&self, label: &str) -> BusyGuard<'_> {
        self.show_busy(label);
        BusyGuard { notifier: self }
    }
}

/// Clears the busy indicator on drop, including during unwinding.
pub struct BusyGuard<'a> {
    notifier: &'a StatusNotifier,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.notifier.clear_busy();
    }
}
