//! ```text
//!   Idle <-> AwaitingInput --submit--> InFlight --> Succeeded --+
//!    ^                                          \-> Failed -----+
//!    +-----------------------------------------------------------+
//! ```
//!
//! The check and the move to `InFlight` happen under one lock, which is
//! released before the request is awaited.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info};

use crate::api::StegoApi;
use crate::intake::{FileIntake, FileSelection, OfferedFile, ValidationError};
use crate::notifier::{NoticeKind, StatusNotifier};
use crate::output::OutputSink;
use crate::state::{Mode, OperationState, Outcome};

#[derive(Debug)]
struct Form {
    state: OperationState,
    selection: Option<FileSelection>,
    message: String,
}

/// Something that can be handed a file, whatever the input modality.
pub trait FileOfferTarget {
    fn on_file_offered(&self, file: OfferedFile) -> Result<OperationState, ValidationError>;
}

pub struct OperationController {
    mode: Mode,
    intake: FileIntake,
    api: Arc<dyn StegoApi>,
    notifier: StatusNotifier,
    output: Arc<dyn OutputSink>,
    form: Mutex<Form>,
}

impl OperationController {
    pub fn new(
        mode: Mode,
        intake: FileIntake,
        api: Arc<dyn StegoApi>,
        notifier: StatusNotifier,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            mode,
            intake,
            api,
            notifier,
            output,
            form: Mutex::new(Form {
                state: OperationState::Idle,
                selection: None,
                message: String::new(),
            }),
        }
    }

    fn form(&self) -> MutexGuard<'_, Form> {
        self.form.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> OperationState {
        self.form().state
    }

    pub fn can_submit(&self) -> bool {
        self.state() == OperationState::AwaitingInput
    }

    pub fn selection(&self) -> Option<FileSelection> {
        self.form().selection.clone()
    }

    pub fn message(&self) -> String {
        self.form().message.clone()
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    pub fn output(&self) -> &Arc<dyn OutputSink> {
        &self.output
    }

    fn set_state(&self, form: &mut Form, next: OperationState) {
        if form.state != next {
            debug!("{}: {:?} -> {:?}", self.mode, form.state, next);
            form.state = next;
        }
    }

    fn settle(&self, form: &mut Form) {
        if !matches!(form.state, OperationState::Idle | OperationState::AwaitingInput) {
            return;
        }
        let has_message = self.mode == Mode::Decode || !form.message.trim().is_empty();
        let next = if form.selection.is_some() && has_message {
            OperationState::AwaitingInput
        } else {
            OperationState::Idle
        };
        self.set_state(form, next);
    }

    /// Update the message to hide. Ignored by the decode controller.
    pub fn set_message(&self, text: impl Into<String>) -> OperationState {
        let mut form = self.form();
        if self.mode == Mode::Decode {
            debug!("decode: ignoring message input");
            return form.state;
        }
        if form.state == OperationState::InFlight {
            debug!("{}: message change ignored while in flight", self.mode);
            return form.state;
        }
        form.message = text.into();
        self.settle(&mut form);
        form.state
    }

    /// Drop the selection and message. Revealed text is left alone.
    pub fn clear(&self) -> OperationState {
        let mut form = self.form();
        if form.state == OperationState::InFlight {
            debug!("{}: clear ignored while in flight", self.mode);
            return form.state;
        }
        self.reset(&mut form);
        form.state
    }

    fn reset(&self, form: &mut Form) {
        form.selection = None;
        form.message.clear();
        self.set_state(form, OperationState::Idle);
    }

    fn offer(&self, file: OfferedFile) -> Result<OperationState, ValidationError> {
        if self.state() == OperationState::InFlight {
            self.notifier.notify(
                format!("Still working on the previous {}, try again shortly", self.mode),
                NoticeKind::Info,
            );
            return Ok(OperationState::InFlight);
        }

        let path = file.path.clone();
        let selection = match self.intake.validate(file, self.mode) {
            Ok(selection) => selection,
            Err(e) => {
                self.notifier.notify(e.to_string(), NoticeKind::Error);
                self.drop_stale(&path);
                return Err(e);
            }
        };
        info!(
            "{}: selected {} ({}, {} bytes)",
            self.mode,
            selection.file.name,
            selection.mime_type(),
            selection.byte_size()
        );

        let mut form = self.form();
        // The request may have started while the file was being validated.
        if form.state == OperationState::InFlight {
            return Ok(form.state);
        }
        form.selection = Some(selection);
        self.settle(&mut form);
        Ok(form.state)
    }

    /// A held selection whose file no longer validates is dropped. Other
    /// selections are kept.
    fn drop_stale(&self, path: &Path) {
        let mut form = self.form();
        if form.state == OperationState::InFlight {
            return;
        }
        if form.selection.as_ref().is_some_and(|s| s.file.path == path) {
            debug!("{}: dropping stale selection {:?}", self.mode, path);
            form.selection = None;
            self.settle(&mut form);
        }
    }

    /// Never fails: every error becomes a notice and an [`Outcome::Failed`],
    /// and the controller is back in `Idle` when this returns.
    pub async fn submit(&self) -> Outcome {
        let (file, message) = {
            let mut form = self.form();
            let selection = match (&form.state, &form.selection) {
                (OperationState::AwaitingInput, Some(selection)) => selection.file.clone(),
                (state, _) => {
                    debug!("{}: submit rejected in {:?}", self.mode, state);
                    return Outcome::Rejected(*state);
                }
            };
            self.set_state(&mut form, OperationState::InFlight);
            (selection, form.message.clone())
        };

        let _in_flight = InFlightGuard { controller: self };
        let _busy = self.notifier.busy_guard(match self.mode {
            Mode::Encode => "Hiding message...",
            Mode::Decode => "Extracting message...",
        });

        let outcome = match self.mode {
            Mode::Encode => self.run_encode(&file, &message).await,
            Mode::Decode => self.run_decode(&file).await,
        };

        let mut form = self.form();
        let done = if outcome.is_success() {
            OperationState::Succeeded
        } else {
            OperationState::Failed
        };
        self.set_state(&mut form, done);
        self.reset(&mut form);
        outcome
    }

    async fn run_encode(&self, file: &OfferedFile, message: &str) -> Outcome {
        let bytes = match self.api.hide(file, message).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("encode: {} ({})", e, e.code());
                return self.fail(e.user_message());
            }
        };

        match self.output.save_image(&file.name, &bytes).await {
            Ok(path) => {
                self.notifier.notify(
                    format!("Message hidden, saved to {}", path.display()),
                    NoticeKind::Success,
                );
                Outcome::Saved(path)
            }
            Err(e) => {
                error!("encode: {:#}", e);
                self.fail(format!("Could not save the image: {e}"))
            }
        }
    }

    async fn run_decode(&self, file: &OfferedFile) -> Outcome {
        match self.api.extract(file).await {
            Ok(Some(text)) => {
                self.output.show_revealed(Some(&text));
                self.notifier
                    .notify("Message extracted", NoticeKind::Success);
                Outcome::Revealed(text)
            }
            Ok(None) => {
                self.output.show_revealed(None);
                self.notifier
                    .notify("No hidden message found in this image", NoticeKind::Info);
                Outcome::NothingHidden
            }
            Err(e) => {
                error!("decode: {} ({})", e, e.code());
                self.output.clear_revealed();
                self.fail(e.user_message())
            }
        }
    }

    fn fail(&self, message: String) -> Outcome {
        self.notifier.notify(message.clone(), NoticeKind::Error);
        Outcome::Failed(message)
    }
}

impl FileOfferTarget for OperationController {
    fn on_file_offered(&self, file: OfferedFile) -> Result<OperationState, ValidationError> {
        self.offer(file)
    }
}

/// Puts the form back to `Idle` if a submit unwinds while in flight.
struct InFlightGuard<'a> {
    controller: &'a OperationController,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut form = self.controller.form();
        if form.state == OperationState::InFlight {
            self.controller.reset(&mut form);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::api::{ApiError, HealthStatus};
    use crate::notifier::{Notice, TerminalView};
    use crate::output::{DiskOutput, Revealed};

    #[derive(Clone)]
    pub(crate) enum Reply {
        Image(Vec<u8>),
        Text(Option<String>),
        Server(u16, String),
        Panic,
    }

    /// In-memory service that answers every call with one scripted reply.
    pub(crate) struct ScriptedApi {
        pub reply: Reply,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<(String, Option<String>)>>,
        pub gate: Option<Arc<Notify>>,
    }

    impl ScriptedApi {
        pub fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        pub fn gated(reply: Reply, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(reply)
            }
        }

        async fn answer(&self, file: &OfferedFile, message: Option<&str>) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((file.name.clone(), message.map(str::to_string)));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.clone()
        }
    }

    fn server(status: u16, message: String) -> ApiError {
        ApiError::Server {
            status,
            code: None,
            message,
        }
    }

    #[async_trait]
    impl StegoApi for ScriptedApi {
        async fn hide(&self, file: &OfferedFile, message: &str) -> Result<Vec<u8>, ApiError> {
            match self.answer(file, Some(message)).await {
                Reply::Image(bytes) => Ok(bytes),
                Reply::Server(status, message) => Err(server(status, message)),
                Reply::Panic => panic!("service exploded"),
                Reply::Text(_) => Err(server(500, "unexpected text reply".into())),
            }
        }

        async fn extract(&self, file: &OfferedFile) -> Result<Option<String>, ApiError> {
            match self.answer(file, None).await {
                Reply::Text(text) => Ok(text),
                Reply::Server(status, message) => Err(server(status, message)),
                Reply::Panic => panic!("service exploded"),
                Reply::Image(_) => Err(server(500, "unexpected image reply".into())),
            }
        }

        async fn health(&self) -> Result<HealthStatus, ApiError> {
            Ok(HealthStatus {
                status: "healthy".into(),
                environment: None,
                memory_usage_mb: None,
            })
        }
    }

    pub(crate) struct Fixture {
        pub controller: Arc<OperationController>,
        pub api: Arc<ScriptedApi>,
        pub output: Arc<DiskOutput>,
        pub dir: tempfile::TempDir,
    }

    impl Fixture {
        pub fn new(mode: Mode, api: ScriptedApi) -> Self {
            Self::with_max(mode, api, 16 * 1024 * 1024)
        }

        pub fn with_max(mode: Mode, api: ScriptedApi, max_file_size: u64) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let api = Arc::new(api);
            let output = Arc::new(DiskOutput::new(dir.path().join("out")).quiet());
            let notifier =
                StatusNotifier::new(mode, Duration::from_secs(5), Arc::new(TerminalView));
            let controller = Arc::new(OperationController::new(
                mode,
                FileIntake::new(max_file_size),
                api.clone(),
                notifier,
                output.clone(),
            ));
            Self {
                controller,
                api,
                output,
                dir,
            }
        }

        pub fn image(&self, name: &str, size: usize) -> OfferedFile {
            let path = self.dir.path().join(name);
            std::fs::write(&path, vec![0u8; size]).unwrap();
            OfferedFile {
                name: name.to_string(),
                mime_type: crate::utils::mime_from_path(&path).to_string(),
                byte_size: size as u64,
                path,
            }
        }

        pub fn calls(&self) -> usize {
            self.api.calls.load(Ordering::SeqCst)
        }

        pub fn notice(&self) -> Option<Notice> {
            self.controller.notifier().current()
        }
    }

    #[tokio::test]
    async fn test_encode_needs_file_and_message() {
        let fx = Fixture::new(Mode::Encode, ScriptedApi::new(Reply::Image(vec![1])));
        let c = &fx.controller;
        assert_eq!(c.state(), OperationState::Idle);

        c.on_file_offered(fx.image("cat.png", 10)).unwrap();
        assert_eq!(c.state(), OperationState::Idle);
        assert!(!c.can_submit());

        assert_eq!(c.set_message("hello"), OperationState::AwaitingInput);
        assert!(c.can_submit());

        assert_eq!(c.set_message("   "), OperationState::Idle);
        assert_eq!(c.submit().await, Outcome::Rejected(OperationState::Idle));
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_decode_ready_with_file_alone() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(None)));
        assert_eq!(
            fx.controller.on_file_offered(fx.image("cat.bmp", 10)),
            Ok(OperationState::AwaitingInput)
        );
        assert_eq!(fx.controller.set_message("ignored"), OperationState::AwaitingInput);
        assert_eq!(fx.controller.message(), "");
    }

    #[tokio::test]
    async fn test_invalid_file_never_reaches_service() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(None)));
        let c = &fx.controller;

        let err = c.on_file_offered(fx.image("anim.gif", 10)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType(_)));
        assert_eq!(c.state(), OperationState::Idle);
        assert_eq!(fx.notice().unwrap().kind, NoticeKind::Error);

        assert_eq!(c.submit().await, Outcome::Rejected(OperationState::Idle));
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_file_keeps_previous_selection() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(None)));
        let c = &fx.controller;
        c.on_file_offered(fx.image("good.png", 10)).unwrap();

        let mut big = fx.image("big.png", 10);
        big.byte_size = 17 * 1024 * 1024;
        assert!(matches!(
            c.on_file_offered(big),
            Err(ValidationError::TooLarge { .. })
        ));

        assert_eq!(c.selection().unwrap().file.name, "good.png");
        assert_eq!(c.state(), OperationState::AwaitingInput);
    }

    #[tokio::test]
    async fn test_selection_that_grew_past_ceiling_is_dropped() {
        let api = ScriptedApi::new(Reply::Text(Some("x".into())));
        let fx = Fixture::with_max(Mode::Decode, api, 1024);
        let c = &fx.controller;
        assert_eq!(c.on_file_offered(fx.image("big.png", 0)), Ok(OperationState::AwaitingInput));

        let grown = fx.image("big.png", 4096);
        assert_eq!(
            c.on_file_offered(grown),
            Err(ValidationError::TooLarge { size: 4096, max: 1024 })
        );

        assert!(c.selection().is_none());
        assert_eq!(c.state(), OperationState::Idle);
        assert_eq!(c.submit().await, Outcome::Rejected(OperationState::Idle));
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_new_selection_replaces_old() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(None)));
        fx.controller.on_file_offered(fx.image("one.png", 1)).unwrap();
        fx.controller.on_file_offered(fx.image("two.jpg", 1)).unwrap();
        assert_eq!(fx.controller.selection().unwrap().file.name, "two.jpg");
    }

    #[tokio::test]
    async fn test_encode_success_saves_one_download_and_resets() {
        let fx = Fixture::new(Mode::Encode, ScriptedApi::new(Reply::Image(b"stego".to_vec())));
        let c = &fx.controller;
        c.on_file_offered(fx.image("photo.png", 2 * 1024 * 1024)).unwrap();
        c.set_message("hello");

        let outcome = c.submit().await;

        let Outcome::Saved(path) = outcome else {
            panic!("expected a saved image, got {outcome:?}");
        };
        assert_eq!(path.file_name().unwrap(), "stego_photo.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"stego");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);

        assert_eq!(fx.calls(), 1);
        assert_eq!(
            *fx.api.seen.lock().unwrap(),
            vec![("photo.png".to_string(), Some("hello".to_string()))]
        );
        assert_eq!(c.state(), OperationState::Idle);
        assert!(c.selection().is_none());
        assert_eq!(c.message(), "");
        assert!(!c.can_submit());
        assert_eq!(c.notifier().busy(), None);
        assert_eq!(fx.notice().unwrap().kind, NoticeKind::Success);
    }

    #[tokio::test]
    async fn test_encode_failure_notifies_and_resets() {
        let fx = Fixture::new(
            Mode::Encode,
            ScriptedApi::new(Reply::Server(413, "Arquivo muito grande".into())),
        );
        let c = &fx.controller;
        c.on_file_offered(fx.image("photo.png", 10)).unwrap();
        c.set_message("hello");

        assert_eq!(c.submit().await, Outcome::Failed("Arquivo muito grande".into()));
        assert_eq!(
            fx.notice(),
            Some(Notice {
                kind: NoticeKind::Error,
                text: "Arquivo muito grande".into()
            })
        );
        assert_eq!(c.state(), OperationState::Idle);
        assert_eq!(c.message(), "");
        assert_eq!(c.notifier().busy(), None);
    }

    #[tokio::test]
    async fn test_decode_reveals_text() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(Some("hi".into()))));
        fx.controller.on_file_offered(fx.image("s.png", 10)).unwrap();

        assert_eq!(fx.controller.submit().await, Outcome::Revealed("hi".into()));
        assert_eq!(fx.output.revealed(), Some(Revealed::Message("hi".into())));
        assert_eq!(fx.controller.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_decode_empty_result_is_not_an_error() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Text(None)));
        fx.controller.on_file_offered(fx.image("s.png", 10)).unwrap();

        assert_eq!(fx.controller.submit().await, Outcome::NothingHidden);
        assert_eq!(fx.output.revealed(), Some(Revealed::NothingHidden));
        assert_eq!(fx.notice().unwrap().kind, NoticeKind::Info);
    }

    #[tokio::test]
    async fn test_decode_failure_clears_revealed_text() {
        let fx = Fixture::new(
            Mode::Decode,
            ScriptedApi::new(Reply::Server(415, "UNSUPPORTED_FORMAT".into())),
        );
        fx.output.show_revealed(Some("old secret"));
        fx.controller.on_file_offered(fx.image("s.png", 10)).unwrap();

        assert_eq!(
            fx.controller.submit().await,
            Outcome::Failed("UNSUPPORTED_FORMAT".into())
        );
        assert_eq!(fx.output.revealed(), None);
        assert_eq!(fx.notice().unwrap().text, "UNSUPPORTED_FORMAT");
        assert_eq!(fx.controller.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_double_submit_makes_one_call() {
        let gate = Arc::new(Notify::new());
        let fx = Fixture::new(
            Mode::Decode,
            ScriptedApi::gated(Reply::Text(Some("hi".into())), gate.clone()),
        );
        let c = &fx.controller;
        c.on_file_offered(fx.image("s.png", 10)).unwrap();

        let (first, second, _) = tokio::join!(c.submit(), c.submit(), async {
            gate.notify_one();
        });

        assert_eq!(first, Outcome::Revealed("hi".into()));
        assert_eq!(second, Outcome::Rejected(OperationState::InFlight));
        assert_eq!(fx.calls(), 1);
        assert_eq!(c.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_inputs_frozen_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let fx = Fixture::new(
            Mode::Encode,
            ScriptedApi::gated(Reply::Image(vec![1]), gate.clone()),
        );
        let c = fx.controller.clone();
        c.on_file_offered(fx.image("a.png", 10)).unwrap();
        c.set_message("hello");

        let task = tokio::spawn({
            let c = c.clone();
            async move { c.submit().await }
        });
        while c.state() != OperationState::InFlight {
            tokio::task::yield_now().await;
        }
        assert_eq!(c.notifier().busy().as_deref(), Some("Hiding message..."));

        assert_eq!(c.on_file_offered(fx.image("b.png", 10)), Ok(OperationState::InFlight));
        assert_eq!(c.set_message("other"), OperationState::InFlight);
        assert_eq!(c.clear(), OperationState::InFlight);
        assert_eq!(c.selection().unwrap().file.name, "a.png");

        gate.notify_one();
        assert!(task.await.unwrap().is_success());
        assert_eq!(c.notifier().busy(), None);
    }

    #[tokio::test]
    async fn test_panic_in_flight_leaves_controller_idle() {
        let fx = Fixture::new(Mode::Decode, ScriptedApi::new(Reply::Panic));
        let c = fx.controller.clone();
        c.on_file_offered(fx.image("s.png", 10)).unwrap();

        let joined = tokio::spawn({
            let c = c.clone();
            async move { c.submit().await }
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(c.state(), OperationState::Idle);
        assert_eq!(c.notifier().busy(), None);
    }

    #[tokio::test]
    async fn test_clear_returns_to_idle() {
        let fx = Fixture::new(Mode::Encode, ScriptedApi::new(Reply::Image(vec![])));
        let c = &fx.controller;
        c.on_file_offered(fx.image("a.jpeg", 10)).unwrap();
        c.set_message("hello");
        assert!(c.can_submit());

        assert_eq!(c.clear(), OperationState::Idle);
        assert!(c.selection().is_none());
        assert_eq!(c.message(), "");
    }
}
