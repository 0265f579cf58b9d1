//! The agent session: one task owns all state and handles inputs one at a
//! time. Anything slow (HTTP, timers, the channel itself) runs in spawned
//! tasks that report back through the inbox.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broadcast::{BroadcastHub, HubEvent};
use super::connection::{ConnectionEffect, ConnectionManager};
use super::download_coordinator::{decide, DownloadCoordinator, InterceptDecision, DEFAULT_FOLDER};
use super::icon_animation::{AnimationEffect, IconAnimator, IconPainter};
use super::messages::{LocalRequest, LocalResponse};
use crate::api::{ApiError, DownloadAction, ServerClient};
use crate::browser::{Badge, BrowserServices, ContextMenuClick, NativeDownload};
use crate::channel::{ChannelConnector, ChannelEvent, ChannelHandle, ChannelSink, ServerMessage};
use crate::config::{AgentSettings, SettingsStore};
use crate::domain::{AppError, InterceptPolicy};
use crate::icon;

#[derive(Debug)]
pub enum AgentInput {
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    ReconnectTimer {
        token: u64,
    },
    AnimationTick,
    NativeDownloadCreated(NativeDownload),
    ContextMenuClicked(ContextMenuClick),
    Local {
        request: LocalRequest,
        reply: oneshot::Sender<LocalResponse>,
    },
}

/// Cheap, cloneable way in to a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    inbox: mpsc::UnboundedSender<AgentInput>,
    events: broadcast::Sender<HubEvent>,
}

impl AgentHandle {
    pub async fn request(&self, request: LocalRequest) -> Result<LocalResponse, AppError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(AgentInput::Local { request, reply })
            .map_err(|_| AppError::Shutdown)?;
        response.await.map_err(|_| AppError::Shutdown)
    }

    pub fn native_download_created(&self, item: NativeDownload) -> Result<(), AppError> {
        self.inbox
            .send(AgentInput::NativeDownloadCreated(item))
            .map_err(|_| AppError::Shutdown)
    }

    pub fn context_menu_clicked(&self, click: ContextMenuClick) -> Result<(), AppError> {
        self.inbox
            .send(AgentInput::ContextMenuClicked(click))
            .map_err(|_| AppError::Shutdown)
    }

    /// Push events from now on. Earlier state comes from `get_snapshot`.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone)]
enum ServerCommand {
    Mutate { id: String, action: DownloadAction },
    Delete { id: String, delete_file: Option<bool> },
    PauseAll,
    ResumeAll,
}

impl ServerCommand {
    async fn run(&self, client: &ServerClient) -> Result<(), ApiError> {
        match self {
            ServerCommand::Mutate { id, action } => client.mutate_download(id, *action).await,
            ServerCommand::Delete { id, delete_file } => {
                client.delete_download(id, *delete_file).await
            }
            ServerCommand::PauseAll => client.pause_all().await,
            ServerCommand::ResumeAll => client.resume_all().await,
        }
    }
}

pub struct Agent {
    connection: ConnectionManager,
    hub: BroadcastHub,
    animator: IconAnimator,
    painter: IconPainter,
    coordinator: DownloadCoordinator,
    browser: BrowserServices,
    settings: Arc<dyn SettingsStore>,
    policy: InterceptPolicy,
    client: Option<ServerClient>,
    connector: Arc<dyn ChannelConnector>,
    channel: Option<ChannelHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    animation_timer: Option<JoinHandle<()>>,
    inbox: mpsc::UnboundedSender<AgentInput>,
}

impl Agent {
    /// Loads settings, connects, and starts the session task.
    pub fn spawn(
        settings: Arc<dyn SettingsStore>,
        browser: BrowserServices,
        connector: Arc<dyn ChannelConnector>,
    ) -> (AgentHandle, JoinHandle<()>) {
        let (inbox, rx) = mpsc::unbounded_channel();

        let initial = load_settings(settings.as_ref());
        let base_icon = initial
            .base_icon_path
            .as_deref()
            .and_then(icon::load_base_artwork);

        let mut agent = Agent {
            connection: ConnectionManager::new(initial.reconnect_policy()),
            hub: BroadcastHub::new(),
            animator: IconAnimator::new(),
            painter: IconPainter::new(base_icon, browser.toolbar.clone()),
            coordinator: DownloadCoordinator::new(browser.clone()),
            browser,
            settings,
            policy: initial.intercept_policy(),
            client: None,
            connector,
            channel: None,
            reconnect_timer: None,
            animation_timer: None,
            inbox: inbox.clone(),
        };
        let handle = AgentHandle {
            inbox,
            events: agent.hub.sender(),
        };

        agent.painter.paint_static();
        agent.browser.toolbar.set_badge(&Badge::DISCONNECTED);
        agent.apply_settings(initial);

        let task = tokio::spawn(agent.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgentInput>) {
        info!("agent started");
        // The agent holds a sender itself, so this only ends on abort
        while let Some(input) = rx.recv().await {
            self.handle(input);
        }
    }

    fn handle(&mut self, input: AgentInput) {
        match input {
            AgentInput::Channel { generation, event } => self.on_channel_event(generation, event),
            AgentInput::ReconnectTimer { token } => {
                self.reconnect_timer = None;
                let effects = self.connection.on_reconnect_timer(token);
                self.apply_connection_effects(effects);
            }
            AgentInput::AnimationTick => {
                if let Some(frame) = self.animator.tick() {
                    self.painter.paint_frame(frame);
                }
            }
            AgentInput::NativeDownloadCreated(item) => self.on_native_download(item),
            AgentInput::ContextMenuClicked(click) => match click.target_url() {
                Some(url) => self.spawn_add_download(url.to_string(), DEFAULT_FOLDER.to_string(), None),
                None => debug!("context menu click without a URL"),
            },
            AgentInput::Local { request, reply } => {
                let response = self.on_local_request(request);
                if reply.send(response).is_err() {
                    debug!("observer went away before the reply");
                }
            }
        }
    }

    fn apply_settings(&mut self, settings: AgentSettings) {
        self.policy = settings.intercept_policy();
        self.connection.set_policy(settings.reconnect_policy());

        let credentials = settings.credentials().unwrap_or_else(|e| {
            error!("ignoring server settings: {}", e);
            None
        });
        self.client = credentials.clone().map(ServerClient::new);
        let effects = self.connection.configure(credentials);
        self.apply_connection_effects(effects);
    }

    fn on_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        let clean = event.is_clean_close();
        let effects = match event {
            ChannelEvent::Opened => self.connection.on_open(generation),
            ChannelEvent::Error(e) => self.connection.on_error(generation, &e),
            ChannelEvent::Closed { code, reason } => {
                debug!(generation, ?code, clean, reason = %reason, "channel closed");
                self.connection.on_close(generation, code)
            }
            ChannelEvent::Message(text) => {
                let (effects, message) = self.connection.on_message(generation, &text);
                self.apply_connection_effects(effects);
                if let Some(message) = message {
                    self.on_server_message(message);
                }
                return;
            }
        };
        self.apply_connection_effects(effects);
    }

    fn on_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Status {
                downloads,
                global_paused,
            } => {
                let any_active = self.hub.apply_status(downloads, global_paused);
                self.reevaluate_animation(any_active);
            }
            ServerMessage::SettingsUpdate { settings } => self.hub.apply_settings(settings),
            // Consumed by the connection manager
            ServerMessage::AuthError { .. } => {}
        }
    }

    fn apply_connection_effects(&mut self, effects: Vec<ConnectionEffect>) {
        for effect in effects {
            match effect {
                ConnectionEffect::OpenChannel { generation, url } => {
                    if let Some(previous) = self.channel.take() {
                        previous.close();
                    }
                    let inbox = self.inbox.clone();
                    let sink = ChannelSink::new(
                        generation,
                        Arc::new(move |generation, event| {
                            let _ = inbox.send(AgentInput::Channel { generation, event });
                        }),
                    );
                    self.channel = Some(self.connector.open(url, sink));
                }
                ConnectionEffect::CloseChannel => {
                    if let Some(channel) = self.channel.take() {
                        channel.close();
                    }
                }
                ConnectionEffect::ScheduleReconnect { token, delay } => {
                    self.cancel_reconnect_timer();
                    info!(
                        attempt = self.connection.reconnect_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    let inbox = self.inbox.clone();
                    self.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = inbox.send(AgentInput::ReconnectTimer { token });
                    }));
                }
                ConnectionEffect::CancelReconnect => self.cancel_reconnect_timer(),
                ConnectionEffect::StateChanged(state) => {
                    self.browser
                        .toolbar
                        .set_badge(&Badge::for_connection(state.is_connected()));
                    self.hub.set_connection(state);
                    self.reevaluate_animation(self.hub.any_active());
                }
                ConnectionEffect::Notify { title, message } => {
                    self.browser.notifier.notify(title, &message)
                }
            }
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn reevaluate_animation(&mut self, any_active: bool) {
        let effects = self.animator.evaluate(
            any_active,
            self.hub.global_paused(),
            self.connection.state().is_connected(),
        );
        for effect in effects {
            match effect {
                AnimationEffect::StartTimer { period } => {
                    if let Some(timer) = self.animation_timer.take() {
                        timer.abort();
                    }
                    let inbox = self.inbox.clone();
                    self.animation_timer = Some(tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(period);
                        // First tick completes immediately; frame 0 is already painted
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            if inbox.send(AgentInput::AnimationTick).is_err() {
                                break;
                            }
                        }
                    }));
                }
                AnimationEffect::StopTimer => {
                    if let Some(timer) = self.animation_timer.take() {
                        timer.abort();
                    }
                }
                AnimationEffect::RenderFrame(frame) => self.painter.paint_frame(frame),
                AnimationEffect::RestoreStatic => self.painter.paint_static(),
            }
        }
    }

    fn on_native_download(&mut self, item: NativeDownload) {
        match decide(&item.url, self.policy) {
            InterceptDecision::AllowTransient => {
                debug!(id = item.id, "in-browser URL, leaving download to the browser")
            }
            InterceptDecision::AllowDisabled => {
                debug!(id = item.id, "interception disabled, leaving download to the browser")
            }
            InterceptDecision::Intercept => {
                let coordinator = self.coordinator.clone();
                let client = self.client.clone();
                tokio::spawn(async move {
                    coordinator.intercept(item, client).await;
                });
            }
        }
    }

    fn spawn_add_download(&self, url: String, folder: String, filename: Option<String>) {
        let coordinator = self.coordinator.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            coordinator
                .add_download(&url, &folder, filename.as_deref(), client)
                .await;
        });
    }

    /// Forwards a mutation verbatim. Local state only changes on the next push.
    fn spawn_command(&self, command: ServerCommand) -> bool {
        let Some(client) = self.client.clone() else {
            warn!(?command, "cannot send command: not configured");
            return false;
        };
        let notifier = self.browser.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = command.run(&client).await {
                warn!(?command, "command failed: {}", e);
                match e {
                    ApiError::Unauthorized => notifier.notify("Authentication failed", "Invalid API key"),
                    ApiError::RequestError(_) => notifier.notify("Connection failed", "Cannot reach server"),
                    other => notifier.notify(
                        "Request failed",
                        &other.server_message().unwrap_or_else(|| other.to_string()),
                    ),
                }
            }
        });
        true
    }

    fn on_local_request(&mut self, request: LocalRequest) -> LocalResponse {
        match request {
            LocalRequest::GetConnectionStatus => {
                let state = self.hub.connection();
                LocalResponse::ConnectionStatus {
                    connected: state.is_connected(),
                    state,
                }
            }
            LocalRequest::GetDownloads => LocalResponse::Downloads {
                downloads: self.hub.downloads().to_vec(),
                global_paused: self.hub.global_paused(),
            },
            LocalRequest::GetSnapshot => LocalResponse::Snapshot(self.hub.snapshot()),
            LocalRequest::AddDownload {
                url,
                folder,
                filename,
            } => {
                self.spawn_add_download(url, folder, filename);
                LocalResponse::ack(true)
            }
            LocalRequest::PauseDownload { id } => LocalResponse::ack(self.spawn_command(
                ServerCommand::Mutate {
                    id,
                    action: DownloadAction::Pause,
                },
            )),
            LocalRequest::ResumeDownload { id } => LocalResponse::ack(self.spawn_command(
                ServerCommand::Mutate {
                    id,
                    action: DownloadAction::Resume,
                },
            )),
            LocalRequest::CancelDownload { id, delete_file } => {
                LocalResponse::ack(self.spawn_command(ServerCommand::Delete { id, delete_file }))
            }
            LocalRequest::PauseAllDownloads => {
                LocalResponse::ack(self.spawn_command(ServerCommand::PauseAll))
            }
            LocalRequest::ResumeAllDownloads => {
                LocalResponse::ack(self.spawn_command(ServerCommand::ResumeAll))
            }
            LocalRequest::InterceptSettingChanged { enabled } => {
                info!(enabled, "intercept setting changed");
                self.policy.enabled = enabled;
                let persisted = self
                    .settings
                    .update(&mut |settings| settings.intercept_enabled = enabled);
                if let Err(e) = &persisted {
                    warn!("intercept setting not persisted: {}", e);
                }
                LocalResponse::ack(persisted.is_ok())
            }
            LocalRequest::SettingsUpdated => {
                info!("settings changed, reconnecting");
                let settings = load_settings(self.settings.as_ref());
                self.apply_settings(settings);
                LocalResponse::ack(true)
            }
            LocalRequest::DownloadToFolder { url } => {
                self.browser.pending.set_pending_download_url(url);
                LocalResponse::ack(true)
            }
            LocalRequest::TakePendingDownload => LocalResponse::PendingDownload {
                url: self.browser.pending.take_pending_download_url(),
            },
        }
    }
}

fn load_settings(store: &dyn SettingsStore) -> AgentSettings {
    store.load().unwrap_or_else(|e| {
        error!("failed to load settings, using defaults: {}", e);
        AgentSettings::default()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::application::icon_animation::FRAME_PERIOD;
    use crate::browser::headless::MemoryPendingStore;
    use crate::browser::testing::{
        MapCookieJar, RecordingDownloads, RecordingNotifier, RecordingToolbar,
    };
    use crate::config::testing::MemorySettings;
    use crate::domain::ConnectionState;
    use crate::icon::IconImage;

    #[derive(Default)]
    struct FakeConnector {
        opened: Mutex<Vec<(Url, ChannelSink)>>,
    }

    impl FakeConnector {
        fn opens(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn latest(&self) -> ChannelSink {
            self.opened.lock().unwrap().last().unwrap().1.clone()
        }

        fn latest_url(&self) -> Url {
            self.opened.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl ChannelConnector for FakeConnector {
        fn open(&self, url: Url, sink: ChannelSink) -> ChannelHandle {
            self.opened.lock().unwrap().push((url, sink));
            ChannelHandle::detached()
        }
    }

    struct Harness {
        handle: AgentHandle,
        connector: Arc<FakeConnector>,
        settings: Arc<MemorySettings>,
        downloads: Arc<RecordingDownloads>,
        notifier: Arc<RecordingNotifier>,
        toolbar: Arc<RecordingToolbar>,
    }

    impl Harness {
        /// Round-trips a request so every input sent before it has been handled.
        async fn settle(&self) -> LocalResponse {
            self.handle
                .request(LocalRequest::GetConnectionStatus)
                .await
                .unwrap()
        }

        async fn state(&self) -> ConnectionState {
            match self.settle().await {
                LocalResponse::ConnectionStatus { state, .. } => state,
                other => panic!("unexpected {:?}", other),
            }
        }

        async fn push(&self, text: &str) {
            self.connector.latest().emit(ChannelEvent::Message(text.to_string()));
            self.settle().await;
        }
    }

    fn settings(address: &str) -> AgentSettings {
        AgentSettings {
            server_address: Some(address.to_string()),
            api_key: Some("key".to_string()),
            ..Default::default()
        }
    }

    fn harness(initial: AgentSettings) -> Harness {
        let connector = Arc::new(FakeConnector::default());
        let settings = Arc::new(MemorySettings::new(initial));
        let downloads = Arc::new(RecordingDownloads::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let toolbar = Arc::new(RecordingToolbar::default());
        let browser = BrowserServices {
            downloads: downloads.clone(),
            cookies: Arc::new(MapCookieJar {
                by_domain: HashMap::new(),
            }),
            notifier: notifier.clone(),
            toolbar: toolbar.clone(),
            pending: Arc::new(MemoryPendingStore::default()),
            user_agent: "test-agent".to_string(),
        };
        let (handle, _task) = Agent::spawn(settings.clone(), browser, connector.clone());
        Harness {
            handle,
            connector,
            settings,
            downloads,
            notifier,
            toolbar,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    const DOWNLOADING: &str = r#"{"type":"status","global_paused":false,"downloads":[
        {"id":"a","url":"https://a.com/a.iso","filename":"a.iso","folder":"","status":"downloading",
         "progress":{"downloaded_bytes":1,"total_bytes":10,"speed_bps":1}}]}"#;
    const COMPLETED: &str = r#"{"type":"status","global_paused":false,"downloads":[
        {"id":"a","url":"https://a.com/a.iso","filename":"a.iso","folder":"","status":"completed"}]}"#;

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_tracks_state() {
        let h = harness(settings("https://nas.local"));
        assert_eq!(h.state().await, ConnectionState::Connecting);
        assert_eq!(h.connector.opens(), 1);
        assert_eq!(h.connector.latest_url().as_str(), "wss://nas.local/ws?api_key=key");

        let mut events = h.handle.subscribe();
        h.connector.latest().emit(ChannelEvent::Opened);
        assert_eq!(h.state().await, ConnectionState::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            HubEvent::ConnectionStatusChanged {
                connected: true,
                state: ConnectionState::Connected,
            }
        );
        assert_eq!(h.toolbar.badges.lock().unwrap().last(), Some(&Badge::CONNECTED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_animation_follows_status_pushes() {
        let h = harness(settings("http://nas.local"));
        h.connector.latest().emit(ChannelEvent::Opened);
        let static_icon: IconImage = icon::render_static(None).into();
        let first_frame: IconImage = icon::render_frame(None, 0).into();

        h.push(DOWNLOADING).await;
        let icons_after_start = h.toolbar.icons.lock().unwrap().len();
        assert_eq!(h.toolbar.icons.lock().unwrap().last(), Some(&first_frame));

        // A few frame periods later the animation has advanced
        tokio::time::sleep(FRAME_PERIOD * 3).await;
        h.settle().await;
        assert!(h.toolbar.icons.lock().unwrap().len() > icons_after_start);

        h.push(COMPLETED).await;
        assert_eq!(h.toolbar.icons.lock().unwrap().last(), Some(&static_icon));

        // Stopped: no more frames arrive
        let icons_after_stop = h.toolbar.icons.lock().unwrap().len();
        tokio::time::sleep(FRAME_PERIOD * 5).await;
        h.settle().await;
        assert_eq!(h.toolbar.icons.lock().unwrap().len(), icons_after_stop);

        match h.handle.request(LocalRequest::GetSnapshot).await.unwrap() {
            LocalResponse::Snapshot(snapshot) => {
                assert_eq!(snapshot.downloads.len(), 1);
                assert_eq!(snapshot.downloads[0].id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_animation() {
        let h = harness(settings("http://nas.local"));
        h.connector.latest().emit(ChannelEvent::Opened);
        h.push(DOWNLOADING).await;

        h.connector.latest().emit(ChannelEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        });
        h.settle().await;
        let static_icon: IconImage = icon::render_static(None).into();
        assert_eq!(h.toolbar.icons.lock().unwrap().last(), Some(&static_icon));
        assert_eq!(h.toolbar.badges.lock().unwrap().last(), Some(&Badge::DISCONNECTED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let h = harness(settings("http://nas.local"));
        h.connector.latest().emit(ChannelEvent::Opened);
        h.connector.latest().emit(ChannelEvent::Closed {
            code: Some(1006),
            reason: "abnormal".to_string(),
        });
        assert_eq!(h.state().await, ConnectionState::Disconnected);
        assert_eq!(h.notifier.titles(), vec!["Disconnected"]);

        tokio::time::sleep(Duration::from_millis(4900)).await;
        h.settle().await;
        assert_eq!(h.connector.opens(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.state().await, ConnectionState::Connecting);
        assert_eq!(h.connector.opens(), 2);

        // Failed retry: another timer, no second notification
        h.connector.latest().emit(ChannelEvent::Closed {
            code: None,
            reason: String::new(),
        });
        h.settle().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.settle().await;
        assert_eq!(h.connector.opens(), 3);
        assert_eq!(h.notifier.titles(), vec!["Disconnected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_suspends_reconnect_until_settings_change() {
        let h = harness(settings("http://nas.local"));
        h.connector.latest().emit(ChannelEvent::Opened);
        h.push(r#"{"type":"auth_error","message":"Invalid API key"}"#).await;
        assert_eq!(h.state().await, ConnectionState::AuthFailed);
        assert_eq!(h.notifier.titles(), vec!["Authentication failed"]);

        h.connector.latest().emit(ChannelEvent::Closed {
            code: Some(1008),
            reason: String::new(),
        });
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.state().await, ConnectionState::AuthFailed);
        assert_eq!(h.connector.opens(), 1);

        h.settings.replace(settings("http://other.local"));
        h.handle.request(LocalRequest::SettingsUpdated).await.unwrap();
        assert_eq!(h.state().await, ConnectionState::Connecting);
        assert_eq!(h.connector.opens(), 2);
        assert_eq!(h.connector.latest_url().host_str(), Some("other.local"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_push_is_dropped() {
        let h = harness(settings("http://nas.local"));
        h.connector.latest().emit(ChannelEvent::Opened);
        h.push(DOWNLOADING).await;
        h.push(r#"{"type":"status","downloads":"nope"}"#).await;

        assert_eq!(h.state().await, ConnectionState::Connected);
        match h.handle.request(LocalRequest::GetDownloads).await.unwrap() {
            LocalResponse::Downloads { downloads, .. } => assert_eq!(downloads.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interception_respects_policy_and_transient_urls() {
        let h = harness(AgentSettings::default());

        h.handle
            .native_download_created(NativeDownload {
                id: 1,
                url: "blob:https://a.com/uuid".to_string(),
                suggested_filename: None,
            })
            .unwrap();
        h.handle
            .request(LocalRequest::InterceptSettingChanged { enabled: false })
            .await
            .unwrap();
        h.handle
            .native_download_created(NativeDownload {
                id: 2,
                url: "https://a.com/file.zip".to_string(),
                suggested_filename: None,
            })
            .unwrap();
        h.settle().await;
        assert!(h.downloads.cancelled.lock().unwrap().is_empty());
        assert!(!h.settings.load().unwrap().intercept_enabled);

        h.handle
            .request(LocalRequest::InterceptSettingChanged { enabled: true })
            .await
            .unwrap();
        h.handle
            .native_download_created(NativeDownload {
                id: 3,
                url: "https://a.com/file.zip".to_string(),
                suggested_filename: None,
            })
            .unwrap();

        // Not configured: the native download is still taken over, the user is told why
        let notifier = h.notifier.clone();
        wait_for(move || notifier.titles() == vec!["Not configured"]).await;
        assert_eq!(*h.downloads.cancelled.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_unauthorized_create_leaves_state_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/downloads")
            .with_status(401)
            .with_body(r#"{"error":"Invalid API key"}"#)
            .create_async()
            .await;

        let h = harness(settings(&server.url()));
        h.handle
            .request(LocalRequest::AddDownload {
                url: "https://a.com/file.zip".to_string(),
                folder: String::new(),
                filename: None,
            })
            .await
            .unwrap();

        let notifier = h.notifier.clone();
        wait_for(move || notifier.titles().contains(&"Authentication failed".to_string())).await;
        match h.handle.request(LocalRequest::GetSnapshot).await.unwrap() {
            LocalResponse::Snapshot(snapshot) => assert!(snapshot.downloads.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_are_forwarded_without_local_mutation() {
        let mut server = mockito::Server::new_async().await;
        let pause = server
            .mock("PATCH", "/api/downloads/a")
            .match_body(mockito::Matcher::Json(serde_json::json!({"action": "pause"})))
            .with_status(200)
            .create_async()
            .await;
        let pause_all = server
            .mock("POST", "/api/downloads/pause-all")
            .with_status(200)
            .create_async()
            .await;

        let h = harness(settings(&server.url()));
        h.connector.latest().emit(ChannelEvent::Opened);
        h.push(DOWNLOADING).await;

        let response = h
            .handle
            .request(LocalRequest::PauseDownload { id: "a".to_string() })
            .await
            .unwrap();
        assert_eq!(response, LocalResponse::ack(true));
        h.handle.request(LocalRequest::PauseAllDownloads).await.unwrap();

        for _ in 0..200 {
            if pause.matched_async().await && pause_all.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pause.assert_async().await;
        pause_all.assert_async().await;

        // Still "downloading" until the server says otherwise
        match h.handle.request(LocalRequest::GetDownloads).await.unwrap() {
            LocalResponse::Downloads { downloads, .. } => assert!(downloads[0].is_active()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_fan_out_to_subscribers() {
        let h = harness(settings("http://nas.local"));
        let mut events = h.handle.subscribe();

        h.connector.latest().emit(ChannelEvent::Opened);
        h.push(r#"{"type":"settings_update","settings":{"max_concurrent":2}}"#)
            .await;
        h.push(DOWNLOADING).await;

        assert_eq!(
            events.recv().await.unwrap(),
            HubEvent::ConnectionStatusChanged {
                connected: true,
                state: ConnectionState::Connected,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            HubEvent::SettingsUpdated {
                settings: serde_json::json!({"max_concurrent": 2}),
            }
        );
        match events.recv().await.unwrap() {
            HubEvent::DownloadsUpdated {
                downloads,
                global_paused,
            } => {
                assert_eq!(downloads.len(), 1);
                assert_eq!(downloads[0].id, "a");
                assert!(!global_paused);
            }
            other => panic!("unexpected {:?}", other),
        }

        // An observer attaching now catches up through the snapshot
        match h.handle.request(LocalRequest::GetSnapshot).await.unwrap() {
            LocalResponse::Snapshot(snapshot) => {
                assert_eq!(
                    snapshot.settings,
                    Some(serde_json::json!({"max_concurrent": 2}))
                );
                assert_eq!(snapshot.downloads.len(), 1);
                assert!(snapshot.connected);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_and_cancel_are_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let resume = server
            .mock("PATCH", "/api/downloads/a")
            .match_body(mockito::Matcher::Json(serde_json::json!({"action": "resume"})))
            .with_status(200)
            .create_async()
            .await;
        let cancel = server
            .mock("DELETE", "/api/downloads/b")
            .match_query(mockito::Matcher::UrlEncoded(
                "delete_file".into(),
                "true".into(),
            ))
            .with_status(200)
            .create_async()
            .await;
        let resume_all = server
            .mock("POST", "/api/downloads/resume-all")
            .with_status(200)
            .create_async()
            .await;

        let h = harness(settings(&server.url()));
        for request in [
            LocalRequest::ResumeDownload { id: "a".to_string() },
            LocalRequest::CancelDownload {
                id: "b".to_string(),
                delete_file: Some(true),
            },
            LocalRequest::ResumeAllDownloads,
        ] {
            assert_eq!(
                h.handle.request(request).await.unwrap(),
                LocalResponse::ack(true)
            );
        }

        for _ in 0..200 {
            if resume.matched_async().await
                && cancel.matched_async().await
                && resume_all.matched_async().await
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        resume.assert_async().await;
        cancel.assert_async().await;
        resume_all.assert_async().await;
        assert!(h.notifier.titles().is_empty());
    }

    #[tokio::test]
    async fn test_commands_without_settings_are_refused() {
        let h = harness(AgentSettings::default());
        assert_eq!(
            h.handle.request(LocalRequest::ResumeAllDownloads).await.unwrap(),
            LocalResponse::ack(false)
        );
    }

    #[tokio::test]
    async fn test_pending_download_is_handed_out_once() {
        let h = harness(AgentSettings::default());
        h.handle
            .request(LocalRequest::DownloadToFolder {
                url: "https://a.com/x.iso".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            h.handle.request(LocalRequest::TakePendingDownload).await.unwrap(),
            LocalResponse::PendingDownload {
                url: Some("https://a.com/x.iso".to_string())
            }
        );
        assert_eq!(
            h.handle.request(LocalRequest::TakePendingDownload).await.unwrap(),
            LocalResponse::PendingDownload { url: None }
        );
    }
}
