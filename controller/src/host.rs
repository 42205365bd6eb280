use std::{
    fs,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
    Form, Json, Router,
};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use lumen_common::{
    device,
    schedule::localize,
    web::{self, ActionOutcome, FormAction, PageContext},
    ClockTime, ConfigStore, ConnectivityMode, LightStatus, LoadOutcome, MonotonicTimer, NvMedium,
    RuntimeState, StoreError, SystemClock, TickSource, TimerOutcome, TimerTask, WallClock,
};

const SETTINGS_FILE: &str = "settings.bin";
const DEFAULT_MAC: &str = "02:00:00:00:00:01";
const CONTROL_INTERVAL: Duration = Duration::from_secs(1);
const HEARTBEAT_MS: u32 = 60_000;

type FormPairs = Vec<(String, String)>;

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<ConfigStore<FileMedium>>>,
    runtime: Arc<RuntimeState>,
    clock: SystemClock,
}

/// Settings image kept in a single file under the data directory.
#[derive(Debug, Clone)]
struct FileMedium {
    path: PathBuf,
}

/// Milliseconds since process start, truncated to the 32-bit counter width
/// of the device.
#[derive(Debug, Clone, Copy, Default)]
struct HostTicks;

impl TickSource for HostTicks {
    fn now_ticks(&self) -> u32 {
        monotonic_ms() as u32
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("LUMEN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.lumen"));
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let mut store = ConfigStore::new(FileMedium::new(data_dir.join(SETTINGS_FILE)));
    match store.load_or_init() {
        LoadOutcome::Loaded | LoadOutcome::Empty => {}
        LoadOutcome::Corrupt { reset_saved } => {
            warn!("stored settings were corrupt; factory defaults restored (saved: {reset_saved})");
        }
        LoadOutcome::ReadFailed => warn!("running on factory defaults; settings file unreadable"),
    }

    let mac = std::env::var("LUMEN_MAC").unwrap_or_else(|_| DEFAULT_MAC.to_string());
    let device_id = device::device_id_from_mac(&mac);
    let mode = station_mode_from_env(&store);
    info!(
        "device {} ({}) starting in {} mode",
        device_id,
        device::hostname(&device_id),
        mode.as_str()
    );

    let app_state = AppState {
        store: Arc::new(Mutex::new(store)),
        runtime: Arc::new(RuntimeState::new(device_id, mode)),
        clock: SystemClock::default(),
    };

    spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/", get(handle_get_main).post(handle_post_form))
        .route("/admin", get(handle_get_admin).post(handle_post_form))
        .route("/api/status", get(handle_get_status))
        .fallback(handle_get_main)
        .with_state(app_state);

    let port = std::env::var("LUMEN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind lumen server at {addr}"))?;

    info!("lumen listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// There is no radio on the host, so connectivity is whatever the
/// environment says, defaulting to station mode.
fn station_mode_from_env(store: &ConfigStore<FileMedium>) -> ConnectivityMode {
    let station = std::env::var("LUMEN_STATION_MODE")
        .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true);

    if !station {
        return ConnectivityMode::AccessPoint;
    }
    if !store.has_station_credentials() {
        info!("station credentials still at factory placeholders");
    }
    ConnectivityMode::Station
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_INTERVAL);
        let mut timer_task = TimerTask::new();
        let heartbeat = MonotonicTimer::new(HostTicks);
        let mut last_heartbeat = heartbeat.now();
        let mut output: Option<bool> = None;

        loop {
            interval.tick().await;

            let (outcome, lights_on) = {
                let mut store = app_state.store.lock().await;
                let outcome = timer_task.tick(&mut *store, app_state.runtime.mode, &app_state.clock);
                (outcome, store.is_lights_on())
            };

            if let TimerOutcome::Switched {
                persisted: false, ..
            } = outcome
            {
                warn!("scheduled switch not persisted; continuing on in-memory state");
            }

            if output != Some(lights_on) {
                info!("output {}", if lights_on { "energized" } else { "de-energized" });
                output = Some(lights_on);
            }

            if heartbeat.has_elapsed(last_heartbeat, HEARTBEAT_MS) {
                last_heartbeat = heartbeat.now();
                let evaluated = timer_task
                    .evaluator()
                    .last_evaluated()
                    .map(|time| time.to_string())
                    .unwrap_or_else(|| "never".to_string());
                info!("heartbeat: lights_on={lights_on} last_evaluated={evaluated}");
            }
        }
    });
}

async fn handle_get_main(State(state): State<AppState>) -> impl IntoResponse {
    respond(&state, FormAction::Show).await
}

async fn handle_get_admin(
    State(state): State<AppState>,
    Query(params): Query<FormPairs>,
) -> impl IntoResponse {
    respond(&state, FormAction::open_admin(&params)).await
}

async fn handle_post_form(
    State(state): State<AppState>,
    Form(fields): Form<FormPairs>,
) -> impl IntoResponse {
    respond(&state, FormAction::parse(&fields)).await
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.lock().await;
    let local_time = local_time(&store, &state.clock);
    Json(LightStatus::capture(&*store, &state.runtime, local_time))
}

async fn respond(state: &AppState, action: FormAction) -> Html<String> {
    let mut store = state.store.lock().await;
    let outcome = web::handle_action(&mut *store, &action);
    if let ActionOutcome::Reboot { .. } = outcome {
        warn!("restart requested; restart the process to apply the new settings");
    }

    let context = PageContext {
        runtime: &state.runtime,
        local_time: local_time(&store, &state.clock),
    };
    Html(web::render(&outcome, &*store, &context))
}

fn local_time(store: &ConfigStore<FileMedium>, clock: &impl WallClock) -> Option<ClockTime> {
    clock
        .utc_now()
        .map(|utc| localize(utc, store.tz_offset(), store.is_dst()))
}

impl FileMedium {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl NvMedium for FileMedium {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::medium(err)),
        }
    }

    fn write(&mut self, image: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(StoreError::medium)?;
        }
        // Staged write; the rename swaps the image in one step.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, image).map_err(StoreError::medium)?;
        fs::rename(&staging, &self.path).map_err(StoreError::medium)?;
        Ok(())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::medium(err)),
        }
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
