use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::{IOPin, OutputPin},
        modem::Modem,
        prelude::Peripherals,
    },
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use lumen_common::{
    check_power_on_reset,
    device::{self, AP_GATEWAY, AP_NET_IP, AP_SUBNET},
    poll_controls,
    schedule::localize,
    web::{self, ActionOutcome, FormAction, PageContext},
    ClockTime, ConfigStore, ConnectivityMode, ControlEvent, ControlInputs, LightStatus,
    LoadOutcome, MonotonicTimer, NvMedium, RuntimeState, StoreError, SystemClock, TickSource,
    TimerOutcome, TimerTask, WallClock,
};

const NVS_NAMESPACE: &str = "lumen";
const NVS_SETTINGS_KEY: &str = "settings";
const MAX_HTTP_BODY: usize = 2048;
const STA_JOIN_TIMEOUT_MS: u32 = 15_000;
const STA_POLL_MS: u64 = 100;
const BUTTON_POLL_MS: u64 = 20;
const CONTROL_LOOP_MS: u64 = 50;
const RESTART_DELAY_MS: u64 = 2_000;

#[derive(Clone)]
struct SharedState {
    store: Arc<Mutex<ConfigStore<NvsMedium>>>,
    runtime: Arc<RuntimeState>,
    restart_requested: Arc<AtomicBool>,
}

/// Settings image stored as one blob in the default NVS partition.
#[derive(Clone)]
struct NvsMedium {
    partition: EspDefaultNvsPartition,
}

/// `esp_timer` microseconds scaled to milliseconds; wraps after ~49 days.
#[derive(Debug, Clone, Copy, Default)]
struct EspTicks;

impl TickSource for EspTicks {
    fn now_ticks(&self) -> u32 {
        let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
        (micros / 1000) as u32
    }
}

/// Override and restore buttons, both active high with pull-downs.
struct Buttons {
    override_pin: PinDriver<'static, AnyIOPin, Input>,
    reset_pin: PinDriver<'static, AnyIOPin, Input>,
}

impl ControlInputs for Buttons {
    fn override_pressed(&mut self) -> bool {
        self.override_pin.is_high()
    }

    fn reset_pressed(&mut self) -> bool {
        self.reset_pin.is_high()
    }
}

struct LightOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    energized: Option<bool>,
}

impl LightOutput {
    fn apply(&mut self, on: bool) {
        if self.energized == Some(on) {
            return;
        }

        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        match result {
            Ok(()) => {
                info!("light output {}", if on { "energized" } else { "de-energized" });
                self.energized = Some(on);
            }
            Err(err) => warn!("failed to drive light output: {err}"),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let mut light = LightOutput {
        pin: PinDriver::output(pins.gpio5.downgrade_output())
            .context("failed to configure light output")?,
        energized: None,
    };
    let mut buttons = Buttons {
        override_pin: input_button(pins.gpio14.downgrade())
            .context("failed to configure override button")?,
        reset_pin: input_button(pins.gpio13.downgrade())
            .context("failed to configure restore button")?,
    };

    let mut store = ConfigStore::new(NvsMedium {
        partition: nvs_partition.clone(),
    });
    match check_power_on_reset(&mut buttons, &mut store) {
        Some(true) => {}
        Some(false) => warn!("power-on factory reset not saved; running on factory defaults"),
        None => match store.load_or_init() {
            LoadOutcome::Loaded | LoadOutcome::Empty => {}
            LoadOutcome::Corrupt { reset_saved } => {
                warn!("stored settings were corrupt; factory defaults restored (saved: {reset_saved})");
            }
            LoadOutcome::ReadFailed => warn!("running on factory defaults; NVS unreadable"),
        },
    }
    ensure_wifi_defaults(&mut store);
    light.apply(store.is_lights_on());

    let timer = MonotonicTimer::new(EspTicks);
    let (wifi, runtime) = start_wifi(modem, sys_loop, nvs_partition, &store, &timer)
        .context("wifi startup failed")?;

    let _sntp = match runtime.mode {
        ConnectivityMode::Station => {
            let sntp = EspSntp::new_default().context("failed to start SNTP")?;
            info!("SNTP initialized");
            Some(sntp)
        }
        ConnectivityMode::AccessPoint => None,
    };

    let shared_state = SharedState {
        store: Arc::new(Mutex::new(store)),
        runtime: Arc::new(runtime),
        restart_requested: Arc::new(AtomicBool::new(false)),
    };

    let server = create_http_server(shared_state.clone())?;
    spawn_control_loop(shared_state, buttons, light, timer)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn input_button(pin: AnyIOPin) -> anyhow::Result<PinDriver<'static, AnyIOPin, Input>> {
    let mut driver = PinDriver::input(pin)?;
    driver.set_pull(Pull::Down)?;
    Ok(driver)
}

/// Seeds station credentials from the build environment while the stored
/// ones are still factory placeholders.
fn ensure_wifi_defaults(store: &mut ConfigStore<NvsMedium>) {
    if store.has_station_credentials() {
        return;
    }
    let (Some(ssid), Some(pwd)) = (option_env!("WIFI_SSID"), option_env!("WIFI_PASS")) else {
        return;
    };

    if !store.set_ssid(ssid) || !store.set_pwd(pwd) {
        warn!("build-time wifi credentials do not fit the settings record; ignoring them");
        let (default_ssid, default_pwd) = (store.default_ssid(), store.default_pwd());
        store.set_ssid(default_ssid);
        store.set_pwd(default_pwd);
        return;
    }

    if store.save() {
        info!("seeded station credentials for `{ssid}` from build environment");
    }
}

fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    store: &ConfigStore<NvsMedium>,
    timer: &MonotonicTimer<EspTicks>,
) -> anyhow::Result<(EspWifi<'static>, RuntimeState)> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    let mac = device::format_mac(esp_wifi.sta_netif().get_mac()?);
    let device_id = device::device_id_from_mac(&mac);
    let hostname = device::hostname(&device_id);
    if let Err(err) = esp_wifi.sta_netif_mut().set_hostname(&hostname) {
        warn!("failed to set hostname `{hostname}`: {err}");
    }
    info!("device id {device_id} (mac {mac})");

    esp_wifi
        .swap_netif_ap(build_ap_netif()?)
        .context("failed to apply AP netif configuration")?;

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if store.has_station_credentials() {
        if join_station(&mut wifi, store.ssid(), store.pwd(), timer)? {
            return Ok((
                esp_wifi,
                RuntimeState::new(device_id, ConnectivityMode::Station),
            ));
        }
        warn!("could not join `{}`; falling back to AP mode", store.ssid());
    } else {
        info!("no station credentials configured; starting AP mode");
    }

    start_access_point(&mut wifi, &device::ap_ssid(&device_id), store.ap_pwd())?;
    Ok((
        esp_wifi,
        RuntimeState::new(device_id, ConnectivityMode::AccessPoint),
    ))
}

/// Joins the configured network, giving up after [`STA_JOIN_TIMEOUT_MS`].
fn join_station(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    ssid: &str,
    pwd: &str,
    timer: &MonotonicTimer<EspTicks>,
) -> anyhow::Result<bool> {
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pwd
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");
    if let Err(err) = wifi.wifi_mut().connect() {
        warn!("wifi connect request failed: {err}");
    }

    let joined = timer.wait_until(
        STA_JOIN_TIMEOUT_MS,
        || wifi.is_up().unwrap_or(false),
        || thread::sleep(Duration::from_millis(STA_POLL_MS)),
    );
    info!("wifi connection was {}", if joined { "successful" } else { "a failure" });

    if !joined {
        let _ = wifi.disconnect();
        let _ = wifi.stop();
    }
    Ok(joined)
}

fn build_ap_netif() -> anyhow::Result<EspNetif> {
    let mask = Mask::try_from(AP_SUBNET).map_err(|_| anyhow!("invalid AP subnet mask: {AP_SUBNET}"))?;
    let conf = NetifConfiguration {
        ip_configuration: Some(IpConfiguration::Router(RouterConfiguration {
            subnet: Subnet {
                gateway: AP_NET_IP,
                mask,
            },
            dhcp_enabled: true,
            dns: None,
            secondary_dns: None,
        })),
        ..NetifConfiguration::wifi_default_router()
    };

    Ok(EspNetif::new_with_conf(&conf)?)
}

fn start_access_point(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    ssid: &str,
    password: &str,
) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("AP SSID too long"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("AP password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("AP `{ssid}` up: ip {AP_NET_IP}, gateway {AP_GATEWAY}, subnet {AP_SUBNET}");
    Ok(())
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 12 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            respond(&state, req, FormAction::Show)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Post, move |mut req| {
            let fields = read_form(&mut req)?;
            respond(&state, req, FormAction::parse(&fields))
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/admin", Method::Get, move |req| {
            let query = req
                .uri()
                .split_once('?')
                .map(|(_, query)| query.to_string())
                .unwrap_or_default();
            let params = web::parse_urlencoded(&query);
            respond(&state, req, FormAction::open_admin(&params))
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/admin", Method::Post, move |mut req| {
            let fields = read_form(&mut req)?;
            respond(&state, req, FormAction::parse(&fields))
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            let status = {
                let store = lock_store(&state);
                LightStatus::capture(&*store, &state.runtime, local_time(&store))
            };
            write_json(req, &status)
        })?;
    }

    // Anything else falls back to the main page; registered last.
    server.fn_handler::<anyhow::Error, _>("/*", Method::Get, move |req| {
        respond(&state, req, FormAction::Show)
    })?;

    Ok(server)
}

fn respond(
    state: &SharedState,
    req: Request<&mut EspHttpConnection<'_>>,
    action: FormAction,
) -> anyhow::Result<()> {
    let (html, restart) = {
        let mut store = lock_store(state);
        let outcome = web::handle_action(&mut *store, &action);
        let context = PageContext {
            runtime: &state.runtime,
            local_time: local_time(&store),
        };
        (
            web::render(&outcome, &*store, &context),
            matches!(outcome, ActionOutcome::Reboot { .. }),
        )
    };

    write_html(req, &html)?;
    if restart {
        info!("restart requested from web UI");
        state.restart_requested.store(true, Ordering::Relaxed);
    }
    Ok(())
}

fn spawn_control_loop(
    state: SharedState,
    mut buttons: Buttons,
    mut light: LightOutput,
    timer: MonotonicTimer<EspTicks>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            let clock = SystemClock::default();
            let mut timer_task = TimerTask::new();

            loop {
                let outcome = timer_task.tick(&mut *lock_store(&state), state.runtime.mode, &clock);
                if let TimerOutcome::Switched {
                    persisted: false, ..
                } = outcome
                {
                    warn!("scheduled switch not persisted; continuing on in-memory state");
                }

                let event = poll_controls(&mut buttons, || lock_store(&state), &timer, || {
                    thread::sleep(Duration::from_millis(BUTTON_POLL_MS))
                });
                let lights_on = lock_store(&state).is_lights_on();
                light.apply(lights_on);

                match event {
                    ControlEvent::None => {}
                    ControlEvent::Toggled { on, persisted } => {
                        info!("override button switched lights {}", if on { "on" } else { "off" });
                        if !persisted {
                            warn!("override state not persisted");
                        }
                    }
                    ControlEvent::FactoryReset { .. } => {
                        state.restart_requested.store(true, Ordering::Relaxed);
                    }
                }

                if state.restart_requested.load(Ordering::Relaxed) {
                    warn!("restarting in {RESTART_DELAY_MS}ms");
                    thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
                    unsafe { esp_idf_svc::sys::esp_restart() };
                }

                thread::sleep(Duration::from_millis(CONTROL_LOOP_MS));
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn lock_store(state: &SharedState) -> MutexGuard<'_, ConfigStore<NvsMedium>> {
    state.store.lock().unwrap_or_else(PoisonError::into_inner)
}

fn local_time(store: &ConfigStore<NvsMedium>) -> Option<ClockTime> {
    SystemClock::default()
        .utc_now()
        .map(|utc| localize(utc, store.tz_offset(), store.is_dst()))
}

fn read_form(
    req: &mut Request<&mut EspHttpConnection<'_>>,
) -> anyhow::Result<Vec<(String, String)>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    let body = std::str::from_utf8(&body).context("form body is not UTF-8")?;
    Ok(web::parse_urlencoded(body))
}

fn write_html(req: Request<&mut EspHttpConnection<'_>>, html: &str) -> anyhow::Result<()> {
    req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
        .write_all(html.as_bytes())?;
    Ok(())
}

fn write_json<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

impl NvsMedium {
    fn open(&self) -> Result<EspNvs<NvsDefault>, StoreError> {
        EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true).map_err(StoreError::medium)
    }
}

impl NvMedium for NvsMedium {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let nvs = self.open()?;
        let Some(len) = nvs.blob_len(NVS_SETTINGS_KEY).map_err(StoreError::medium)? else {
            return Ok(None);
        };

        let mut buffer = vec![0_u8; len];
        let image = nvs
            .get_blob(NVS_SETTINGS_KEY, &mut buffer)
            .map_err(StoreError::medium)?;
        Ok(image.map(<[u8]>::to_vec))
    }

    fn write(&mut self, image: &[u8]) -> Result<(), StoreError> {
        let mut nvs = self.open()?;
        nvs.set_blob(NVS_SETTINGS_KEY, image)
            .map_err(StoreError::medium)
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        let mut nvs = self.open()?;
        nvs.remove(NVS_SETTINGS_KEY).map_err(StoreError::medium)?;
        Ok(())
    }
}
