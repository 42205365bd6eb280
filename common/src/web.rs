//! Form actions posted by the web UI and the pages rendered in response.
//!
//! Pages are plain HTML templates with `${name}` placeholders, filled in by
//! [`fill_template`]. Renderers HTML-escape every stored text value.

use log::{info, warn};

use crate::{
    device::FIRMWARE_VERSION,
    schedule::ClockTime,
    settings::{ConfigStore, NvMedium},
    types::{ConnectivityMode, RuntimeState},
};

pub const NOTICE_SAVE_FAILED: &str = "Failed to save settings!";
pub const NOTICE_AUTH_FAILED: &str = "Authentication failed!";
pub const NOTICE_INVALID_TIME: &str = "On and off times must both be valid HH:MM values.";
pub const NOTICE_MISSING_FIELDS: &str = "All fields are required.";
pub const NOTICE_INVALID_SETTINGS: &str = "One or more values are too long or out of range.";
pub const NOTICE_SETTINGS_SAVED: &str = "Settings saved.";
pub const NOTICE_REBOOTING: &str = "Rebooting to apply settings!";
pub const NOTICE_FACTORY_RESET: &str = "Factory defaults restored, rebooting!";

const STYLE: &str = "body { background-color: #FFFFFF; color: #000000; } \
h1 { text-align: center; background-color: #5878B0; color: #FFFFFF; border-radius: 15px; } \
h2 { text-align: center; background-color: #58ADB0; color: #FFFFFF; } \
#wrapper { background-color: #E6EFFF; padding: 20px; margin-left: auto; margin-right: auto; max-width: 700px; box-shadow: 3px 3px 3px #333; } \
#info { font-size: 25px; font-weight: bold; line-height: 150%; } \
button { background-color: #5878B0; color: white; font-size: 16px; padding: 10px 24px; border-radius: 12px; border: 2px solid black; } \
button:hover { background-color: white; color: black; }";

const MAIN_PAGE: &str = r#"<!DOCTYPE HTML>
<html lang="en">
<head><title>${title}</title><style>${style}</style></head>
<body>
<div id="wrapper">
<h1>${heading}</h1>
Firmware Version: ${version}
<div id="info">
${status_message}
<p>Light Status: ${on_off_status}<br>Current Time: ${cur_time}</p>
<form action="/" method="post">
<h3>Timer Control</h3>
<div ${toggle_hidden}>Status: ${timer_on_off} <button type="submit" name="do" value="toggle_timer_state">Toggle</button></div>
<div ${schedule_hide}>
<h4>Schedule</h4>
On at: <input type="time" id="onat" name="onat" value="${on_at}" required>
Off at: <input type="time" id="offat" name="offat" value="${off_at}" required>
<br><button type="submit" name="do" value="btn_update">Update</button>
</div>
<table>
<tr><td>Manual Controls/Override</td></tr>
<tr><td><button type="submit" name="do" value="btn_on">On</button></td><td><button type="submit" name="do" value="btn_off">Off</button></td></tr>
</table>
</form>
<form action="/admin" method="get"><button type="submit">Settings</button></form>
</div>
</div>
</body>
</html>"#;

const LOGIN_PAGE: &str = r#"<!DOCTYPE HTML>
<html lang="en">
<head><title>${title}</title><style>${style}</style></head>
<body>
<div id="wrapper">
<h1>${heading}</h1>
${status_message}
<form action="/admin" method="post">
<h2>Admin Login</h2>
<table>
<tr><td>User:</td><td><input type="text" name="auth_user"></td></tr>
<tr><td>Password:</td><td><input type="password" name="auth_pwd"></td></tr>
</table>
<button type="submit" name="do" value="goto_admin">Login</button>
<button type="submit" name="do" value="admin_exit">Back</button>
</form>
</div>
</body>
</html>"#;

const ADMIN_PAGE: &str = r#"<!DOCTYPE HTML>
<html lang="en">
<head><title>${title}</title><style>${style}</style></head>
<body>
<div id="wrapper">
<h1>${heading}</h1>
Firmware Version: ${version}
${status_message}
<div id="info">
<form method="post" action="/admin">
<input type="hidden" name="auth_user" value="${auth_user}">
<input type="hidden" name="auth_pwd" value="${auth_pwd}">
<h2>Application</h2>
<table>
<tr><td>Title:</td><td><input maxlength="50" type="text" value="${title}" name="title"></td></tr>
<tr><td>Heading:</td><td><input maxlength="50" type="text" value="${heading}" name="heading"></td></tr>
<tr><td>UTC offset (hours):</td><td><input type="number" min="-12" max="14" value="${tz_offset}" name="tzoffset"></td></tr>
<tr><td>Daylight saving:</td><td><input type="checkbox" name="dst" ${dst_checked}></td></tr>
</table>
<h2>WiFi</h2>
<div>Note: Leave these settings at 'SET_ME' to keep device in AP Mode.</div>
<table>
<tr><td>SSID:</td><td><input maxlength="32" type="text" value="${ssid}" name="ssid"></td></tr>
<tr><td>Password:</td><td><input maxlength="63" type="text" value="${pwd}" name="pwd"></td></tr>
<tr><td>AP Password:</td><td><input maxlength="50" type="text" value="${ap_pwd}" name="appwd"></td></tr>
</table>
<h2>Admin</h2>
<table>
<tr><td>Admin User:</td><td><input maxlength="50" type="text" value="${adminuser}" name="adminuser"></td></tr>
<tr><td>Admin Password:</td><td><input maxlength="50" type="text" value="${adminpwd}" name="adminpwd"></td></tr>
</table>
<br>
<button type="submit" name="do" value="admin_save">Save</button>
<button type="submit" name="do" value="admin_exit">Exit</button>
<button type="submit" name="do" value="factory_reset">Factory Reset</button>
</form>
</div>
</div>
</body>
</html>"#;

const REBOOT_PAGE: &str = r#"<!DOCTYPE HTML>
<html lang="en"><head></head><body>${status_message}</body></html>"#;

const STATUS_MESSAGE: &str = r#"<script>alert("${message}");</script>"#;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pwd: String,
}

impl Credentials {
    fn from_form(form: &Form<'_>) -> Self {
        Self {
            user: form.get("auth_user").unwrap_or_default().to_string(),
            pwd: form.get("auth_pwd").unwrap_or_default().to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        self.user.is_empty() && self.pwd.is_empty()
    }
}

/// Fields of the admin form. Empty inputs arrive as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminUpdate {
    pub title: Option<String>,
    pub heading: Option<String>,
    pub ssid: Option<String>,
    pub pwd: Option<String>,
    pub admin_user: Option<String>,
    pub admin_pwd: Option<String>,
    pub ap_pwd: Option<String>,
    pub tz_offset: Option<String>,
    pub dst: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormAction {
    /// Plain page view, no `do` field.
    Show,
    LightsOn,
    LightsOff,
    ToggleTimer,
    UpdateSchedule {
        on_at: Option<String>,
        off_at: Option<String>,
    },
    OpenAdmin(Credentials),
    SaveAdmin {
        auth: Credentials,
        update: AdminUpdate,
    },
    FactoryReset(Credentials),
    ExitAdmin,
    Unknown(String),
}

impl FormAction {
    /// Decodes the action named by the `do` field. The first occurrence of a
    /// key wins.
    pub fn parse<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Self {
        let form = Form::new(pairs);
        let Some(action) = form.get("do") else {
            return Self::Show;
        };

        match action {
            "btn_on" => Self::LightsOn,
            "btn_off" => Self::LightsOff,
            "toggle_timer_state" => Self::ToggleTimer,
            "btn_update" => Self::UpdateSchedule {
                on_at: form.non_empty("onat"),
                off_at: form.non_empty("offat"),
            },
            "goto_admin" => Self::OpenAdmin(Credentials::from_form(&form)),
            "admin_save" => Self::SaveAdmin {
                auth: Credentials::from_form(&form),
                update: AdminUpdate {
                    title: form.non_empty("title"),
                    heading: form.non_empty("heading"),
                    ssid: form.non_empty("ssid"),
                    pwd: form.non_empty("pwd"),
                    admin_user: form.non_empty("adminuser"),
                    admin_pwd: form.non_empty("adminpwd"),
                    ap_pwd: form.non_empty("appwd"),
                    tz_offset: form.non_empty("tzoffset"),
                    dst: form.get("dst").is_some(),
                },
            },
            "factory_reset" => Self::FactoryReset(Credentials::from_form(&form)),
            "admin_exit" => Self::ExitAdmin,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The admin page requested directly (`/admin`), with whatever login
    /// fields the request carried.
    pub fn open_admin<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Self {
        Self::OpenAdmin(Credentials::from_form(&Form::new(pairs)))
    }
}

struct Form<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Form<'a> {
    fn new<K: AsRef<str>, V: AsRef<str>>(pairs: &'a [(K, V)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(key, value)| (key.as_ref(), value.as_ref()))
                .collect(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Main,
    Admin,
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Render {
        page: Page,
        notice: Option<&'static str>,
    },
    /// Settings changed in a way that only takes effect after a restart.
    Reboot { notice: &'static str },
}

impl ActionOutcome {
    fn page(page: Page) -> Self {
        Self::Render { page, notice: None }
    }

    fn notice(page: Page, notice: &'static str) -> Self {
        Self::Render {
            page,
            notice: Some(notice),
        }
    }
}

/// Applies one form action to the store. Every successful mutation is saved
/// before this returns.
pub fn handle_action<M: NvMedium>(store: &mut ConfigStore<M>, action: &FormAction) -> ActionOutcome {
    match action {
        FormAction::Show | FormAction::ExitAdmin => ActionOutcome::page(Page::Main),
        FormAction::Unknown(name) => {
            warn!("ignoring unknown form action `{name}`");
            ActionOutcome::page(Page::Main)
        }
        FormAction::LightsOn => switch_lights(store, true),
        FormAction::LightsOff => switch_lights(store, false),
        FormAction::ToggleTimer => {
            store.set_timer_on(!store.is_timer_on());
            info!("timer {}", if store.is_timer_on() { "enabled" } else { "disabled" });
            persist(store, Page::Main, None)
        }
        FormAction::UpdateSchedule { on_at, off_at } => {
            update_schedule(store, on_at.as_deref(), off_at.as_deref())
        }
        FormAction::OpenAdmin(auth) => match authorize(store, auth) {
            Ok(()) => ActionOutcome::page(Page::Admin),
            Err(outcome) => outcome,
        },
        FormAction::SaveAdmin { auth, update } => match authorize(store, auth) {
            Ok(()) => save_admin(store, update),
            Err(outcome) => outcome,
        },
        FormAction::FactoryReset(auth) => match authorize(store, auth) {
            Ok(()) => {
                warn!("factory reset requested from web UI");
                if store.factory_reset() {
                    ActionOutcome::Reboot {
                        notice: NOTICE_FACTORY_RESET,
                    }
                } else {
                    ActionOutcome::notice(Page::Admin, NOTICE_SAVE_FAILED)
                }
            }
            Err(outcome) => outcome,
        },
    }
}

fn switch_lights<M: NvMedium>(store: &mut ConfigStore<M>, on: bool) -> ActionOutcome {
    if store.is_lights_on() == on {
        return ActionOutcome::page(Page::Main);
    }
    store.set_lights_on(on);
    info!("lights switched {} from web UI", if on { "on" } else { "off" });
    persist(store, Page::Main, None)
}

fn update_schedule<M: NvMedium>(
    store: &mut ConfigStore<M>,
    on_at: Option<&str>,
    off_at: Option<&str>,
) -> ActionOutcome {
    let (Some(on_at), Some(off_at)) = (on_at, off_at) else {
        return ActionOutcome::notice(Page::Main, NOTICE_INVALID_TIME);
    };
    let (Ok(on), Ok(off)) = (ClockTime::parse(on_at), ClockTime::parse(off_at)) else {
        warn!("rejecting schedule update `{on_at}`-`{off_at}`");
        return ActionOutcome::notice(Page::Main, NOTICE_INVALID_TIME);
    };

    store.set_on_time(on);
    store.set_off_time(off);
    info!("schedule updated: on at {on}, off at {off}");
    persist(store, Page::Main, None)
}

fn save_admin<M: NvMedium>(store: &mut ConfigStore<M>, update: &AdminUpdate) -> ActionOutcome {
    let (Some(title), Some(heading), Some(ssid), Some(pwd), Some(admin_user), Some(admin_pwd)) = (
        update.title.as_deref(),
        update.heading.as_deref(),
        update.ssid.as_deref(),
        update.pwd.as_deref(),
        update.admin_user.as_deref(),
        update.admin_pwd.as_deref(),
    ) else {
        return ActionOutcome::notice(Page::Admin, NOTICE_MISSING_FIELDS);
    };

    let tz_offset = match update.tz_offset.as_deref() {
        None => store.tz_offset(),
        Some(raw) => match raw.trim().parse::<i32>() {
            Ok(hours) => hours,
            Err(_) => return ActionOutcome::notice(Page::Admin, NOTICE_INVALID_SETTINGS),
        },
    };
    let ap_pwd = update.ap_pwd.as_deref();

    let needs_reboot = ssid != store.ssid()
        || pwd != store.pwd()
        || ap_pwd.is_some_and(|ap_pwd| ap_pwd != store.ap_pwd());

    let previous = *store.config();
    let applied = store.set_title(title)
        && store.set_heading(heading)
        && store.set_ssid(ssid)
        && store.set_pwd(pwd)
        && store.set_admin_user(admin_user)
        && store.set_admin_pwd(admin_pwd)
        && ap_pwd.map_or(true, |ap_pwd| store.set_ap_pwd(ap_pwd))
        && store.set_tz_offset(tz_offset);
    if !applied {
        store.restore(previous);
        return ActionOutcome::notice(Page::Admin, NOTICE_INVALID_SETTINGS);
    }
    store.set_dst(update.dst);

    if !store.save() {
        return ActionOutcome::notice(Page::Admin, NOTICE_SAVE_FAILED);
    }
    info!("admin settings saved");

    if needs_reboot {
        ActionOutcome::Reboot {
            notice: NOTICE_REBOOTING,
        }
    } else {
        ActionOutcome::notice(Page::Admin, NOTICE_SETTINGS_SAVED)
    }
}

fn authorize<M: NvMedium>(store: &ConfigStore<M>, auth: &Credentials) -> Result<(), ActionOutcome> {
    if auth.user == store.admin_user() && auth.pwd == store.admin_pwd() {
        return Ok(());
    }
    if auth.is_empty() {
        return Err(ActionOutcome::page(Page::Login));
    }
    warn!("admin login rejected for user `{}`", auth.user);
    Err(ActionOutcome::notice(Page::Login, NOTICE_AUTH_FAILED))
}

fn persist<M: NvMedium>(
    store: &mut ConfigStore<M>,
    page: Page,
    notice: Option<&'static str>,
) -> ActionOutcome {
    if store.save() {
        ActionOutcome::Render { page, notice }
    } else {
        ActionOutcome::notice(page, NOTICE_SAVE_FAILED)
    }
}

/// Everything a page needs beyond the persisted configuration.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub runtime: &'a RuntimeState,
    pub local_time: Option<ClockTime>,
}

/// Renders the HTML answering an [`ActionOutcome`].
pub fn render<M: NvMedium>(
    outcome: &ActionOutcome,
    store: &ConfigStore<M>,
    context: &PageContext<'_>,
) -> String {
    match *outcome {
        ActionOutcome::Render {
            page: Page::Main,
            notice,
        } => render_main(store, context, notice),
        ActionOutcome::Render {
            page: Page::Admin,
            notice,
        } => render_admin(store, notice),
        ActionOutcome::Render {
            page: Page::Login,
            notice,
        } => render_login(store, notice),
        ActionOutcome::Reboot { notice } => {
            fill_template(REBOOT_PAGE, &[("status_message", status_message(Some(notice)))])
        }
    }
}

pub fn render_main<M: NvMedium>(
    store: &ConfigStore<M>,
    context: &PageContext<'_>,
    notice: Option<&str>,
) -> String {
    let hidden = |hide: bool| if hide { "hidden" } else { "" }.to_string();
    let cur_time = context
        .local_time
        .map(ClockTime::to_12h_string)
        .unwrap_or_else(|| "Unknown".to_string());

    fill_template(
        MAIN_PAGE,
        &[
            ("title", escape_html(store.title())),
            ("heading", escape_html(store.heading())),
            ("style", STYLE.to_string()),
            ("version", FIRMWARE_VERSION.to_string()),
            ("status_message", status_message(notice)),
            ("on_off_status", if store.is_lights_on() { "On" } else { "Off" }.to_string()),
            ("cur_time", cur_time),
            (
                "toggle_hidden",
                hidden(context.runtime.mode != ConnectivityMode::Station),
            ),
            (
                "timer_on_off",
                if store.is_timer_on() { "Enabled" } else { "Disabled" }.to_string(),
            ),
            ("schedule_hide", hidden(!store.is_timer_on())),
            ("on_at", store.on_time().to_string()),
            ("off_at", store.off_time().to_string()),
        ],
    )
}

pub fn render_admin<M: NvMedium>(store: &ConfigStore<M>, notice: Option<&str>) -> String {
    fill_template(
        ADMIN_PAGE,
        &[
            ("title", escape_html(store.title())),
            ("heading", escape_html(store.heading())),
            ("style", STYLE.to_string()),
            ("version", FIRMWARE_VERSION.to_string()),
            ("status_message", status_message(notice)),
            ("auth_user", escape_html(store.admin_user())),
            ("auth_pwd", escape_html(store.admin_pwd())),
            ("tz_offset", store.tz_offset().to_string()),
            ("dst_checked", if store.is_dst() { "checked" } else { "" }.to_string()),
            ("ssid", escape_html(store.ssid())),
            ("pwd", escape_html(store.pwd())),
            ("ap_pwd", escape_html(store.ap_pwd())),
            ("adminuser", escape_html(store.admin_user())),
            ("adminpwd", escape_html(store.admin_pwd())),
        ],
    )
}

pub fn render_login<M: NvMedium>(store: &ConfigStore<M>, notice: Option<&str>) -> String {
    fill_template(
        LOGIN_PAGE,
        &[
            ("title", escape_html(store.title())),
            ("heading", escape_html(store.heading())),
            ("style", STYLE.to_string()),
            ("status_message", status_message(notice)),
        ],
    )
}

fn status_message(notice: Option<&str>) -> String {
    notice
        .map(|message| fill_template(STATUS_MESSAGE, &[("message", escape_html(message))]))
        .unwrap_or_default()
}

/// Replaces every `${name}` with its value. Unknown placeholders are left
/// as they are.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decodes an `application/x-www-form-urlencoded` body or query string.
/// Malformed escapes are kept literally.
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push(high << 4 | low);
                        i += 2;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
