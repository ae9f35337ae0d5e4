#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tauri::{AppHandle, Emitter, Manager, RunEvent, State};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_opener::OpenerExt;

const SETTINGS_FILE: &str = "safebite_settings_v1.json";
const DATA_FILE: &str = "safebite_data_v1.json";
const DEFAULT_BUSINESS_NAME: &str = "Colombia Vida";
const DEFAULT_FRIDGE_MAX: f64 = 4.0;
const DEFAULT_FREEZER_MAX: f64 = -18.0;
const DEFAULT_HOT_MIN: f64 = 60.0;
const DEFAULT_OIL_MIN: f64 = 170.0;
const DEFAULT_OIL_MAX: f64 = 180.0;
const CATEGORIES: [&str; 6] = [
    "opening",
    "closing",
    "temperatures",
    "cleaning",
    "allergens",
    "corrective",
];
const REPORT_SECTIONS: [(&str, &str); 6] = [
    ("Openingscheck", "opening"),
    ("Temperaturen", "temperatures"),
    ("Schoonmaak", "cleaning"),
    ("Allergenen", "allergens"),
    ("Correctieve acties", "corrective"),
    ("Sluitingscheck", "closing"),
];
const SUPABASE_URL_KEYS: [&str; 4] = [
    "SAFEBITE_SUPABASE_URL",
    "SUPABASE_URL",
    "PUBLIC_SUPABASE_URL",
    "VITE_SUPABASE_URL",
];
const SUPABASE_ANON_KEY_KEYS: [&str; 4] = [
    "SAFEBITE_SUPABASE_ANON_KEY",
    "SUPABASE_ANON_KEY",
    "PUBLIC_SUPABASE_ANON_KEY",
    "VITE_SUPABASE_ANON_KEY",
];

fn default_business_name() -> String {
    DEFAULT_BUSINESS_NAME.to_string()
}

fn default_fridge_max() -> f64 {
    DEFAULT_FRIDGE_MAX
}

fn default_freezer_max() -> f64 {
    DEFAULT_FREEZER_MAX
}

fn default_hot_min() -> f64 {
    DEFAULT_HOT_MIN
}

fn default_oil_min() -> f64 {
    DEFAULT_OIL_MIN
}

fn default_oil_max() -> f64 {
    DEFAULT_OIL_MAX
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Thresholds {
    #[serde(default = "default_fridge_max")]
    fridge: f64,
    #[serde(default = "default_freezer_max")]
    freezer: f64,
    #[serde(default = "default_hot_min")]
    hot: f64,
    #[serde(rename = "oilLow", default = "default_oil_min")]
    oil_low: f64,
    #[serde(rename = "oilHigh", default = "default_oil_max")]
    oil_high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            fridge: DEFAULT_FRIDGE_MAX,
            freezer: DEFAULT_FREEZER_MAX,
            hot: DEFAULT_HOT_MIN,
            oil_low: DEFAULT_OIL_MIN,
            oil_high: DEFAULT_OIL_MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Settings {
    #[serde(default = "default_business_name")]
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    staff: String,
    #[serde(default)]
    thresholds: Thresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            name: DEFAULT_BUSINESS_NAME.to_string(),
            address: String::new(),
            staff: String::new(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RemoteProfile {
    id: String,
    #[serde(default)]
    business_name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    default_staff: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

#[derive(Clone, Serialize)]
struct SessionChange {
    event: String,
    session: Option<AuthSession>,
}

#[derive(Clone)]
struct SupabaseConfig {
    url: String,
    anon_key: String,
}

type SessionListener = Box<dyn Fn(&SessionChange) + Send + Sync + 'static>;

struct SessionChannel {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, SessionListener)>>,
}

impl SessionChannel {
    fn new() -> Self {
        SessionChannel {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, listener: SessionListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        id
    }

    fn unsubscribe(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    fn emit(&self, change: &SessionChange) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for (_, listener) in listeners.iter() {
            listener(change);
        }
    }
}

struct AppState {
    settings: Mutex<Settings>,
    records: Mutex<serde_json::Value>,
}

struct AuthState {
    config: Option<SupabaseConfig>,
    session: Mutex<Option<AuthSession>>,
    events: SessionChannel,
}

#[derive(Default)]
struct SyncState {
    registered: AtomicBool,
    merge_in_flight: AtomicBool,
    subscription: Mutex<Option<u64>>,
}

#[derive(Deserialize)]
struct SettingsSaveRequest {
    name: String,
    address: String,
    staff: String,
    fridge: Option<f64>,
    freezer: Option<f64>,
    hot: Option<f64>,
    oil_low: Option<f64>,
    oil_high: Option<f64>,
}

#[derive(Deserialize)]
struct ResetAllRequest {
    confirm: bool,
}

#[derive(Deserialize)]
struct OpeningEntryRequest {
    dt: String,
    staff: String,
    hands: bool,
    surfaces: bool,
    stock: bool,
    probe: bool,
    notes: String,
}

#[derive(Deserialize)]
struct ClosingEntryRequest {
    dt: String,
    staff: String,
    chill: bool,
    clean: bool,
    trash: bool,
    pest: bool,
    notes: String,
}

#[derive(Deserialize)]
struct TemperatureEntryRequest {
    dt: String,
    staff: String,
    location: String,
    value: Option<f64>,
    notes: String,
}

#[derive(Deserialize)]
struct CleaningEntryRequest {
    dt: String,
    staff: String,
    area: String,
    method: String,
    notes: String,
}

#[derive(Deserialize)]
struct AllergenEntryRequest {
    dt: String,
    staff: String,
    product: String,
    action: String,
    notes: String,
}

#[derive(Deserialize)]
struct CorrectiveEntryRequest {
    dt: String,
    staff: String,
    situation: String,
    action: String,
    result: String,
}

#[derive(Deserialize)]
struct ExportCategoryRequest {
    category: String,
}

#[derive(Deserialize)]
struct AuthSignInRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct SaveFileResult {
    ok: bool,
    canceled: bool,
    filename: String,
    path: Option<String>,
}

#[derive(Serialize)]
struct StorageInfoResult {
    ok: bool,
    path_label: String,
}

#[derive(Serialize)]
struct TemperatureStatus {
    count: usize,
    failures: usize,
}

#[derive(Serialize)]
struct DashboardStatus {
    date: String,
    opening: usize,
    temperatures: TemperatureStatus,
    cleaning: usize,
}

#[derive(Serialize)]
struct DaySection {
    title: String,
    columns: Vec<String>,
    rows: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct DayReportResult {
    date: String,
    summary: String,
    sections: Vec<DaySection>,
}

#[derive(Serialize)]
struct AuthStatusResult {
    configured: bool,
    signed_in: bool,
    email: Option<String>,
}

#[tauri::command]
fn app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[tauri::command]
fn platform_name() -> String {
    std::env::consts::OS.to_string()
}

#[tauri::command]
fn now_local() -> String {
    now_local_string()
}

#[tauri::command]
fn storage_info(app: AppHandle) -> Result<StorageInfoResult, String> {
    let root = storage_root_dir(&app)?;
    Ok(StorageInfoResult {
        ok: true,
        path_label: root.to_string_lossy().to_string(),
    })
}

#[tauri::command]
fn settings_get(state: State<'_, AppState>) -> Result<Settings, String> {
    let settings = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?;
    Ok(settings.clone())
}

#[tauri::command]
fn settings_save(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: SettingsSaveRequest,
) -> Result<Settings, String> {
    let updated = Settings {
        name: payload.name.trim().to_string(),
        address: payload.address.trim().to_string(),
        staff: payload.staff.trim().to_string(),
        thresholds: Thresholds {
            fridge: threshold_or_default(payload.fridge, DEFAULT_FRIDGE_MAX),
            freezer: threshold_or_default(payload.freezer, DEFAULT_FREEZER_MAX),
            hot: threshold_or_default(payload.hot, DEFAULT_HOT_MIN),
            oil_low: threshold_or_default(payload.oil_low, DEFAULT_OIL_MIN),
            oil_high: threshold_or_default(payload.oil_high, DEFAULT_OIL_MAX),
        },
    };
    let root = storage_root_dir(&app)?;
    save_settings_to(root.as_path(), &updated)?;
    let mut settings = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?;
    *settings = updated.clone();
    Ok(updated)
}

#[tauri::command]
fn reset_all(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: ResetAllRequest,
) -> Result<bool, String> {
    if !payload.confirm {
        return Err("Reset requires explicit confirmation.".to_string());
    }
    let root = storage_root_dir(&app)?;
    reset_storage(root.as_path())?;
    {
        let mut settings = state
            .settings
            .lock()
            .map_err(|_| "Settings lock poisoned.".to_string())?;
        *settings = Settings::default();
    }
    {
        let mut records = state
            .records
            .lock()
            .map_err(|_| "Record store lock poisoned.".to_string())?;
        *records = default_data_value();
    }
    Ok(true)
}

#[tauri::command]
fn log_opening(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: OpeningEntryRequest,
) -> Result<serde_json::Value, String> {
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "hands": payload.hands,
        "surfaces": payload.surfaces,
        "stock": payload.stock,
        "probe": payload.probe,
        "notes": payload.notes.trim(),
    });
    append_and_persist(&app, &state, "opening", entry)
}

#[tauri::command]
fn log_closing(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: ClosingEntryRequest,
) -> Result<serde_json::Value, String> {
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "chill": payload.chill,
        "clean": payload.clean,
        "trash": payload.trash,
        "pest": payload.pest,
        "notes": payload.notes.trim(),
    });
    append_and_persist(&app, &state, "closing", entry)
}

#[tauri::command]
fn log_temperature(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: TemperatureEntryRequest,
) -> Result<serde_json::Value, String> {
    let thresholds = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?
        .thresholds
        .clone();
    let pass = evaluate_temp(payload.location.as_str(), payload.value, &thresholds);
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "location": payload.location.trim(),
        "value": payload.value.filter(|value| value.is_finite()),
        "pass": pass,
        "notes": payload.notes.trim(),
    });
    append_and_persist(&app, &state, "temperatures", entry)
}

#[tauri::command]
fn log_cleaning(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: CleaningEntryRequest,
) -> Result<serde_json::Value, String> {
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "area": payload.area.trim(),
        "method": payload.method.trim(),
        "notes": payload.notes.trim(),
    });
    append_and_persist(&app, &state, "cleaning", entry)
}

#[tauri::command]
fn log_allergen(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: AllergenEntryRequest,
) -> Result<serde_json::Value, String> {
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "product": payload.product.trim(),
        "action": payload.action.trim(),
        "notes": payload.notes.trim(),
    });
    append_and_persist(&app, &state, "allergens", entry)
}

#[tauri::command]
fn log_corrective(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: CorrectiveEntryRequest,
) -> Result<serde_json::Value, String> {
    let entry = json!({
        "dt": normalized_dt(payload.dt.as_str()),
        "staff": payload.staff.trim(),
        "situation": payload.situation.trim(),
        "action": payload.action.trim(),
        "result": payload.result.trim(),
    });
    append_and_persist(&app, &state, "corrective", entry)
}

#[tauri::command]
fn records_get(state: State<'_, AppState>) -> Result<serde_json::Value, String> {
    let records = state
        .records
        .lock()
        .map_err(|_| "Record store lock poisoned.".to_string())?;
    Ok(records.clone())
}

#[tauri::command]
fn dashboard_status(state: State<'_, AppState>) -> Result<DashboardStatus, String> {
    let records = state
        .records
        .lock()
        .map_err(|_| "Record store lock poisoned.".to_string())?;
    let day = today_key();
    let opening = entries_for_day(&records, "opening", day.as_str());
    let temperatures = entries_for_day(&records, "temperatures", day.as_str());
    let cleaning = entries_for_day(&records, "cleaning", day.as_str());
    Ok(DashboardStatus {
        date: day,
        opening: opening.len(),
        temperatures: TemperatureStatus {
            count: temperatures.len(),
            failures: temperature_failures(temperatures.as_slice()),
        },
        cleaning: cleaning.len(),
    })
}

#[tauri::command]
fn day_report(state: State<'_, AppState>) -> Result<DayReportResult, String> {
    let day = today_key();
    let sections = {
        let records = state
            .records
            .lock()
            .map_err(|_| "Record store lock poisoned.".to_string())?;
        today_sections(&records, day.as_str())
    };
    let summary = {
        let settings = state
            .settings
            .lock()
            .map_err(|_| "Settings lock poisoned.".to_string())?;
        build_day_summary(&settings, today_display().as_str(), sections.as_slice())
    };
    let sections = sections
        .into_iter()
        .map(|(title, rows)| DaySection {
            columns: category_columns(rows.as_slice()),
            title,
            rows,
        })
        .collect();
    Ok(DayReportResult {
        date: day,
        summary,
        sections,
    })
}

#[tauri::command]
fn export_category_csv(
    state: State<'_, AppState>,
    payload: ExportCategoryRequest,
) -> Result<SaveFileResult, String> {
    let category = payload.category.trim().to_string();
    if !CATEGORIES.contains(&category.as_str()) {
        return Err("Unknown category.".to_string());
    }
    let rows = {
        let records = state
            .records
            .lock()
            .map_err(|_| "Record store lock poisoned.".to_string())?;
        records
            .get(category.as_str())
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default()
    };
    if rows.is_empty() {
        return Err("No records to export.".to_string());
    }
    let columns = category_columns(rows.as_slice());
    let csv = rows_to_csv(columns.as_slice(), rows.as_slice());
    save_text_file_dialog(
        format!("safebite_{}_{}.csv", category, today_key()),
        csv.as_str(),
    )
}

#[tauri::command]
fn export_day_report(state: State<'_, AppState>) -> Result<SaveFileResult, String> {
    let (day, summary) = current_day_summary(&state)?;
    save_text_file_dialog(format!("safebite_dagrapport_{day}.txt"), summary.as_str())
}

#[tauri::command]
fn email_day_report(app: AppHandle, state: State<'_, AppState>) -> Result<bool, String> {
    let (day, summary) = current_day_summary(&state)?;
    let root = storage_root_dir(&app)?;
    let path = root.join(format!("safebite_dagrapport_{day}.eml"));
    let content = format!(
        "To: \r\nSubject: Dagrapport {day}\r\nX-Unsent: 1\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{summary}"
    );
    write_text_file_atomic(path.clone(), content.as_str())?;
    app.opener()
        .open_url(path.to_string_lossy().to_string(), Option::<String>::None)
        .map_err(|err| err.to_string())?;
    Ok(true)
}

#[tauri::command]
fn copy_day_report(app: AppHandle, state: State<'_, AppState>) -> Result<bool, String> {
    let (_, summary) = current_day_summary(&state)?;
    app.clipboard()
        .write_text(summary)
        .map_err(|err| err.to_string())?;
    Ok(true)
}

#[tauri::command]
fn auth_sign_in(app: AppHandle, payload: AuthSignInRequest) -> Result<AuthStatusResult, String> {
    let auth = app.state::<AuthState>();
    let config = auth
        .config
        .clone()
        .ok_or_else(|| "Supabase credentials not configured.".to_string())?;
    let email = payload.email.trim().to_string();
    if email.is_empty() {
        return Err("Missing email.".to_string());
    }
    let session = supabase_sign_in(&config, email.as_str(), payload.password.as_str())?;
    {
        let mut slot = auth
            .session
            .lock()
            .map_err(|_| "Session lock poisoned.".to_string())?;
        *slot = Some(session.clone());
    }
    auth.events.emit(&SessionChange {
        event: "SIGNED_IN".to_string(),
        session: Some(session.clone()),
    });
    Ok(AuthStatusResult {
        configured: true,
        signed_in: true,
        email: session.user.email,
    })
}

#[tauri::command]
fn auth_sign_out(app: AppHandle) -> Result<AuthStatusResult, String> {
    let auth = app.state::<AuthState>();
    let previous = {
        let mut slot = auth
            .session
            .lock()
            .map_err(|_| "Session lock poisoned.".to_string())?;
        slot.take()
    };
    if let (Some(config), Some(session)) = (auth.config.as_ref(), previous.as_ref()) {
        if let Err(err) = supabase_sign_out(config, session) {
            log::warn!("sign-out request failed: {err}");
        }
    }
    auth.events.emit(&SessionChange {
        event: "SIGNED_OUT".to_string(),
        session: None,
    });
    Ok(AuthStatusResult {
        configured: auth.config.is_some(),
        signed_in: false,
        email: None,
    })
}

#[tauri::command]
fn auth_status(app: AppHandle) -> Result<AuthStatusResult, String> {
    let auth = app.state::<AuthState>();
    let session = auth
        .session
        .lock()
        .map_err(|_| "Session lock poisoned.".to_string())?;
    Ok(AuthStatusResult {
        configured: auth.config.is_some(),
        signed_in: session.is_some(),
        email: session.as_ref().and_then(|value| value.user.email.clone()),
    })
}

fn threshold_or_default(value: Option<f64>, fallback: f64) -> f64 {
    value.filter(|value| value.is_finite()).unwrap_or(fallback)
}

fn now_local_string() -> String {
    Local::now().format("%Y-%m-%dT%H:%M").to_string()
}

fn today_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn today_display() -> String {
    Local::now().format("%d-%m-%Y").to_string()
}

fn normalized_dt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        now_local_string()
    } else {
        trimmed.to_string()
    }
}

fn storage_root_dir(app: &AppHandle) -> Result<PathBuf, String> {
    let base = app.path().app_data_dir().map_err(|err| err.to_string())?;
    let root = base.join("SafeBite");
    fs::create_dir_all(root.as_path()).map_err(|err| err.to_string())?;
    Ok(root)
}

fn settings_file_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

fn data_file_path(root: &Path) -> PathBuf {
    root.join(DATA_FILE)
}

fn write_text_file_atomic(path: PathBuf, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| "Invalid storage path.".to_string())?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(tmp.as_path(), content).map_err(|err| err.to_string())?;
    fs::rename(tmp.as_path(), path.as_path()).map_err(|err| err.to_string())?;
    Ok(())
}

fn load_settings_from(root: &Path) -> Settings {
    let path = settings_file_path(root);
    if !path.exists() {
        return Settings::default();
    }
    let raw = match fs::read_to_string(path.as_path()) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("unable to read settings file, using defaults: {err}");
            return Settings::default();
        }
    };
    match serde_json::from_str::<Settings>(raw.as_str()) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("settings file is corrupt, using defaults: {err}");
            Settings::default()
        }
    }
}

fn save_settings_to(root: &Path, settings: &Settings) -> Result<(), String> {
    let content = serde_json::to_string_pretty(settings).map_err(|err| err.to_string())?;
    write_text_file_atomic(settings_file_path(root), content.as_str())
}

fn default_data_value() -> serde_json::Value {
    json!({
        "opening": [],
        "closing": [],
        "temperatures": [],
        "cleaning": [],
        "allergens": [],
        "corrective": [],
    })
}

fn ensure_data_shape_value(value: serde_json::Value) -> serde_json::Value {
    if !value.is_object() {
        return default_data_value();
    }
    let mut out = value;
    let Some(obj) = out.as_object_mut() else {
        return default_data_value();
    };
    for category in CATEGORIES {
        if !obj.get(category).is_some_and(|rows| rows.is_array()) {
            obj.insert(category.to_string(), json!([]));
        }
    }
    out
}

fn load_data_from(root: &Path) -> serde_json::Value {
    let path = data_file_path(root);
    if !path.exists() {
        return default_data_value();
    }
    let raw = match fs::read_to_string(path.as_path()) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("unable to read record file, using empty document: {err}");
            return default_data_value();
        }
    };
    match serde_json::from_str::<serde_json::Value>(raw.as_str()) {
        Ok(value) => ensure_data_shape_value(value),
        Err(err) => {
            log::warn!("record file is corrupt, using empty document: {err}");
            default_data_value()
        }
    }
}

fn save_data_to(root: &Path, value: &serde_json::Value) -> Result<(), String> {
    let normalized = ensure_data_shape_value(value.clone());
    let content = serde_json::to_string(&normalized).map_err(|err| err.to_string())?;
    write_text_file_atomic(data_file_path(root), content.as_str())
}

fn reset_storage(root: &Path) -> Result<(), String> {
    for path in [settings_file_path(root), data_file_path(root)] {
        if path.exists() {
            fs::remove_file(path.as_path()).map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}

fn append_entry(
    data: &mut serde_json::Value,
    category: &str,
    entry: serde_json::Value,
) -> Result<(), String> {
    if !data.get(category).is_some_and(|rows| rows.is_array()) {
        *data = ensure_data_shape_value(data.clone());
    }
    let rows = data
        .get_mut(category)
        .and_then(|value| value.as_array_mut())
        .ok_or_else(|| "Unknown category.".to_string())?;
    rows.push(entry);
    Ok(())
}

fn append_and_persist(
    app: &AppHandle,
    state: &State<'_, AppState>,
    category: &str,
    entry: serde_json::Value,
) -> Result<serde_json::Value, String> {
    let root = storage_root_dir(app)?;
    let mut records = state
        .records
        .lock()
        .map_err(|_| "Record store lock poisoned.".to_string())?;
    append_entry(&mut records, category, entry.clone())?;
    save_data_to(root.as_path(), &records)?;
    Ok(entry)
}

fn evaluate_temp(location: &str, value: Option<f64>, thresholds: &Thresholds) -> Option<bool> {
    let value = value.filter(|value| value.is_finite())?;
    let location = location.to_lowercase();
    if location.contains("koelkast") {
        return Some(value <= thresholds.fridge);
    }
    if location.contains("vriezer") {
        return Some(value <= thresholds.freezer);
    }
    if location.contains("warme") {
        return Some(value >= thresholds.hot);
    }
    if location.contains("bakolie") {
        return Some(value >= thresholds.oil_low && value <= thresholds.oil_high);
    }
    None
}

fn entry_day(entry: &serde_json::Value) -> String {
    entry
        .get("dt")
        .and_then(|value| value.as_str())
        .map(|dt| dt.get(..10).unwrap_or(dt).to_string())
        .unwrap_or_default()
}

fn entries_for_day(data: &serde_json::Value, category: &str, day: &str) -> Vec<serde_json::Value> {
    data.get(category)
        .and_then(|value| value.as_array())
        .map(|rows| {
            rows.iter()
                .filter(|row| entry_day(row) == day)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn today_sections(data: &serde_json::Value, day: &str) -> Vec<(String, Vec<serde_json::Value>)> {
    REPORT_SECTIONS
        .iter()
        .map(|(title, category)| ((*title).to_string(), entries_for_day(data, category, day)))
        .collect()
}

fn temperature_failures(rows: &[serde_json::Value]) -> usize {
    rows.iter()
        .filter(|row| row.get("pass").and_then(|value| value.as_bool()) == Some(false))
        .count()
}

fn format_summary_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Bool(true) => "ja".to_string(),
        serde_json::Value::Bool(false) => "nee".to_string(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn build_day_summary(
    settings: &Settings,
    date_label: &str,
    sections: &[(String, Vec<serde_json::Value>)],
) -> String {
    let mut lines: Vec<String> = Vec::new();
    let name = if settings.name.trim().is_empty() {
        "Bedrijf"
    } else {
        settings.name.as_str()
    };
    lines.push(format!("Dagrapport – {name} – {date_label}"));
    if !settings.address.trim().is_empty() {
        lines.push(format!("Adres: {}", settings.address));
    }
    let t = &settings.thresholds;
    lines.push(format!(
        "Drempels: Koel ≤{}°C | Vries ≤{}°C | Warm ≥{}°C | Olie {}–{}°C",
        t.fridge, t.freezer, t.hot, t.oil_low, t.oil_high
    ));
    lines.push(String::new());
    for (title, rows) in sections {
        lines.push(title.clone());
        if rows.is_empty() {
            lines.push("- Geen gegevens".to_string());
        } else {
            for row in rows {
                let parts = row
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .map(|(key, value)| format!("{key}: {}", format_summary_value(value)))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                lines.push(format!("- {}", parts.join("; ")));
            }
        }
        lines.push(String::new());
    }
    format!("{}\n", lines.join("\n").trim_end())
}

fn current_day_summary(state: &State<'_, AppState>) -> Result<(String, String), String> {
    let day = today_key();
    let sections = {
        let records = state
            .records
            .lock()
            .map_err(|_| "Record store lock poisoned.".to_string())?;
        today_sections(&records, day.as_str())
    };
    let settings = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?;
    let summary = build_day_summary(&settings, today_display().as_str(), sections.as_slice());
    Ok((day, summary))
}

fn category_columns(rows: &[serde_json::Value]) -> Vec<String> {
    rows.first()
        .and_then(|row| row.as_object())
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default()
}

fn should_neutralize_csv(value: &str) -> bool {
    let trimmed = value.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('\'') {
        return false;
    }
    matches!(
        trimmed.chars().next(),
        Some('=') | Some('+') | Some('-') | Some('@')
    )
}

fn neutralize_csv_formula(value: &str) -> String {
    if should_neutralize_csv(value) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

fn csv_escape(value: &str) -> String {
    let safe = neutralize_csv_formula(value);
    if safe.contains(',') || safe.contains('"') || safe.contains('\n') || safe.contains('\r') {
        format!("\"{}\"", safe.replace('"', "\"\""))
    } else {
        safe
    }
}

fn cell_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::Null) | None => String::new(),
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Number(number)) => number.to_string(),
        Some(serde_json::Value::Bool(boolean)) => boolean.to_string(),
        Some(other) => other.to_string(),
    }
}

fn rows_to_csv(columns: &[String], rows: &[serde_json::Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !columns.is_empty() {
        lines.push(
            columns
                .iter()
                .map(|column| csv_escape(column.as_str()))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    for row in rows {
        let line = columns
            .iter()
            .map(|column| {
                let value = row.as_object().and_then(|obj| obj.get(column));
                csv_escape(cell_string(value).as_str())
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n")
}

fn sanitize_filename(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "safebite-export".to_string()
    } else {
        trimmed.to_string()
    }
}

fn save_text_file_dialog(default_name: String, content: &str) -> Result<SaveFileResult, String> {
    let default_name = sanitize_filename(default_name.as_str());
    let path = rfd::FileDialog::new()
        .set_file_name(default_name.as_str())
        .save_file();

    let Some(path) = path else {
        return Ok(SaveFileResult {
            ok: false,
            canceled: true,
            filename: default_name,
            path: None,
        });
    };

    write_text_file_atomic(path.clone(), content)?;
    Ok(SaveFileResult {
        ok: true,
        canceled: false,
        filename: default_name,
        path: Some(path.to_string_lossy().to_string()),
    })
}

fn resolve_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn supabase_config_from_env() -> Option<SupabaseConfig> {
    let url = resolve_env(&SUPABASE_URL_KEYS)?;
    let anon_key = resolve_env(&SUPABASE_ANON_KEY_KEYS)?;
    Some(SupabaseConfig { url, anon_key })
}

fn supabase_base(config: &SupabaseConfig) -> &str {
    config.url.trim_end_matches('/')
}

fn profiles_endpoint(config: &SupabaseConfig) -> String {
    format!("{}/rest/v1/profiles", supabase_base(config))
}

fn supabase_sign_in(
    config: &SupabaseConfig,
    email: &str,
    password: &str,
) -> Result<AuthSession, String> {
    let url = format!("{}/auth/v1/token?grant_type=password", supabase_base(config));
    let response = ureq::post(url.as_str())
        .set("apikey", config.anon_key.as_str())
        .set("Content-Type", "application/json")
        .send_json(json!({ "email": email, "password": password }))
        .map_err(|err| match err {
            ureq::Error::Status(400, _) | ureq::Error::Status(401, _) => {
                "Invalid email or password.".to_string()
            }
            other => other.to_string(),
        })?;
    response
        .into_json::<AuthSession>()
        .map_err(|err| err.to_string())
}

fn supabase_sign_out(config: &SupabaseConfig, session: &AuthSession) -> Result<(), String> {
    let url = format!("{}/auth/v1/logout", supabase_base(config));
    ureq::post(url.as_str())
        .set("apikey", config.anon_key.as_str())
        .set(
            "Authorization",
            format!("Bearer {}", session.access_token).as_str(),
        )
        .call()
        .map_err(|err| err.to_string())?;
    Ok(())
}

fn fetch_remote_profile(
    config: &SupabaseConfig,
    session: &AuthSession,
) -> Result<Option<RemoteProfile>, String> {
    let url = format!(
        "{}?id=eq.{}&select=id,business_name,address,default_staff",
        profiles_endpoint(config),
        session.user.id
    );
    let response = ureq::get(url.as_str())
        .set("apikey", config.anon_key.as_str())
        .set(
            "Authorization",
            format!("Bearer {}", session.access_token).as_str(),
        )
        .set("Accept", "application/json")
        .call()
        .map_err(|err| err.to_string())?;
    let rows: Vec<RemoteProfile> = response.into_json().map_err(|err| err.to_string())?;
    Ok(rows.into_iter().next())
}

fn upsert_remote_profile(
    config: &SupabaseConfig,
    session: &AuthSession,
    profile: &RemoteProfile,
) -> Result<(), String> {
    ureq::post(profiles_endpoint(config).as_str())
        .set("apikey", config.anon_key.as_str())
        .set(
            "Authorization",
            format!("Bearer {}", session.access_token).as_str(),
        )
        .set("Content-Type", "application/json")
        .set("Prefer", "resolution=merge-duplicates,return=minimal")
        .send_json(json!([profile]))
        .map_err(|err| err.to_string())?;
    Ok(())
}

fn nonempty_setting(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn seed_remote_profile(user_id: &str, settings: &Settings) -> RemoteProfile {
    RemoteProfile {
        id: user_id.to_string(),
        business_name: nonempty_setting(settings.name.as_str()),
        address: nonempty_setting(settings.address.as_str()),
        default_staff: nonempty_setting(settings.staff.as_str()),
    }
}

fn apply_remote_profile(settings: &Settings, profile: &RemoteProfile) -> Settings {
    let mut merged = settings.clone();
    if let Some(name) = profile.business_name.as_ref() {
        merged.name = name.clone();
    }
    if let Some(address) = profile.address.as_ref() {
        merged.address = address.clone();
    }
    if let Some(staff) = profile.default_staff.as_ref() {
        merged.staff = staff.clone();
    }
    merged
}

fn init_auth_integration(app: &AppHandle) {
    let sync = app.state::<SyncState>();
    if sync.registered.swap(true, Ordering::SeqCst) {
        return;
    }
    let auth = app.state::<AuthState>();
    if auth.config.is_none() {
        log::warn!("Supabase credentials not found in environment; profile sync disabled");
        return;
    }
    let handle = app.clone();
    let id = auth.events.subscribe(Box::new(move |change| {
        let Some(session) = change.session.as_ref() else {
            return;
        };
        if session.user.id.is_empty() {
            return;
        }
        spawn_profile_sync(handle.clone(), session.clone());
    }));
    if let Ok(mut slot) = sync.subscription.lock() {
        *slot = Some(id);
    }
    let current = auth.session.lock().ok().and_then(|session| session.clone());
    if let Some(session) = current {
        auth.events.emit(&SessionChange {
            event: "init".to_string(),
            session: Some(session),
        });
    }
}

fn shutdown_auth_integration(app: &AppHandle) {
    let sync = app.state::<SyncState>();
    let id = sync.subscription.lock().ok().and_then(|mut slot| slot.take());
    if let Some(id) = id {
        app.state::<AuthState>().events.unsubscribe(id);
    }
}

fn spawn_profile_sync(app: AppHandle, session: AuthSession) {
    {
        let sync = app.state::<SyncState>();
        if sync
            .merge_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("profile sync already in flight; dropping session event");
            return;
        }
    }
    tauri::async_runtime::spawn_blocking(move || {
        let outcome = run_profile_sync(&app, &session);
        app.state::<SyncState>()
            .merge_in_flight
            .store(false, Ordering::SeqCst);
        match outcome {
            Ok(true) => {
                if let Err(err) = app.emit("settings-synced", ()) {
                    log::warn!("failed to notify frontend after profile sync: {err}");
                }
            }
            Ok(false) => {}
            Err(err) => log::error!("profile sync failed: {err}"),
        }
    });
}

fn run_profile_sync(app: &AppHandle, session: &AuthSession) -> Result<bool, String> {
    let auth = app.state::<AuthState>();
    let config = auth
        .config
        .clone()
        .ok_or_else(|| "Supabase credentials not configured.".to_string())?;
    let state = app.state::<AppState>();
    let local = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?
        .clone();
    let Some(profile) = fetch_remote_profile(&config, session)? else {
        upsert_remote_profile(
            &config,
            session,
            &seed_remote_profile(session.user.id.as_str(), &local),
        )?;
        return Ok(false);
    };
    let merged = apply_remote_profile(&local, &profile);
    let root = storage_root_dir(app)?;
    save_settings_to(root.as_path(), &merged)?;
    let mut settings = state
        .settings
        .lock()
        .map_err(|_| "Settings lock poisoned.".to_string())?;
    *settings = merged;
    Ok(true)
}

fn main() {
    tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(log::LevelFilter::Info)
                .build(),
        )
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .setup(|app| {
            let handle = app.handle();
            let root = storage_root_dir(handle).map_err(std::io::Error::other)?;
            app.manage(AppState {
                settings: Mutex::new(load_settings_from(root.as_path())),
                records: Mutex::new(load_data_from(root.as_path())),
            });
            app.manage(AuthState {
                config: supabase_config_from_env(),
                session: Mutex::new(None),
                events: SessionChannel::new(),
            });
            app.manage(SyncState::default());
            init_auth_integration(handle);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            app_version,
            platform_name,
            now_local,
            storage_info,
            settings_get,
            settings_save,
            reset_all,
            log_opening,
            log_closing,
            log_temperature,
            log_cleaning,
            log_allergen,
            log_corrective,
            records_get,
            dashboard_status,
            day_report,
            export_category_csv,
            export_day_report,
            email_day_report,
            copy_day_report,
            auth_sign_in,
            auth_sign_out,
            auth_status
        ])
        .build(tauri::generate_context!())
        .expect("failed to build SafeBite")
        .run(|app, event| {
            if let RunEvent::Exit = event {
                shutdown_auth_integration(app);
            }
        });
}
