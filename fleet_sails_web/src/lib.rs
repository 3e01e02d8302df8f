use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_sails::{
    blues, build_heatmap, hull_stats, render_summary, Config, DeclarationSession,
    DeclarationStore, HeatmapGrid, HullOutcome, HullStats, KeyValueStore, RecordStore,
    SailError, SailRecord, Slot, TextField,
};
use leptos::leptos_dom::helpers::TimeoutHandle;
use leptos::*;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::Response;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("FLEET_SAILS_COMMIT");

const POPUP_BLOCKED: &str = "Failed to open print window. Please check popup blocker settings.";
const PRINT_DELAY_MS: u64 = 250;

/// `window.localStorage` as a declaration backend.
pub struct LocalStorage {
    storage: web_sys::Storage,
}

impl LocalStorage {
    pub fn open() -> Result<Self, SailError> {
        let window = web_sys::window().ok_or_else(|| SailError::Storage("no window".into()))?;
        let storage = window
            .local_storage()
            .map_err(storage_error)?
            .ok_or_else(|| SailError::Storage("localStorage is unavailable".into()))?;
        Ok(Self { storage })
    }
}

impl KeyValueStore for LocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SailError> {
        self.storage.get_item(key).map_err(storage_error)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SailError> {
        self.storage.set_item(key, value).map_err(storage_error)
    }

    fn keys(&self) -> Result<Vec<String>, SailError> {
        let len = self.storage.length().map_err(storage_error)?;
        let mut keys = Vec::with_capacity(len as usize);
        for i in 0..len {
            if let Some(key) = self.storage.key(i).map_err(storage_error)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn js_message(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

fn storage_error(value: JsValue) -> SailError {
    SailError::Storage(js_message(&value))
}

fn fetch_error(value: JsValue) -> SailError {
    SailError::Fetch(js_message(&value))
}

async fn fetch_records(url: &str) -> Result<RecordStore, SailError> {
    let window = web_sys::window().ok_or_else(|| SailError::Fetch("no window".into()))?;
    let response = JsFuture::from(window.fetch_with_str(url))
        .await
        .map_err(fetch_error)?;
    let response: Response = response.dyn_into().map_err(fetch_error)?;
    if !response.ok() {
        return Err(SailError::Fetch(format!(
            "HTTP error! status: {}",
            response.status()
        )));
    }
    let body = JsFuture::from(response.text().map_err(fetch_error)?)
        .await
        .map_err(fetch_error)?;
    let text = body
        .as_string()
        .ok_or_else(|| SailError::Fetch("response body is not text".into()))?;
    RecordStore::from_json(text.as_bytes())
}

fn alert(message: &str) {
    if let Some(window) = web_sys::window() {
        let _ = window.alert_with_message(message);
    }
}

/// Write `html` into a new window and print it once it has rendered.
fn open_print_window(html: &str) -> Result<(), String> {
    let window = web_sys::window().ok_or_else(|| POPUP_BLOCKED.to_string())?;
    let popup = window
        .open_with_url_and_target_and_features("", "_blank", "width=800,height=600")
        .map_err(|_| POPUP_BLOCKED.to_string())?
        .ok_or_else(|| POPUP_BLOCKED.to_string())?;
    let document = popup
        .document()
        .ok_or_else(|| POPUP_BLOCKED.to_string())?
        .unchecked_into::<web_sys::HtmlDocument>();
    document
        .write(&js_sys::Array::of1(&JsValue::from_str(html)))
        .map_err(|e| js_message(&e))?;
    document.close().map_err(|e| js_message(&e))?;
    set_timeout(
        move || {
            let _ = popup.print();
        },
        Duration::from_millis(PRINT_DELAY_MS),
    );
    Ok(())
}

/// Dropdown text for a candidate sail.
pub fn option_label(sail: &SailRecord) -> String {
    let maker = if sail.sailmaker.is_empty() {
        "Unknown"
    } else {
        sail.sailmaker.as_str()
    };
    let year = sail
        .delivery_year()
        .map(|y| y.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    format!("{} - {} ({})", sail.certificate_no, maker, year)
}

pub fn option_title(sail: &SailRecord) -> String {
    let maker = if sail.sailmaker.is_empty() {
        "Unknown"
    } else {
        sail.sailmaker.as_str()
    };
    format!(
        "{} - Delivered: {}",
        maker,
        sail.delivery_date.as_deref().unwrap_or("N/A")
    )
}

pub fn stats_lines(hull: &str, stats: &HullStats) -> Vec<String> {
    let years = match (stats.first_year, stats.last_year) {
        (Some(first), Some(last)) => format!("{first} - {last}"),
        _ => "N/A".to_string(),
    };
    vec![
        format!("Hull {hull} Statistics:"),
        format!("Total Sails: {}", stats.total_sails),
        format!("Sailmakers: {}", stats.sailmakers.join(", ")),
        format!("Sail Types: {}", stats.sail_types.join(", ")),
        format!("Years: {years}"),
    ]
}

pub fn fill_hex(grid: &HeatmapGrid, count: u32) -> String {
    let (r, g, b) = blues(grid.intensity(count));
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// SVG geometry for a heatmap grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeatmapLayout {
    pub left: f64,
    pub top: f64,
    pub cell_w: f64,
    pub cell_h: f64,
    pub width: f64,
    pub height: f64,
}

impl HeatmapLayout {
    const LEFT: f64 = 200.0;
    const TOP: f64 = 60.0;
    const BOTTOM: f64 = 60.0;
    const RIGHT: f64 = 30.0;
    const CELL_H: f64 = 30.0;

    pub fn for_grid(grid: &HeatmapGrid, width: f64) -> Self {
        let cols = grid.columns().max(1) as f64;
        let rows = grid.rows().max(1) as f64;
        let cell_w = ((width - Self::LEFT - Self::RIGHT) / cols).max(24.0);
        Self {
            left: Self::LEFT,
            top: Self::TOP,
            cell_w,
            cell_h: Self::CELL_H,
            width: Self::LEFT + Self::RIGHT + cell_w * cols,
            height: Self::TOP + Self::BOTTOM + Self::CELL_H * rows,
        }
    }

    pub fn cell_origin(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.left + self.cell_w * col as f64,
            self.top + self.cell_h * row as f64,
        )
    }
}

#[component]
fn HeatmapPanel(records: ReadSignal<Option<Arc<RecordStore>>>) -> impl IntoView {
    let (hull, set_hull) = create_signal(String::new());

    let hull_options = move || {
        records
            .get()
            .map(|store| store.hulls())
            .unwrap_or_default()
            .into_iter()
            .map(|h| {
                let label = format!("Hull {h}");
                view! { <option value=h>{label}</option> }
            })
            .collect_view()
    };

    let stats_view = move || {
        let selected = hull.get();
        if selected.is_empty() {
            return view! { <p class="note">"Select a hull to see statistics"</p> }.into_view();
        }
        let Some(store) = records.get() else {
            return ().into_view();
        };
        if !store.has_hull(&selected) {
            return ().into_view();
        }
        let lines = stats_lines(&selected, &hull_stats(store.for_hull(&selected)));
        view! {
            <p class="stats">
                {lines.into_iter().map(|line| view! { {line}<br/> }).collect_view()}
            </p>
        }
        .into_view()
    };

    let heatmap_view = move || {
        let selected = hull.get();
        if selected.is_empty() {
            return ().into_view();
        }
        let Some(store) = records.get() else {
            return ().into_view();
        };
        match build_heatmap(&store, &selected) {
            None => view! { <p class="no-data">"No data available for the selected hull."</p> }
                .into_view(),
            Some(grid) if grid.is_empty() => {
                view! { <p class="no-data">"No dated purchases recorded for this hull."</p> }
                    .into_view()
            }
            Some(grid) => heatmap_svg(&grid).into_view(),
        }
    };

    view! {
        <section class="heatmap">
            <h2>"Sail Purchase History"</h2>
            <select on:change=move |ev| set_hull.set(event_target_value(&ev)) prop:value=move || hull.get()>
                <option value="">"Select a hull..."</option>
                {hull_options}
            </select>
            {stats_view}
            {heatmap_view}
        </section>
    }
}

fn heatmap_svg(grid: &HeatmapGrid) -> impl IntoView {
    let layout = HeatmapLayout::for_grid(grid, 900.0);
    let mut cells = Vec::new();
    for row in 0..grid.rows() {
        for col in 0..grid.columns() {
            let count = grid.count_at(row, col);
            let (x, y) = layout.cell_origin(row, col);
            let fill = fill_hex(grid, count);
            let label_fill = if grid.needs_light_label(count) { "white" } else { "black" };
            let label = (count > 0).then(|| count.to_string()).unwrap_or_default();
            cells.push(view! {
                <g>
                    <rect x=x y=y width={layout.cell_w} height={layout.cell_h} fill=fill stroke="white"/>
                    <text
                        x={x + layout.cell_w / 2.0}
                        y={y + layout.cell_h / 2.0}
                        text-anchor="middle"
                        dominant-baseline="central"
                        fill=label_fill
                    >
                        {label}
                    </text>
                </g>
            });
        }
    }
    let row_labels = grid
        .keys
        .iter()
        .enumerate()
        .map(|(row, key)| {
            let (_, y) = layout.cell_origin(row, 0);
            view! {
                <text x={layout.left - 8.0} y={y + layout.cell_h / 2.0} text-anchor="end" dominant-baseline="central">
                    {key.label()}
                </text>
            }
        })
        .collect_view();
    let column_labels = grid
        .years
        .iter()
        .enumerate()
        .map(|(col, year)| {
            let (x, _) = layout.cell_origin(0, col);
            view! {
                <text x={x + layout.cell_w / 2.0} y={layout.height - layout.top + 20.0} text-anchor="middle">
                    {year.to_string()}
                </text>
            }
        })
        .collect_view();
    let title = format!("Hull {} - Sail Purchases by Type & Maker", grid.hull);
    let view_box = format!("0 0 {} {}", layout.width, layout.height);

    view! {
        <svg class="heatmap-grid" width={layout.width} height={layout.height} viewBox=view_box>
            <text class="heatmap-title" x={layout.width / 2.0} y=30.0 text-anchor="middle">{title}</text>
            {cells}
            {row_labels}
            {column_labels}
        </svg>
    }
}

#[component]
fn TextInput(
    session: RwSignal<DeclarationSession>,
    field: TextField,
    #[prop(optional)] input_type: Option<&'static str>,
) -> impl IntoView {
    let id = field.id();
    view! {
        <label for=id>{field.label()}</label>
        <input
            id=id
            type={input_type.unwrap_or("text")}
            prop:value=move || session.with(|s| s.record().text(field).to_string())
            on:input=move |ev| session.update(|s| s.set_text(field, event_target_value(&ev)))
        />
    }
}

#[component]
fn SlotSelect(
    session: RwSignal<DeclarationSession>,
    slot: Slot,
    set_message: WriteSignal<(String, &'static str)>,
) -> impl IntoView {
    let options = move || {
        session.with(|s| {
            s.candidates(slot)
                .into_iter()
                .map(|sail| {
                    let cert = sail.certificate_no.clone();
                    let label = option_label(sail);
                    let title = option_title(sail);
                    view! { <option value=cert title=title>{label}</option> }
                })
                .collect_view()
        })
    };
    let on_change = move |ev: ev::Event| {
        let value = event_target_value(&ev);
        let result = session.try_update(|s| s.select_slot(slot, Some(&value)));
        if let Some(Err(err)) = result {
            set_message.set((err.to_string(), "error"));
        }
    };

    view! {
        <label for={slot.id()}>{slot.label()}</label>
        <select
            id={slot.id()}
            on:change=on_change
            prop:value=move || session.with(|s| s.record().slots.get(slot).unwrap_or("").to_string())
        >
            <option value="">"-- Select --"</option>
            {options}
        </select>
    }
}

#[component]
fn DeclarationForm(store: Arc<RecordStore>, config: Config) -> impl IntoView {
    let session = create_rw_signal(DeclarationSession::new(store, &config));
    let config = store_value(config);
    let (message, set_message) = create_signal((String::new(), "info"));
    let (saved_hulls, set_saved_hulls) = create_signal(Vec::<String>::new());
    let (hull_text, set_hull_text) = create_signal(String::new());
    let debounce = store_value(None::<TimeoutHandle>);

    let refresh_saved = move || {
        let hulls = LocalStorage::open()
            .map(|backend| DeclarationStore::new(backend, &config.get_value()))
            .and_then(|store| store.saved_hulls())
            .unwrap_or_default();
        set_saved_hulls.set(hulls);
    };
    refresh_saved();

    let report_outcome = move |outcome: &HullOutcome| match outcome.warning() {
        Some(warning) => set_message.set((warning, "warning")),
        None => set_message.set((String::new(), "info")),
    };

    let on_hull_input = move |ev: ev::Event| {
        let value = event_target_value(&ev);
        set_hull_text.set(value.clone());
        if let Some(handle) = debounce.get_value() {
            handle.clear();
        }
        let delay = Duration::from_millis(config.with_value(|c| c.hull_debounce_ms));
        let handle = set_timeout_with_handle(
            move || {
                if let Some(outcome) = session.try_update(|s| s.set_hull(&value)) {
                    report_outcome(&outcome);
                }
            },
            delay,
        )
        .ok();
        debounce.set_value(handle);
    };

    let on_save = move |_| {
        let record = session.with(|s| s.record().clone());
        let result = LocalStorage::open()
            .map(|backend| DeclarationStore::new(backend, &config.get_value()))
            .and_then(|mut store| store.save(&record));
        match result {
            Ok(stored) => {
                set_message.set((
                    format!("Declaration for Hull {} saved successfully!", stored.hull_number),
                    "success",
                ));
                refresh_saved();
            }
            Err(err @ SailError::Validation(_)) => alert(&err.to_string()),
            Err(err) => alert(&format!("Error saving declaration\n\n{err}")),
        }
    };

    let on_load = move |_| {
        let hull = hull_text.get_untracked();
        let loaded = LocalStorage::open()
            .map(|backend| DeclarationStore::new(backend, &config.get_value()))
            .and_then(|store| store.load(&hull));
        let saved = match loaded {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                alert(&format!("No saved declaration found for Hull {}.", hull.trim()));
                return;
            }
            Err(err @ SailError::Validation(_)) => {
                alert(&err.to_string());
                return;
            }
            Err(err) => {
                alert(&format!("Error loading declaration\n\n{err}"));
                return;
            }
        };
        if let Some(handle) = debounce.get_value() {
            handle.clear();
        }
        if let Some(outcome) = session.try_update(|s| s.restore_fields(&saved)) {
            report_outcome(&outcome);
        }
        // Slot values go in once the candidate lists have rendered.
        let delay = Duration::from_millis(config.with_value(|c| c.settle_delay_ms));
        set_timeout(
            move || {
                let skipped = session
                    .try_update(|s| s.restore_slots(&saved))
                    .unwrap_or_default();
                let saved_on = saved
                    .saved_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let mut text = format!(
                    "Declaration for Hull {} loaded successfully! (Saved: {saved_on})",
                    saved.hull_number
                );
                if !skipped.is_empty() {
                    let names: Vec<&str> = skipped.iter().map(|slot| slot.label()).collect();
                    text.push_str(&format!(" No longer available: {}.", names.join(", ")));
                }
                set_message.set((text, "success"));
            },
            delay,
        );
    };

    let on_clear = move |_| session.update(|s| s.clear());

    let on_print = move |_| {
        let event = config.with_value(|c| c.event_name.clone());
        match session.with(|s| render_summary(s, &event, Utc::now())) {
            Ok(html) => {
                if let Err(err) = open_print_window(&html) {
                    alert(&err);
                }
            }
            Err(SailError::Validation(errors)) => alert(&format!(
                "Please fix the following errors:\n\n{}",
                errors.join("\n")
            )),
            Err(err) => alert(&err.to_string()),
        }
    };

    let slot_views = Slot::ALL
        .into_iter()
        .map(|slot| {
            // Called directly: the `view!` macro treats a `slot` attribute as a slot marker.
            SlotSelect(
                SlotSelectProps::builder()
                    .session(session)
                    .slot(slot)
                    .set_message(set_message)
                    .build(),
            )
        })
        .collect_view();

    view! {
        <section class="declaration">
            <h2>"Sail Declaration"</h2>
            <label for="hullNumber">"Hull Number"</label>
            <input id="hullNumber" type="text" prop:value=move || hull_text.get() on:input=on_hull_input/>
            <TextInput session=session field=TextField::Owner/>
            <TextInput session=session field=TextField::BoatName/>
            <TextInput session=session field=TextField::Email input_type="email"/>
            <TextInput session=session field=TextField::Mobile input_type="tel"/>
            {slot_views}
            <TextInput session=session field=TextField::Spinnaker1Color/>
            <TextInput session=session field=TextField::Spinnaker2Color/>
            <div class="actions">
                <button on:click=on_save>"Save"</button>
                <button on:click=on_load>"Load"</button>
                <button on:click=on_clear>"Clear Sails"</button>
                <button on:click=on_print>"Print"</button>
            </div>
            <p class=move || format!("message {}", message.get().1)>{move || message.get().0}</p>
            <p class="note">
                {move || {
                    let hulls = saved_hulls.get();
                    if hulls.is_empty() {
                        "No saved declarations.".to_string()
                    } else {
                        format!("Saved declarations: {}", hulls.join(", "))
                    }
                }}
            </p>
        </section>
    }
}

#[component]
pub fn App() -> impl IntoView {
    let config = Config::default();
    let (records, set_records) = create_signal(Option::<Arc<RecordStore>>::None);
    let (status, set_status) = create_signal(String::from("Loading sail data..."));

    let url = config.data_url.clone();
    spawn_local(async move {
        match fetch_records(&url).await {
            Ok(store) => {
                set_status.set(format!("{} sail records loaded.", store.len()));
                set_records.set(Some(Arc::new(store)));
            }
            Err(err) => set_status.set(format!("Error loading data: {err}")),
        }
    });

    let form_config = config.clone();
    let declaration_view = move || {
        records.get().map(|store| {
            let config = form_config.clone();
            view! { <DeclarationForm store=store config=config/> }
        })
    };

    view! {
        <main>
            <header>
                <h1>"Fleet Sails"</h1>
                <p class="note">{move || status.get()}</p>
            </header>
            <HeatmapPanel records=records/>
            {declaration_view}
            <footer>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </footer>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}
