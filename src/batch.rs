//! Batch export: fetch, decode, encode and write a list of components on a
//! bounded pool of tokio tasks.

use crate::api::ComponentSource;
use crate::config::{DEFAULT_FILE_PREFIX, DEFAULT_POOL_CAP, KicadVersion};
use crate::converter::{Encoder, FootprintEncoder, SymbolEncoder};
use crate::easyeda_models::EeComponent;
use crate::error::{Error, Result};
use crate::file_writer::KicadLibrary;
use crate::importer;
use crate::model3d::ModelEncoder;
use crate::symbol_lib::{self, SymbolWrite};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::{Semaphore, mpsc::UnboundedSender};

const DEFAULT_EXPORT_DIR: &str = "output";

static LCSC_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^A-Za-z0-9])C(\d{1,12})(?:$|[^0-9])").expect("LCSC id pattern is valid")
});

/// Coarse lock for creating output directories.
static DIR_LOCK: Mutex<()> = Mutex::new(());

/// Recovers an LCSC part number (`C` + digits) from a raw id, a product URL
/// or free text. A bare number is taken as the digits of the part number.
pub fn extract_lcsc_id(input: &str) -> Option<String> {
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("C{input}"));
    }
    LCSC_ID
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|digits| format!("C{}", digits.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Symbol,
    Footprint,
    Model3d,
    Datasheet,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Symbol,
        ArtifactKind::Footprint,
        ArtifactKind::Model3d,
        ArtifactKind::Datasheet,
    ];

    fn label(self) -> &'static str {
        match self {
            ArtifactKind::Symbol => "symbol",
            ArtifactKind::Footprint => "footprint",
            ArtifactKind::Model3d => "model3d",
            ArtifactKind::Datasheet => "datasheet",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub symbol: bool,
    pub footprint: bool,
    pub model3d: bool,
    pub datasheet: bool,
    /// Replace components that already exist in the symbol library.
    pub overwrite: bool,
    pub kicad_version: KicadVersion,
    /// Reference models through `${KIPRJMOD}` instead of an absolute path.
    pub project_relative_models: bool,
}

impl ExportOptions {
    pub fn requested(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Symbol => self.symbol,
            ArtifactKind::Footprint => self.footprint,
            ArtifactKind::Model3d => self.model3d,
            ArtifactKind::Datasheet => self.datasheet,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRequest {
    pub component_ids: Vec<String>,
    #[serde(default)]
    pub options: ExportOptions,
    #[serde(default)]
    pub export_path: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactStatus {
    pub success: bool,
    pub message: String,
    #[serde(skip)]
    pub requested: bool,
}

impl ArtifactStatus {
    fn ok(message: impl Into<String>) -> Self {
        ArtifactStatus {
            success: true,
            message: message.into(),
            requested: true,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        ArtifactStatus {
            success: false,
            message: message.into(),
            requested: true,
        }
    }

    fn not_requested() -> Self {
        ArtifactStatus {
            success: false,
            message: "not requested".to_string(),
            requested: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStatus {
    pub symbol: ArtifactStatus,
    pub footprint: ArtifactStatus,
    pub model3d: ArtifactStatus,
    pub datasheet: ArtifactStatus,
}

impl ExportStatus {
    fn new(options: &ExportOptions) -> Self {
        let mut status = ExportStatus::default();
        for kind in ArtifactKind::ALL {
            *status.get_mut(kind) = if options.requested(kind) {
                ArtifactStatus::failed("pending")
            } else {
                ArtifactStatus::not_requested()
            };
        }
        status
    }

    pub fn get(&self, kind: ArtifactKind) -> &ArtifactStatus {
        match kind {
            ArtifactKind::Symbol => &self.symbol,
            ArtifactKind::Footprint => &self.footprint,
            ArtifactKind::Model3d => &self.model3d,
            ArtifactKind::Datasheet => &self.datasheet,
        }
    }

    fn get_mut(&mut self, kind: ArtifactKind) -> &mut ArtifactStatus {
        match kind {
            ArtifactKind::Symbol => &mut self.symbol,
            ArtifactKind::Footprint => &mut self.footprint,
            ArtifactKind::Model3d => &mut self.model3d,
            ArtifactKind::Datasheet => &mut self.datasheet,
        }
    }

    /// Marks every requested artifact as failed with the same reason.
    fn fail_requested(&mut self, message: &str) {
        for kind in ArtifactKind::ALL {
            let slot = self.get_mut(kind);
            if slot.requested {
                *slot = ArtifactStatus::failed(message);
            }
        }
    }

    fn outcome(&self) -> Outcome {
        let requested: Vec<&ArtifactStatus> = ArtifactKind::ALL
            .iter()
            .map(|k| self.get(*k))
            .filter(|s| s.requested)
            .collect();
        let succeeded = requested.iter().filter(|s| s.success).count();
        if succeeded == requested.len() {
            Outcome::Success
        } else if succeeded == 0 {
            Outcome::Failure
        } else {
            Outcome::Partial
        }
    }
}

/// Serialized as `true`, `false` or `"partial"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Outcome::Success => serializer.serialize_bool(true),
            Outcome::Failure => serializer.serialize_bool(false),
            Outcome::Partial => serializer.serialize_str("partial"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentResult {
    #[serde(rename = "componentId")]
    pub component_id: String,
    pub success: Outcome,
    pub files: Vec<PathBuf>,
    pub message: String,
    pub export_path: PathBuf,
    pub export_status: ExportStatus,
}

impl ComponentResult {
    fn finish(
        component_id: &str,
        export_path: PathBuf,
        files: Vec<PathBuf>,
        status: ExportStatus,
    ) -> Self {
        let success = status.outcome();
        let message = ArtifactKind::ALL
            .iter()
            .map(|k| (k.label(), status.get(*k)))
            .filter(|(_, s)| s.requested)
            .map(|(label, s)| format!("{label}: {}", s.message))
            .collect::<Vec<_>>()
            .join("; ");
        ComponentResult {
            component_id: component_id.to_string(),
            success,
            files,
            message: if message.is_empty() {
                "nothing requested".to_string()
            } else {
                message
            },
            export_path,
            export_status: status,
        }
    }

    fn failed(component_id: &str, export_path: PathBuf, mut status: ExportStatus, reason: &str) -> Self {
        status.fail_requested(reason);
        ComponentResult {
            component_id: component_id.to_string(),
            success: Outcome::Failure,
            files: Vec::new(),
            message: reason.to_string(),
            export_path,
            export_status: status,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub success_count: usize,
    pub partial_count: usize,
    pub failure_count: usize,
    /// Components never started because the batch was cancelled.
    pub cancelled: usize,
    /// In completion order.
    pub results: Vec<ComponentResult>,
}

impl BatchReport {
    fn from_results(total: usize, results: Vec<ComponentResult>) -> Self {
        let count = |o: Outcome| results.iter().filter(|r| r.success == o).count();
        BatchReport {
            total,
            success_count: count(Outcome::Success),
            partial_count: count(Outcome::Partial),
            failure_count: count(Outcome::Failure),
            cancelled: total.saturating_sub(results.len()),
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress {
        completed: usize,
        total: usize,
        component_id: String,
    },
    Completed(ComponentResult),
}

/// Cooperative cancellation, checked before each component starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-batch state shared by every component task.
struct Job<S> {
    source: Arc<S>,
    library: KicadLibrary,
    options: ExportOptions,
}

impl<S: ComponentSource> Job<S> {
    fn ensure_dirs(&self) -> Result<()> {
        let _guard = DIR_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        self.library.setup_directories()
    }

    async fn run(&self, raw_id: &str) -> ComponentResult {
        let export_path = self.library.path.clone();
        let status = ExportStatus::new(&self.options);

        let Some(lcsc_id) = extract_lcsc_id(raw_id) else {
            log::warn!("'{raw_id}' does not contain an LCSC part number");
            return ComponentResult::failed(raw_id, export_path, status, "not a valid LCSC id");
        };
        log::info!("Exporting {lcsc_id}");

        // Fetching
        let Some(data) = self.source.cad_data(&lcsc_id).await else {
            return ComponentResult::failed(&lcsc_id, export_path, status, "no CAD data found");
        };

        // Decoding
        let component = match importer::import_component(&lcsc_id, &data) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("{lcsc_id}: {e}");
                return ComponentResult::failed(&lcsc_id, export_path, status, &e.to_string());
            }
        };

        if let Err(e) = self.ensure_dirs() {
            return ComponentResult::failed(&lcsc_id, export_path, status, &e.to_string());
        }

        // Encoding, one artifact at a time
        let mut status = status;
        let mut files = Vec::new();
        for kind in ArtifactKind::ALL {
            if !self.options.requested(kind) {
                continue;
            }
            let result = match kind {
                ArtifactKind::Symbol => self.export_symbol(&component).await,
                ArtifactKind::Footprint => self.export_footprint(&component).await,
                ArtifactKind::Model3d => self.export_model(&component).await,
                ArtifactKind::Datasheet => self.export_datasheet(&lcsc_id, &data).await,
            };
            *status.get_mut(kind) = match result {
                Ok((written, message)) => {
                    files.extend(written);
                    ArtifactStatus::ok(message)
                }
                Err(e) => {
                    log::warn!("{lcsc_id}: {} failed: {e}", kind.label());
                    ArtifactStatus::failed(e.to_string())
                }
            };
        }

        ComponentResult::finish(&lcsc_id, export_path, files, status)
    }

    async fn export_symbol(&self, component: &EeComponent) -> Result<(Vec<PathBuf>, String)> {
        let symbol = component
            .symbol
            .as_ref()
            .ok_or_else(|| Error::MissingData("component has no symbol".to_string()))?;
        let version = self.options.kicad_version;
        let encoder = SymbolEncoder::new(version, self.library.prefix.clone());
        let (ki_symbol, block) = encoder.render(symbol)?;

        let lib_path = self.library.symbol_lib_path(version);
        let name = ki_symbol.name;
        let overwrite = self.options.overwrite;
        let write_path = lib_path.clone();
        let write_name = name.clone();
        let written = write_blocking("symbol", move || {
            symbol_lib::write_symbol(&write_path, &write_name, &block, version, overwrite)
        })
        .await?;

        let message = match written {
            SymbolWrite::Added => format!("added {name}"),
            SymbolWrite::Updated => format!("updated {name}"),
            SymbolWrite::AlreadyPresent => format!("{name} already present"),
        };
        Ok((vec![lib_path], message))
    }

    async fn export_footprint(&self, component: &EeComponent) -> Result<(Vec<PathBuf>, String)> {
        let footprint = component
            .footprint
            .as_ref()
            .ok_or_else(|| Error::MissingData("component has no footprint".to_string()))?;
        let encoder = FootprintEncoder::new(
            self.library.prefix.clone(),
            self.library
                .model_path_prefix(self.options.project_relative_models),
        );
        let mut ki_footprint = encoder.encode(footprint)?;
        if !self.options.model3d {
            ki_footprint.model_3d = None;
        }
        let message = format!("wrote {}", ki_footprint.name);
        let library = self.library.clone();
        let path = write_blocking("footprint", move || library.add_footprint(&ki_footprint)).await?;
        Ok((vec![path], message))
    }

    async fn export_model(&self, component: &EeComponent) -> Result<(Vec<PathBuf>, String)> {
        let mut model = component
            .model_3d
            .clone()
            .ok_or_else(|| Error::MissingData("component has no 3D model".to_string()))?;

        let (raw_obj, step) = tokio::join!(
            self.source.raw_3d_obj(&model.uuid),
            self.source.step_3d(&model.uuid)
        );
        if raw_obj.is_none() && step.is_none() {
            return Err(Error::MissingData(format!(
                "3D model {} could not be downloaded",
                model.uuid
            )));
        }
        model.raw_obj = raw_obj;
        model.step = step;

        let ki_model = ModelEncoder.encode(&model)?;
        let message = format!("wrote {}", ki_model.name);
        let library = self.library.clone();
        let written = write_blocking("3D model", move || library.add_3d_model(&ki_model)).await?;
        Ok((written, message))
    }

    async fn export_datasheet(&self, lcsc_id: &str, data: &Value) -> Result<(Vec<PathBuf>, String)> {
        let url = data["lcsc"]["url"]
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::MissingData("component has no datasheet URL".to_string()))?;
        let content = self
            .source
            .datasheet(url)
            .await
            .ok_or_else(|| Error::MissingData(format!("datasheet {url} could not be downloaded")))?;
        let library = self.library.clone();
        let lcsc_id = lcsc_id.to_string();
        let path =
            write_blocking("datasheet", move || library.add_datasheet(&lcsc_id, &content)).await?;
        Ok((vec![path], "downloaded".to_string()))
    }
}

/// Runs a blocking filesystem write on tokio's blocking pool.
async fn write_blocking<T, F>(what: &str, write: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(write)
        .await
        .map_err(|e| Error::Batch(format!("{what} writer task failed: {e}")))?
}

/// Runs export requests against a [`ComponentSource`].
pub struct BatchExporter<S> {
    source: Arc<S>,
    pool_cap: usize,
    cancel: CancelFlag,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl<S: ComponentSource + 'static> BatchExporter<S> {
    pub fn new(source: S) -> Self {
        BatchExporter {
            source: Arc::new(source),
            pool_cap: DEFAULT_POOL_CAP,
            cancel: CancelFlag::new(),
            events: None,
        }
    }

    pub fn with_pool_cap(mut self, cap: usize) -> Self {
        self.pool_cap = cap.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn export(&self, request: ExportRequest) -> Result<BatchReport> {
        let root = request
            .export_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR));
        let root = std::path::absolute(&root).unwrap_or(root);
        let prefix = request
            .file_prefix
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_string());

        let job = Arc::new(Job {
            source: Arc::clone(&self.source),
            library: KicadLibrary::new(root, prefix),
            options: request.options,
        });
        let ids = request.component_ids;
        let total = ids.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let on_done = {
            let completed = Arc::clone(&completed);
            let results = Arc::clone(&results);
            let events = self.events.clone();
            move |result: ComponentResult| {
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("[{done}/{total}] {} finished: {:?}", result.component_id, result.success);
                if let Some(tx) = &events {
                    let _ = tx.send(BatchEvent::Completed(result.clone()));
                    let _ = tx.send(BatchEvent::Progress {
                        completed: done,
                        total,
                        component_id: result.component_id.clone(),
                    });
                }
                results.lock().unwrap_or_else(|e| e.into_inner()).push(result);
            }
        };

        if total == 1 {
            if !self.cancel.is_cancelled() {
                on_done(job.run(&ids[0]).await);
            }
        } else if total > 1 {
            let semaphore = Arc::new(Semaphore::new(total.min(self.pool_cap)));
            let on_done = Arc::new(on_done);
            let mut handles = Vec::with_capacity(total);

            for raw_id in ids {
                let job = Arc::clone(&job);
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                let on_done = Arc::clone(&on_done);
                let task_id = raw_id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Batch(e.to_string()))?;
                    if cancel.is_cancelled() {
                        log::debug!("Skipping {task_id}: batch cancelled");
                        return Ok(());
                    }
                    (*on_done)(job.run(&task_id).await);
                    Ok::<(), Error>(())
                });
                handles.push((raw_id, handle));
            }

            for (raw_id, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(e) => {
                        log::error!("Worker for {raw_id} panicked: {e}");
                        let status = ExportStatus::new(&job.options);
                        (*on_done)(ComponentResult::failed(
                            &raw_id,
                            job.library.path.clone(),
                            status,
                            "worker task panicked",
                        ));
                    }
                }
            }
        }

        let results = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        Ok(BatchReport::from_results(total, results))
    }
}
