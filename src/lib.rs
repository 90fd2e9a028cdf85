// src/lib.rs

pub mod api;
pub mod batch;
pub mod config;
pub mod converter;
pub mod easyeda_models;
pub mod error;
pub mod file_writer;
pub mod geometry;
pub mod importer;
pub mod kicad_models;
pub mod model3d;
pub mod symbol_lib;

pub use batch::{
    BatchEvent, BatchExporter, BatchReport, CancelFlag, ComponentResult, ExportOptions,
    ExportRequest, Outcome,
};
pub use config::{ExportConfig, FetchConfig, KicadVersion};
pub use error::{Error, Result};

/// Exports the requested components from the public EasyEDA service.
pub async fn export_components(
    request: ExportRequest,
    config: &ExportConfig,
) -> Result<BatchReport> {
    let api = api::EasyedaApi::new(config.fetch.clone())?;
    BatchExporter::new(api)
        .with_pool_cap(config.pool_cap)
        .export(request)
        .await
}
