use easyeda_convertlib::{ExportConfig, ExportOptions, ExportRequest, export_components};
use std::{path::PathBuf, time::Instant};

#[tokio::main]
async fn main() {
    env_logger::init();

    let lcsc_ids = vec![
        "C22392644",
        "C324124",
        "C8952",
        "C2040",
        "C5659",
        "C2057889",
        "C42371095",
        "C5452091",
        "C209907",
    ]; // Example LCSC IDs

    let request = ExportRequest {
        component_ids: lcsc_ids.iter().map(|id| id.to_string()).collect(),
        options: ExportOptions {
            symbol: true,
            footprint: true,
            model3d: true,
            ..Default::default()
        },
        export_path: Some(PathBuf::from("example_lib")),
        file_prefix: None,
    };

    let start_time = Instant::now();
    match export_components(request, &ExportConfig::default()).await {
        Ok(report) => {
            for result in &report.results {
                println!("{}: {:?} ({})", result.component_id, result.success, result.message);
            }
            println!(
                "Exported {}/{} entries in : {:?}",
                report.success_count,
                report.total,
                start_time.elapsed()
            );
        }
        Err(e) => eprintln!("Error exporting components: {}", e),
    }
}
