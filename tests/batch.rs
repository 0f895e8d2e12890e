mod common;

use common::{farm_document, ndvi_response, FakeClient};
use farm_baseline::batch::{BatchOptions, BatchProcessor};
use farm_baseline::farm::FarmLoader;
use farm_baseline::report::FarmReport;
use farm_baseline::{
    AnalysisOptions, AnalysisSelection, BaselineConfig, BaselineEngine, BaselineError,
    CancelToken, ComputationKind, EstimationMethod,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn healthy_client() -> Arc<FakeClient> {
    Arc::new(
        FakeClient::new()
            .with_vegetation(ndvi_response())
            .with_forest(json!({ "deforestationPercent": 2.3, "areaLostHa": 0.23, "initialForestHa": 10.0 }))
            .with_biomass(json!({ "totalAgbTonnes": 900.0 })),
    )
}

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) {
    std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn options(output_dir: &Path, continue_on_error: bool) -> BatchOptions {
    BatchOptions {
        analysis: AnalysisOptions::default(),
        output_dir: output_dir.to_path_buf(),
        continue_on_error,
        concurrency: 1,
        show_progress: false,
    }
}

#[tokio::test]
async fn one_failing_analysis_does_not_hide_the_others() {
    let client = Arc::new(
        FakeClient::new()
            .with_vegetation(ndvi_response())
            .failing_forest(|| BaselineError::ComputationTimeout {
                kind: ComputationKind::Deforestation,
                secs: 90,
            })
            .with_biomass(json!({ "totalAgbTonnes": 900.0 })),
    );
    let engine = BaselineEngine::new(client, BaselineConfig::default());
    let farm = FarmLoader::from_value(&farm_document("Finca Uno"), "finca-uno").unwrap();

    let analysis = engine
        .analyze_farm(&farm, &AnalysisOptions::default(), &CancelToken::never())
        .await;

    assert!(analysis.ndvi.as_ref().unwrap().completed().is_some());
    assert!(analysis.carbon.as_ref().unwrap().completed().is_some());
    let failures = analysis.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "deforestation");
    assert_eq!(failures[0].1.code, "COMPUTATION_TIMEOUT");

    let report = serde_json::to_value(FarmReport::new(&farm, analysis)).unwrap();
    assert_eq!(report["farmInfo"]["name"], "Finca Uno");
    assert_eq!(report["analysis"]["deforestation"]["error"]["code"], "COMPUTATION_TIMEOUT");
    assert_eq!(report["analysis"]["ndvi"]["mean"], json!(0.7123));
}

#[tokio::test]
async fn selection_limits_the_analyses() {
    let client = healthy_client();
    let engine = BaselineEngine::new(client.clone(), BaselineConfig::default());
    let farm = FarmLoader::from_value(&farm_document("Finca Dos"), "dos").unwrap();
    let options = AnalysisOptions {
        selection: AnalysisSelection::CarbonOnly,
        method: Some(EstimationMethod::Satellite),
        ..AnalysisOptions::default()
    };

    let analysis = engine
        .analyze_farm(&farm, &options, &CancelToken::never())
        .await;

    assert!(analysis.ndvi.is_none());
    assert!(analysis.deforestation.is_none());
    assert!(analysis.is_complete());
    assert_eq!(client.vegetation_calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.biomass_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn farm_inventory_selects_field_method() {
    let client = healthy_client();
    let engine = BaselineEngine::new(client.clone(), BaselineConfig::default());
    let mut document = farm_document("Finca Tres");
    document["treeInventory"] = json!([{ "species": "Coffea arabica", "dbh_cm": 12.0, "height_m": 3.0, "count": 400 }]);
    let farm = FarmLoader::from_value(&document, "tres").unwrap();

    let options = AnalysisOptions {
        selection: AnalysisSelection::CarbonOnly,
        ..AnalysisOptions::default()
    };
    let analysis = engine.analyze_farm(&farm, &options, &CancelToken::never()).await;

    let carbon = analysis.carbon.unwrap();
    let carbon = carbon.completed().unwrap();
    assert_eq!(carbon.methodology, EstimationMethod::Field);
    assert_eq!(carbon.trees_analyzed, 400);
    assert_eq!(client.biomass_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_continues_past_bad_files() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_json(input.path(), "b_farm.geojson", &farm_document("Finca B"));
    write_json(input.path(), "a_farm.json", &farm_document("Finca A"));
    std::fs::write(input.path().join("c_broken.json"), "{ not json").unwrap();
    std::fs::write(input.path().join("notes.txt"), "ignored").unwrap();

    let engine = BaselineEngine::new(healthy_client(), BaselineConfig::default());
    let summary = BatchProcessor::new(&engine)
        .run(input.path(), &options(output.path(), true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);

    let names: Vec<&str> = summary.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a_farm.json", "b_farm.geojson", "c_broken.json"]);

    let first = &summary.results[0];
    assert_eq!(first.name.as_deref(), Some("Finca A"));
    assert_eq!(first.farm_id.as_deref(), Some("farm-a_farm"));
    assert_eq!(first.eudr_compliant, Some(true));
    assert_eq!(first.deforestation_percent, Some(2.3));
    assert!(first.carbon_tco2e.unwrap() > 0.0);
    assert!(summary.results[2].error.as_deref().unwrap().contains("not valid JSON"));

    assert!(output.path().join("a_farm_analysis.json").is_file());
    assert!(output.path().join("b_farm_analysis.json").is_file());
    assert!(!output.path().join("c_broken_analysis.json").exists());

    let csv = output.path().join("summary.csv");
    let json_path = output.path().join("summary.json");
    summary.write(Some(&json_path), Some(&csv)).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    assert_eq!(text.lines().count(), 4);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(written["succeeded"], json!(2));
    assert_eq!(written["results"][0]["carbonTCO2e"], json!(first.carbon_tco2e.unwrap()));
}

#[tokio::test]
async fn batch_stops_at_first_failure_unless_told_otherwise() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(input.path().join("a_broken.json"), "[]").unwrap();
    write_json(input.path(), "b_farm.json", &farm_document("Finca B"));
    write_json(input.path(), "c_farm.json", &farm_document("Finca C"));

    let engine = BaselineEngine::new(healthy_client(), BaselineConfig::default());
    let summary = BatchProcessor::new(&engine)
        .run(input.path(), &options(output.path(), false), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn empty_directory_yields_empty_summary() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let engine = BaselineEngine::new(healthy_client(), BaselineConfig::default());

    let summary = BatchProcessor::new(&engine)
        .run(input.path(), &options(output.path(), true), &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(summary.processed, 0);
    assert!(summary.results.is_empty());
}

#[test]
fn missing_input_directory_is_an_error() {
    let err = BatchProcessor::find_farm_files(Path::new("/nonexistent/farms")).unwrap_err();
    assert_eq!(err.code(), "FARM_FILE_ERROR");
}

#[test]
fn loading_keeps_file_order() {
    let input = TempDir::new().unwrap();
    for name in ["c.json", "a.json", "b.json"] {
        write_json(input.path(), name, &farm_document(name));
    }
    let files = BatchProcessor::find_farm_files(input.path()).unwrap();
    let loaded = BatchProcessor::load_all(&files);
    let names: Vec<String> = loaded
        .iter()
        .map(|(_, farm)| farm.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["a.json", "b.json", "c.json"]);
}
