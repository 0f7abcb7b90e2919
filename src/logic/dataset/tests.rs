use super::*;
use crate::logic::features::layout::INJECTION_FEATURE_COUNT;
use crate::logic::features::{BadWords, ExtractionMode};
use std::fs;
use tempfile::tempdir;

fn labelled(url: &str, body: &str, label: u8) -> LabelledRequest {
    serde_json::from_value(serde_json::json!({
        "url": url,
        "headers": {"User-Agent": "test"},
        "body": body,
        "label": label,
    }))
    .unwrap()
}

#[test]
fn test_dataset_csv_layout() {
    let dir = tempdir().unwrap();
    let writer = DatasetWriter::from_path(dir.path().to_path_buf());
    let extractor = FeatureExtractor::new(BadWords::builtin(), 3);

    let requests = vec![
        labelled("/index.html", "", 0),
        labelled("/search?q=' or 1=1 --", "", 1),
        labelled("/login", "user=<script>alert(1)</script>", 1),
    ];
    let rows = build_rows(&extractor, &requests);
    let layout = extractor.layout(ExtractionMode::Anomaly);
    let file = writer.write_csv(layout, &rows).unwrap();

    assert_eq!(file.rows, 3);
    assert_eq!(file.malicious, 2);

    let content = fs::read_to_string(&file.path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);

    let header: Vec<&str> = lines[0].split(',').collect();
    assert_eq!(header.len(), INJECTION_FEATURE_COUNT + 2);
    assert_eq!(header[0], "single_quote");
    assert_eq!(header[header.len() - 2], "badword");
    assert_eq!(header[header.len() - 1], LABEL_COLUMN);

    for line in &lines[1..] {
        assert_eq!(line.split(',').count(), header.len());
    }
    assert!(lines[1].ends_with(",0"));
    assert!(lines[2].ends_with(",1"));
}

#[test]
fn test_foreign_layout_rows_skipped() {
    let dir = tempdir().unwrap();
    let writer = DatasetWriter::from_path(dir.path().to_path_buf());
    let extractor = FeatureExtractor::new(BadWords::builtin(), 3);

    let request = labelled("/a", "", 1);
    let typed = extractor
        .extract(&request.descriptor(), ExtractionMode::ThreatType)
        .with_label(1);

    let file = writer
        .write_csv(extractor.layout(ExtractionMode::Anomaly), &[typed])
        .unwrap();
    assert_eq!(file.rows, 0);
}

#[test]
fn test_prune_keeps_newest() {
    let dir = tempdir().unwrap();
    let writer = DatasetWriter::from_path(dir.path().to_path_buf());
    for name in ["dataset-1.csv", "dataset-2.csv", "dataset-3.csv", "notes.txt"] {
        fs::write(dir.path().join(name), "x").unwrap();
    }

    assert_eq!(writer.prune(1).unwrap(), 2);
    assert!(dir.path().join("dataset-3.csv").exists());
    assert!(!dir.path().join("dataset-1.csv").exists());
    assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn test_baseline_rows_appended() {
    let dir = tempdir().unwrap();
    let extractor = FeatureExtractor::new(BadWords::builtin(), 3);
    let layout = extractor.layout(ExtractionMode::Anomaly);
    let rows = build_rows(&extractor, &[labelled("/fresh", "", 0)]);

    // Baseline with our header: one normal, one malicious, one broken row
    let header = format!("{},{}", layout.names().join(","), LABEL_COLUMN);
    let zeros = vec!["0"; layout.len()].join(",");
    let baseline = dir.path().join("original_data.csv");
    fs::write(&baseline, format!("{}\n{},0\n{},1\n1,2,3\n", header, zeros, zeros)).unwrap();

    let writer = DatasetWriter::from_path(dir.path().join("out")).with_baseline(Some(baseline));
    let file = writer.write_csv(layout, &rows).unwrap();
    assert_eq!(file.rows, 3);
    assert_eq!(file.baseline_rows, 2);
    assert_eq!(file.malicious, 1);
    assert_eq!(fs::read_to_string(&file.path).unwrap().lines().count(), 4);
}

#[test]
fn test_unusable_baseline_ignored() {
    let dir = tempdir().unwrap();
    let extractor = FeatureExtractor::new(BadWords::builtin(), 3);
    let layout = extractor.layout(ExtractionMode::Anomaly);
    let rows = build_rows(&extractor, &[labelled("/x", "", 1)]);

    let old_layout = dir.path().join("old_layout.csv");
    fs::write(&old_layout, "a,b,label\n1,2,1\n").unwrap();

    for baseline in [old_layout, dir.path().join("missing.csv")] {
        let writer = DatasetWriter::from_path(dir.path().join("out")).with_baseline(Some(baseline));
        let file = writer.write_csv(layout, &rows).unwrap();
        assert_eq!(file.rows, 1);
        assert_eq!(file.baseline_rows, 0);
    }
}

#[test]
fn test_balance_keeps_anomalies_and_caps_normals() {
    let extractor = FeatureExtractor::new(BadWords::builtin(), 3);
    let mut requests: Vec<_> = (0..10).map(|i| labelled(&format!("/page/{}", i), "", 0)).collect();
    requests.push(labelled("/q?id=1' or '1'='1", "", 1));
    requests.push(labelled("/<script>", "", 1));

    let balanced = balance_rows(build_rows(&extractor, &requests), NORMAL_PER_ANOMALY);
    let anomalies = balanced.iter().filter(|r| r.label() == Some(1)).count();
    assert_eq!(anomalies, 2);
    assert_eq!(balanced.len() - anomalies, 4);

    // Fewer normals than the cap: everything kept
    let few = vec![labelled("/a", "", 0), labelled("/b", "", 1)];
    assert_eq!(balance_rows(build_rows(&extractor, &few), NORMAL_PER_ANOMALY).len(), 2);

    // No anomalies: no normals survive
    let none = vec![labelled("/a", "", 0)];
    assert!(balance_rows(build_rows(&extractor, &none), NORMAL_PER_ANOMALY).is_empty());
}
