use cellbatch::models::MANIFEST_FILE_NAME;
use cellbatch::services::table_merger::read_table;
use cellbatch::{
    merge, plan, AppError, BatchRunner, Config, ContainerRuntime, RuntimeIdentity, WorkerSpec,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_table(dir: &Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

fn rows_of(path: &Path) -> Vec<String> {
    read_table(path)
        .unwrap()
        .rows
        .iter()
        .map(|r| r.iter().collect::<Vec<_>>().join(","))
        .collect()
}

/// 模拟三个批次各自产出的结果目录
fn batch_outputs(root: &Path) -> Vec<PathBuf> {
    let a = root.join("out/001");
    let b = root.join("out/002");
    let c = root.join("out/003");
    write_table(&a, "cells.csv", "ImageNumber,Area\n1,10\n1,12\n");
    write_table(&b, "cells.csv", "ImageNumber,Area\n5,7\n");
    write_table(&c, "cells.csv", "ImageNumber,Area\n9,3\n9,4\n9,5\n");
    write_table(&a, "Image.csv", "ImageNumber\n1\n");
    write_table(&c, "Image.csv", "ImageNumber\n9\n");
    for dir in [&a, &b, &c] {
        write_table(dir, MANIFEST_FILE_NAME, "Key,Value\nRun,1\n");
    }
    vec![a, b, c]
}

#[test]
fn test_merge_row_counts_add_up() {
    let root = TempDir::new().unwrap();
    let dirs = batch_outputs(root.path());
    let out = root.path().join("merged");

    let report = merge(&dirs, &out).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.written["cells"], 6);
    assert_eq!(report.written["Image"], 2);
    assert!(!out.join(MANIFEST_FILE_NAME).exists());
    assert_eq!(
        rows_of(&out.join("cells.csv")),
        ["1,10", "1,12", "5,7", "9,3", "9,4", "9,5"]
    );
}

#[test]
fn test_merge_is_associative_in_order() {
    let root = TempDir::new().unwrap();
    let dirs = batch_outputs(root.path());

    let direct = root.path().join("direct");
    merge(&dirs, &direct).unwrap();

    // 先合并 [A, B]，再把结果与 [C] 合并；中间目录的路径排在 C 之前
    let partial = root.path().join("out/002-partial");
    merge(&dirs[..2], &partial).unwrap();
    let staged = root.path().join("staged");
    merge(&[partial, dirs[2].clone()], &staged).unwrap();

    for name in ["cells.csv", "Image.csv"] {
        assert_eq!(rows_of(&direct.join(name)), rows_of(&staged.join(name)), "{name}");
    }
}

#[test]
fn test_plan_and_worker_commands_agree() {
    let batches = plan(10, 4).unwrap();
    let ids: Vec<_> = batches.iter().map(|b| b.id.clone()).collect();
    assert_eq!(ids, ["001", "002", "003"]);

    let config = Config::default();
    let last_indices: Vec<String> = batches
        .into_iter()
        .map(|batch| {
            let spec = WorkerSpec::from_config(
                batch,
                Path::new("/p/a.cppipe"),
                Path::new("/p/images"),
                Path::new("/p/out"),
                RuntimeIdentity::new(501, 20),
                &config,
            )
            .unwrap();
            let args = ContainerRuntime::run_args(&spec);
            let pos = args.iter().position(|a| a == "-l").unwrap();
            args[pos + 1].clone()
        })
        .collect();

    assert_eq!(last_indices, ["3", "7", "9"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_then_merge_end_to_end() {
    let root = TempDir::new().unwrap();
    let pipeline = root.path().join("measure.cppipe");
    fs::write(&pipeline, "CellProfiler Pipeline: http://www.cellprofiler.org").unwrap();
    let images = root.path().join("images");
    fs::create_dir_all(&images).unwrap();
    for i in 0..12 {
        let name = format!("r01c01f01p01-ch{}sk1fk1fl1_{i}.tiff", i % 4 + 1);
        fs::write(images.join(name), b"").unwrap();
    }
    let output = root.path().join("results");

    let config = Config {
        batch_size: 2,
        runtime_program: "echo".to_string(),
        ..Config::default()
    };
    let runner = BatchRunner::new(config, RuntimeIdentity::new(1000, 1000)).unwrap();
    let inputs = runner.prepare(&pipeline, &output, &images).unwrap();
    let report = runner.run(&inputs, false).await.unwrap();

    // 12 / 4 + 1 = 4 张逻辑图像
    assert_eq!(report.started.len(), 2);

    // 假装 worker 已经写出结果
    let mut dirs = Vec::new();
    for handle in &report.started {
        let dir = output.join(&handle.batch_id);
        write_table(&dir, "nuclei.csv", &format!("Batch\n{}\n", handle.batch_id));
        dirs.push(dir);
    }

    let merged = root.path().join("merged");
    let merge_report = merge(&dirs, &merged).unwrap();
    assert_eq!(merge_report.written["nuclei"], 2);
    assert_eq!(rows_of(&merged.join("nuclei.csv")), ["001", "002"]);
}

#[test]
fn test_missing_image_dir_is_reported_before_work() {
    let root = TempDir::new().unwrap();
    let pipeline = root.path().join("a.cppipe");
    fs::write(&pipeline, "").unwrap();
    let output = root.path().join("results");

    let runner = BatchRunner::new(Config::default(), RuntimeIdentity::new(1000, 1000)).unwrap();
    let err = runner
        .prepare(&pipeline, &output, &root.path().join("missing"))
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound { .. }));
    assert!(!output.exists());
}
