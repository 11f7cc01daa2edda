//! 结果合并服务 - 业务能力层
//!
//! 扫描多个批次输出目录，按逻辑表名（去掉目录和扩展名的文件名）分组，
//! 按目录顺序拼接同名表，每个逻辑表名写出一个 `{output_dir}/{name}.csv`。
//!
//! ## 前置条件
//!
//! 调用方必须保证所有 worker 都已结束。合并过程不检查这一点，
//! 与仍在运行的 worker 并发执行可能读到写了一半的表。
//!
//! ## 已知限制
//!
//! 同一逻辑表名的所有行会先全部读入内存再写出，单个表的大小受内存限制。

use crate::error::{AppError, AppResult};
use crate::models::{MergeGroup, MergeReport, MANIFEST_FILE_NAME, TABLE_EXTENSION};
use csv::StringRecord;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 读入内存的一张表
#[derive(Debug, Clone)]
pub struct Table {
    pub header: StringRecord,
    pub rows: Vec<StringRecord>,
}

/// 合并多个目录中的同名表
///
/// # 参数
/// - `source_dirs`: 批次输出目录，处理前按路径排序
/// - `output_dir`: 合并结果目录，不存在时自动创建
///
/// # 返回
/// 每个逻辑表名的结果；单个表名失败不影响其它表名。
/// 来源目录不存在或无法列举时直接返回错误，不写任何输出。
pub fn merge(source_dirs: &[PathBuf], output_dir: &Path) -> AppResult<MergeReport> {
    let groups = collect_groups(source_dirs)?;

    fs::create_dir_all(output_dir).map_err(|e| AppError::io(output_dir, e))?;

    let mut report = MergeReport::default();
    for group in groups {
        match merge_group(&group, output_dir) {
            Ok(rows) => {
                report.written.insert(group.name, rows);
            }
            Err(e) => {
                warn!("⚠️ 表 {} 合并失败: {}", group.name, e);
                report.failed.insert(group.name, e);
            }
        }
    }

    Ok(report)
}

/// 扫描目录并按逻辑表名分组
///
/// 目录按路径字节序处理，目录内的文件按文件名排序
pub fn collect_groups(source_dirs: &[PathBuf]) -> AppResult<Vec<MergeGroup>> {
    let mut dirs: Vec<&PathBuf> = source_dirs.iter().collect();
    dirs.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    for dir in &dirs {
        if !dir.is_dir() {
            return Err(AppError::not_found(dir));
        }
    }

    let mut groups: BTreeMap<String, MergeGroup> = BTreeMap::new();
    for dir in dirs {
        debug!("处理目录: {}", dir.display());

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| AppError::io(dir, e))? {
            let entry = entry.map_err(|e| AppError::io(dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(name) = logical_name(&file_name) {
                let name = name.to_string();
                files.push((file_name, name, path));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, name, path) in files {
            groups
                .entry(name.clone())
                .or_insert_with(|| MergeGroup::new(name))
                .sources
                .push(path);
        }
    }

    Ok(groups.into_values().collect())
}

/// 文件名对应的逻辑表名；不参与合并的文件返回 `None`
///
/// 扩展名忽略大小写，保留的清单文件 `Experiment.csv` 总是被排除
pub fn logical_name(file_name: &str) -> Option<&str> {
    if file_name == MANIFEST_FILE_NAME {
        return None;
    }
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || !extension.eq_ignore_ascii_case(TABLE_EXTENSION) {
        return None;
    }
    Some(stem)
}

/// 读取一张表，第一行为表头
pub fn read_table(path: &Path) -> AppResult<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| AppError::read_failed(path, e))?;

    let header = reader
        .headers()
        .map_err(|e| AppError::read_failed(path, e))?
        .clone();
    if header.is_empty() {
        return Err(AppError::read_failed(path, "表为空，没有表头"));
    }

    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::read_failed(path, e))?;

    Ok(Table { header, rows })
}

/// 合并一个分组并写出，返回写出的数据行数
///
/// 所有来源都读取成功后才开始写；每个来源的列数必须与第一个来源的表头一致，
/// 否则报告该来源的 `ReadFailure`。写入先落到临时文件再改名，
/// 失败时不会留下半个表
fn merge_group(group: &MergeGroup, output_dir: &Path) -> AppResult<usize> {
    let mut header: Option<StringRecord> = None;
    let mut rows = Vec::new();

    for source in &group.sources {
        debug!("读取文件: {}", source.display());
        let table = read_table(source)?;
        match header.as_ref().map(StringRecord::len) {
            Some(width) if width != table.header.len() => {
                return Err(AppError::read_failed(
                    source,
                    format!(
                        "表头有 {} 列，与第一个来源的 {} 列不一致",
                        table.header.len(),
                        width
                    ),
                ));
            }
            Some(_) => {}
            None => header = Some(table.header),
        }
        rows.extend(table.rows);
    }

    let Some(header) = header else {
        return Ok(0);
    };

    let output_path = output_dir.join(format!("{}.{}", group.name, TABLE_EXTENSION));
    let temp_path = output_dir.join(format!(".{}.{}.tmp", group.name, TABLE_EXTENSION));

    info!(
        "💾 保存合并表: {} ({} 个来源, {} 行)",
        output_path.display(),
        group.sources.len(),
        rows.len()
    );

    if let Err(e) = write_table(&temp_path, &header, &rows) {
        let _ = fs::remove_file(&temp_path);
        return Err(AppError::write_failed(&output_path, e));
    }
    fs::rename(&temp_path, &output_path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        AppError::write_failed(&output_path, e)
    })?;

    Ok(rows.len())
}

fn write_table(path: &Path, header: &StringRecord, rows: &[StringRecord]) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new().from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
